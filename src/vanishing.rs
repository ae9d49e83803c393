//! Vanishing-polynomial vector {Z} and the initial δ
//!
//! For a domain of size `n`, `Z[i] = [τ^{i+n}]₁ − [τ^i]₁ = [τ^i·(τⁿ − 1)]₁`
//! for `i < n − 1`, read from the first `2n − 1` monomial powers of the
//! source. The vector is bit-reversed to FFT evaluation order and cut to
//! `n − 1` entries (the quotient has degree `n − 2`).
//!
//! δ starts at the group generators; the phase-2 ceremony randomizes it.

#![forbid(unsafe_code)]

use std::io::{Read, Seek};

use ark_bn254::G1Projective;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::Zero;
use tracing::debug;

use crate::domain::bit_reverse;
use crate::header::CircuitHeader;
use crate::ptau::SourceSrs;
use crate::{SetupError, G1, G2};

/// `[δ]₁`, `[δ]₂` before any contribution.
pub fn initial_delta() -> (G1, G2) {
    (G1::generator(), G2::generator())
}

/// `Z` from `2n − 1` consecutive powers `[τ^i]₁`.
pub fn z_from_powers(tau_g1: &[G1], n: usize) -> Result<Vec<G1>, SetupError> {
    if n == 0 || !n.is_power_of_two() {
        return Err(SetupError::InvalidCircuit(format!("domain size {n} is not a power of two")));
    }
    if tau_g1.len() < 2 * n - 1 {
        return Err(SetupError::AccountingMismatch { what: "tau powers for Z", expected: 2 * n - 1, actual: tau_g1.len() });
    }
    let mut z: Vec<G1Projective> = (0..n - 1).map(|i| tau_g1[i + n].into_group() - tau_g1[i]).collect();
    z.push(G1Projective::zero());
    let mut z = G1Projective::normalize_batch(&z);
    bit_reverse(&mut z);
    // the identity sits at n − 1 both before and after the permutation
    z.truncate(n - 1);
    Ok(z)
}

/// Read the powers from the source and derive `Z` for the header's domain.
pub fn derive_z<R: Read + Seek>(header: &CircuitHeader, srs: &mut SourceSrs<R>) -> Result<Vec<G1>, SetupError> {
    let n = header.domain as usize;
    let powers = srs.read_tau_g1(2 * n - 1)?;
    let z = z_from_powers(&powers, n)?;
    debug!(domain = n, entries = z.len(), "derived Z");
    Ok(z)
}
