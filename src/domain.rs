//! Evaluation Domain Primitives
//!
//! Multiplicative subgroup `H = {1, ω, …, ω^{N−1}}` with vanishing polynomial
//! `Z_H(X) = X^N − 1`, the Lagrange basis evaluated at a single point, and
//! the in-place bit-reversal permutation.
//!
//! ## Single-point Lagrange evaluation
//!
//! The proving-key scalars are evaluations of the constraint polynomials at
//! one sampled point `t`, so no transform over the whole domain is needed.
//! [`lagrange_prefix_at`] produces `L_0(t), …, L_{m−1}(t)` with one batch
//! inversion and the recurrence
//!
//! ```text
//! L_0(t)     = (tᴺ − 1) · (t − 1)⁻¹ · N⁻¹
//! L_{i+1}(t) = ω · L_i(t) · (t − ωⁱ) · (t − ωⁱ⁺¹)⁻¹
//! ```
//!
//! which keeps the cost linear in `m`.
//!
//! ## Validation
//! `ω^N = 1` and `ω^{N/p} ≠ 1` for every prime `p | N`.

#![forbid(unsafe_code)]

use ark_ff::{batch_inversion, FftField, Field, One, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use blake3::Hasher;

use crate::{SetupError, F};

/// Largest supported domain exponent (`N ≤ 2^28`).
pub const MAX_LOG_DOMAIN: u32 = 28;

/// Multiplicative subgroup of order `N` (a power of two).
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Domain {
    /// Domain size `N`.
    pub n: usize,
    /// Generator `ω` of `H`.
    pub omega: F,
}

/// Errors produced by domain checks.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// Size is zero or not a power of two.
    #[error("domain size must be a positive power of two (got {0})")]
    BadSize(usize),
    /// No subgroup of that order exists in the scalar field.
    #[error("domain size 2^{0} exceeds the two-adicity of the scalar field")]
    NoRootOfUnity(u32),
    /// Generator check failed.
    #[error("omega^N != 1")]
    OmegaNPowNotOne,
    /// Generator has smaller order than `N`.
    #[error("omega is not primitive: omega^(N/{0}) == 1")]
    OmegaNotPrimitive(usize),
    /// Evaluation point is a root of `Z_H`.
    #[error("evaluation point lies in H")]
    PointInDomain,
    /// More evaluations requested than the domain has elements.
    #[error("requested {count} Lagrange evaluations from a domain of size {n}")]
    TooManyEvaluations {
        /// Requested count.
        count: usize,
        /// Domain size.
        n: usize,
    },
}

impl From<DomainError> for SetupError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::TooManyEvaluations { count, n } => SetupError::CapacityExceeded { supported: n, required: count },
            other => SetupError::InvalidCircuit(other.to_string()),
        }
    }
}

impl Domain {
    /// Subgroup of order `n`, generated by the field's canonical root of unity.
    pub fn new(n: usize) -> Result<Self, DomainError> {
        if n == 0 || !n.is_power_of_two() {
            return Err(DomainError::BadSize(n));
        }
        let omega = F::get_root_of_unity(n as u64).ok_or(DomainError::NoRootOfUnity(n.trailing_zeros()))?;
        let d = Self { n, omega };
        validate_domain_r(&d)?;
        Ok(d)
    }

    /// `ωⁱ`.
    pub fn element(&self, i: usize) -> F {
        pow_u64(self.omega, i as u64)
    }

    /// `N⁻¹` in the scalar field.
    pub fn size_inv(&self) -> F {
        // n ≥ 1 and far below the characteristic
        F::from(self.n as u64).inverse().unwrap_or_else(F::zero)
    }
}

#[inline]
pub(crate) fn pow_u64(mut base: F, mut exp: u64) -> F {
    let mut acc = F::one();
    while exp > 0 {
        if (exp & 1) == 1 {
            acc *= base;
        }
        base.square_in_place();
        exp >>= 1;
    }
    acc
}

// ------------------------- Hygiene / Validation -------------------------

fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut p = 2usize;
    while p * p <= n {
        if n % p == 0 {
            out.push(p);
            while n % p == 0 {
                n /= p;
            }
        }
        p += if p == 2 { 1 } else { 2 };
    }
    if n > 1 {
        out.push(n);
    }
    out
}

fn validate_domain_r(d: &Domain) -> Result<(), DomainError> {
    if !pow_u64(d.omega, d.n as u64).is_one() {
        return Err(DomainError::OmegaNPowNotOne);
    }
    for p in prime_factors(d.n) {
        if pow_u64(d.omega, (d.n / p) as u64).is_one() {
            return Err(DomainError::OmegaNotPrimitive(p));
        }
    }
    Ok(())
}

// ------------------------- Digest (for logs) -------------------------

/// Stable 32-byte digest of a `Domain`, logged next to derived artifacts.
pub fn domain_digest(d: &Domain) -> [u8; 32] {
    let mut h = Hasher::new();
    h.update(b"groth16-setup.domain.v1");
    h.update(&(d.n as u64).to_be_bytes());
    let mut bytes = Vec::with_capacity(32);
    if d.omega.serialize_compressed(&mut bytes).is_ok() {
        h.update(&bytes);
    }
    *h.finalize().as_bytes()
}

// ------------------------- Vanishing helpers -------------------------

/// `Z_H(z) = z^N − 1`.
#[inline]
pub fn vanishing_at(d: &Domain, z: F) -> F {
    pow_u64(z, d.n as u64) - F::one()
}

/// True iff `z ∈ H`.
#[inline]
pub fn is_in_domain(d: &Domain, z: F) -> bool {
    vanishing_at(d, z).is_zero()
}

// ------------------------- Lagrange basis at a point -------------------------

/// `L_0(t), …, L_{count−1}(t)` over `d`, for `t ∉ H` and `count ≤ N`.
pub fn lagrange_prefix_at(d: &Domain, t: F, count: usize) -> Result<Vec<F>, DomainError> {
    if count > d.n {
        return Err(DomainError::TooManyEvaluations { count, n: d.n });
    }
    if is_in_domain(d, t) {
        return Err(DomainError::PointInDomain);
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    // (t − ωⁱ) for i = 0..=count, inverted in one batch
    let mut inv = Vec::with_capacity(count + 1);
    let mut w = F::one();
    for _ in 0..=count {
        inv.push(t - w);
        w *= d.omega;
    }
    batch_inversion(&mut inv);

    let mut out = Vec::with_capacity(count);
    let mut l = vanishing_at(d, t) * inv[0] * d.size_inv();
    let mut w = F::one();
    for i in 0..count {
        out.push(l);
        // L_{i+1} = ω · L_i · (t − ωⁱ) · (t − ωⁱ⁺¹)⁻¹
        l *= d.omega * (t - w) * inv[i + 1];
        w *= d.omega;
    }
    Ok(out)
}

// ------------------------- Bit reversal -------------------------

/// In-place bit-reversal permutation; `a.len()` must be a power of two.
pub fn bit_reverse<T>(a: &mut [T]) {
    let n = a.len();
    if n <= 2 {
        return;
    }
    debug_assert!(n.is_power_of_two());
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            a.swap(i, j);
        }
    }
}
