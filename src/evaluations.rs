//! Streaming accumulation of the wire vectors {A}, {B}, {L}
//!
//! Constraint `i` owns the `i`-th entry of every Lagrange vector in the source
//! file. Each pass streams one vector in bounded chunks and folds the
//! matching linear expression of every constraint into a wire-indexed total:
//!
//! | output  | source vector     | expression |
//! |---------|-------------------|------------|
//! | `[A]₁`  | `[Lᵢ(τ)]₁`        | `L`        |
//! | `[B]₁`  | `[Lᵢ(τ)]₁`        | `R`        |
//! | `[B]₂`  | `[Lᵢ(τ)]₂`        | `R`        |
//! | `[L]₁`  | `[Lᵢ(τ)]₁`        | `O`        |
//! |         | `[α·Lᵢ(τ)]₁`      | `R`        |
//! |         | `[β·Lᵢ(τ)]₁`      | `L`        |
//!
//! `[A]₁` and `[B]₁` share one pass. `[L]₁` takes three sequential passes
//! into the same totals; each source vector is fully consumed before the next
//! is opened.

#![forbid(unsafe_code)]

use std::io::{Read, Seek};

use ark_bn254::{G1Projective, G2Projective};
use ark_ec::CurveGroup;
use tracing::debug;

use crate::accumulate::WireAccumulator;
use crate::ptau::{LagrangeG1, SourceSrs};
use crate::r1cs::{ConstraintSystem, R1C, Term};
use crate::{SetupError, F, G1, G2};

fn fold<C>(
    acc: &mut WireAccumulator<C>,
    cs: &ConstraintSystem,
    start: usize,
    chunk: &[C::Affine],
    select: impl Fn(&R1C) -> &[Term],
) -> Result<(), SetupError>
where
    C: CurveGroup<ScalarField = F>,
{
    let constraints = cs.constraints.get(start..start + chunk.len()).ok_or(SetupError::AccountingMismatch {
        what: "streamed points vs constraints",
        expected: cs.nb_constraints(),
        actual: start + chunk.len(),
    })?;
    for (c, value) in constraints.iter().zip(chunk) {
        acc.add_terms(select(c), value, &cs.coefficients)?;
    }
    Ok(())
}

/// `[A]₁` and `[B]₁` from one pass over `[Lᵢ(τ)]₁`.
pub fn derive_a_b1<R: Read + Seek>(
    cs: &ConstraintSystem,
    srs: &mut SourceSrs<R>,
) -> Result<(Vec<G1>, Vec<G1>), SetupError> {
    let mut a = WireAccumulator::<G1Projective>::new(cs.nb_wires());
    let mut b = WireAccumulator::<G1Projective>::new(cs.nb_wires());
    srs.stream_lagrange_g1(LagrangeG1::Tau, cs.nb_constraints(), |start, chunk| {
        fold(&mut a, cs, start, chunk, |c| c.l.as_slice())?;
        fold(&mut b, cs, start, chunk, |c| c.r.as_slice())
    })?;
    debug!(wires = cs.nb_wires(), "accumulated [A]1 and [B]1");
    Ok((a.into_affine(), b.into_affine()))
}

/// `[B]₂` from one pass over `[Lᵢ(τ)]₂`.
pub fn derive_b2<R: Read + Seek>(cs: &ConstraintSystem, srs: &mut SourceSrs<R>) -> Result<Vec<G2>, SetupError> {
    let mut b = WireAccumulator::<G2Projective>::new(cs.nb_wires());
    srs.stream_lagrange_g2(cs.nb_constraints(), |start, chunk| fold(&mut b, cs, start, chunk, |c| c.r.as_slice()))?;
    debug!(wires = cs.nb_wires(), "accumulated [B]2");
    Ok(b.into_affine())
}

/// `[L]₁ = O(τ) + R(α·τ) + L(β·τ)`, three passes into one accumulator.
pub fn derive_l<R: Read + Seek>(cs: &ConstraintSystem, srs: &mut SourceSrs<R>) -> Result<Vec<G1>, SetupError> {
    let m = cs.nb_constraints();
    let mut l = WireAccumulator::<G1Projective>::new(cs.nb_wires());
    srs.stream_lagrange_g1(LagrangeG1::Tau, m, |start, chunk| fold(&mut l, cs, start, chunk, |c| c.o.as_slice()))?;
    srs.stream_lagrange_g1(LagrangeG1::AlphaTau, m, |start, chunk| fold(&mut l, cs, start, chunk, |c| c.r.as_slice()))?;
    srs.stream_lagrange_g1(LagrangeG1::BetaTau, m, |start, chunk| fold(&mut l, cs, start, chunk, |c| c.l.as_slice()))?;
    debug!(wires = cs.nb_wires(), "accumulated [L]1");
    Ok(l.into_affine())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::accumulate_scalar;
    use crate::domain::{lagrange_prefix_at, Domain};
    use crate::ptau::dev::{write_dev_ptau, DevSecrets};
    use crate::r1cs::tests::toy_circuit;
    use ark_ec::AffineRepr;
    use ark_ff::Zero;
    use rand::{rngs::StdRng, SeedableRng};
    use std::io::Cursor;

    fn dev_srs(power: u8, chunk: usize) -> (SourceSrs<Cursor<Vec<u8>>>, DevSecrets) {
        let mut rng = StdRng::seed_from_u64(3);
        let secrets = DevSecrets::sample(&mut rng, power).unwrap();
        let mut bytes = Vec::new();
        write_dev_ptau(&mut bytes, power, 1, &secrets).unwrap();
        let len = bytes.len() as u64;
        (SourceSrs::open(Cursor::new(bytes), len, chunk).unwrap(), secrets)
    }

    /// Per-wire scalar `Σᵢ coeff · weightᵢ` over the selected expression.
    fn expected(cs: &ConstraintSystem, weights: &[F], select: impl Fn(&R1C) -> &[Term]) -> Vec<F> {
        let mut out = vec![F::zero(); cs.nb_wires()];
        for (c, w) in cs.constraints.iter().zip(weights) {
            for t in select(c) {
                accumulate_scalar(&mut out[t.wire], t.coeff, w, &cs.coefficients).unwrap();
            }
        }
        out
    }

    fn times_g1(scalars: &[F]) -> Vec<G1> {
        scalars.iter().map(|s| (G1::generator() * *s).into_affine()).collect()
    }

    #[test]
    fn a_b_l_match_scalar_evaluation() {
        let cs = toy_circuit();
        // chunk of 3 splits the four constraints unevenly
        let (mut srs, s) = dev_srs(3, 3);
        let lag = lagrange_prefix_at(&Domain::new(8).unwrap(), s.tau, cs.nb_constraints()).unwrap();

        let (a, b1) = derive_a_b1(&cs, &mut srs).unwrap();
        assert_eq!(a, times_g1(&expected(&cs, &lag, |c| c.l.as_slice())));
        assert_eq!(b1, times_g1(&expected(&cs, &lag, |c| c.r.as_slice())));

        let b2 = derive_b2(&cs, &mut srs).unwrap();
        let want: Vec<G2> =
            expected(&cs, &lag, |c| c.r.as_slice()).iter().map(|x| (G2::generator() * *x).into_affine()).collect();
        assert_eq!(b2, want);

        let l = derive_l(&cs, &mut srs).unwrap();
        let alpha_lag: Vec<F> = lag.iter().map(|x| *x * s.alpha).collect();
        let beta_lag: Vec<F> = lag.iter().map(|x| *x * s.beta).collect();
        let o = expected(&cs, &lag, |c| c.o.as_slice());
        let r = expected(&cs, &alpha_lag, |c| c.r.as_slice());
        let left = expected(&cs, &beta_lag, |c| c.l.as_slice());
        let sum: Vec<F> = (0..cs.nb_wires()).map(|w| o[w] + r[w] + left[w]).collect();
        assert_eq!(l, times_g1(&sum));
    }

    #[test]
    fn unused_wire_stays_at_identity() {
        let mut cs = toy_circuit();
        cs.nb_internal += 1;
        let (mut srs, _) = dev_srs(2, 16);
        let (a, _) = derive_a_b1(&cs, &mut srs).unwrap();
        assert_eq!(a.len(), 7);
        assert!(AffineRepr::is_zero(&a[6]));
    }

    #[test]
    fn circuit_larger_than_source_fails() {
        let mut cs = toy_circuit();
        let extra = cs.constraints[0].clone();
        cs.constraints.push(extra);
        let (mut srs, _) = dev_srs(2, 16);
        let err = derive_l(&cs, &mut srs).unwrap_err();
        assert!(matches!(err, SetupError::CapacityExceeded { supported: 4, required: 5 }));
    }
}
