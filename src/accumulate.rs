//! Coefficient-aware accumulation into per-wire totals
//!
//! Every pass over the constraints folds `coeff(t) · value` into the total of
//! wire `t.wire`, where `value` is the source element belonging to the
//! constraint. The coefficient tag is resolved once into a [`Step`]: the small
//! constants use additions (and a doubling), only table coefficients pay for a
//! scalar multiplication.
//!
//! Group totals are kept in projective form and normalized to affine once, in
//! a single batch, when the pass is complete.

#![forbid(unsafe_code)]

use ark_ec::CurveGroup;
use ark_ff::Field;

use crate::r1cs::{Coefficient, Term};
use crate::{SetupError, F};

/// Resolved action for one coefficient tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Coefficient 0: nothing to do.
    Skip,
    /// Coefficient 1.
    Add,
    /// Coefficient −1.
    Sub,
    /// Coefficient 2.
    Double,
    /// Arbitrary coefficient.
    Scale(F),
}

impl Step {
    /// Resolve `coeff` against the circuit's coefficient table.
    #[inline]
    pub fn resolve(coeff: Coefficient, table: &[F]) -> Result<Self, SetupError> {
        Ok(match coeff {
            Coefficient::Zero => Step::Skip,
            Coefficient::One => Step::Add,
            Coefficient::MinusOne => Step::Sub,
            Coefficient::Two => Step::Double,
            Coefficient::Table(i) => Step::Scale(*table.get(i).ok_or_else(|| {
                SetupError::InvalidCircuit(format!(
                    "coefficient table index {i} out of range (table has {})",
                    table.len()
                ))
            })?),
        })
    }
}

/// `res += coeff · value` in the group of `value`.
#[inline]
pub fn accumulate_point<C>(
    res: &mut C,
    coeff: Coefficient,
    value: &C::Affine,
    table: &[F],
) -> Result<(), SetupError>
where
    C: CurveGroup<ScalarField = F>,
{
    match Step::resolve(coeff, table)? {
        Step::Skip => {}
        Step::Add => *res += *value,
        Step::Sub => *res -= *value,
        Step::Double => {
            *res += *value;
            *res += *value;
        }
        Step::Scale(c) => *res += *value * c,
    }
    Ok(())
}

/// `res += coeff · value` in the scalar field.
#[inline]
pub fn accumulate_scalar(
    res: &mut F,
    coeff: Coefficient,
    value: &F,
    table: &[F],
) -> Result<(), SetupError> {
    match Step::resolve(coeff, table)? {
        Step::Skip => {}
        Step::Add => *res += value,
        Step::Sub => *res -= value,
        Step::Double => *res += value.double(),
        Step::Scale(c) => *res += c * value,
    }
    Ok(())
}

/// Wire-indexed group totals for one target vector.
#[derive(Debug)]
pub struct WireAccumulator<C: CurveGroup<ScalarField = F>> {
    totals: Vec<C>,
}

impl<C: CurveGroup<ScalarField = F>> WireAccumulator<C> {
    /// `nb_wires` totals, all at the identity.
    pub fn new(nb_wires: usize) -> Self {
        Self { totals: vec![C::zero(); nb_wires] }
    }

    /// Number of wires.
    pub fn len(&self) -> usize {
        self.totals.len()
    }

    /// True when there are no wires.
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Fold every term of one linear expression against `value`.
    pub fn add_terms(&mut self, terms: &[Term], value: &C::Affine, table: &[F]) -> Result<(), SetupError> {
        for t in terms {
            let nb_wires = self.totals.len();
            let slot = self.totals.get_mut(t.wire).ok_or_else(|| {
                SetupError::InvalidCircuit(format!("wire {} out of range ({nb_wires} wires)", t.wire))
            })?;
            accumulate_point(slot, t.coeff, value, table)?;
        }
        Ok(())
    }

    /// Batch-normalize the totals.
    pub fn into_affine(self) -> Vec<C::Affine> {
        C::normalize_batch(&self.totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bn254::{G1Projective, G2Projective};
    use ark_ec::{AffineRepr, Group};
    use ark_ff::{One, UniformRand, Zero};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn every_tag_matches_scalar_multiplication() {
        let mut rng = StdRng::seed_from_u64(1);
        let table = [F::rand(&mut rng)];
        let p = G1Projective::rand(&mut rng).into_affine();
        let cases = [
            (Coefficient::Zero, F::zero()),
            (Coefficient::One, F::one()),
            (Coefficient::MinusOne, -F::one()),
            (Coefficient::Two, F::from(2u64)),
            (Coefficient::Table(0), table[0]),
        ];
        for (coeff, scalar) in cases {
            let start = G1Projective::rand(&mut rng);
            let mut acc = start;
            accumulate_point(&mut acc, coeff, &p, &table).unwrap();
            assert_eq!(acc, start + p * scalar, "{coeff:?}");

            let s0 = F::rand(&mut rng);
            let v = F::rand(&mut rng);
            let mut s = s0;
            accumulate_scalar(&mut s, coeff, &v, &table).unwrap();
            assert_eq!(s, s0 + scalar * v, "{coeff:?}");
        }
    }

    #[test]
    fn second_group_accumulates_too() {
        let g = G2Projective::generator().into_affine();
        let mut acc = G2Projective::zero();
        accumulate_point(&mut acc, Coefficient::Two, &g, &[]).unwrap();
        accumulate_point(&mut acc, Coefficient::MinusOne, &g, &[]).unwrap();
        assert_eq!(acc.into_affine(), g);
    }

    #[test]
    fn wire_accumulator_folds_terms_per_wire() {
        let g = ark_bn254::G1Affine::generator();
        let mut acc = WireAccumulator::<G1Projective>::new(3);
        let terms = [
            Term::new(0, Coefficient::One),
            Term::new(2, Coefficient::Table(0)),
            Term::new(0, Coefficient::Two),
        ];
        acc.add_terms(&terms, &g, &[F::from(4u64)]).unwrap();
        let out = acc.into_affine();
        assert_eq!(out[0], (g * F::from(3u64)).into_affine());
        assert!(AffineRepr::is_zero(&out[1]));
        assert_eq!(out[2], (g * F::from(4u64)).into_affine());
    }

    #[test]
    fn out_of_range_wire_fails() {
        let g = ark_bn254::G1Affine::generator();
        let mut acc = WireAccumulator::<G1Projective>::new(1);
        let err = acc.add_terms(&[Term::new(1, Coefficient::One)], &g, &[]).unwrap_err();
        assert!(matches!(err, SetupError::InvalidCircuit(_)));
    }
}
