//! Circuit-specific header of the phase-2 output
//!
//! Written once, first, before any vector data:
//!
//! ```text
//! u32 constraints | u32 domain | u32 witness | u32 public | [α]₁ | [β]₁ | [β]₂
//! ```
//!
//! `domain` is the size of the evaluation domain (a power of two), not its
//! exponent. `α`, `β` are copied verbatim from the source ceremony's last
//! contribution.

#![forbid(unsafe_code)]

use std::io::{Read, Write};

use tracing::debug;

use crate::domain::MAX_LOG_DOMAIN;
use crate::encoding::{Decoder, Encoder};
use crate::ptau::{LastContribution, SourceHeader};
use crate::r1cs::ConstraintSystem;
use crate::{SetupError, G1, G2};

/// Bytes of an encoded header (four integers and three compressed points).
pub const ENCODED_SIZE: u64 = 4 * 4 + 32 + 32 + 64;

/// Circuit-level parameters; immutable once derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitHeader {
    /// Number of constraints.
    pub constraints: u32,
    /// Evaluation domain size, the smallest power of two ≥ `constraints`.
    pub domain: u32,
    /// Secret plus internal wires.
    pub witness: u32,
    /// Public wires (including the constant-one wire).
    pub public: u32,
    /// `[α]₁`
    pub alpha_g1: G1,
    /// `[β]₁`
    pub beta_g1: G1,
    /// `[β]₂`
    pub beta_g2: G2,
}

/// Smallest power of two `≥ count` (`0 ↦ 1`), capped at `2^28`.
pub fn next_power_of_two(count: usize) -> Result<usize, SetupError> {
    let max = 1usize << MAX_LOG_DOMAIN;
    if count > max {
        return Err(SetupError::CapacityExceeded { supported: max, required: count });
    }
    Ok(count.max(1).next_power_of_two())
}

fn to_u32(v: usize, what: &str) -> Result<u32, SetupError> {
    u32::try_from(v).map_err(|_| SetupError::InvalidCircuit(format!("{what} count {v} does not fit in u32")))
}

impl CircuitHeader {
    /// Derive the header for `cs` against a source of size `2^source.power`.
    pub fn derive(
        cs: &ConstraintSystem,
        source: &SourceHeader,
        last: &LastContribution,
    ) -> Result<Self, SetupError> {
        let nb_constraints = cs.nb_constraints();
        let supported = source.layout().n as usize;
        if supported < nb_constraints {
            return Err(SetupError::CapacityExceeded { supported, required: nb_constraints });
        }
        let domain = next_power_of_two(nb_constraints)?;
        let header = Self {
            constraints: to_u32(nb_constraints, "constraint")?,
            domain: to_u32(domain, "domain")?,
            witness: to_u32(cs.nb_secret + cs.nb_internal, "witness")?,
            public: to_u32(cs.nb_public, "public")?,
            alpha_g1: last.alpha_g1,
            beta_g1: last.beta_g1,
            beta_g2: last.beta_g2,
        };
        debug!(
            constraints = header.constraints,
            domain = header.domain,
            witness = header.witness,
            public = header.public,
            "circuit header derived"
        );
        Ok(header)
    }

    /// Total wires (`witness + public`), the length of every wire vector.
    pub fn nb_wires(&self) -> usize {
        self.witness as usize + self.public as usize
    }

    /// Write the fixed-layout record.
    pub fn write_to<W: Write>(&self, enc: &mut Encoder<W>) -> Result<(), SetupError> {
        enc.write_u32(self.constraints)?;
        enc.write_u32(self.domain)?;
        enc.write_u32(self.witness)?;
        enc.write_u32(self.public)?;
        enc.write_point(&self.alpha_g1)?;
        enc.write_point(&self.beta_g1)?;
        enc.write_point(&self.beta_g2)
    }

    /// Read the fixed-layout record.
    pub fn read_from<R: Read>(dec: &mut Decoder<R>) -> Result<Self, SetupError> {
        let start = dec.offset();
        let constraints = dec.read_u32()?;
        let domain = dec.read_u32()?;
        let witness = dec.read_u32()?;
        let public = dec.read_u32()?;
        if !domain.is_power_of_two() || (domain as usize) < constraints as usize {
            return Err(SetupError::format(
                start,
                format!("domain {domain} is not a power of two covering {constraints} constraints"),
            ));
        }
        Ok(Self {
            constraints,
            domain,
            witness,
            public,
            alpha_g1: dec.read_point()?,
            beta_g1: dec.read_point()?,
            beta_g2: dec.read_point()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r1cs::tests::toy_circuit;
    use ark_ec::{AffineRepr, CurveGroup};

    fn last() -> LastContribution {
        let g1 = G1::generator();
        let g2 = G2::generator();
        LastContribution {
            tau_g1: g1,
            alpha_g1: (g1 * crate::F::from(3u64)).into_affine(),
            beta_g1: (g1 * crate::F::from(5u64)).into_affine(),
            tau_g2: g2,
            beta_g2: (g2 * crate::F::from(5u64)).into_affine(),
        }
    }

    #[test]
    fn next_power_of_two_table() {
        let table = [(0, 1), (1, 1), (2, 2), (3, 4), (4, 4), (5, 8), (6, 8), (7, 8), (1 << 28, 1 << 28)];
        for (count, want) in table {
            assert_eq!(next_power_of_two(count).unwrap(), want, "count {count}");
        }
        assert!(matches!(
            next_power_of_two((1 << 28) + 1),
            Err(SetupError::CapacityExceeded { supported, .. }) if supported == 1 << 28
        ));
    }

    #[test]
    fn derive_counts_wires() {
        let cs = toy_circuit();
        let h = CircuitHeader::derive(&cs, &SourceHeader { power: 3, contributions: 1 }, &last()).unwrap();
        assert_eq!((h.constraints, h.domain, h.witness, h.public), (4, 4, 5, 1));
        assert_eq!(h.nb_wires(), 6);
        assert_eq!(h.alpha_g1, last().alpha_g1);
    }

    #[test]
    fn small_source_is_rejected() {
        let cs = toy_circuit();
        let err = CircuitHeader::derive(&cs, &SourceHeader { power: 1, contributions: 1 }, &last()).unwrap_err();
        assert!(matches!(err, SetupError::CapacityExceeded { supported: 2, required: 4 }));
    }

    #[test]
    fn record_reads_back() {
        let cs = toy_circuit();
        let h = CircuitHeader::derive(&cs, &SourceHeader { power: 2, contributions: 7 }, &last()).unwrap();
        let mut enc = Encoder::new(Vec::new());
        h.write_to(&mut enc).unwrap();
        assert_eq!(enc.bytes_written(), ENCODED_SIZE);
        let bytes = enc.into_inner();
        assert_eq!(&bytes[..8], &[0, 0, 0, 4, 0, 0, 0, 4]);
        let back = CircuitHeader::read_from(&mut Decoder::new(bytes.as_slice())).unwrap();
        assert_eq!(back, h);
    }
}
