//! Phase-2 derivation pipeline and ceremony rounds
//!
//! [`derive_phase2`] turns a source file plus one constraint system into the
//! initial circuit-specific parameters:
//!
//! ```text
//! header                      (see `header`)
//! u32 n, [A]₁[n]              n = witness + public
//! u32 n, [B]₁[n]
//! u32 n, [B]₂[n]
//! [L]₁[witness + public]      count implied by the header
//! [δ]₁, [δ]₂                  group generators
//! [Z]₁[domain − 1]            count implied by the header
//! ```
//!
//! Everything goes through one buffered writer, flushed whether the pipeline
//! succeeds or fails. The caller discards a partially written sink on error.
//!
//! Later rounds are driven by an external proving-system backend (the
//! [`ProvingSystem`] trait) together with the commitment-key ceremony.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use rand::{CryptoRng, RngCore};
use tracing::info;

use crate::config::SetupConfig;
use crate::encoding::{Decoder, Encoder};
use crate::evaluations::{derive_a_b1, derive_b2, derive_l};
use crate::header::CircuitHeader;
use crate::pedersen::{verify_contribution, PedersenKeys};
use crate::ptau::SourceSrs;
use crate::r1cs::ConstraintSystem;
use crate::vanishing::{derive_z, initial_delta};
use crate::{SetupError, G1, G2};

/// The header as it appears at the start of a phase-2 file.
pub type Phase2Header = CircuitHeader;

/// Read only the header of a phase-2 stream.
pub fn read_phase2_header<R: Read>(r: R) -> Result<Phase2Header, SetupError> {
    CircuitHeader::read_from(&mut Decoder::new(r))
}

/// What [`derive_phase2`] wrote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Phase2Summary {
    /// Header written first.
    pub header: CircuitHeader,
    /// Total bytes written to the sink.
    pub bytes_written: u64,
}

/// Derive the initial phase-2 parameters of `cs` from `source` into `sink`.
pub fn derive_phase2<R, W>(
    cs: &ConstraintSystem,
    source: &mut SourceSrs<R>,
    sink: W,
    cfg: &SetupConfig,
) -> Result<Phase2Summary, SetupError>
where
    R: Read + Seek,
    W: Write,
{
    cfg.validate()?;
    cs.validate()?;
    let mut enc = Encoder::new(BufWriter::with_capacity(cfg.buffer_size, sink));
    let res = write_phase2(cs, source, &mut enc);
    let flushed = enc.get_mut().flush();
    let header = res?;
    flushed?;
    let bytes_written = enc.bytes_written();
    info!(bytes = bytes_written, "phase-2 parameters written");
    Ok(Phase2Summary { header, bytes_written })
}

fn write_phase2<R: Read + Seek, W: Write>(
    cs: &ConstraintSystem,
    source: &mut SourceSrs<R>,
    enc: &mut Encoder<W>,
) -> Result<CircuitHeader, SetupError> {
    source.check_capacity(cs.nb_constraints())?;
    let last = source.read_last_contribution()?;
    let header = CircuitHeader::derive(cs, &source.header(), &last)?;
    header.write_to(enc)?;
    info!(
        constraints = header.constraints,
        domain = header.domain,
        wires = header.nb_wires(),
        offset = enc.bytes_written(),
        "header written"
    );

    let (a, b1) = derive_a_b1(cs, source)?;
    enc.write_points(&a)?;
    enc.write_points(&b1)?;
    drop((a, b1));
    let b2 = derive_b2(cs, source)?;
    enc.write_points(&b2)?;
    drop(b2);
    info!(offset = enc.bytes_written(), "{{A}}, {{B}} written");

    let l = derive_l(cs, source)?;
    for p in &l {
        enc.write_point(p)?;
    }
    drop(l);
    info!(offset = enc.bytes_written(), "{{L}} written");

    let (delta_g1, delta_g2) = initial_delta();
    enc.write_point(&delta_g1)?;
    enc.write_point(&delta_g2)?;
    let z = derive_z(&header, source)?;
    for p in &z {
        enc.write_point(p)?;
    }
    info!(offset = enc.bytes_written(), entries = z.len(), "delta and {{Z}} written");
    Ok(header)
}

/// Open `ptau`, derive, and write `out`.
pub fn derive_phase2_file(
    cs: &ConstraintSystem,
    ptau: impl AsRef<Path>,
    out: impl AsRef<Path>,
    cfg: &SetupConfig,
) -> Result<Phase2Summary, SetupError> {
    let mut source = SourceSrs::open_path(ptau, cfg)?;
    let file = File::create(out.as_ref())?;
    derive_phase2(cs, &mut source, file, cfg)
}

/// A phase-2 stream read back in full.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase2Params {
    /// Header.
    pub header: CircuitHeader,
    /// `[A]₁` per wire.
    pub a: Vec<G1>,
    /// `[B]₁` per wire.
    pub b1: Vec<G1>,
    /// `[B]₂` per wire.
    pub b2: Vec<G2>,
    /// `[L]₁` per wire.
    pub l: Vec<G1>,
    /// `[δ]₁`
    pub delta_g1: G1,
    /// `[δ]₂`
    pub delta_g2: G2,
    /// `[Z]₁`, `domain − 1` entries.
    pub z: Vec<G1>,
}

impl Phase2Params {
    /// Parse a complete phase-2 stream.
    pub fn read_from<R: Read>(dec: &mut Decoder<R>) -> Result<Self, SetupError> {
        let header = CircuitHeader::read_from(dec)?;
        let wires = header.nb_wires();
        let vector = |dec: &mut Decoder<R>, what: &str| -> Result<usize, SetupError> {
            let at = dec.offset();
            let len = dec.read_len()?;
            if len != wires {
                return Err(SetupError::format(at, format!("{what} has {len} entries, header implies {wires}")));
            }
            Ok(len)
        };
        let n = vector(dec, "[A]1")?;
        let a = dec.read_points_exact(n)?;
        let n = vector(dec, "[B]1")?;
        let b1 = dec.read_points_exact(n)?;
        let n = vector(dec, "[B]2")?;
        let b2 = dec.read_points_exact(n)?;
        let l = dec.read_points_exact(wires)?;
        let delta_g1 = dec.read_point()?;
        let delta_g2 = dec.read_point()?;
        let z = dec.read_points_exact(header.domain as usize - 1)?;
        Ok(Self { header, a, b1, b2, l, delta_g1, delta_g2, z })
    }
}

// ============================================================================
// Ceremony rounds
// ============================================================================

/// The external proving-system backend that owns the phase-2 contribution
/// and verification algorithm for the main proving key.
pub trait ProvingSystem {
    /// Backend-specific phase-2 state.
    type Phase2: Clone;
    /// Backend error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Apply one contribution in place.
    fn contribute(&self, state: &mut Self::Phase2) -> Result<(), Self::Error>;

    /// Check that `next` is a valid contribution on top of `prev`.
    fn verify_evolution(&self, prev: &Self::Phase2, next: &Self::Phase2) -> Result<(), Self::Error>;
}

/// Everything a contributor receives and hands on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CeremonyState<P> {
    /// Backend phase-2 state.
    pub phase2: P,
    /// Commitment-key snapshot.
    pub pedersen: PedersenKeys,
}

fn backend_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> SetupError {
    SetupError::Backend(Box::new(e))
}

/// Produce the next round: one backend contribution and one commitment-key
/// contribution, applied to a copy of `prev`.
pub fn contribute_round<S, R>(
    backend: &S,
    prev: &CeremonyState<S::Phase2>,
    rng: &mut R,
) -> Result<CeremonyState<S::Phase2>, SetupError>
where
    S: ProvingSystem,
    R: RngCore + CryptoRng,
{
    let mut next = prev.clone();
    backend.contribute(&mut next.phase2).map_err(backend_err)?;
    next.pedersen.contribute(rng)?;
    Ok(next)
}

/// Verify one round on both chains.
pub fn verify_round<S: ProvingSystem>(
    backend: &S,
    prev: &CeremonyState<S::Phase2>,
    next: &CeremonyState<S::Phase2>,
) -> Result<(), SetupError> {
    backend.verify_evolution(&prev.phase2, &next.phase2).map_err(backend_err)?;
    verify_contribution(&prev.pedersen, &next.pedersen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::derive_commitment_bases;
    use crate::header::ENCODED_SIZE;
    use crate::ptau::{LagrangeG1, SourceLayout};
    use crate::ptau::dev::{write_dev_ptau, DevSecrets};
    use crate::r1cs::tests::toy_circuit;
    use ark_ec::AffineRepr;
    use rand::{rngs::StdRng, SeedableRng};
    use std::io::Cursor;

    fn dev_source(power: u8, contributions: u16) -> SourceSrs<Cursor<Vec<u8>>> {
        let mut rng = StdRng::seed_from_u64(31);
        let secrets = DevSecrets::sample(&mut rng, power).unwrap();
        let mut bytes = Vec::new();
        write_dev_ptau(&mut bytes, power, contributions, &secrets).unwrap();
        let len = bytes.len() as u64;
        SourceSrs::open(Cursor::new(bytes), len, 2).unwrap()
    }

    #[test]
    fn toy_circuit_end_to_end() {
        let cs = toy_circuit();
        let mut source = dev_source(3, 2);
        let mut out = Vec::new();
        let summary = derive_phase2(&cs, &mut source, &mut out, &SetupConfig::default()).unwrap();
        assert_eq!(summary.bytes_written as usize, out.len());
        assert_eq!(read_phase2_header(out.as_slice()).unwrap(), summary.header);

        let mut dec = Decoder::new(out.as_slice());
        let params = Phase2Params::read_from(&mut dec).unwrap();
        assert_eq!(dec.offset() as usize, out.len());
        assert_eq!(params.header.domain, 4);
        assert_eq!(params.a.len(), 6);
        assert_eq!(params.l.len(), 6);
        assert_eq!(params.z.len(), 3);
        assert_eq!(params.delta_g1, G1::generator());
        assert_eq!(params.delta_g2, G2::generator());

        let mut rng = StdRng::seed_from_u64(32);
        let bases = derive_commitment_bases(&cs, &mut rng).unwrap();
        assert_eq!(bases.vk_k.len(), 2);
        assert_eq!(bases.commitment_bases.iter().map(Vec::len).collect::<Vec<_>>(), vec![1]);
        assert_eq!(bases.pk_k.len(), cs.nb_wires() - 3);

        let keys = PedersenKeys::initialize(bases.commitment_bases, &mut rng).unwrap();
        keys.verify_consistency().unwrap();
    }

    #[test]
    fn source_without_contributions_fails_before_vectors() {
        let cs = toy_circuit();
        let mut source = dev_source(3, 0);
        let mut out = Vec::new();
        let err = derive_phase2(&cs, &mut source, &mut out, &SetupConfig::default()).unwrap_err();
        assert!(matches!(err, SetupError::FormatMismatch { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn oversized_circuit_writes_nothing() {
        let mut cs = toy_circuit();
        let extra = cs.constraints[0].clone();
        cs.constraints.push(extra);
        let mut source = dev_source(2, 1);
        let mut out = Vec::new();
        let err = derive_phase2(&cs, &mut source, &mut out, &SetupConfig::default()).unwrap_err();
        assert!(matches!(err, SetupError::CapacityExceeded { supported: 4, required: 5 }));
        assert!(out.is_empty());
    }

    #[test]
    fn midstream_failure_flushes_completed_sections() {
        let mut rng = StdRng::seed_from_u64(37);
        let secrets = DevSecrets::sample(&mut rng, 3).unwrap();
        let mut bytes = Vec::new();
        write_dev_ptau(&mut bytes, 3, 1, &secrets).unwrap();
        // [α·Lᵢ(τ)]₁ now declares 9 points; {L} is the first pass to read it
        let prefix = SourceLayout::new(3, 1).lagrange_g1(LagrangeG1::AlphaTau) as usize;
        bytes[prefix + 3] ^= 1;
        let len = bytes.len() as u64;
        let mut source = SourceSrs::open(Cursor::new(bytes), len, 2).unwrap();

        let mut out = Vec::new();
        let err = derive_phase2(&toy_circuit(), &mut source, &mut out, &SetupConfig::default()).unwrap_err();
        assert!(matches!(err, SetupError::FormatMismatch { .. }), "{err}");
        // header, then {A}, {B}₁ and {B}₂ with their length prefixes
        let wires = 6;
        let expected = ENCODED_SIZE as usize + 2 * (4 + 32 * wires) + (4 + 64 * wires);
        assert_eq!(expected, 924);
        assert_eq!(out.len(), expected);
        assert_eq!(read_phase2_header(out.as_slice()).unwrap().domain, 4);
    }

    #[test]
    fn file_pipeline_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let ptau = dir.path().join("source.ptau");
        let out = dir.path().join("phase2.bin");
        let mut rng = StdRng::seed_from_u64(33);
        let secrets = DevSecrets::sample(&mut rng, 3).unwrap();
        write_dev_ptau(File::create(&ptau).unwrap(), 3, 1, &secrets).unwrap();

        let summary = derive_phase2_file(&toy_circuit(), &ptau, &out, &SetupConfig::default()).unwrap();
        assert_eq!(std::fs::metadata(&out).unwrap().len(), summary.bytes_written);
    }

    // ------------------------------------------------------------------
    // Rounds over a mock backend
    // ------------------------------------------------------------------

    #[derive(Debug, thiserror::Error)]
    #[error("round {0} does not follow round {1}")]
    struct Skipped(u64, u64);

    struct Counter;

    impl ProvingSystem for Counter {
        type Phase2 = u64;
        type Error = Skipped;

        fn contribute(&self, state: &mut u64) -> Result<(), Skipped> {
            *state += 1;
            Ok(())
        }

        fn verify_evolution(&self, prev: &u64, next: &u64) -> Result<(), Skipped> {
            if *next == *prev + 1 {
                Ok(())
            } else {
                Err(Skipped(*next, *prev))
            }
        }
    }

    fn genesis(rng: &mut StdRng) -> CeremonyState<u64> {
        let bases = derive_commitment_bases(&toy_circuit(), rng).unwrap();
        CeremonyState { phase2: 0, pedersen: PedersenKeys::initialize(bases.commitment_bases, rng).unwrap() }
    }

    #[test]
    fn rounds_chain_and_verify() {
        let mut rng = StdRng::seed_from_u64(34);
        let mut prev = genesis(&mut rng);
        for _ in 0..3 {
            let next = contribute_round(&Counter, &prev, &mut rng).unwrap();
            verify_round(&Counter, &prev, &next).unwrap();
            prev = next;
        }
        assert_eq!(prev.phase2, 3);
    }

    #[test]
    fn backend_rejection_surfaces() {
        let mut rng = StdRng::seed_from_u64(35);
        let prev = genesis(&mut rng);
        let mut next = contribute_round(&Counter, &prev, &mut rng).unwrap();
        next.phase2 += 1;
        let err = verify_round(&Counter, &prev, &next).unwrap_err();
        assert!(matches!(err, SetupError::Backend(_)));
        assert!(err.to_string().contains("round 2 does not follow round 0"));
    }

    #[test]
    fn skipped_commitment_contribution_is_rejected() {
        let mut rng = StdRng::seed_from_u64(36);
        let prev = genesis(&mut rng);
        let mut next = contribute_round(&Counter, &prev, &mut rng).unwrap();
        next.pedersen = prev.pedersen.clone();
        assert!(matches!(verify_round(&Counter, &prev, &next), Err(SetupError::VerificationFailed(_))));
    }
}
