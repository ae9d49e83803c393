//! Source powers-of-tau file: layout and streaming reader
//!
//! The circuit-independent ceremony output is consumed, never produced, by
//! the derivation passes. It is navigated purely by closed-form offsets, so a
//! multi-gigabyte file is never loaded whole.
//!
//! # File layout (`N = 2^P`, `c` contributions, compressed points)
//!
//! ```text
//! offset                         contents
//! 0                              P (u8), c (u16, big-endian)
//! 3                              TauG1       [τⁱ]₁        i < 2N − 1
//! 3 + 32(2N − 1)                 TauG2       [τⁱ]₂        i < N
//!   + 64N                        AlphaTauG1  [α·τⁱ]₁      i < N
//!   + 32N                        BetaTauG1   [β·τⁱ]₁      i < N
//!   + 32N                        BetaG2      [β]₂
//! 35 + 192N                      c contribution records, 640 B each
//! 35 + 192N + 640c               Lagrange section:
//!                                  u32 N, [Lᵢ(τ)]₁
//!                                  u32 N, [α·Lᵢ(τ)]₁
//!                                  u32 N, [β·Lᵢ(τ)]₁
//!                                  u32 N, [Lᵢ(τ)]₂
//! ```
//!
//! A contribution record holds the running `[τ]₁ [α]₁ [β]₁` at bytes
//! 0/32/64 and `[τ]₂ [β]₂` at 96/160, followed by three public-key triples and
//! a 32-byte transcript hash. The last record therefore carries the final
//! `α`, `β` commitments needed by the phase-2 header.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tracing::{debug, info};

use crate::config::SetupConfig;
use crate::encoding::{Decoder, WirePoint};
use crate::{SetupError, G1, G2};

/// Bytes of the fixed header (power + contribution count).
pub const HEADER_SIZE: u64 = 3;
/// Bytes of one contribution record.
pub const CONTRIBUTION_SIZE: u64 = 640;
/// Bytes of a compressed first-group point.
pub const G1_SIZE: u64 = 32;
/// Bytes of a compressed second-group point.
pub const G2_SIZE: u64 = 64;
/// Bytes of a vector length prefix.
pub const PREFIX_SIZE: u64 = 4;
/// Largest domain power accepted from a header.
pub const MAX_SOURCE_POWER: u8 = 32;

/// Offsets of the running secrets inside a contribution record.
const CONTRIB_TAU_G1: u64 = 0;
const CONTRIB_ALPHA_G1: u64 = 32;
const CONTRIB_BETA_G1: u64 = 64;
const CONTRIB_TAU_G2: u64 = 96;
const CONTRIB_BETA_G2: u64 = 160;

/// Header of a source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceHeader {
    /// Domain power `P`; the file supports up to `2^P` constraints.
    pub power: u8,
    /// Number of contribution records.
    pub contributions: u16,
}

impl SourceHeader {
    /// Parse the 3-byte header.
    pub fn read<R: Read>(dec: &mut Decoder<R>) -> Result<Self, SetupError> {
        let power = dec.read_u8()?;
        let contributions = dec.read_u16()?;
        if power > MAX_SOURCE_POWER {
            return Err(SetupError::format(0, format!("domain power {power} exceeds {MAX_SOURCE_POWER}")));
        }
        Ok(Self { power, contributions })
    }

    /// The 3-byte header.
    pub fn to_bytes(&self) -> [u8; 3] {
        let c = self.contributions.to_be_bytes();
        [self.power, c[0], c[1]]
    }

    /// Byte layout implied by this header.
    pub fn layout(&self) -> SourceLayout {
        SourceLayout::new(self.power, self.contributions)
    }
}

/// Which first-group Lagrange vector to stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LagrangeG1 {
    /// `[Lᵢ(τ)]₁`
    Tau,
    /// `[α·Lᵢ(τ)]₁`
    AlphaTau,
    /// `[β·Lᵢ(τ)]₁`
    BetaTau,
}

/// Closed-form byte offsets for a given power and contribution count.
///
/// All offsets are absolute and point at the first byte of the named
/// section (for Lagrange vectors: at the `u32` length prefix).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLayout {
    /// Domain size `N = 2^P`.
    pub n: u64,
    /// Number of contribution records.
    pub contributions: u64,
}

impl SourceLayout {
    /// Layout for power `P` (at most [`MAX_SOURCE_POWER`]) and `contributions` records.
    pub fn new(power: u8, contributions: u16) -> Self {
        Self { n: 1u64 << power, contributions: u64::from(contributions) }
    }

    /// `[τⁱ]₁`, `2N − 1` entries.
    pub fn tau_g1(&self) -> u64 {
        HEADER_SIZE
    }

    /// `[τⁱ]₂`, `N` entries.
    pub fn tau_g2(&self) -> u64 {
        self.tau_g1() + G1_SIZE * (2 * self.n - 1)
    }

    /// `[α·τⁱ]₁`, `N` entries.
    pub fn alpha_tau_g1(&self) -> u64 {
        self.tau_g2() + G2_SIZE * self.n
    }

    /// `[β·τⁱ]₁`, `N` entries.
    pub fn beta_tau_g1(&self) -> u64 {
        self.alpha_tau_g1() + G1_SIZE * self.n
    }

    /// `[β]₂`.
    pub fn beta_g2(&self) -> u64 {
        self.beta_tau_g1() + G1_SIZE * self.n
    }

    /// First contribution record (`35 + 192N`).
    pub fn contributions_start(&self) -> u64 {
        self.beta_g2() + G2_SIZE
    }

    /// Last contribution record; a file without contributions has none.
    pub fn last_contribution(&self) -> Result<u64, SetupError> {
        if self.contributions == 0 {
            return Err(SetupError::format(
                HEADER_SIZE,
                "source file declares zero contributions; no final alpha/beta to read",
            ));
        }
        Ok(self.contributions_start() + (self.contributions - 1) * CONTRIBUTION_SIZE)
    }

    /// First-group Lagrange vector (`3 + 192N + 32 + 640c` for [`LagrangeG1::Tau`]).
    pub fn lagrange_g1(&self, which: LagrangeG1) -> u64 {
        let base = self.contributions_start() + self.contributions * CONTRIBUTION_SIZE;
        let stride = PREFIX_SIZE + G1_SIZE * self.n;
        match which {
            LagrangeG1::Tau => base,
            LagrangeG1::AlphaTau => base + stride,
            LagrangeG1::BetaTau => base + 2 * stride,
        }
    }

    /// Second-group Lagrange vector (first-group offset `+ 96N + 12`).
    pub fn lagrange_g2(&self) -> u64 {
        self.lagrange_g1(LagrangeG1::Tau) + 3 * (PREFIX_SIZE + G1_SIZE * self.n)
    }

    /// One past the last byte the derivation passes may touch.
    pub fn end(&self) -> u64 {
        self.lagrange_g2() + PREFIX_SIZE + G2_SIZE * self.n
    }
}

/// Final `α`, `β` (and `τ`) commitments from the last contribution record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastContribution {
    /// `[τ]₁`
    pub tau_g1: G1,
    /// `[α]₁`
    pub alpha_g1: G1,
    /// `[β]₁`
    pub beta_g1: G1,
    /// `[τ]₂`
    pub tau_g2: G2,
    /// `[β]₂`
    pub beta_g2: G2,
}

/// Random-access reader over a source file.
pub struct SourceSrs<R: Read + Seek> {
    dec: Decoder<R>,
    header: SourceHeader,
    layout: SourceLayout,
    chunk_points: usize,
}

impl SourceSrs<BufReader<File>> {
    /// Open a file on disk with the configured buffering.
    pub fn open_path(path: impl AsRef<Path>, cfg: &SetupConfig) -> Result<Self, SetupError> {
        cfg.validate()?;
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        debug!(path = %path.display(), bytes = len, "opening source SRS");
        Self::open(BufReader::with_capacity(cfg.buffer_size, file), len, cfg.chunk_points)
    }
}

impl<R: Read + Seek> SourceSrs<R> {
    /// Parse the header and check that `len` covers every section.
    pub fn open(mut reader: R, len: u64, chunk_points: usize) -> Result<Self, SetupError> {
        if chunk_points == 0 {
            return Err(SetupError::InvalidConfig("chunk_points must be positive".into()));
        }
        reader.rewind()?;
        let mut dec = Decoder::new(reader);
        let header = SourceHeader::read(&mut dec)?;
        let layout = header.layout();
        if len < layout.end() {
            return Err(SetupError::format(
                len,
                format!(
                    "source file is {len} bytes but power {} with {} contributions needs {}",
                    header.power,
                    header.contributions,
                    layout.end()
                ),
            ));
        }
        info!(
            power = header.power,
            contributions = header.contributions,
            lagrange_g1 = layout.lagrange_g1(LagrangeG1::Tau),
            lagrange_g2 = layout.lagrange_g2(),
            "source SRS opened"
        );
        Ok(Self { dec, header, layout, chunk_points })
    }

    /// Parsed header.
    pub fn header(&self) -> SourceHeader {
        self.header
    }

    /// Offsets derived from the header.
    pub fn layout(&self) -> SourceLayout {
        self.layout
    }

    /// Domain size `N` of the source.
    pub fn domain_size(&self) -> usize {
        self.layout.n as usize
    }

    /// Fail with `CapacityExceeded` if the circuit has more than `N` constraints.
    pub fn check_capacity(&self, nb_constraints: usize) -> Result<(), SetupError> {
        if self.domain_size() < nb_constraints {
            return Err(SetupError::CapacityExceeded { supported: self.domain_size(), required: nb_constraints });
        }
        Ok(())
    }

    /// Read the running `τ`, `α`, `β` commitments of the last contribution.
    pub fn read_last_contribution(&mut self) -> Result<LastContribution, SetupError> {
        let base = self.layout.last_contribution()?;
        let tau_g1 = self.point_at(base + CONTRIB_TAU_G1)?;
        let alpha_g1 = self.point_at(base + CONTRIB_ALPHA_G1)?;
        let beta_g1 = self.point_at(base + CONTRIB_BETA_G1)?;
        let tau_g2 = self.point_at(base + CONTRIB_TAU_G2)?;
        let beta_g2 = self.point_at(base + CONTRIB_BETA_G2)?;
        Ok(LastContribution { tau_g1, alpha_g1, beta_g1, tau_g2, beta_g2 })
    }

    /// First `count` monomial powers `[τⁱ]₁` (`count ≤ 2N − 1`).
    pub fn read_tau_g1(&mut self, count: usize) -> Result<Vec<G1>, SetupError> {
        let available = 2 * self.domain_size() - 1;
        if count > available {
            return Err(SetupError::CapacityExceeded { supported: available, required: count });
        }
        self.dec.seek_to(self.layout.tau_g1())?;
        self.dec.read_points_exact(count)
    }

    /// Stream the first `take` entries of a first-group Lagrange vector.
    pub fn stream_lagrange_g1<Visit>(&mut self, which: LagrangeG1, take: usize, f: Visit) -> Result<(), SetupError>
    where
        Visit: FnMut(usize, &[G1]) -> Result<(), SetupError>,
    {
        let offset = self.layout.lagrange_g1(which);
        debug!(?which, offset, take, "streaming Lagrange G1 vector");
        self.stream_vector(offset, take, f)
    }

    /// Stream the first `take` entries of `[Lᵢ(τ)]₂`.
    pub fn stream_lagrange_g2<Visit>(&mut self, take: usize, f: Visit) -> Result<(), SetupError>
    where
        Visit: FnMut(usize, &[G2]) -> Result<(), SetupError>,
    {
        let offset = self.layout.lagrange_g2();
        debug!(offset, take, "streaming Lagrange G2 vector");
        self.stream_vector(offset, take, f)
    }

    fn point_at<P: WirePoint>(&mut self, offset: u64) -> Result<P, SetupError> {
        self.dec.seek_to(offset)?;
        self.dec.read_point()
    }

    /// Read the prefix at `offset`, hand `take` points to `f` chunk by chunk
    /// (with the index of the chunk's first point), then skip the tail.
    fn stream_vector<P, Visit>(&mut self, offset: u64, take: usize, mut f: Visit) -> Result<(), SetupError>
    where
        P: WirePoint,
        Visit: FnMut(usize, &[P]) -> Result<(), SetupError>,
    {
        self.dec.seek_to(offset)?;
        let declared = self.dec.read_len()?;
        if declared as u64 != self.layout.n {
            return Err(SetupError::format(
                offset,
                format!("Lagrange vector declares {declared} points, expected {}", self.layout.n),
            ));
        }
        if take > declared {
            return Err(SetupError::CapacityExceeded { supported: declared, required: take });
        }

        let point_size = P::COMPRESSED_SIZE as u64;
        let mut chunk = Vec::with_capacity(self.chunk_points.min(take));
        let mut start = 0usize;
        while start < take {
            let len = self.chunk_points.min(take - start);
            chunk.clear();
            for _ in 0..len {
                chunk.push(self.dec.read_point::<P>()?);
            }
            f(start, &chunk)?;
            start += len;
        }

        let consumed = self.dec.offset();
        let expected = offset + PREFIX_SIZE + point_size * take as u64;
        if consumed != expected {
            return Err(SetupError::format(
                consumed,
                format!("Lagrange vector read ended at byte {consumed}, expected {expected}"),
            ));
        }
        self.dec.seek_to(offset + PREFIX_SIZE + point_size * self.layout.n)?;
        Ok(())
    }
}

/// Deterministic source files with known secrets, for tests and local runs.
///
/// The secrets are public, so anything derived from these files is insecure.
#[cfg(any(test, feature = "dev-srs"))]
pub mod dev {
    use std::io::Write;

    use ark_bn254::{G1Projective, G2Projective};
    use ark_ec::AffineRepr;
    use ark_ff::{One, UniformRand};
    use rand::RngCore;

    use super::*;
    use crate::basis::batch_mul_generator;
    use crate::domain::{is_in_domain, lagrange_prefix_at, Domain};
    use crate::encoding::Encoder;
    use crate::F;

    /// The three ceremony secrets baked into a dev file.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DevSecrets {
        /// `τ`
        pub tau: F,
        /// `α`
        pub alpha: F,
        /// `β`
        pub beta: F,
    }

    impl DevSecrets {
        /// Sample `τ ∉ H` for the largest supported domain, `α`, `β`.
        pub fn sample<R: RngCore>(rng: &mut R, power: u8) -> Result<Self, SetupError> {
            let d = Domain::new(1usize << power)?;
            let mut tau = F::rand(rng);
            while is_in_domain(&d, tau) {
                tau = F::rand(rng);
            }
            Ok(Self { tau, alpha: F::rand(rng), beta: F::rand(rng) })
        }
    }

    /// Write a complete source file; returns the number of bytes written.
    pub fn write_dev_ptau<W: Write>(
        w: W,
        power: u8,
        contributions: u16,
        secrets: &DevSecrets,
    ) -> Result<u64, SetupError> {
        let header = SourceHeader { power, contributions };
        let layout = header.layout();
        let n = layout.n as usize;
        let d = Domain::new(n)?;

        let mut powers = Vec::with_capacity(2 * n - 1);
        let mut acc = F::one();
        for _ in 0..2 * n - 1 {
            powers.push(acc);
            acc *= secrets.tau;
        }
        let alpha_powers: Vec<F> = powers[..n].iter().map(|p| *p * secrets.alpha).collect();
        let beta_powers: Vec<F> = powers[..n].iter().map(|p| *p * secrets.beta).collect();

        let lagrange = lagrange_prefix_at(&d, secrets.tau, n)?;
        let alpha_lagrange: Vec<F> = lagrange.iter().map(|l| *l * secrets.alpha).collect();
        let beta_lagrange: Vec<F> = lagrange.iter().map(|l| *l * secrets.beta).collect();

        let mut enc = Encoder::new(w);
        enc.write_bytes(&header.to_bytes())?;
        write_all(&mut enc, &batch_mul_generator::<G1Projective>(&powers))?;
        write_all(&mut enc, &batch_mul_generator::<G2Projective>(&powers[..n]))?;
        write_all(&mut enc, &batch_mul_generator::<G1Projective>(&alpha_powers))?;
        write_all(&mut enc, &batch_mul_generator::<G1Projective>(&beta_powers))?;
        write_all(&mut enc, &batch_mul_generator::<G2Projective>(&[secrets.beta]))?;

        let g1 = batch_mul_generator::<G1Projective>(&[secrets.tau, secrets.alpha, secrets.beta]);
        let g2 = batch_mul_generator::<G2Projective>(&[secrets.tau, secrets.beta]);
        for _ in 0..contributions {
            let start = enc.bytes_written();
            write_all(&mut enc, &g1)?;
            write_all(&mut enc, &g2)?;
            // public-key triples and transcript hash are not read back
            for _ in 0..3 {
                write_all(&mut enc, &[G1::zero(), G1::zero()])?;
                enc.write_point(&G2::zero())?;
            }
            enc.write_bytes(&[0u8; 32])?;
            debug_assert_eq!(enc.bytes_written() - start, CONTRIBUTION_SIZE);
        }

        enc.write_points(&batch_mul_generator::<G1Projective>(&lagrange))?;
        enc.write_points(&batch_mul_generator::<G1Projective>(&alpha_lagrange))?;
        enc.write_points(&batch_mul_generator::<G1Projective>(&beta_lagrange))?;
        enc.write_points(&batch_mul_generator::<G2Projective>(&lagrange))?;

        let written = enc.bytes_written();
        if written != layout.end() {
            return Err(SetupError::AccountingMismatch {
                what: "dev source file size",
                expected: layout.end() as usize,
                actual: written as usize,
            });
        }
        enc.get_mut().flush()?;
        Ok(written)
    }

    fn write_all<W: Write, P: WirePoint>(enc: &mut Encoder<W>, points: &[P]) -> Result<(), SetupError> {
        for p in points {
            enc.write_point(p)?;
        }
        Ok(())
    }
}
