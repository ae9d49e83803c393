//! Pedersen commitment-key ceremony
//!
//! The key pair extends the Groth16 parameters with one Pedersen basis per
//! declared commitment:
//!
//! - proving side, per commitment: `Basis` and `BasisExpSigma = Basis·σ`;
//! - verifying side: a second-group point `G` and `GRootSigmaNeg = G·(−σ⁻¹)`.
//!
//! `σ` is the product of every contributor's secret. [`PedersenKeys::initialize`]
//! samples `G` and the first secret; each [`PedersenKeys::contribute`] folds in
//! a fresh `σ′` without learning any earlier one. After every step
//!
//! ```text
//! e(BasisExpSigma[j], GRootSigmaNeg) · e(Basis[j], G) = 1
//! ```
//!
//! which [`PedersenKeys::verify_consistency`] checks. [`verify_contribution`]
//! additionally checks that a snapshot extends its predecessor. Neither proves
//! that the contributor knows `σ′`.
//!
//! # Persisted record
//!
//! ```text
//! u32 commitments
//! per commitment: u32 n, Basis[n], u32 n, BasisExpSigma[n]
//! G (G2), GRootSigmaNeg (G2)
//! ```

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ark_bn254::{Bn254, Fq, Fq2, G1Projective};
use ark_ec::{pairing::Pairing, AffineRepr, CurveGroup};
use ark_ff::{Field, PrimeField, Zero};
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::basis::sample_nonzero;
use crate::config::SetupConfig;
use crate::encoding::{Decoder, Encoder, PointEncoding};
use crate::{SetupError, F, G1, G2};

const HASH_TO_G2_CONTEXT: &str = "groth16-setup 2024 pedersen verifying-key generator";
const HASH_TO_G2_ATTEMPTS: u32 = 256;

/// Proving-side key for one commitment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PedersenProvingKey {
    /// Commitment basis.
    pub basis: Vec<G1>,
    /// `basis[j]·σ`.
    pub basis_exp_sigma: Vec<G1>,
}

/// Verifying-side key shared by all commitments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PedersenVerifyingKey {
    /// Generator-like point on the second group.
    pub g: G2,
    /// `g·(−σ⁻¹)`.
    pub g_root_sigma_neg: G2,
}

/// One snapshot of the commitment-key ceremony.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PedersenKeys {
    /// One proving key per commitment, in declaration order.
    pub proving: Vec<PedersenProvingKey>,
    /// The shared verifying key.
    pub verifying: PedersenVerifyingKey,
}

/// Deterministic map from a seed to a point of the prime-order second group.
///
/// Try-and-increment: BLAKE3 in key-derivation mode expands `seed‖counter`
/// into an `Fq2` x-coordinate, the first counter with a curve point wins, and
/// the cofactor is cleared.
pub fn hash_to_g2(seed: &[u8]) -> Result<G2, SetupError> {
    for counter in 0..HASH_TO_G2_ATTEMPTS {
        let mut h = blake3::Hasher::new_derive_key(HASH_TO_G2_CONTEXT);
        h.update(seed);
        h.update(&counter.to_be_bytes());
        let mut wide = [0u8; 129];
        h.finalize_xof().fill(&mut wide);
        let x = Fq2::new(Fq::from_be_bytes_mod_order(&wide[..64]), Fq::from_be_bytes_mod_order(&wide[64..128]));
        let greatest = wide[128] & 1 == 1;
        if let Some(p) = G2::get_point_from_x_unchecked(x, greatest) {
            let q = p.clear_cofactor();
            if !AffineRepr::is_zero(&q) {
                return Ok(q);
            }
        }
    }
    Err(SetupError::RandomnessFailure(format!("hash to G2 found no point in {HASH_TO_G2_ATTEMPTS} attempts")))
}

fn scale_all(points: &[G1], s: F) -> Vec<G1> {
    let scaled: Vec<G1Projective> = points.par_iter().map(|p| *p * s).collect();
    G1Projective::normalize_batch(&scaled)
}

impl PedersenKeys {
    /// Genesis snapshot over `bases` (one list per commitment).
    pub fn initialize<R: RngCore + CryptoRng>(bases: Vec<Vec<G1>>, rng: &mut R) -> Result<Self, SetupError> {
        let mut seed = [0u8; 32];
        rng.try_fill_bytes(&mut seed).map_err(|e| SetupError::RandomnessFailure(e.to_string()))?;
        let g = hash_to_g2(&seed)?;
        let mut sigma = sample_nonzero(rng)?;
        let keys = Self::initialize_with(bases, g, &sigma);
        sigma.zeroize();
        let keys = keys?;
        let digest = keys.digest()?;
        info!(
            commitments = keys.proving.len(),
            digest = %hex::encode(digest),
            "commitment keys initialized"
        );
        Ok(keys)
    }

    fn initialize_with(bases: Vec<Vec<G1>>, g: G2, sigma: &F) -> Result<Self, SetupError> {
        let mut sigma_inv = sigma
            .inverse()
            .ok_or_else(|| SetupError::RandomnessFailure("ceremony secret is zero".into()))?;
        let g_root_sigma_neg = (g * -sigma_inv).into_affine();
        sigma_inv.zeroize();
        let proving = bases
            .into_iter()
            .map(|basis| {
                let basis_exp_sigma = scale_all(&basis, *sigma);
                PedersenProvingKey { basis, basis_exp_sigma }
            })
            .collect();
        Ok(Self { proving, verifying: PedersenVerifyingKey { g, g_root_sigma_neg } })
    }

    /// Fold a fresh secret `σ′` into this snapshot.
    pub fn contribute<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<(), SetupError> {
        let mut sigma = sample_nonzero(rng)?;
        let res = self.contribute_with(&sigma);
        sigma.zeroize();
        res?;
        let digest = self.digest()?;
        info!(digest = %hex::encode(digest), "commitment-key contribution applied");
        Ok(())
    }

    fn contribute_with(&mut self, sigma: &F) -> Result<(), SetupError> {
        let mut sigma_inv = sigma
            .inverse()
            .ok_or_else(|| SetupError::RandomnessFailure("ceremony secret is zero".into()))?;
        self.verifying.g_root_sigma_neg = (self.verifying.g_root_sigma_neg * sigma_inv).into_affine();
        sigma_inv.zeroize();
        for pk in &mut self.proving {
            pk.basis_exp_sigma = scale_all(&pk.basis_exp_sigma, *sigma);
        }
        Ok(())
    }

    /// Check the pairing invariant for every basis point.
    pub fn verify_consistency(&self) -> Result<(), SetupError> {
        let PedersenVerifyingKey { g, g_root_sigma_neg } = self.verifying;
        if AffineRepr::is_zero(&g) || AffineRepr::is_zero(&g_root_sigma_neg) {
            return Err(SetupError::VerificationFailed("verifying key contains the identity".into()));
        }
        for (i, pk) in self.proving.iter().enumerate() {
            if pk.basis.len() != pk.basis_exp_sigma.len() {
                return Err(SetupError::VerificationFailed(format!(
                    "commitment {i}: {} basis points but {} exponentiated points",
                    pk.basis.len(),
                    pk.basis_exp_sigma.len()
                )));
            }
            let bad = pk
                .basis
                .par_iter()
                .zip(pk.basis_exp_sigma.par_iter())
                .position_any(|(b, bs)| !Bn254::multi_pairing([*bs, *b], [g_root_sigma_neg, g]).is_zero());
            if let Some(j) = bad {
                return Err(SetupError::VerificationFailed(format!(
                    "commitment {i}, basis point {j}: pairing check failed"
                )));
            }
        }
        debug!(commitments = self.proving.len(), "commitment keys consistent");
        Ok(())
    }

    /// BLAKE3 digest of the compressed record.
    pub fn digest(&self) -> Result<[u8; 32], SetupError> {
        let mut enc = Encoder::new(blake3::Hasher::new());
        self.write_to(&mut enc)?;
        Ok(*enc.into_inner().finalize().as_bytes())
    }

    /// Write the record with the encoder's point encoding.
    pub fn write_to<W: Write>(&self, enc: &mut Encoder<W>) -> Result<(), SetupError> {
        let count = u32::try_from(self.proving.len())
            .map_err(|_| SetupError::InvalidCircuit(format!("{} commitments exceed u32", self.proving.len())))?;
        enc.write_u32(count)?;
        for pk in &self.proving {
            enc.write_points(&pk.basis)?;
            enc.write_points(&pk.basis_exp_sigma)?;
        }
        enc.write_point(&self.verifying.g)?;
        enc.write_point(&self.verifying.g_root_sigma_neg)
    }

    /// Write the record with uncompressed points.
    pub fn write_raw_to<W: Write>(&self, w: W) -> Result<u64, SetupError> {
        let mut enc = Encoder::with_encoding(w, PointEncoding::Raw);
        self.write_to(&mut enc)?;
        Ok(enc.bytes_written())
    }

    /// Read a record in either encoding.
    pub fn read_from<R: Read>(dec: &mut Decoder<R>) -> Result<Self, SetupError> {
        let count = dec.read_len()?;
        let mut proving = Vec::with_capacity(count.min(1 << 10));
        for i in 0..count {
            let at = dec.offset();
            let basis = dec.read_points()?;
            let basis_exp_sigma: Vec<G1> = dec.read_points()?;
            if basis.len() != basis_exp_sigma.len() {
                return Err(SetupError::format(
                    at,
                    format!("commitment {i}: basis has {} points, exponentiated basis {}", basis.len(), basis_exp_sigma.len()),
                ));
            }
            proving.push(PedersenProvingKey { basis, basis_exp_sigma });
        }
        let g = dec.read_point()?;
        let g_root_sigma_neg = dec.read_point()?;
        Ok(Self { proving, verifying: PedersenVerifyingKey { g, g_root_sigma_neg } })
    }

    /// Persist to `path` through a buffered writer.
    pub fn save(&self, path: impl AsRef<Path>, cfg: &SetupConfig) -> Result<u64, SetupError> {
        let file = File::create(path.as_ref())?;
        let mut enc = Encoder::with_encoding(BufWriter::with_capacity(cfg.buffer_size, file), cfg.encoding);
        let res = self.write_to(&mut enc);
        let flushed = enc.get_mut().flush();
        res?;
        flushed?;
        Ok(enc.bytes_written())
    }

    /// Load from `path`; trailing bytes are a format error.
    pub fn load(path: impl AsRef<Path>, cfg: &SetupConfig) -> Result<Self, SetupError> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        let mut dec = Decoder::new(BufReader::with_capacity(cfg.buffer_size, file));
        let keys = Self::read_from(&mut dec)?;
        if dec.offset() != len {
            return Err(SetupError::format(dec.offset(), format!("{} trailing bytes", len - dec.offset())));
        }
        Ok(keys)
    }
}

/// Check that `next` is a consistent contribution on top of `prev`.
pub fn verify_contribution(prev: &PedersenKeys, next: &PedersenKeys) -> Result<(), SetupError> {
    if prev.verifying.g != next.verifying.g {
        return Err(SetupError::VerificationFailed("verifying-key generator changed".into()));
    }
    if prev.proving.len() != next.proving.len() {
        return Err(SetupError::VerificationFailed(format!(
            "commitment count changed from {} to {}",
            prev.proving.len(),
            next.proving.len()
        )));
    }
    for (i, (a, b)) in prev.proving.iter().zip(&next.proving).enumerate() {
        if a.basis != b.basis {
            return Err(SetupError::VerificationFailed(format!("commitment {i}: basis changed")));
        }
    }
    if prev.verifying.g_root_sigma_neg == next.verifying.g_root_sigma_neg {
        return Err(SetupError::VerificationFailed("no contribution: GRootSigmaNeg unchanged".into()));
    }
    next.verify_consistency()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::{One, UniformRand};
    use rand::{rngs::StdRng, SeedableRng};

    fn bases(rng: &mut StdRng) -> Vec<Vec<G1>> {
        vec![
            (0..3).map(|_| G1Projective::rand(rng).into_affine()).collect(),
            vec![G1Projective::rand(rng).into_affine()],
        ]
    }

    #[test]
    fn chained_contributions_keep_the_invariant() {
        let mut rng = StdRng::seed_from_u64(21);
        let original = bases(&mut rng);
        let g = hash_to_g2(b"test seed").unwrap();
        let sigmas: Vec<F> = (0..4).map(|_| F::rand(&mut rng)).collect();

        let mut keys = PedersenKeys::initialize_with(original.clone(), g, &sigmas[0]).unwrap();
        for s in &sigmas[1..] {
            keys.contribute_with(s).unwrap();
        }

        let product: F = sigmas.iter().product();
        for (pk, basis) in keys.proving.iter().zip(&original) {
            assert_eq!(&pk.basis, basis);
            let want: Vec<G1> = basis.iter().map(|b| (*b * product).into_affine()).collect();
            assert_eq!(pk.basis_exp_sigma, want);
        }
        let want_root = (g * -product.inverse().unwrap()).into_affine();
        assert_eq!(keys.verifying.g_root_sigma_neg, want_root);
        keys.verify_consistency().unwrap();
    }

    #[test]
    fn random_contributions_verify() {
        let mut rng = StdRng::seed_from_u64(22);
        let genesis = PedersenKeys::initialize(bases(&mut rng), &mut rng).unwrap();
        genesis.verify_consistency().unwrap();
        let mut next = genesis.clone();
        next.contribute(&mut rng).unwrap();
        verify_contribution(&genesis, &next).unwrap();
        assert_ne!(genesis.digest().unwrap(), next.digest().unwrap());
    }

    #[test]
    fn digest_hashes_the_compressed_record() {
        let mut rng = StdRng::seed_from_u64(27);
        let keys = PedersenKeys::initialize(bases(&mut rng), &mut rng).unwrap();
        let mut bytes = Vec::new();
        keys.write_to(&mut Encoder::new(&mut bytes)).unwrap();
        assert_eq!(keys.digest().unwrap(), *blake3::hash(&bytes).as_bytes());

        // the raw encoding does not change the digest
        let mut raw = Vec::new();
        keys.write_raw_to(&mut raw).unwrap();
        let back = PedersenKeys::read_from(&mut Decoder::new(raw.as_slice())).unwrap();
        assert_eq!(back.digest().unwrap(), keys.digest().unwrap());
    }

    #[test]
    fn tampered_snapshots_are_rejected() {
        let mut rng = StdRng::seed_from_u64(23);
        let genesis = PedersenKeys::initialize(bases(&mut rng), &mut rng).unwrap();

        // no contribution at all
        assert!(matches!(verify_contribution(&genesis, &genesis), Err(SetupError::VerificationFailed(_))));

        // exponentiated basis updated without the verifying key
        let mut half = genesis.clone();
        half.proving[0].basis_exp_sigma = scale_all(&half.proving[0].basis_exp_sigma, F::from(2u64));
        assert!(half.verify_consistency().is_err());

        // basis swapped out
        let mut swapped = genesis.clone();
        swapped.contribute(&mut rng).unwrap();
        swapped.proving[1].basis[0] = G1::generator();
        assert!(verify_contribution(&genesis, &swapped).is_err());
    }

    #[test]
    fn record_reads_back_in_both_encodings() {
        let mut rng = StdRng::seed_from_u64(24);
        let keys = PedersenKeys::initialize(bases(&mut rng), &mut rng).unwrap();

        let mut enc = Encoder::new(Vec::new());
        keys.write_to(&mut enc).unwrap();
        let compressed = enc.into_inner();
        // count + 2 × (prefix + 3 points) + 2 × (prefix + 1 point) + 2 G2 points
        assert_eq!(compressed.len(), 4 + 2 * (4 + 96) + 2 * (4 + 32) + 128);
        let back = PedersenKeys::read_from(&mut Decoder::new(compressed.as_slice())).unwrap();
        assert_eq!(back, keys);

        let mut raw = Vec::new();
        let written = keys.write_raw_to(&mut raw).unwrap();
        assert_eq!(written as usize, raw.len());
        assert!(raw.len() > compressed.len());
        assert_eq!(PedersenKeys::read_from(&mut Decoder::new(raw.as_slice())).unwrap(), keys);
    }

    #[test]
    fn file_round_trip_and_trailing_bytes() {
        let mut rng = StdRng::seed_from_u64(25);
        let keys = PedersenKeys::initialize(bases(&mut rng), &mut rng).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pedersen.bin");
        let cfg = SetupConfig::default();
        keys.save(&path, &cfg).unwrap();
        assert_eq!(PedersenKeys::load(&path, &cfg).unwrap(), keys);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0]).unwrap();
        drop(f);
        assert!(matches!(PedersenKeys::load(&path, &cfg), Err(SetupError::FormatMismatch { .. })));
    }

    #[test]
    fn hash_to_g2_is_deterministic_and_in_subgroup() {
        let a = hash_to_g2(b"seed").unwrap();
        assert_eq!(a, hash_to_g2(b"seed").unwrap());
        assert_ne!(a, hash_to_g2(b"other seed").unwrap());
        assert!(a.is_on_curve());
        assert!(a.is_in_correct_subgroup_assuming_on_curve());
        assert_ne!(a, G2::generator());
    }

    #[test]
    fn empty_key_set_is_valid() {
        let g = hash_to_g2(b"empty").unwrap();
        let keys = PedersenKeys::initialize_with(vec![], g, &F::one()).unwrap();
        keys.verify_consistency().unwrap();
    }
}
