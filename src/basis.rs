//! Commitment basis derivation
//!
//! Samples fresh toxic waste `(t, α, β, γ, δ)`, evaluates every wire's
//! combination `K(i) = β·A_i(t) + α·B_i(t) + C_i(t)` through the Lagrange basis
//! at `t`, and routes each wire into one of three scalar vectors:
//!
//! - public wires and commitment outputs: `K(i)·γ⁻¹` into the verifying key;
//! - wires privately committed by commitment `j`: `K(i)·γ⁻¹` into `ck[j]`;
//! - every other wire: `K(i)·δ⁻¹` into the proving key.
//!
//! All scalars then go through one batched multiplication of the first-group
//! generator and are sliced back in append order.
//!
//! The toxic waste lives only inside [`derive_commitment_bases`]; it has no
//! accessor and is zeroized when dropped, as are the per-wire scalars.

#![forbid(unsafe_code)]

use ark_bn254::G1Projective;
use ark_ec::CurveGroup;
use ark_ff::{Field, PrimeField, Zero};
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::accumulate::accumulate_scalar;
use crate::domain::{domain_digest, is_in_domain, lagrange_prefix_at, Domain};
use crate::header::next_power_of_two;
use crate::r1cs::ConstraintSystem;
use crate::{SetupError, F, G1};

/// Draw a uniform non-zero scalar from a cryptographic source.
///
/// 64 bytes are reduced modulo the field order, so the bias is negligible.
pub(crate) fn sample_nonzero<R: RngCore + CryptoRng>(rng: &mut R) -> Result<F, SetupError> {
    let mut bytes = [0u8; 64];
    loop {
        rng.try_fill_bytes(&mut bytes).map_err(|e| SetupError::RandomnessFailure(e.to_string()))?;
        let x = F::from_le_bytes_mod_order(&bytes);
        bytes.zeroize();
        if !x.is_zero() {
            return Ok(x);
        }
    }
}

/// `g · sᵢ` for every scalar, in parallel, normalized in one batch.
pub fn batch_mul_generator<C: CurveGroup<ScalarField = F>>(scalars: &[F]) -> Vec<C::Affine> {
    let g = C::generator();
    let points: Vec<C> = scalars.par_iter().map(|s| g * s).collect();
    C::normalize_batch(&points)
}

/// Ephemeral secrets of one derivation.
struct ToxicWaste {
    t: F,
    alpha: F,
    beta: F,
    gamma_inv: F,
    delta_inv: F,
}

impl ToxicWaste {
    fn sample<R: RngCore + CryptoRng>(rng: &mut R, domain: &Domain) -> Result<Self, SetupError> {
        let mut t = sample_nonzero(rng)?;
        while is_in_domain(domain, t) {
            t = sample_nonzero(rng)?;
        }
        let alpha = sample_nonzero(rng)?;
        let beta = sample_nonzero(rng)?;
        let mut gamma = sample_nonzero(rng)?;
        let mut delta = sample_nonzero(rng)?;
        let waste = Self {
            t,
            alpha,
            beta,
            gamma_inv: gamma.inverse().unwrap_or_else(F::zero),
            delta_inv: delta.inverse().unwrap_or_else(F::zero),
        };
        gamma.zeroize();
        delta.zeroize();
        Ok(waste)
    }
}

impl Drop for ToxicWaste {
    fn drop(&mut self) {
        self.t.zeroize();
        self.alpha.zeroize();
        self.beta.zeroize();
        self.gamma_inv.zeroize();
        self.delta_inv.zeroize();
    }
}

/// Output of [`derive_commitment_bases`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentBases {
    /// Verifying-key points, one per public wire then per commitment output.
    pub vk_k: Vec<G1>,
    /// Proving-key points, one per ordinary private wire.
    pub pk_k: Vec<G1>,
    /// Pedersen bases, one list per commitment.
    pub commitment_bases: Vec<Vec<G1>>,
}

impl CommitmentBases {
    /// Total number of points (equals the circuit's wire count).
    pub fn len(&self) -> usize {
        self.vk_k.len() + self.pk_k.len() + self.commitment_bases.iter().map(Vec::len).sum::<usize>()
    }

    /// True when no points were produced.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Derive the verifying, proving and commitment bases of `cs` under fresh toxic waste.
pub fn derive_commitment_bases<R: RngCore + CryptoRng>(
    cs: &ConstraintSystem,
    rng: &mut R,
) -> Result<CommitmentBases, SetupError> {
    cs.validate()?;
    let domain = Domain::new(next_power_of_two(cs.nb_constraints())?)?;
    let waste = ToxicWaste::sample(rng, &domain)?;
    let bases = derive_with(cs, &domain, &waste)?;
    info!(
        domain = domain.n,
        domain_digest = %hex::encode(&domain_digest(&domain)[..8]),
        vk = bases.vk_k.len(),
        pk = bases.pk_k.len(),
        commitments = bases.commitment_bases.len(),
        "commitment bases derived"
    );
    Ok(bases)
}

fn derive_with(cs: &ConstraintSystem, domain: &Domain, w: &ToxicWaste) -> Result<CommitmentBases, SetupError> {
    let nb_wires = cs.nb_wires();
    let nb_public = cs.nb_public;
    let commitment_wires = cs.commitment_wires();
    let nb_commitments = commitment_wires.len();
    let nb_private_committed = cs.nb_private_committed();
    let nb_pk = (cs.nb_secret + cs.nb_internal)
        .checked_sub(nb_private_committed + nb_commitments)
        .ok_or_else(|| {
            SetupError::InvalidCircuit(format!(
                "{nb_private_committed} committed wires and {nb_commitments} commitments exceed the private wire count"
            ))
        })?;

    // A(i), B(i), C(i) evaluated at t
    let mut lagrange = lagrange_prefix_at(domain, w.t, cs.nb_constraints())?;
    let mut a = vec![F::zero(); nb_wires];
    let mut b = vec![F::zero(); nb_wires];
    let mut c = vec![F::zero(); nb_wires];
    for (constraint, l) in cs.constraints.iter().zip(&lagrange) {
        for t in &constraint.l {
            accumulate_scalar(&mut a[t.wire], t.coeff, l, &cs.coefficients)?;
        }
        for t in &constraint.r {
            accumulate_scalar(&mut b[t.wire], t.coeff, l, &cs.coefficients)?;
        }
        for t in &constraint.o {
            accumulate_scalar(&mut c[t.wire], t.coeff, l, &cs.coefficients)?;
        }
    }
    lagrange.zeroize();

    let mut vk_k = Vec::with_capacity(nb_public + nb_commitments);
    let mut pk_k = vec![F::zero(); nb_pk];
    let mut ck_k: Vec<Vec<F>> = cs.commitments.iter().map(|ci| Vec::with_capacity(ci.private_committed.len())).collect();

    let mut v_seen = 0usize; // public + commitment outputs routed so far
    let mut c_seen = vec![0usize; cs.commitments.len()];
    let mut private_committed_seen = 0usize;
    let mut commitments_seen = 0usize;

    for i in 0..nb_wires {
        let is_public = i < nb_public;
        let mut is_commitment = false;
        let mut committed_by = None;
        if !is_public {
            if commitments_seen < nb_commitments && commitment_wires[commitments_seen] == i {
                is_commitment = true;
                commitments_seen += 1;
            }
            committed_by = cs
                .commitments
                .iter()
                .enumerate()
                .find(|(j, ci)| ci.private_committed.get(c_seen[*j]) == Some(&i))
                .map(|(j, _)| j);
        }

        let mut k = w.beta * a[i] + w.alpha * b[i] + c[i];
        if is_public || is_commitment {
            vk_k.push(k * w.gamma_inv);
            v_seen += 1;
        } else if let Some(j) = committed_by {
            ck_k[j].push(k * w.gamma_inv);
            c_seen[j] += 1;
            private_committed_seen += 1;
        } else {
            let idx = i - v_seen - private_committed_seen;
            let slot = pk_k.get_mut(idx).ok_or(SetupError::AccountingMismatch {
                what: "proving-key index",
                expected: nb_pk,
                actual: idx + 1,
            })?;
            *slot = k * w.delta_inv;
        }
        k.zeroize();
    }
    a.zeroize();
    b.zeroize();
    c.zeroize();

    if v_seen != nb_public + nb_commitments {
        return Err(SetupError::AccountingMismatch {
            what: "verifying-key wires",
            expected: nb_public + nb_commitments,
            actual: v_seen,
        });
    }
    for (j, ci) in cs.commitments.iter().enumerate() {
        if c_seen[j] != ci.private_committed.len() {
            return Err(SetupError::AccountingMismatch {
                what: "privately committed wires",
                expected: ci.private_committed.len(),
                actual: c_seen[j],
            });
        }
    }

    let ck_len: usize = ck_k.iter().map(Vec::len).sum();
    let mut scalars = Vec::with_capacity(vk_k.len() + pk_k.len() + ck_len);
    scalars.extend_from_slice(&vk_k);
    scalars.extend_from_slice(&pk_k);
    for ck in &ck_k {
        scalars.extend_from_slice(ck);
    }
    debug!(scalars = scalars.len(), "batch scalar multiplication");
    let points = batch_mul_generator::<G1Projective>(&scalars);
    scalars.zeroize();
    pk_k.zeroize();
    ck_k.zeroize();

    let mut offset = 0usize;
    let mut take = |len: usize| {
        let out = points.get(offset..offset + len).map(<[G1]>::to_vec);
        offset += len;
        out
    };
    let vk_points = take(vk_k.len());
    vk_k.zeroize();
    let pk_points = take(nb_pk);
    let ck_points: Option<Vec<Vec<G1>>> = cs.commitments.iter().map(|ci| take(ci.private_committed.len())).collect();
    if offset != points.len() {
        return Err(SetupError::AccountingMismatch { what: "batched points consumed", expected: points.len(), actual: offset });
    }
    match (vk_points, pk_points, ck_points) {
        (Some(vk_k), Some(pk_k), Some(commitment_bases)) => Ok(CommitmentBases { vk_k, pk_k, commitment_bases }),
        _ => Err(SetupError::AccountingMismatch { what: "batched points consumed", expected: points.len(), actual: offset }),
    }
}
