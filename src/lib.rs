//! Crate root: public surface, core aliases, and the shared error taxonomy
//!
//! This crate turns a circuit-independent powers-of-tau file into the
//! circuit-specific Groth16 parameters for one constraint system, and runs the
//! updatable ceremony for the Pedersen commitment keys that extend those
//! parameters.
//!
//! ## Invariants
//!
//! - **Field & Curve.** The scalar field is `ark_bn254::Fr` (`F` in this
//!   crate); points live in `ark_bn254::{G1Affine, G2Affine}`. All arithmetic
//!   is provided by Arkworks; we **forbid unsafe** throughout the crate.
//!
//! - **Byte-exact layout.** Source files are navigated by closed-form offsets
//!   (see [`ptau::SourceLayout`]) and points use the compressed wire encoding
//!   of the upstream ceremony tooling (see [`encoding`]). Nothing is parsed
//!   "generically": an offset or length that does not line up is a
//!   [`SetupError::FormatMismatch`].
//!
//! - **Streaming discipline.** Derivation passes hold at most one chunk of
//!   decoded source points plus the wire-indexed output vector in memory.
//!   Output goes through one buffered sink that is flushed on every exit path.
//!
//! - **Secret hygiene.** Toxic waste and ceremony secrets are owned by the
//!   function that samples them, never logged or serialized, and zeroized on
//!   drop.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Accumulation of linear-combination terms into per-wire totals.
pub mod accumulate;
/// Commitment basis derivation from freshly sampled toxic waste.
pub mod basis;
/// Runtime knobs (buffer sizes, chunking, output encoding).
pub mod config;
/// Multiplicative subgroup domain, Lagrange evaluation at a point, bit reversal.
pub mod domain;
/// Point wire codec compatible with the upstream ceremony tooling.
pub mod encoding;
/// Streaming accumulation of the {A}, {B} and {L} wire vectors.
pub mod evaluations;
/// Circuit-specific header derivation.
pub mod header;
/// Pedersen commitment-key ceremony.
pub mod pedersen;
/// Phase-2 derivation pipeline and ceremony round orchestration.
pub mod phase2;
/// Source (powers-of-tau) file layout and reader.
pub mod ptau;
/// Rank-1 constraint system description consumed by every pass.
pub mod r1cs;
/// Vanishing-polynomial ({Z}) derivation.
pub mod vanishing;

// ============================================================================
// Canonical aliases
// ============================================================================

/// Scalar field used across the crate.
pub type F = ark_bn254::Fr;

/// First pairing group, affine form.
pub type G1 = ark_bn254::G1Affine;

/// Second pairing group, affine form.
pub type G2 = ark_bn254::G2Affine;

pub use crate::basis::{derive_commitment_bases, CommitmentBases};
pub use crate::config::SetupConfig;
pub use crate::header::CircuitHeader;
pub use crate::pedersen::{PedersenKeys, PedersenProvingKey, PedersenVerifyingKey};
pub use crate::phase2::{derive_phase2, ProvingSystem};
pub use crate::ptau::{SourceHeader, SourceLayout, SourceSrs};
pub use crate::r1cs::{Coefficient, CommitmentInfo, ConstraintSystem, Term, R1C};

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by every derivation pass and ceremony step.
///
/// No condition is retried; each one aborts the current pass. Variants carry
/// enough context (offsets, expected vs. actual counts) to diagnose the input.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The source ceremony is too small for the circuit.
    #[error("source SRS supports up to {supported} constraints, but the circuit has {required}")]
    CapacityExceeded {
        /// Largest constraint count the source (or the domain cap) supports.
        supported: usize,
        /// Constraint count of the circuit.
        required: usize,
    },

    /// Unexpected byte layout, offset arithmetic error, or decode failure.
    #[error("format mismatch at byte {offset}: {reason}")]
    FormatMismatch {
        /// Absolute stream offset at which the mismatch was detected.
        offset: u64,
        /// Human-readable description.
        reason: String,
    },

    /// Internal invariant violation (a logic defect, never expected on valid input).
    #[error("accounting mismatch in {what}: expected {expected}, got {actual}")]
    AccountingMismatch {
        /// Which count disagreed.
        what: &'static str,
        /// Expected count.
        expected: usize,
        /// Observed count.
        actual: usize,
    },

    /// The entropy source failed.
    #[error("randomness failure: {0}")]
    RandomnessFailure(String),

    /// The constraint system description is malformed.
    #[error("invalid circuit: {0}")]
    InvalidCircuit(String),

    /// A configuration knob is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A ceremony snapshot does not satisfy the pairing invariant, or does
    /// not extend its predecessor.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The external proving-system backend reported an error.
    #[error("proving-system backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SetupError {
    /// Shorthand for a [`SetupError::FormatMismatch`].
    pub fn format(offset: u64, reason: impl Into<String>) -> Self {
        SetupError::FormatMismatch { offset, reason: reason.into() }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = SetupError> = std::result::Result<T, E>;
