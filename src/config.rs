//! Runtime knobs for the derivation passes.
//!
//! Defaults match the buffered I/O sizes the ceremony files were produced
//! with. Binaries call [`SetupConfig::from_env`]; library callers usually take
//! [`SetupConfig::default`] and override fields directly.

#![forbid(unsafe_code)]

use crate::encoding::PointEncoding;
use crate::SetupError;

/// Default capacity of buffered readers and writers (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Default number of source points decoded per streaming chunk.
pub const DEFAULT_CHUNK_POINTS: usize = 1 << 16;

/// Knobs shared by every streaming pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupConfig {
    /// Capacity of the buffered reader/writer wrapped around each file.
    pub buffer_size: usize,
    /// Number of source points decoded before they are folded into the output.
    ///
    /// **Invariant:** `chunk_points > 0`.
    pub chunk_points: usize,
    /// Encoding used when persisting commitment keys.
    pub encoding: PointEncoding,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            chunk_points: DEFAULT_CHUNK_POINTS,
            encoding: PointEncoding::Compressed,
        }
    }
}

impl SetupConfig {
    /// Defaults overridden by `SETUP_BUFFER_SIZE`, `SETUP_CHUNK_POINTS` and
    /// `SETUP_RAW_ENCODING`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("SETUP_BUFFER_SIZE") {
            cfg.buffer_size = v;
        }
        if let Some(v) = env_usize("SETUP_CHUNK_POINTS") {
            cfg.chunk_points = v;
        }
        if let Ok(v) = std::env::var("SETUP_RAW_ENCODING") {
            if matches!(v.as_str(), "1" | "true" | "TRUE" | "yes") {
                cfg.encoding = PointEncoding::Raw;
            }
        }
        cfg
    }

    /// Reject zero-sized buffers or chunks.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.buffer_size == 0 {
            return Err(SetupError::InvalidConfig("buffer_size must be positive".into()));
        }
        if self.chunk_points == 0 {
            return Err(SetupError::InvalidConfig("chunk_points must be positive".into()));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SetupConfig::default();
        assert_eq!(cfg.buffer_size, 1 << 20);
        assert_eq!(cfg.encoding, PointEncoding::Compressed);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_chunk_is_rejected() {
        let cfg = SetupConfig { chunk_points: 0, ..SetupConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
