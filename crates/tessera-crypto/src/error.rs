//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// No key has been installed on the authenticator
    #[error("no authentication key set")]
    NoKey,

    /// The null key was offered
    #[error("null authentication key rejected")]
    NullKey,

    /// Requested byte range lies outside the input
    #[error("digest range {offset}..{end} out of bounds for {len} bytes")]
    RangeOutOfBounds {
        /// Range start
        offset: usize,
        /// Range end (exclusive)
        end: usize,
        /// Length of the input
        len: usize,
    },

    /// Output buffer cannot hold the digest
    #[error("digest buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall {
        /// Digest size
        expected: usize,
        /// Buffer size offered
        actual: usize,
    },

    /// MAC construction failed
    #[error("mac initialisation failed")]
    MacInit,
}
