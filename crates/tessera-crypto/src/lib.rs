//! # Tessera Crypto
//!
//! Cryptographic primitives for the Tessera protocol.
//!
//! This crate provides:
//! - Keyed content authentication for outbound packets (HMAC)
//! - Plain digests used for protocol signatures
//! - Constant-time digest comparison
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Notes |
//! |----------|-----------|-------|
//! | Packet authentication | HMAC-MD5 | Wire default, 16-byte tag |
//! | Packet authentication | HMAC-SHA1 | Alternative digest, 20-byte tag |
//! | Protocol signature | MD5 | Over the packet version table |
//!
//! MD5 is used for wire compatibility with deployed servers, not for its
//! strength. Connection secrets are per-session and rotate on reconnect.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod digest;
pub mod error;
pub mod hmac;

pub use error::CryptoError;
pub use crate::hmac::{AuthDigest, ContentAuthenticator};

/// Size of an authentication key (one RFC 4122 UUID)
pub const AUTH_KEY_SIZE: usize = 16;

/// MD5 output size
pub const MD5_OUTPUT_SIZE: usize = 16;

/// SHA-1 output size
pub const SHA1_OUTPUT_SIZE: usize = 20;
