//! Keyed content authentication for packets.
//!
//! Every verified packet carries a digest computed with a key shared between
//! this client and the destination node (the node's connection secret). The
//! digest covers a caller-chosen byte range of the packet, normally
//! everything after the digest field itself.
//!
//! # Example
//!
//! ```
//! use tessera_crypto::ContentAuthenticator;
//!
//! let mut auth = ContentAuthenticator::default();
//! assert!(auth.set_key(&[7u8; 16]));
//!
//! let packet = b"header|payload";
//! let mut tag = [0u8; 16];
//! assert!(auth.calculate_hash(&mut tag, packet, 7, packet.len() - 7));
//! ```

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::{AUTH_KEY_SIZE, MD5_OUTPUT_SIZE, SHA1_OUTPUT_SIZE};

type HmacMd5 = Hmac<Md5>;
type HmacSha1 = Hmac<Sha1>;

/// Digest used under the HMAC construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthDigest {
    /// HMAC-MD5, the deployed wire format
    #[default]
    Md5,
    /// HMAC-SHA1
    Sha1,
}

impl AuthDigest {
    /// Digest output size in bytes
    #[must_use]
    pub const fn output_size(self) -> usize {
        match self {
            Self::Md5 => MD5_OUTPUT_SIZE,
            Self::Sha1 => SHA1_OUTPUT_SIZE,
        }
    }
}

/// Keyed digest over a byte range of a packet.
///
/// The key is wiped from memory when replaced or dropped.
#[derive(Clone, Default)]
pub struct ContentAuthenticator {
    digest: AuthDigest,
    key: Option<Zeroizing<[u8; AUTH_KEY_SIZE]>>,
}

impl ContentAuthenticator {
    /// Create an authenticator without a key
    #[must_use]
    pub fn new(digest: AuthDigest) -> Self {
        Self { digest, key: None }
    }

    /// Digest in use
    #[must_use]
    pub fn digest(&self) -> AuthDigest {
        self.digest
    }

    /// Size of the tag written by [`calculate_hash`](Self::calculate_hash)
    #[must_use]
    pub fn hash_size(&self) -> usize {
        self.digest.output_size()
    }

    /// Whether a key has been installed
    #[must_use]
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Install a new key.
    ///
    /// Returns `false` and leaves the current key untouched when `key` is the
    /// all-zero null key.
    pub fn set_key(&mut self, key: &[u8; AUTH_KEY_SIZE]) -> bool {
        self.try_set_key(key).is_ok()
    }

    /// Install a new key, reporting why it was rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NullKey`] for the all-zero key.
    pub fn try_set_key(&mut self, key: &[u8; AUTH_KEY_SIZE]) -> Result<(), CryptoError> {
        if key.iter().all(|&b| b == 0) {
            return Err(CryptoError::NullKey);
        }
        self.key = Some(Zeroizing::new(*key));
        Ok(())
    }

    /// Compute the digest over `data[offset..offset + length]` into `dest`.
    ///
    /// Returns `false` when no key is set, the range is out of bounds or
    /// `dest` is shorter than [`hash_size`](Self::hash_size).
    pub fn calculate_hash(&self, dest: &mut [u8], data: &[u8], offset: usize, length: usize) -> bool {
        match self.compute(data, offset, length) {
            Ok(tag) => {
                if dest.len() < tag.len() {
                    return false;
                }
                dest[..tag.len()].copy_from_slice(&tag);
                true
            }
            Err(_) => false,
        }
    }

    /// Compute the digest over `data[offset..offset + length]`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NoKey`] before a key is installed and
    /// [`CryptoError::RangeOutOfBounds`] for a range outside `data`.
    pub fn compute(&self, data: &[u8], offset: usize, length: usize) -> Result<Vec<u8>, CryptoError> {
        let key = self.key.as_ref().ok_or(CryptoError::NoKey)?;
        let end = offset.checked_add(length).filter(|&end| end <= data.len()).ok_or(
            CryptoError::RangeOutOfBounds {
                offset,
                end: offset.saturating_add(length),
                len: data.len(),
            },
        )?;
        let input = &data[offset..end];

        let tag = match self.digest {
            AuthDigest::Md5 => {
                let mut mac =
                    HmacMd5::new_from_slice(key.as_slice()).map_err(|_| CryptoError::MacInit)?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
            AuthDigest::Sha1 => {
                let mut mac =
                    HmacSha1::new_from_slice(key.as_slice()).map_err(|_| CryptoError::MacInit)?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(tag)
    }

    /// Check `expected` against the digest of the given range in constant time.
    #[must_use]
    pub fn verify_hash(&self, expected: &[u8], data: &[u8], offset: usize, length: usize) -> bool {
        match self.compute(data, offset, length) {
            Ok(tag) => tag.len() == expected.len() && bool::from(tag.as_slice().ct_eq(expected)),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for ContentAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentAuthenticator")
            .field("digest", &self.digest)
            .field("has_key", &self.has_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rfc2104_vector() {
        let mut auth = ContentAuthenticator::default();
        assert!(auth.set_key(&[0x0b; 16]));

        let data = b"Hi There";
        let mut tag = [0u8; 16];
        assert!(auth.calculate_hash(&mut tag, data, 0, data.len()));
        assert_eq!(hex::encode(tag), "9294727a3638bb1c13f48ef8158bfc9d");
    }

    #[test]
    fn test_null_key_rejected() {
        let mut auth = ContentAuthenticator::default();
        assert!(!auth.set_key(&[0u8; 16]));
        assert!(!auth.has_key());
        assert_eq!(auth.try_set_key(&[0u8; 16]), Err(CryptoError::NullKey));
    }

    #[test]
    fn test_null_key_keeps_previous_key() {
        let mut auth = ContentAuthenticator::default();
        assert!(auth.set_key(&[1u8; 16]));
        let before = auth.compute(b"abc", 0, 3).unwrap();

        assert!(!auth.set_key(&[0u8; 16]));
        assert_eq!(auth.compute(b"abc", 0, 3).unwrap(), before);
    }

    #[test]
    fn test_no_key_fails() {
        let auth = ContentAuthenticator::default();
        let mut tag = [0u8; 16];
        assert!(!auth.calculate_hash(&mut tag, b"data", 0, 4));
        assert_eq!(tag, [0u8; 16]);
    }

    #[test]
    fn test_range_is_respected() {
        let mut auth = ContentAuthenticator::default();
        auth.set_key(&[9u8; 16]);

        let packet = b"HEADERpayload";
        let mut ranged = [0u8; 16];
        assert!(auth.calculate_hash(&mut ranged, packet, 6, 7));

        let mut direct = [0u8; 16];
        assert!(auth.calculate_hash(&mut direct, b"payload", 0, 7));
        assert_eq!(ranged, direct);
    }

    #[test]
    fn test_out_of_bounds_range() {
        let mut auth = ContentAuthenticator::default();
        auth.set_key(&[9u8; 16]);
        let mut tag = [0u8; 16];
        assert!(!auth.calculate_hash(&mut tag, b"short", 3, 10));
        assert!(!auth.calculate_hash(&mut tag, b"short", usize::MAX, 2));
    }

    #[test]
    fn test_small_destination() {
        let mut auth = ContentAuthenticator::default();
        auth.set_key(&[9u8; 16]);
        let mut tag = [0u8; 8];
        assert!(!auth.calculate_hash(&mut tag, b"data", 0, 4));
    }

    #[test]
    fn test_sha1_digest_size() {
        let mut auth = ContentAuthenticator::new(AuthDigest::Sha1);
        auth.set_key(&[3u8; 16]);
        assert_eq!(auth.hash_size(), 20);
        assert_eq!(auth.compute(b"data", 0, 4).unwrap().len(), 20);
    }

    #[test]
    fn test_rekey_changes_tag() {
        let mut auth = ContentAuthenticator::default();
        auth.set_key(&[1u8; 16]);
        let first = auth.compute(b"payload", 0, 7).unwrap();
        auth.set_key(&[2u8; 16]);
        let second = auth.compute(b"payload", 0, 7).unwrap();
        assert_ne!(first, second);
    }

    proptest! {
        #[test]
        fn verify_accepts_own_tag(
            key in any::<[u8; 16]>().prop_filter("non-null", |k| k.iter().any(|&b| b != 0)),
            data in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let mut auth = ContentAuthenticator::default();
            prop_assert!(auth.set_key(&key));
            let mut tag = [0u8; 16];
            prop_assert!(auth.calculate_hash(&mut tag, &data, 0, data.len()));
            prop_assert!(auth.verify_hash(&tag, &data, 0, data.len()));
        }
    }
}
