//! Plain (unkeyed) digests.

use md5::{Digest, Md5};

use crate::MD5_OUTPUT_SIZE;

/// MD5 digest output.
pub type Md5Output = [u8; MD5_OUTPUT_SIZE];

/// Compute the MD5 digest of `data`.
#[must_use]
pub fn md5(data: &[u8]) -> Md5Output {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}
