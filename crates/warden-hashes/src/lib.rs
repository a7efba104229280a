// SPDX-License-Identifier: AGPL-3.0

//! Hashing at the two spots the pipeline needs it: 4-byte function
//! selectors and fingerprints of variant tuples.

use sha3::{Digest, Keccak256};
use xxhash_rust::xxh3::Xxh3;

/// First 4 bytes of keccak256 of a canonical function signature,
/// e.g. `transfer(address,uint256)`.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&digest[..4]);
    selector
}

/// Selector as `0x` + 8 lowercase hex characters, the form rules and
/// reports carry.
pub fn selector_hex(selector: &[u8; 4]) -> String {
    format!("0x{}", hex::encode(selector))
}

/// Order-sensitive xxh3 fingerprint of a variant tuple's canonical value
/// strings, so the cross-round dedup set never retains the strings
/// themselves.
pub fn variant_fingerprint<I, S>(values: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Xxh3::new();
    for value in values {
        hasher.update(value.as_ref().as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.digest()
}
