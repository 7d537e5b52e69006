//! SHA-256 checksum utilities for marketplace archive verification.
//!
//! Marketplaces advertise digests as 64 hex characters, optionally prefixed
//! with `sha256:`. Comparison is case-insensitive and runs in constant time.

use crate::error::{PluginStoreError, Result};
use sha2::{Digest, Sha256};

const SHA256_PREFIX: &str = "sha256:";

/// Compares two strings in constant time to prevent timing attacks.
///
/// Always processes the full length of the longer input; a length
/// difference is folded into the result only at the end.
///
/// # Examples
///
/// ```
/// # use plugin_store::checksum::constant_time_compare;
/// assert!(constant_time_compare("abc123", "abc123"));
/// assert!(!constant_time_compare("abc123", "def456"));
/// assert!(!constant_time_compare("abc", "abcdef"));
/// ```
#[must_use]
#[allow(clippy::similar_names)]
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let len_match = a.len() == b.len();

    let bytes_a = a.as_bytes();
    let bytes_b = b.as_bytes();
    let max_len = a.len().max(b.len());

    let mut diff = 0u8;
    for i in 0..max_len {
        let byte_a = bytes_a.get(i).copied().unwrap_or(0);
        let byte_b = bytes_b.get(i).copied().unwrap_or(0);
        diff |= byte_a ^ byte_b;
    }

    len_match && diff == 0
}

/// Calculates the SHA-256 digest of `data` as lowercase hex.
///
/// # Examples
///
/// ```
/// use plugin_store::checksum::calculate_checksum;
///
/// let checksum = calculate_checksum(b"Hello, world!");
/// assert_eq!(checksum.len(), 64);
/// assert_eq!(
///     checksum,
///     "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
/// );
/// ```
#[must_use]
pub fn calculate_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Normalizes an advertised digest: strips an optional `sha256:` prefix,
/// trims whitespace, and lowercases.
#[must_use]
pub fn normalize_checksum(checksum: &str) -> String {
    let trimmed = checksum.trim();
    let hex_part = match trimmed.get(..SHA256_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SHA256_PREFIX) => {
            &trimmed[SHA256_PREFIX.len()..]
        }
        _ => trimmed,
    };
    hex_part.to_ascii_lowercase()
}

/// Verifies that `data` matches the `expected` digest.
///
/// Returns the calculated digest on success.
///
/// # Errors
///
/// Returns [`PluginStoreError::ChecksumMismatch`] if the digests differ or
/// if `expected` is not a SHA-256 hex digest.
///
/// # Examples
///
/// ```
/// use plugin_store::checksum::{calculate_checksum, verify_checksum};
///
/// let data = b"archive bytes";
/// let checksum = calculate_checksum(data);
///
/// verify_checksum(data, &checksum).unwrap();
/// verify_checksum(data, &format!("sha256:{}", checksum.to_uppercase())).unwrap();
/// assert!(verify_checksum(data, "sha256:wrong").is_err());
/// ```
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<String> {
    let actual = calculate_checksum(data);
    let normalized = normalize_checksum(expected);

    if !is_valid_checksum_format(&normalized) || !constant_time_compare(&actual, &normalized) {
        return Err(PluginStoreError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    Ok(actual)
}

/// Validates checksum format without verifying content: exactly 64
/// lowercase hex characters.
///
/// # Examples
///
/// ```
/// use plugin_store::checksum::is_valid_checksum_format;
///
/// assert!(is_valid_checksum_format(&"0".repeat(64)));
/// assert!(!is_valid_checksum_format("abc123"));
/// assert!(!is_valid_checksum_format(&"G".repeat(64)));
/// ```
#[must_use]
pub fn is_valid_checksum_format(checksum: &str) -> bool {
    checksum.len() == 64
        && checksum
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
