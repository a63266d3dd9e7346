//! Feed access token check.
//!
//! The caller's token is compared to the configured one in time independent
//! of where the first differing byte is. Tokens of different length are
//! rejected before any comparison.

use thiserror::Error;

/// Why access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    /// No token configured; the feed cannot be served to anyone.
    #[error("access token not configured")]
    NotConfigured,
    #[error("invalid token")]
    Denied,
}

/// Compares two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    std::hint::black_box(result) == 0
}

/// Checks `provided` against `expected`.
pub fn check_token(expected: Option<&str>, provided: Option<&str>) -> Result<(), AccessError> {
    check_token_with(expected, provided, constant_time_eq)
}

/// Like [`check_token`] with a caller-supplied comparator.
///
/// `compare` is only called with inputs of equal length.
pub fn check_token_with<F>(
    expected: Option<&str>,
    provided: Option<&str>,
    compare: F,
) -> Result<(), AccessError>
where
    F: FnOnce(&[u8], &[u8]) -> bool,
{
    let expected = expected
        .filter(|t| !t.trim().is_empty())
        .ok_or(AccessError::NotConfigured)?;
    let provided = provided.ok_or(AccessError::Denied)?;

    if expected.len() != provided.len() {
        return Err(AccessError::Denied);
    }

    if compare(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(AccessError::Denied)
    }
}
