//! Fixed-width big-endian integer helpers.
//!
//! The tree only accepts keys of one declared length. Callers that index by
//! integers turn them into keys with these helpers; big-endian order makes the
//! lexicographic byte comparison agree with numeric order for non-negative
//! values.

/// Encode an `i64` as 8 big-endian bytes.
#[must_use]
pub const fn int64_to_bytes(value: i64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Encode an `i32` as 4 big-endian bytes.
#[must_use]
pub const fn int32_to_bytes(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Decode 8 big-endian bytes back into an `i64`.
///
/// Returns `None` if `bytes` is not exactly 8 bytes long.
#[must_use]
pub fn bytes_to_int64(bytes: &[u8]) -> Option<i64> {
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(i64::from_be_bytes(array))
}

/// Decode 4 big-endian bytes back into an `i32`.
///
/// Returns `None` if `bytes` is not exactly 4 bytes long.
#[must_use]
pub fn bytes_to_int32(bytes: &[u8]) -> Option<i32> {
    let array: [u8; 4] = bytes.try_into().ok()?;
    Some(i32::from_be_bytes(array))
}
