//! Hex-encoded content hashes and the short-hash form used in chunk names
//! and parent-hash continuity checks: the short hash is the first 8 hex
//! characters (4 bytes) after the `0x` prefix.

use std::fmt;

/// A full `0x`-prefixed, lowercase hex-encoded 32-byte hash, as returned by
/// chain RPCs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash32(String);

impl Hash32 {
    /// Wrap a `0x`-prefixed hex string without validating its length.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The underlying `0x...` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first 4 bytes (8 hex chars) of this hash, used to disambiguate
    /// reorg'd chunks with the same block range.
    pub fn short(&self) -> ShortHash {
        short_hash(&self.0)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The first 4 bytes of a [`Hash32`], rendered as 8 lowercase hex characters.
/// This is what gets embedded in a chunk directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ShortHash(String);

impl ShortHash {
    /// Wrap an already-shortened 8-hex-char string without validating it.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The 8-hex-char string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Take the first 4 bytes (8 hex chars) of a `0x`-prefixed hash string.
///
/// # Panics
///
/// Panics if `value` does not start with `0x` or is shorter than 10
/// characters; both indicate a malformed RPC response, which callers should
/// already have rejected before reaching this helper.
pub fn short_hash(value: &str) -> ShortHash {
    assert!(value.starts_with("0x"), "hash must be 0x-prefixed: {value}");
    assert!(value.len() >= 10, "hash too short to take a short hash from: {value}");
    ShortHash(value[2..10].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_first_four_bytes() {
        let h = Hash32::new("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3e");
        assert_eq!(h.short().as_str(), "ddf252ad");
    }

    #[test]
    #[should_panic]
    fn rejects_missing_prefix() {
        short_hash("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3e");
    }
}
