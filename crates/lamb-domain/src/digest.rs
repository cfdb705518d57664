use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest must be {SHA256_HEX_LEN} hex characters (got {0} characters)")]
    Length(usize),
    #[error("digest contains non-hex character {0:?}")]
    Character(char),
}

/// Lowercase hex sha256 over a staged file tree.
///
/// Only compared for equality; the hex payload is never interpreted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Wraps raw digest bytes as produced by `Sha256::finalize`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `len` characters, for log lines and human output.
    #[must_use]
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl FromStr for ContentDigest {
    type Err = DigestError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.len() != SHA256_HEX_LEN {
            return Err(DigestError::Length(trimmed.len()));
        }
        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(DigestError::Character(bad));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentDigest> for String {
    fn from(value: ContentDigest) -> Self {
        value.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn parses_and_normalizes_case() {
        let upper = "A".repeat(64);
        let digest: ContentDigest = upper.parse().expect("valid digest");
        assert_eq!(digest.as_str(), "a".repeat(64));
    }

    #[test]
    fn rejects_wrong_length_and_characters() {
        assert_eq!(
            "abc".parse::<ContentDigest>(),
            Err(DigestError::Length(3))
        );
        let bad = format!("{}z", "0".repeat(63));
        assert_eq!(
            bad.parse::<ContentDigest>(),
            Err(DigestError::Character('z'))
        );
    }

    #[test]
    fn from_bytes_matches_sha256_hex() {
        let raw = Sha256::digest(b"hello");
        let digest = ContentDigest::from_bytes(&raw);
        assert_eq!(
            digest.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(digest.short(12), "2cf24dba5fb0");
    }

    #[test]
    fn serde_round_trips_as_plain_string() {
        let digest: ContentDigest = "f".repeat(64).parse().expect("digest");
        let json = serde_json::to_string(&digest).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "f".repeat(64)));
        let err = serde_json::from_str::<ContentDigest>("\"nope\"");
        assert!(err.is_err());
    }
}
