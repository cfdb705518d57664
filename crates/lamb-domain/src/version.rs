//! Source artifact version tokens.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use pep440_rs::Version;

/// Width of auto-assigned version tokens (`000001`, `000002`, ...).
pub const ZFILL: usize = 6;

/// A version segment taken from a storage key.
///
/// Tokens that parse as PEP 440 compare by version (`000010 > 000009`,
/// `0.10.0 > 0.9.1`). Anything else sorts below every parseable token and falls
/// back to plain string order among its kind.
#[derive(Clone, Debug)]
pub struct VersionToken {
    raw: String,
    parsed: Option<Version>,
}

impl VersionToken {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let parsed = Version::from_str(&raw).ok();
        Self { raw, parsed }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The token read as a plain counter, if it is one (`000007` -> 7).
    #[must_use]
    pub fn as_counter(&self) -> Option<u64> {
        if self.raw.is_empty() || !self.raw.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        self.raw.parse().ok()
    }
}

impl FromStr for VersionToken {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(raw))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for VersionToken {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionToken {}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.parsed, &other.parsed) {
            (Some(left), Some(right)) => left
                .cmp(right)
                .then_with(|| self.raw.cmp(&other.raw)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.raw.cmp(&other.raw),
        }
    }
}

/// Next auto-assigned token after `latest`.
///
/// Counters continue from the latest one; a latest token that is not a plain
/// counter (e.g. `0.3.1`) cannot be incremented and yields `None`.
#[must_use]
pub fn next_auto_version(latest: Option<&VersionToken>) -> Option<String> {
    let next = match latest {
        None => 1,
        Some(token) => token.as_counter()?.checked_add(1)?,
    };
    Some(format!("{next:0width$}", width = ZFILL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_counters_order_numerically() {
        let mut tokens: Vec<VersionToken> = ["000010", "000002", "000009"]
            .iter()
            .map(|raw| VersionToken::new(raw))
            .collect();
        tokens.sort();
        let ordered: Vec<&str> = tokens.iter().map(VersionToken::as_str).collect();
        assert_eq!(ordered, vec!["000002", "000009", "000010"]);
    }

    #[test]
    fn semantic_versions_use_pep440_order() {
        assert!(VersionToken::new("0.10.0") > VersionToken::new("0.9.1"));
        assert!(VersionToken::new("1.0.0") > VersionToken::new("1.0.0rc1"));
    }

    #[test]
    fn unparseable_tokens_sort_lowest() {
        let odd = VersionToken::new("nightly");
        assert!(odd < VersionToken::new("000001"));
    }

    #[test]
    fn auto_versions_are_zero_padded() {
        assert_eq!(next_auto_version(None).as_deref(), Some("000001"));
        let latest = VersionToken::new("000041");
        assert_eq!(next_auto_version(Some(&latest)).as_deref(), Some("000042"));
        assert_eq!(next_auto_version(Some(&VersionToken::new("0.3.1"))), None);
    }
}
