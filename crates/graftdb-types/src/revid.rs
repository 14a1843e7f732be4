//! Revision identifiers.

use std::fmt;
use std::str::FromStr;

use graftdb_error::{GraftError, Result};

/// A revision identifier: `<generation>-<digest>`.
///
/// The generation is a positive decimal integer equal to the revision's
/// depth in its document's tree (1 for a root). The digest is an opaque
/// token; the store mints UUIDs but treats anything non-empty as valid.
///
/// Ordering is plain lexicographic over the full token, because that is the
/// order the store uses to pick a winner among conflicting leaves. Note the
/// artifact this carries for generations ≥ 10: `"9-x"` sorts after
/// `"10-x"`. A corrected scheme would order by numeric generation first,
/// then digest; the observed order is kept on purpose.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RevId(String);

impl RevId {
    /// Build an identifier from its parts.
    #[must_use]
    pub fn new(generation: u64, digest: &str) -> Self {
        Self(format!("{generation}-{digest}"))
    }

    /// Parse a `<generation>-<digest>` token.
    pub fn parse(token: &str) -> Result<Self> {
        let Some((generation, digest)) = token.split_once('-') else {
            return Err(GraftError::BadRevisionId {
                revid: token.to_owned(),
            });
        };
        let grammatical = !generation.is_empty()
            && generation.bytes().all(|b| b.is_ascii_digit())
            && generation.parse::<u64>().is_ok_and(|g| g > 0)
            && !digest.is_empty();
        if !grammatical {
            return Err(GraftError::BadRevisionId {
                revid: token.to_owned(),
            });
        }
        Ok(Self(token.to_owned()))
    }

    /// The tree depth encoded in the token.
    #[must_use]
    pub fn generation(&self) -> u64 {
        // The constructor guarantees the prefix parses.
        self.0
            .split_once('-')
            .and_then(|(gen, _)| gen.parse().ok())
            .unwrap_or(0)
    }

    /// The opaque digest portion of the token.
    #[must_use]
    pub fn digest(&self) -> &str {
        self.0.split_once('-').map_or("", |(_, digest)| digest)
    }

    /// The full token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the underlying token.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// The identifier of a child of this revision carrying `digest`.
    #[must_use]
    pub fn child(&self, digest: &str) -> Self {
        Self::new(self.generation() + 1, digest)
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RevId {
    type Err = GraftError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for RevId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        let id = RevId::parse("1-abc123").unwrap();
        assert_eq!(id.generation(), 1);
        assert_eq!(id.digest(), "abc123");
        assert_eq!(id.as_str(), "1-abc123");
        assert_eq!(id.to_string(), "1-abc123");
    }

    #[test]
    fn digest_may_contain_dashes() {
        let id = RevId::parse("3-ab-cd-ef").unwrap();
        assert_eq!(id.generation(), 3);
        assert_eq!(id.digest(), "ab-cd-ef");
    }

    #[test]
    fn rejects_ungrammatical_tokens() {
        for bad in ["", "nodash", "-abc", "0-abc", "x1-abc", "1x-abc", "7-", "+2-abc"] {
            assert!(RevId::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn child_increments_generation() {
        let parent = RevId::parse("2-aaaa").unwrap();
        let child = parent.child("bbbb");
        assert_eq!(child.as_str(), "3-bbbb");
    }

    #[test]
    fn ordering_is_lexicographic_over_the_token() {
        let two = RevId::parse("2-zzzz").unwrap();
        let also_two = RevId::parse("2-aaaa").unwrap();
        assert!(two > also_two);

        // The documented artifact: generation 9 sorts after generation 10.
        let nine = RevId::parse("9-a").unwrap();
        let ten = RevId::parse("10-a").unwrap();
        assert!(nine > ten);
    }

    #[test]
    fn from_str_reports_bad_request() {
        let err = "garbage".parse::<RevId>().unwrap_err();
        assert_eq!(err.status(), graftdb_error::Status::BadRequest);
    }
}
