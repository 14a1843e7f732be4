//! Document bodies and revision values.

use graftdb_error::{GraftError, Result};
use serde_json::Value;

use crate::revid::RevId;

/// Alias for a JSON object's underlying map.
pub type JsonMap = serde_json::Map<String, Value>;

/// The reserved keys synthesized on read and stripped before a body is
/// persisted.
pub const RESERVED_KEYS: [&str; 3] = ["_id", "_rev", "_attachments"];

/// A document body: a JSON object.
///
/// Stored bodies never contain the reserved keys; those are synthesized
/// when a revision is read back. An empty body serializes as `{}`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Body(JsonMap);

impl Body {
    /// An empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a body from serialized JSON; the root must be an object.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| GraftError::bad_json(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(GraftError::bad_json(format!(
                "document body must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(|e| GraftError::bad_json(e.to_string()))
    }

    /// Look up a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a property, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Remove a property.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether the body holds any properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Drop the reserved keys prior to persisting.
    pub fn strip_reserved(&mut self) {
        for key in RESERVED_KEYS {
            self.0.remove(key);
        }
    }

    /// Borrow the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &JsonMap {
        &self.0
    }
}

impl From<JsonMap> for Body {
    fn from(map: JsonMap) -> Self {
        Self(map)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One version of a document.
///
/// `sequence` is 0 until the revision has been stored; candidates built by
/// callers carry no `revid` (the store assigns one on write, replication
/// ingress supplies one).
#[derive(Clone, Debug, PartialEq)]
pub struct Revision {
    /// External document id. Empty on a candidate means "generate one".
    pub docid: String,
    /// `<generation>-<digest>` token, absent on a fresh candidate.
    pub revid: Option<RevId>,
    /// Whether this revision is a deletion tombstone.
    pub deleted: bool,
    /// Global insert-order sequence; 0 when not yet stored.
    pub sequence: i64,
    /// Body properties; `None` for tombstones and compacted rows.
    pub body: Option<Body>,
}

impl Revision {
    /// A live candidate revision with the given body.
    #[must_use]
    pub fn new(docid: impl Into<String>, body: Body) -> Self {
        Self {
            docid: docid.into(),
            revid: None,
            deleted: false,
            sequence: 0,
            body: Some(body),
        }
    }

    /// A deletion candidate.
    #[must_use]
    pub fn tombstone(docid: impl Into<String>) -> Self {
        Self {
            docid: docid.into(),
            revid: None,
            deleted: true,
            sequence: 0,
            body: None,
        }
    }

    /// A bare stored revision (no body loaded).
    #[must_use]
    pub fn stored(docid: impl Into<String>, revid: RevId, deleted: bool, sequence: i64) -> Self {
        Self {
            docid: docid.into(),
            revid: Some(revid),
            deleted,
            sequence,
            body: None,
        }
    }

    /// Tree depth of this revision, 0 when no id is assigned.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.revid.as_ref().map_or(0, RevId::generation)
    }
}

/// An ordered collection of revisions with `(docid, revid)` lookups.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RevisionList(Vec<Revision>);

impl RevisionList {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a revision.
    pub fn push(&mut self, rev: Revision) {
        self.0.push(rev);
    }

    /// Number of revisions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in list order.
    pub fn iter(&self) -> std::slice::Iter<'_, Revision> {
        self.0.iter()
    }

    /// Find a revision by document and revision id.
    #[must_use]
    pub fn rev_with_id(&self, docid: &str, revid: &RevId) -> Option<&Revision> {
        self.0
            .iter()
            .find(|r| r.docid == docid && r.revid.as_ref() == Some(revid))
    }

    /// Whether the pair is present.
    #[must_use]
    pub fn contains(&self, docid: &str, revid: &RevId) -> bool {
        self.rev_with_id(docid, revid).is_some()
    }

    /// Remove every revision matching the pair; reports whether any matched.
    pub fn remove_pair(&mut self, docid: &str, revid: &RevId) -> bool {
        let before = self.0.len();
        self.0
            .retain(|r| !(r.docid == docid && r.revid.as_ref() == Some(revid)));
        self.0.len() != before
    }

    /// Borrow the revisions as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Revision] {
        &self.0
    }
}

impl From<Vec<Revision>> for RevisionList {
    fn from(revs: Vec<Revision>) -> Self {
        Self(revs)
    }
}

impl IntoIterator for RevisionList {
    type Item = Revision;
    type IntoIter = std::vec::IntoIter<Revision>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a RevisionList {
    type Item = &'a Revision;
    type IntoIter = std::slice::Iter<'a, Revision>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
