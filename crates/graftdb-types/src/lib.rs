//! Value types shared across the GraftDB workspace.
//!
//! A document is a JSON object identified by a stable string id; each
//! version of it is a [`Revision`] identified by `(docid, revid)` and
//! globally ordered by the sequence number its row was assigned at insert.
//! This crate also carries the `JSON` collation comparator that the storage
//! layer registers with the engine for view keys.

pub mod collation;
pub mod revid;
pub mod revision;

pub use collation::collate_json;
pub use revid::RevId;
pub use revision::{Body, JsonMap, Revision, RevisionList};
