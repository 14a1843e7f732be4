//! GraftDB: an embedded, single-node JSON document database.
//!
//! Documents are versioned by a tree of revisions so that stores can
//! replicate bidirectionally and detect conflicts; every write lands on a
//! dense, never-reused sequence number that forms the change feed. This
//! crate is the public facade over the workspace:
//!
//! - [`graftdb_types`]: revision ids, bodies, the `JSON` collation;
//! - [`graftdb_error`]: the error taxonomy and status codes;
//! - [`graftdb_core`]: the database itself.
//!
//! ```no_run
//! use graftdb::{Body, Database, Revision};
//!
//! # fn main() -> graftdb::Result<()> {
//! let db = Database::open("places.graftdb")?;
//! let mut body = Body::new();
//! body.insert("name", serde_json::Value::String("harbor".into()));
//! let (stored, status) = db.put_revision(&Revision::new("pier-1", body), None)?;
//! assert_eq!(status.code(), 201);
//! println!("stored {} as {}", stored.docid, stored.revid.unwrap());
//! # Ok(())
//! # }
//! ```

pub use graftdb_core::{
    AllDocsOptions, AllDocsResult, AllDocsRow, BlobKey, BlobStore, ChangesOptions, Database,
    DatabaseChange, FsBlobStore, ReplicatorHandle, ValidationContext,
};
pub use graftdb_core::views::ViewRecord;
pub use graftdb_error::{GraftError, Result, Status};
pub use graftdb_types::{collate_json, Body, JsonMap, RevId, Revision, RevisionList};

/// Commonly used items, importable in one line.
pub mod prelude {
    pub use crate::{
        Body, ChangesOptions, Database, DatabaseChange, GraftError, Result, RevId, Revision,
        Status,
    };
}
