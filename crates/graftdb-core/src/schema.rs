//! Persisted schema and version gating.
//!
//! The schema version lives in `PRAGMA user_version`: 0 means a fresh
//! file, 1 is current, and anything at or above [`INCOMPATIBLE_VERSION`]
//! belongs to a future release this build must refuse to touch.

use graftdb_error::{GraftError, Result};
use tracing::info;

use crate::engine::StorageEngine;

/// Version written after installing the initial schema.
pub const SCHEMA_VERSION: i32 = 1;

/// First version this build refuses to open.
pub const INCOMPATIBLE_VERSION: i32 = 100;

/// Initial schema, installed in one batch on a fresh file.
///
/// `revs.sequence` is AUTOINCREMENT so sequence values are monotonic and
/// never reused, even across document deletes. Deleting a `docs` row
/// cascades through revisions, attachment metadata, and view map rows.
const SCHEMA: &str = "\
CREATE TABLE docs (
    doc_id INTEGER PRIMARY KEY,
    docid TEXT UNIQUE NOT NULL);
CREATE INDEX docs_docid ON docs(docid);
CREATE TABLE revs (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_id INTEGER NOT NULL REFERENCES docs(doc_id) ON DELETE CASCADE,
    revid TEXT NOT NULL,
    parent INTEGER REFERENCES revs(sequence) ON DELETE SET NULL,
    current BOOLEAN,
    deleted BOOLEAN DEFAULT 0,
    json BLOB);
CREATE INDEX revs_by_id ON revs(revid, doc_id);
CREATE INDEX revs_current ON revs(doc_id, current);
CREATE INDEX revs_parent ON revs(parent);
CREATE TABLE views (
    view_id INTEGER PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    version TEXT,
    lastsequence INTEGER DEFAULT 0);
CREATE INDEX views_by_name ON views(name);
CREATE TABLE maps (
    view_id INTEGER NOT NULL REFERENCES views(view_id) ON DELETE CASCADE,
    sequence INTEGER NOT NULL REFERENCES revs(sequence) ON DELETE CASCADE,
    key TEXT NOT NULL COLLATE JSON,
    value TEXT);
CREATE INDEX maps_keys ON maps(view_id, key COLLATE JSON);
CREATE TABLE attachments (
    sequence INTEGER NOT NULL REFERENCES revs(sequence) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    key BLOB NOT NULL,
    type TEXT,
    length INTEGER NOT NULL);
CREATE INDEX attachments_by_sequence ON attachments(sequence, filename);
CREATE TABLE replicators (
    remote TEXT NOT NULL,
    push BOOLEAN,
    last_sequence TEXT,
    UNIQUE (remote, push));
";

/// Install the schema on a fresh store, or verify a populated one.
pub fn install_or_check(engine: &StorageEngine) -> Result<()> {
    let version = engine.user_version()?;
    if version >= INCOMPATIBLE_VERSION {
        return Err(GraftError::SchemaTooNew { version });
    }
    if version == 0 {
        engine.execute_batch(SCHEMA)?;
        engine.set_user_version(SCHEMA_VERSION)?;
        info!(path = %engine.path().display(), version = SCHEMA_VERSION, "installed schema");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_gets_schema_and_version() {
        let engine = StorageEngine::open_in_memory().unwrap();
        install_or_check(&engine).unwrap();
        assert_eq!(engine.user_version().unwrap(), SCHEMA_VERSION);

        // The core tables answer queries.
        for table in ["docs", "revs", "views", "maps", "attachments", "replicators"] {
            let count: i64 = engine
                .query_row_map(&format!("SELECT count(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0, "table {table}");
        }
    }

    #[test]
    fn installed_store_is_accepted_unchanged() {
        let engine = StorageEngine::open_in_memory().unwrap();
        install_or_check(&engine).unwrap();
        install_or_check(&engine).unwrap();
        assert_eq!(engine.user_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn future_schema_is_refused() {
        let engine = StorageEngine::open_in_memory().unwrap();
        engine.set_user_version(INCOMPATIBLE_VERSION).unwrap();
        let err = install_or_check(&engine).unwrap_err();
        assert!(matches!(err, GraftError::SchemaTooNew { version: 100 }));
    }

    #[test]
    fn sequences_autoincrement_and_never_reuse() {
        let engine = StorageEngine::open_in_memory().unwrap();
        engine.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        install_or_check(&engine).unwrap();
        engine
            .execute("INSERT INTO docs (docid) VALUES ('d1')", [])
            .unwrap();
        let doc_id = engine.last_insert_rowid();
        for revid in ["1-a", "2-b"] {
            engine
                .execute(
                    "INSERT INTO revs (doc_id, revid, current, deleted) VALUES (?1, ?2, 1, 0)",
                    rusqlite::params![doc_id, revid],
                )
                .unwrap();
        }
        assert_eq!(engine.last_insert_rowid(), 2);

        // Delete the document (cascades to revs), then insert a new one:
        // the old sequences are not handed out again.
        engine.execute("DELETE FROM docs WHERE doc_id = ?1", [doc_id]).unwrap();
        engine
            .execute("INSERT INTO docs (docid) VALUES ('d2')", [])
            .unwrap();
        let doc2 = engine.last_insert_rowid();
        engine
            .execute(
                "INSERT INTO revs (doc_id, revid, current, deleted) VALUES (?1, '1-c', 1, 0)",
                [doc2],
            )
            .unwrap();
        assert_eq!(engine.last_insert_rowid(), 3);
    }
}
