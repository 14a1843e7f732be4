//! Storage engine adapter.
//!
//! A thin synchronous wrapper around the embedded relational engine:
//! parameterized query/update helpers, last-insert-id and affected-row
//! accessors, and registration of the `JSON` collation. Nothing above this
//! module touches `rusqlite` types directly except to bind parameters.

use std::path::{Path, PathBuf};
use std::time::Duration;

use graftdb_error::{GraftError, Result};
use graftdb_types::collate_json;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Params, Row};
use tracing::debug;

/// Bound on waits against the engine's internal lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Map an engine error onto the store's taxonomy, keeping the engine's
/// extended result code when one was reported.
pub(crate) fn storage_error(err: rusqlite::Error) -> GraftError {
    match err {
        rusqlite::Error::SqliteFailure(e, message) => GraftError::Storage {
            code: Some(e.extended_code),
            message: message.unwrap_or_else(|| e.to_string()),
        },
        other => GraftError::Storage {
            code: None,
            message: other.to_string(),
        },
    }
}

/// Synchronous handle on one database file.
pub struct StorageEngine {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StorageEngine {
    /// Open (creating if absent) the database file at `path`.
    ///
    /// Configures the busy-retry timeout and installs the `JSON` collation;
    /// both must be in place before any schema statement runs.
    pub fn open(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags).map_err(storage_error)?;
        Self::configure(conn, path.to_path_buf())
    }

    /// Open a transient in-memory engine (tests and tooling).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_error)?;
        Self::configure(conn, PathBuf::from(":memory:"))
    }

    fn configure(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(storage_error)?;
        conn.create_collation("JSON", |a, b| collate_json(a, b))
            .map_err(storage_error)?;
        debug!(path = %path.display(), "storage engine opened");
        Ok(Self { conn, path })
    }

    /// Close the engine, surfacing any failure to flush.
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.conn
            .close()
            .map_err(|(_conn, err)| storage_error(err))?;
        debug!(path = %path.display(), "storage engine closed");
        Ok(())
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run one or more statements that take no parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(storage_error)
    }

    /// Run a parameterized update, returning the affected row count.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.conn.execute(sql, params).map_err(storage_error)
    }

    /// Run a query expected to return exactly one row, mapping it with `f`.
    pub fn query_row_map<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.conn.query_row(sql, params, f).map_err(storage_error)
    }

    /// Like [`Self::query_row_map`] but absent rows yield `None`.
    pub fn query_opt_map<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.conn
            .query_row(sql, params, f)
            .optional()
            .map_err(storage_error)
    }

    /// Run a query and collect every row through the mapping closure.
    pub fn query_map_collect<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql).map_err(storage_error)?;
        let rows = stmt.query_map(params, f).map_err(storage_error)?;
        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(storage_error)
    }

    /// Open the engine's transaction.
    pub fn begin(&self) -> Result<()> {
        self.execute_batch("BEGIN TRANSACTION")
    }

    /// Commit the engine's transaction.
    pub fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT")
    }

    /// Roll the engine's transaction back.
    pub fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK TRANSACTION")
    }

    /// Row id assigned by the most recent successful insert.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Rows affected by the most recent update.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.conn.changes()
    }

    /// Reclaim free pages in the backing file.
    pub fn vacuum(&self) -> Result<()> {
        self.execute_batch("VACUUM")
    }

    /// Read the schema version tag.
    pub fn user_version(&self) -> Result<i32> {
        self.conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(storage_error)
    }

    /// Record the schema version tag.
    pub fn set_user_version(&self, version: i32) -> Result<()> {
        self.conn
            .pragma_update(None, "user_version", version)
            .map_err(storage_error)
    }
}
