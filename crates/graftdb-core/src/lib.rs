//! Embedded JSON document store.
//!
//! A [`Database`] is one SQLite file holding a set of documents, each
//! versioned by a tree of revisions. Writers go through
//! [`Database::put_revision`]; replication ingress grafts foreign
//! histories with [`Database::force_insert`]; readers follow the change
//! feed with [`Database::changes_since`]. All operations are synchronous
//! and must run on the single context that owns the handle.
//!
//! Writes run inside nested transactions with a sticky failure flag: any
//! error outcome rolls the whole nesting back, and change notifications
//! are delivered only once the outermost level commits.

use std::cell::{Cell, RefCell};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use graftdb_error::Result;
use graftdb_types::Revision;
use tracing::{debug, info};

pub mod attachments;
pub mod engine;
pub mod replication;
pub mod schema;
pub mod store;
pub mod validation;
pub mod views;

mod insert;

pub use attachments::{BlobKey, BlobStore, FsBlobStore};
pub use replication::ReplicatorHandle;
pub use store::{AllDocsOptions, AllDocsResult, AllDocsRow, ChangesOptions};
pub use validation::ValidationContext;

use engine::StorageEngine;
use validation::ValidationFn;

/// A change event: one stored revision plus the peer it arrived from
/// (`None` for local writes).
#[derive(Clone, Debug)]
pub struct DatabaseChange {
    /// The revision as stored, sequence assigned.
    pub revision: Revision,
    /// Replication source when the change arrived via ingress.
    pub source: Option<String>,
}

type ChangeObserver = Box<dyn Fn(&DatabaseChange)>;

/// An open document database.
pub struct Database {
    path: PathBuf,
    attachments_dir: PathBuf,
    pub(crate) engine: StorageEngine,
    pub(crate) blobs: Box<dyn BlobStore>,
    pub(crate) validations: Vec<ValidationFn>,
    observers: Vec<ChangeObserver>,
    pub(crate) replicators: Vec<ReplicatorHandle>,
    pub(crate) next_replicator_id: Cell<u64>,
    txn_level: Cell<u32>,
    txn_failed: Cell<bool>,
    pending_changes: RefCell<Vec<DatabaseChange>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("txn_level", &self.txn_level.get())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if absent) the database at `path`, along with its
    /// sibling attachment directory.
    ///
    /// A fresh file gets the full schema; a file from a future release is
    /// refused. On any failure the partially opened engine is released and
    /// no handle is returned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let engine = StorageEngine::open(&path)?;
        if let Err(err) = Self::prepare(&engine) {
            let _ = engine.close();
            return Err(err);
        }

        let attachments_dir = attachments_dir_for(&path);
        let blobs = match FsBlobStore::open(&attachments_dir) {
            Ok(store) => Box::new(store) as Box<dyn BlobStore>,
            Err(err) => {
                let _ = engine.close();
                return Err(err);
            }
        };

        info!(path = %path.display(), "opened database");
        Ok(Self {
            path,
            attachments_dir,
            engine,
            blobs,
            validations: Vec::new(),
            observers: Vec::new(),
            replicators: Vec::new(),
            next_replicator_id: Cell::new(1),
            txn_level: Cell::new(0),
            txn_failed: Cell::new(false),
            pending_changes: RefCell::new(Vec::new()),
        })
    }

    fn prepare(engine: &StorageEngine) -> Result<()> {
        engine.execute_batch("PRAGMA foreign_keys = ON")?;
        schema::install_or_check(engine)
    }

    /// Whether a database file is present at `path`.
    #[must_use]
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the sibling attachment directory.
    #[must_use]
    pub fn attachments_dir(&self) -> &Path {
        &self.attachments_dir
    }

    /// Database name: the file stem of the backing path.
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned())
    }

    /// Close the database, releasing the engine.
    pub fn close(self) -> Result<()> {
        let path = self.path.clone();
        self.engine.close()?;
        info!(path = %path.display(), "closed database");
        Ok(())
    }

    /// Close the database and remove both the file and the attachment
    /// directory.
    pub fn delete(self) -> Result<()> {
        let path = self.path.clone();
        let attachments_dir = self.attachments_dir.clone();
        self.engine.close()?;
        remove_if_present(&path)?;
        if attachments_dir.is_dir() {
            std::fs::remove_dir_all(&attachments_dir)?;
        }
        info!(path = %path.display(), "deleted database");
        Ok(())
    }

    // --- Transactions -----------------------------------------------------

    /// Enter a (possibly nested) transaction.
    ///
    /// The engine's transaction opens on the 0→1 transition only; inner
    /// levels just increment the depth counter.
    pub fn begin_transaction(&self) -> Result<()> {
        let level = self.txn_level.get();
        if level == 0 {
            self.engine.begin()?;
            self.txn_failed.set(false);
        }
        self.txn_level.set(level + 1);
        Ok(())
    }

    /// Leave a transaction level.
    ///
    /// `commit = false` marks the whole nesting failed; the flag is sticky
    /// and cannot be cleared by an outer caller. The engine commits on the
    /// 1→0 transition if no level failed, otherwise rolls back. Queued
    /// change notifications are delivered after a successful outermost
    /// commit and discarded on rollback.
    pub fn end_transaction(&self, commit: bool) -> Result<()> {
        let level = self.txn_level.get();
        debug_assert!(level > 0, "end_transaction without begin_transaction");
        if !commit {
            self.txn_failed.set(true);
        }
        let level = level.saturating_sub(1);
        self.txn_level.set(level);
        if level > 0 {
            return Ok(());
        }

        let failed = self.txn_failed.get();
        self.txn_failed.set(false);
        if failed {
            let result = self.engine.rollback();
            self.pending_changes.borrow_mut().clear();
            result
        } else {
            self.engine.commit()?;
            let changes = std::mem::take(&mut *self.pending_changes.borrow_mut());
            for change in &changes {
                self.deliver(change);
            }
            Ok(())
        }
    }

    /// Whether a transaction nesting is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.txn_level.get() > 0
    }

    // --- Change notifications ---------------------------------------------

    /// Register an observer invoked for every committed change.
    ///
    /// Observers run on the owning context after the outermost commit and
    /// must not re-enter write operations before returning.
    pub fn add_change_observer(&mut self, observer: impl Fn(&DatabaseChange) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub(crate) fn note_change(&self, change: DatabaseChange) {
        if self.in_transaction() {
            self.pending_changes.borrow_mut().push(change);
        } else {
            self.deliver(&change);
        }
    }

    fn deliver(&self, change: &DatabaseChange) {
        debug!(
            docid = %change.revision.docid,
            sequence = change.revision.sequence,
            source = change.source.as_deref().unwrap_or("local"),
            "document changed"
        );
        for observer in &self.observers {
            observer(change);
        }
    }

    // --- Maintenance ------------------------------------------------------

    /// Reclaim space: null out the bodies of non-current revisions, drop
    /// orphaned attachment blobs, and vacuum the engine.
    ///
    /// The three steps run outside any shared transaction; the revision
    /// tree structure is untouched.
    pub fn compact(&self) -> Result<()> {
        info!(path = %self.path.display(), "compacting database");
        self.engine
            .execute("UPDATE revs SET json=null WHERE current=0", [])?;
        let removed = self.collect_attachment_garbage()?;
        self.engine.vacuum()?;
        info!(removed_blobs = removed, "compaction finished");
        Ok(())
    }
}

fn attachments_dir_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_stem()
        .map_or_else(|| OsString::from("db"), ToOwned::to_owned);
    name.push(" attachments");
    path.with_file_name(name)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
