//! View descriptor bookkeeping.
//!
//! The map/reduce engine lives outside the core; what the core owns is the
//! descriptor row per named view (its version tag and the feed sequence it
//! has indexed up to) and the lifecycle of the view's map rows. Map rows
//! themselves are written by the indexer, keyed under the `JSON` collation.

use graftdb_error::{GraftError, Result};
use rusqlite::params;
use tracing::debug;

use crate::Database;

/// Descriptor row for one named view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewRecord {
    /// Internal row id, referenced by the map rows.
    pub view_id: i64,
    /// Unique view name.
    pub name: String,
    /// Version tag of the map function that produced the index.
    pub version: Option<String>,
    /// Feed sequence the index is current up to.
    pub last_indexed_sequence: i64,
}

impl Database {
    /// Look up a view descriptor by name.
    pub fn view_named(&self, name: &str) -> Result<Option<ViewRecord>> {
        self.engine.query_opt_map(
            "SELECT view_id, name, version, lastsequence FROM views WHERE name = ?1",
            params![name],
            |row| {
                Ok(ViewRecord {
                    view_id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    last_indexed_sequence: row.get(3)?,
                })
            },
        )
    }

    /// Register a view, creating its descriptor if needed.
    ///
    /// A changed version tag invalidates the existing index: the map rows
    /// are purged and the indexed sequence resets to 0.
    pub fn register_view(&self, name: &str, version: &str) -> Result<ViewRecord> {
        if let Some(existing) = self.view_named(name)? {
            if existing.version.as_deref() == Some(version) {
                return Ok(existing);
            }
            self.begin_transaction()?;
            let outcome = (|| -> Result<()> {
                self.engine.execute(
                    "UPDATE views SET version = ?1, lastsequence = 0 WHERE view_id = ?2",
                    params![version, existing.view_id],
                )?;
                self.engine.execute(
                    "DELETE FROM maps WHERE view_id = ?1",
                    params![existing.view_id],
                )?;
                Ok(())
            })();
            self.end_transaction(outcome.is_ok())?;
            outcome?;
            debug!(name, version, "view version changed, index reset");
            return Ok(ViewRecord {
                version: Some(version.to_owned()),
                last_indexed_sequence: 0,
                ..existing
            });
        }

        self.engine.execute(
            "INSERT INTO views (name, version, lastsequence) VALUES (?1, ?2, 0)",
            params![name, version],
        )?;
        Ok(ViewRecord {
            view_id: self.engine.last_insert_rowid(),
            name: name.to_owned(),
            version: Some(version.to_owned()),
            last_indexed_sequence: 0,
        })
    }

    /// Record how far the indexer has consumed the change feed.
    pub fn set_view_last_indexed_sequence(&self, view_id: i64, sequence: i64) -> Result<()> {
        self.engine.execute(
            "UPDATE views SET lastsequence = ?1 WHERE view_id = ?2",
            params![sequence, view_id],
        )?;
        if self.engine.changes() == 0 {
            return Err(GraftError::not_found(format!("view id {view_id}")));
        }
        Ok(())
    }

    /// Delete a view descriptor; its map rows cascade away.
    pub fn delete_view(&self, name: &str) -> Result<()> {
        self.engine
            .execute("DELETE FROM views WHERE name = ?1", params![name])?;
        if self.engine.changes() == 0 {
            return Err(GraftError::not_found(format!("view '{name}'")));
        }
        Ok(())
    }
}
