//! Replication bookkeeping.
//!
//! The network state machine lives outside the core. What the core owns is
//! the persisted per-peer checkpoint, keyed `(remote, direction)`, and the
//! in-memory roster of active replicator handles.

use graftdb_error::Result;
use rusqlite::params;
use tracing::info;

use crate::Database;

/// Bookkeeping handle for one replication session against a peer.
///
/// The handle tracks identity and lifecycle only; transfer itself is the
/// external replicator's business.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicatorHandle {
    id: u64,
    remote: String,
    push: bool,
    continuous: bool,
    running: bool,
}

impl ReplicatorHandle {
    pub(crate) fn new(id: u64, remote: &str, push: bool, continuous: bool) -> Self {
        Self {
            id,
            remote: remote.to_owned(),
            push,
            continuous,
            running: false,
        }
    }

    /// Identity of this handle within its database.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer this session talks to.
    #[must_use]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Whether local changes are pushed to the peer (vs pulled from it).
    #[must_use]
    pub fn is_push(&self) -> bool {
        self.push
    }

    /// Whether the session keeps following the feed after catching up.
    #[must_use]
    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// Whether the session has been started and not yet stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn start(&mut self) {
        self.running = true;
        info!(remote = %self.remote, push = self.push, continuous = self.continuous, "replicator started");
    }
}

impl Database {
    /// Persisted checkpoint for a peer and direction, if one was recorded.
    pub fn last_sequence_with_remote(&self, remote: &str, push: bool) -> Result<Option<String>> {
        self.engine.query_opt_map(
            "SELECT last_sequence FROM replicators WHERE remote = ?1 AND push = ?2",
            params![remote, push],
            |row| row.get(0),
        )
    }

    /// Record a checkpoint, replacing any previous one for the pair.
    pub fn set_last_sequence_with_remote(
        &self,
        last_sequence: &str,
        remote: &str,
        push: bool,
    ) -> Result<()> {
        self.engine.execute(
            "INSERT OR REPLACE INTO replicators (remote, push, last_sequence) \
             VALUES (?1, ?2, ?3)",
            params![remote, push, last_sequence],
        )?;
        Ok(())
    }

    /// The active replicator for a peer and direction, if one is running.
    #[must_use]
    pub fn active_replicator(&self, remote: &str, push: bool) -> Option<&ReplicatorHandle> {
        self.replicators
            .iter()
            .find(|r| r.remote() == remote && r.is_push() == push)
    }

    /// Return the running session for `(remote, push)`, or construct,
    /// register, and start a new one. Yields the handle's id.
    pub fn replicate(&mut self, remote: &str, push: bool, continuous: bool) -> u64 {
        if let Some(existing) = self.active_replicator(remote, push) {
            return existing.id();
        }
        let id = self.next_replicator_id.get();
        self.next_replicator_id.set(id + 1);
        let mut handle = ReplicatorHandle::new(id, remote, push, continuous);
        handle.start();
        self.replicators.push(handle);
        id
    }

    /// Drop a stopped replicator from the roster by identity.
    pub fn replicator_did_stop(&mut self, id: u64) {
        self.replicators.retain(|r| r.id() != id);
    }
}
