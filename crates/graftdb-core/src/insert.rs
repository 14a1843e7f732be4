//! Revision store: writes.
//!
//! [`Database::put_revision`] is the local write path; replication ingress
//! grafts foreign histories through [`Database::force_insert`]. Both run
//! under the nested transaction machinery and roll back wholesale on any
//! error outcome.

use graftdb_error::{GraftError, Result, Status};
use graftdb_types::{RevId, Revision};
use rusqlite::params;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{Database, DatabaseChange};

fn generate_docid() -> String {
    Uuid::new_v4().simple().to_string()
}

fn generated_child_id(prev: Option<&RevId>) -> RevId {
    let digest = Uuid::new_v4().simple().to_string();
    match prev {
        Some(prev) => prev.child(&digest),
        None => RevId::new(1, &digest),
    }
}

impl Database {
    /// Store a new revision of a document.
    ///
    /// `rev` is a candidate: optional `docid` (one is generated when
    /// empty), optional body, a `deleted` flag, and no revision id; the
    /// store assigns one. `prev_revid` names the revision being replaced,
    /// or `None` for a first insert.
    ///
    /// Returns the stored revision plus 201 for a creation or 200 for a
    /// deletion. Stale or missing parents yield 409/404, structural
    /// problems 400, validator refusals the validator's status. A failed
    /// write leaves the store byte-identical to its pre-call state.
    pub fn put_revision(
        &self,
        rev: &Revision,
        prev_revid: Option<&RevId>,
    ) -> Result<(Revision, Status)> {
        if rev.revid.is_some() {
            return Err(GraftError::bad_request(
                "candidate revision must not carry a revision id",
            ));
        }
        if prev_revid.is_some() && rev.docid.is_empty() {
            return Err(GraftError::bad_request(
                "a previous revision id requires a document id",
            ));
        }
        if rev.deleted && prev_revid.is_none() {
            return Err(GraftError::bad_request(
                "a deletion requires a previous revision id",
            ));
        }

        self.begin_transaction()?;
        let outcome = self.put_revision_inner(rev, prev_revid);
        self.end_transaction(outcome.is_ok())?;
        outcome
    }

    fn put_revision_inner(
        &self,
        rev: &Revision,
        prev_revid: Option<&RevId>,
    ) -> Result<(Revision, Status)> {
        let mut docid = rev.docid.clone();
        let mut parent_sequence = 0_i64;
        let doc_id;

        if let Some(prev) = prev_revid {
            // Replacing: the named parent must be a current leaf.
            let known_doc = self.doc_numeric_id(&docid)?;
            parent_sequence = match known_doc {
                Some(doc) => self.current_sequence_of(doc, prev)?.unwrap_or(0),
                None => 0,
            };
            if parent_sequence == 0 {
                // Stale parent if the document has any current revision,
                // otherwise simply unknown.
                let has_current = known_doc
                    .map(|doc| self.winning_row(doc))
                    .transpose()?
                    .flatten()
                    .is_some();
                return Err(if has_current {
                    GraftError::Conflict
                } else {
                    GraftError::not_found(format!("revision '{prev}' of document '{docid}'"))
                });
            }
            doc_id = known_doc.unwrap_or(0);

            let previous = Revision::stored(docid.clone(), prev.clone(), false, parent_sequence);
            self.validate_revision(rev, Some(previous))?;
        } else {
            // First revision, or resurrection over a tombstone. A live
            // leaf is a structural conflict and takes priority over any
            // validator's verdict.
            if docid.is_empty() {
                docid = generate_docid();
                doc_id = self.insert_docid(&docid)?;
            } else {
                match self.doc_numeric_id(&docid)? {
                    Some(existing) => {
                        doc_id = existing;
                        if let Some((winner_sequence, deleted)) = self.winning_row(existing)? {
                            if !deleted {
                                return Err(GraftError::Conflict);
                            }
                            // Resurrection: the tombstone stops being
                            // current and the new revision starts a
                            // fresh root.
                            self.engine.execute(
                                "UPDATE revs SET current = 0 WHERE sequence = ?1",
                                params![winner_sequence],
                            )?;
                        }
                    }
                    None => doc_id = self.insert_docid(&docid)?,
                }
            }

            // Validators run once the document state is resolved; they
            // see no previous revision on this path.
            self.validate_revision(rev, None)?;
        }

        let new_revid = generated_child_id(prev_revid);

        // Persist the body without its synthesized keys; tombstones carry
        // no body at all.
        let attachments = rev
            .body
            .as_ref()
            .and_then(|body| body.get("_attachments"))
            .cloned();
        let json: Option<Vec<u8>> = if rev.deleted {
            None
        } else {
            let mut props = rev.body.clone().unwrap_or_default();
            props.strip_reserved();
            Some(props.to_json()?)
        };

        let sequence =
            self.insert_revision_row(doc_id, &new_revid, parent_sequence, true, rev.deleted, json)?;

        if parent_sequence > 0 {
            self.engine.execute(
                "UPDATE revs SET current = 0 WHERE sequence = ?1",
                params![parent_sequence],
            )?;
        }

        self.process_attachments_dict(attachments.as_ref(), sequence, parent_sequence)?;

        let stored = Revision {
            docid,
            revid: Some(new_revid),
            deleted: rev.deleted,
            sequence,
            body: rev.body.clone(),
        };
        info!(
            docid = %stored.docid,
            revid = %stored.revid.as_ref().map_or("", RevId::as_str),
            sequence,
            deleted = stored.deleted,
            "stored revision"
        );
        self.note_change(DatabaseChange {
            revision: stored.clone(),
            source: None,
        });

        let status = if rev.deleted {
            Status::Ok
        } else {
            Status::Created
        };
        Ok((stored, status))
    }

    /// Graft a foreign revision history onto the local tree.
    ///
    /// `history` lists revision ids newest first, starting with `rev`'s
    /// own id. Ancestors already known locally are adopted; missing
    /// intermediates are filled in as stubs (no body, not deleted, not
    /// current); the leaf lands with its body and `current = 1`. Leaves on
    /// branches outside the history are left current, so divergent grafts
    /// surface as conflicts.
    ///
    /// On success `rev.sequence` holds the leaf's sequence and the change
    /// notification carries `source`.
    pub fn force_insert(
        &self,
        rev: &mut Revision,
        history: &[RevId],
        source: Option<&str>,
    ) -> Result<Status> {
        let Some(new_revid) = rev.revid.clone() else {
            return Err(GraftError::bad_request("forced revision carries no id"));
        };
        if rev.docid.is_empty() {
            return Err(GraftError::bad_request("forced revision carries no document id"));
        }
        if history.first() != Some(&new_revid) {
            return Err(GraftError::bad_request(
                "revision history must start with the revision being inserted",
            ));
        }

        self.begin_transaction()?;
        let outcome = self.force_insert_inner(rev, history, source);
        self.end_transaction(outcome.is_ok())?;
        outcome?;
        Ok(Status::Created)
    }

    fn force_insert_inner(
        &self,
        rev: &mut Revision,
        history: &[RevId],
        source: Option<&str>,
    ) -> Result<()> {
        let docid = rev.docid.clone();
        let doc_id = match self.doc_numeric_id(&docid)? {
            Some(doc) => doc,
            None => self.insert_docid(&docid)?,
        };
        let local = self.get_all_revisions(&docid)?;

        if !self.validations.is_empty() {
            // The common ancestor is the newest history entry known
            // locally; it may not exist at all.
            let ancestor = history[1..]
                .iter()
                .find_map(|revid| local.rev_with_id(&docid, revid))
                .cloned();
            self.validate_revision(rev, ancestor)?;
        }

        // Walk the history oldest to newest, matching local rows and
        // filling in the gaps.
        let mut sequence = 0_i64;
        let mut local_parent_sequence = 0_i64;
        for (index, revid) in history.iter().enumerate().rev() {
            if let Some(local_rev) = local.rev_with_id(&docid, revid) {
                sequence = local_rev.sequence;
                local_parent_sequence = sequence;
                continue;
            }

            let is_leaf = index == 0;
            let json: Option<Vec<u8>> = if is_leaf && !rev.deleted {
                let mut props = rev.body.clone().unwrap_or_default();
                props.strip_reserved();
                Some(props.to_json()?)
            } else {
                None
            };
            let deleted = is_leaf && rev.deleted;
            sequence = self.insert_revision_row(doc_id, revid, sequence, is_leaf, deleted, json)?;
            debug!(
                docid = %docid,
                revid = %revid,
                sequence,
                stub = !is_leaf,
                "grafted revision"
            );

            if is_leaf {
                let attachments = rev
                    .body
                    .as_ref()
                    .and_then(|body| body.get("_attachments"))
                    .cloned();
                self.process_attachments_dict(
                    attachments.as_ref(),
                    sequence,
                    local_parent_sequence,
                )?;
            }
        }

        // The newest pre-existing ancestor on this chain is no longer a
        // leaf once rows were grafted under it.
        if local_parent_sequence > 0 && local_parent_sequence != sequence {
            self.engine.execute(
                "UPDATE revs SET current = 0 WHERE sequence = ?1",
                params![local_parent_sequence],
            )?;
        }

        rev.sequence = sequence;
        info!(
            docid = %docid,
            revid = %rev.revid.as_ref().map_or("", RevId::as_str),
            sequence,
            source = source.unwrap_or("unknown"),
            "force-inserted revision"
        );
        self.note_change(DatabaseChange {
            revision: rev.clone(),
            source: source.map(str::to_owned),
        });
        Ok(())
    }

    fn insert_docid(&self, docid: &str) -> Result<i64> {
        self.engine
            .execute("INSERT INTO docs (docid) VALUES (?1)", params![docid])?;
        Ok(self.engine.last_insert_rowid())
    }

    fn insert_revision_row(
        &self,
        doc_id: i64,
        revid: &RevId,
        parent_sequence: i64,
        current: bool,
        deleted: bool,
        json: Option<Vec<u8>>,
    ) -> Result<i64> {
        let parent = (parent_sequence > 0).then_some(parent_sequence);
        self.engine.execute(
            "INSERT INTO revs (doc_id, revid, parent, current, deleted, json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![doc_id, revid.as_str(), parent, current, deleted, json],
        )?;
        Ok(self.engine.last_insert_rowid())
    }
}
