//! Revision store: reads.
//!
//! Lookups by document and revision id, the parent-pointer history walk,
//! the sequence-ordered change feed, the missing-revision negotiation
//! primitive, and the paginated listing of current documents.

use std::collections::BTreeSet;

use graftdb_error::{GraftError, Result};
use graftdb_types::{Body, RevId, Revision, RevisionList};
use rusqlite::{params, params_from_iter};
use serde_json::Value;

use crate::Database;

/// Options for [`Database::changes_since`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ChangesOptions {
    /// Maximum number of rows to return; `None` is unbounded.
    pub limit: Option<u64>,
    /// Attach expanded bodies to the returned revisions.
    pub include_docs: bool,
}

/// Options for [`Database::get_all_docs`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AllDocsOptions {
    /// Maximum number of rows to return; `None` is unbounded.
    pub limit: Option<u64>,
    /// Rows to skip before the page starts.
    pub skip: u64,
    /// Reverse the document-id ordering.
    pub descending: bool,
    /// Attach expanded bodies to the returned rows.
    pub include_docs: bool,
    /// Report the feed sequence the page was read at.
    pub update_seq: bool,
}

/// One row of [`Database::get_all_docs`] output.
#[derive(Clone, Debug)]
pub struct AllDocsRow {
    /// Document id.
    pub id: String,
    /// Listing key; equal to the document id.
    pub key: String,
    /// Winning revision id.
    pub revid: RevId,
    /// Expanded body when `include_docs` was set.
    pub doc: Option<Body>,
}

/// Result page of [`Database::get_all_docs`].
///
/// `total_rows` reflects the page that was returned, not the table size;
/// long-standing observed behavior, kept as is.
#[derive(Clone, Debug)]
pub struct AllDocsResult {
    /// Number of rows in this page.
    pub total_rows: usize,
    /// The skip the page was produced with.
    pub offset: u64,
    /// Feed sequence at read time, when requested.
    pub update_seq: Option<i64>,
    /// The page itself.
    pub rows: Vec<AllDocsRow>,
}

fn parse_stored_revid(token: &str) -> Result<RevId> {
    RevId::parse(token).map_err(|_| GraftError::corrupt(format!("stored revision id '{token}'")))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

impl Database {
    /// Numeric id of a document row, if the document was ever stored.
    pub(crate) fn doc_numeric_id(&self, docid: &str) -> Result<Option<i64>> {
        self.engine.query_opt_map(
            "SELECT doc_id FROM docs WHERE docid = ?1",
            params![docid],
            |row| row.get(0),
        )
    }

    /// Current winner of a document by numeric id, tombstone included:
    /// `(sequence, deleted)` of the current row with the greatest revision
    /// id.
    pub(crate) fn winning_row(&self, doc_id: i64) -> Result<Option<(i64, bool)>> {
        self.engine.query_opt_map(
            "SELECT sequence, deleted FROM revs WHERE doc_id = ?1 AND current = 1 \
             ORDER BY revid DESC LIMIT 1",
            params![doc_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }

    /// Sequence of the current row carrying `revid`, if any.
    pub(crate) fn current_sequence_of(&self, doc_id: i64, revid: &RevId) -> Result<Option<i64>> {
        self.engine.query_opt_map(
            "SELECT sequence FROM revs WHERE doc_id = ?1 AND revid = ?2 AND current = 1 LIMIT 1",
            params![doc_id, revid.as_str()],
            |row| row.get(0),
        )
    }

    /// Fetch one revision of a document.
    ///
    /// With a revision id, any branch matches. Without one, the winner is
    /// returned: the current non-deleted leaf with the lexicographically
    /// greatest revision id. The body comes back expanded with `_id`,
    /// `_rev`, and `_attachments`.
    pub fn get_document(&self, docid: &str, revid: Option<&RevId>) -> Result<Revision> {
        let row = match revid {
            Some(revid) => self.engine.query_opt_map(
                "SELECT revid, sequence, deleted, json FROM revs, docs \
                 WHERE docs.docid = ?1 AND revs.doc_id = docs.doc_id AND revid = ?2 LIMIT 1",
                params![docid, revid.as_str()],
                row_to_parts,
            )?,
            None => self.engine.query_opt_map(
                "SELECT revid, sequence, deleted, json FROM revs, docs \
                 WHERE docs.docid = ?1 AND revs.doc_id = docs.doc_id \
                 AND current = 1 AND deleted = 0 ORDER BY revid DESC LIMIT 1",
                params![docid],
                row_to_parts,
            )?,
        };
        let Some((token, sequence, deleted, json)) = row else {
            return Err(GraftError::not_found(format!("document '{docid}'")));
        };

        let revid = parse_stored_revid(&token)?;
        let body = self.expanded_body(docid, &revid, sequence, deleted, json.as_deref(), false)?;
        Ok(Revision {
            docid: docid.to_owned(),
            revid: Some(revid),
            deleted,
            sequence,
            body: Some(body),
        })
    }

    /// Fill in the body of a revision identified by `(docid, revid)`.
    ///
    /// A revision whose body is already loaded is returned untouched. The
    /// body may legitimately stay empty of properties when the row was
    /// compacted.
    pub fn load_body(&self, rev: &mut Revision, with_attachments: bool) -> Result<()> {
        if rev.body.is_some() && rev.sequence != 0 {
            return Ok(());
        }
        let Some(revid) = rev.revid.clone() else {
            return Err(GraftError::bad_request("revision carries no id to load"));
        };

        let row = self.engine.query_opt_map(
            "SELECT sequence, deleted, json FROM revs, docs \
             WHERE docs.docid = ?1 AND revs.doc_id = docs.doc_id AND revid = ?2 LIMIT 1",
            params![rev.docid, revid.as_str()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                ))
            },
        )?;
        let Some((sequence, deleted, json)) = row else {
            return Err(GraftError::not_found(format!(
                "revision '{revid}' of document '{}'",
                rev.docid
            )));
        };

        rev.sequence = sequence;
        rev.deleted = deleted;
        rev.body = Some(self.expanded_body(
            &rev.docid,
            &revid,
            sequence,
            deleted,
            json.as_deref(),
            with_attachments,
        )?);
        Ok(())
    }

    /// All revisions of a document, newest sequence first.
    pub fn get_all_revisions(&self, docid: &str) -> Result<RevisionList> {
        let Some(doc_id) = self.doc_numeric_id(docid)? else {
            return Ok(RevisionList::new());
        };
        let rows = self.engine.query_map_collect(
            "SELECT sequence, revid, deleted FROM revs WHERE doc_id = ?1 ORDER BY sequence DESC",
            params![doc_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            },
        )?;

        let mut revs = RevisionList::new();
        for (sequence, token, deleted) in rows {
            revs.push(Revision::stored(
                docid,
                parse_stored_revid(&token)?,
                deleted,
                sequence,
            ));
        }
        Ok(revs)
    }

    /// Ancestry of a revision, leaf first, by walking parent pointers back
    /// to the root.
    pub fn get_revision_history(&self, rev: &Revision) -> Result<Vec<Revision>> {
        let Some(revid) = rev.revid.as_ref() else {
            return Err(GraftError::bad_request("revision carries no id"));
        };
        let Some(doc_id) = self.doc_numeric_id(&rev.docid)? else {
            return Err(GraftError::not_found(format!("document '{}'", rev.docid)));
        };

        let rows = self.engine.query_map_collect(
            "SELECT sequence, parent, revid, deleted FROM revs \
             WHERE doc_id = ?1 ORDER BY sequence DESC",
            params![doc_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            },
        )?;

        let Some(mut index) = rows.iter().position(|r| r.2 == revid.as_str()) else {
            return Err(GraftError::not_found(format!(
                "revision '{revid}' of document '{}'",
                rev.docid
            )));
        };

        let mut history = Vec::new();
        loop {
            let (sequence, parent, ref token, deleted) = rows[index];
            history.push(Revision::stored(
                rev.docid.clone(),
                parse_stored_revid(token)?,
                deleted,
                sequence,
            ));
            let Some(parent) = parent else { break };
            // Single-row chase on the sequence index; the store is the graph.
            match rows.iter().position(|r| r.0 == parent) {
                Some(i) => index = i,
                None => break,
            }
        }
        Ok(history)
    }

    /// The replicator egress feed: current revisions (tombstones included)
    /// with `sequence > last_sequence`, ascending.
    pub fn changes_since(
        &self,
        last_sequence: i64,
        options: &ChangesOptions,
    ) -> Result<RevisionList> {
        let limit = options.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT sequence, docid, revid, deleted{} FROM revs, docs \
             WHERE sequence > ?1 AND current = 1 AND revs.doc_id = docs.doc_id \
             ORDER BY sequence LIMIT ?2",
            if options.include_docs { ", json" } else { "" }
        );
        let include_docs = options.include_docs;
        let rows = self.engine.query_map_collect(
            &sql,
            params![last_sequence, limit],
            move |row| {
                let json: Option<Vec<u8>> = if include_docs { row.get(4)? } else { None };
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    json,
                ))
            },
        )?;

        let mut changes = RevisionList::new();
        for (sequence, docid, token, deleted, json) in rows {
            let revid = parse_stored_revid(&token)?;
            let body = if include_docs {
                Some(self.expanded_body(&docid, &revid, sequence, deleted, json.as_deref(), false)?)
            } else {
                None
            };
            changes.push(Revision {
                docid,
                revid: Some(revid),
                deleted,
                sequence,
                body,
            });
        }
        Ok(changes)
    }

    /// Replication negotiation: remove from `revs` every pair present
    /// locally, leaving exactly what the caller must fetch.
    pub fn find_missing_revisions(&self, revs: &mut RevisionList) -> Result<()> {
        if revs.is_empty() {
            return Ok(());
        }

        let mut docids = BTreeSet::new();
        let mut revids = BTreeSet::new();
        for rev in revs.iter() {
            docids.insert(rev.docid.clone());
            if let Some(revid) = rev.revid.as_ref() {
                revids.insert(revid.as_str().to_owned());
            }
        }

        let sql = format!(
            "SELECT docid, revid FROM revs, docs \
             WHERE revid IN ({}) AND docid IN ({}) AND revs.doc_id = docs.doc_id",
            placeholders(revids.len()),
            placeholders(docids.len()),
        );
        let found = self.engine.query_map_collect(
            &sql,
            params_from_iter(revids.iter().chain(docids.iter())),
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;

        for (docid, token) in found {
            let revid = parse_stored_revid(&token)?;
            revs.remove_pair(&docid, &revid);
        }
        Ok(())
    }

    /// Paginated listing of current non-deleted documents.
    pub fn get_all_docs(&self, options: &AllDocsOptions) -> Result<AllDocsResult> {
        let update_seq = if options.update_seq {
            Some(self.last_sequence()?)
        } else {
            None
        };

        let limit = options.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let skip = i64::try_from(options.skip).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT docid, revid{} FROM revs, docs \
             WHERE current = 1 AND deleted = 0 AND docs.doc_id = revs.doc_id \
             ORDER BY docid {} LIMIT ?1 OFFSET ?2",
            if options.include_docs { ", json, sequence, deleted" } else { "" },
            if options.descending { "DESC" } else { "ASC" },
        );
        let include_docs = options.include_docs;
        let raw = self.engine.query_map_collect(
            &sql,
            params![limit, skip],
            move |row| {
                let (json, sequence, deleted) = if include_docs {
                    (
                        row.get::<_, Option<Vec<u8>>>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, bool>(4)?,
                    )
                } else {
                    (None, 0, false)
                };
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    json,
                    sequence,
                    deleted,
                ))
            },
        )?;

        let mut rows = Vec::with_capacity(raw.len());
        for (docid, token, json, sequence, deleted) in raw {
            let revid = parse_stored_revid(&token)?;
            let doc = if include_docs {
                Some(self.expanded_body(&docid, &revid, sequence, deleted, json.as_deref(), false)?)
            } else {
                None
            };
            rows.push(AllDocsRow {
                key: docid.clone(),
                id: docid,
                revid,
                doc,
            });
        }

        Ok(AllDocsResult {
            total_rows: rows.len(),
            offset: options.skip,
            update_seq,
            rows,
        })
    }

    /// Number of documents whose winner is live (not deleted).
    pub fn document_count(&self) -> Result<u64> {
        let count: i64 = self.engine.query_row_map(
            "SELECT count(DISTINCT doc_id) FROM revs WHERE current = 1 AND deleted = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Greatest sequence ever assigned, or 0 for an empty store.
    pub fn last_sequence(&self) -> Result<i64> {
        self.engine.query_row_map(
            "SELECT ifnull(max(sequence), 0) FROM revs",
            [],
            |row| row.get(0),
        )
    }

    /// Reassemble a stored body with its synthesized metadata keys.
    pub(crate) fn expanded_body(
        &self,
        docid: &str,
        revid: &RevId,
        sequence: i64,
        deleted: bool,
        json: Option<&[u8]>,
        with_attachment_content: bool,
    ) -> Result<Body> {
        let mut body = match json {
            Some(bytes) if !bytes.is_empty() => Body::from_json(bytes)
                .map_err(|e| GraftError::corrupt(format!("body of sequence {sequence}: {e}")))?,
            _ => Body::new(),
        };
        body.insert("_id", Value::String(docid.to_owned()));
        body.insert("_rev", Value::String(revid.as_str().to_owned()));
        if deleted {
            body.insert("_deleted", Value::Bool(true));
        }
        let attachments = self.attachments_dict(sequence, with_attachment_content)?;
        body.insert("_attachments", Value::Object(attachments));
        Ok(body)
    }
}

fn row_to_parts(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(String, i64, bool, Option<Vec<u8>>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}
