//! Pluggable write validation.
//!
//! Validators run in registration order inside the write transaction,
//! for both local writes and replication ingress. The first one to return
//! `false` aborts the write with the status its context carries.

use graftdb_error::{GraftError, Result, Status};
use graftdb_types::Revision;

use crate::Database;

/// A validation function over `(new_revision, context)`.
pub type ValidationFn = Box<dyn Fn(&Revision, &mut ValidationContext<'_>) -> bool>;

/// Per-call diagnostic state handed to each validator.
///
/// Owned by the store for the duration of one write; nothing is shared
/// across calls.
pub struct ValidationContext<'a> {
    db: &'a Database,
    previous: Option<Revision>,
    previous_loaded: bool,
    error_status: Status,
    error_message: String,
}

impl<'a> ValidationContext<'a> {
    fn new(db: &'a Database, previous: Option<Revision>) -> Self {
        Self {
            db,
            previous,
            previous_loaded: false,
            error_status: Status::Forbidden,
            error_message: "invalid document".to_owned(),
        }
    }

    /// The revision being replaced, body loaded on first access.
    ///
    /// `None` for first inserts and resurrections. A body that cannot be
    /// loaded marks the context with a storage failure and is reported as
    /// absent.
    pub fn previous_revision(&mut self) -> Option<&Revision> {
        if !self.previous_loaded {
            self.previous_loaded = true;
            if let Some(rev) = self.previous.as_mut() {
                if let Err(err) = self.db.load_body(rev, false) {
                    self.error_status = err.status();
                    self.error_message = err.to_string();
                    self.previous = None;
                }
            }
        }
        self.previous.as_ref()
    }

    /// Override the rejection outcome. Only error codes stick; a success
    /// status is ignored.
    pub fn set_error(&mut self, status: Status, message: impl Into<String>) {
        if status.is_error() {
            self.error_status = status;
            self.error_message = message.into();
        }
    }

    /// Override just the rejection message.
    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = message.into();
    }

    /// Status a `false` return will surface.
    #[must_use]
    pub fn error_status(&self) -> Status {
        self.error_status
    }

    /// Message a `false` return will surface.
    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}

impl Database {
    /// Register a validator; validators run in registration order.
    pub fn add_validation(
        &mut self,
        validation: impl Fn(&Revision, &mut ValidationContext<'_>) -> bool + 'static,
    ) {
        self.validations.push(Box::new(validation));
    }

    /// Number of registered validators.
    #[must_use]
    pub fn validation_count(&self) -> usize {
        self.validations.len()
    }

    /// Run every validator against a candidate and its parent.
    pub(crate) fn validate_revision(
        &self,
        new_rev: &Revision,
        previous: Option<Revision>,
    ) -> Result<()> {
        if self.validations.is_empty() {
            return Ok(());
        }
        let mut context = ValidationContext::new(self, previous);
        for validation in &self.validations {
            if !validation(new_rev, &mut context) {
                return Err(GraftError::Rejected {
                    status: context.error_status,
                    message: context.error_message,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use graftdb_types::Body;
    use tempfile::TempDir;

    use super::*;

    fn open_db(dir: &TempDir) -> Database {
        Database::open(dir.path().join("validation.graftdb")).unwrap()
    }

    #[test]
    fn no_validators_accepts_everything() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let rev = Revision::new("doc1", Body::new());
        db.validate_revision(&rev, None).unwrap();
        db.close().unwrap();
    }

    #[test]
    fn default_rejection_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        db.add_validation(|_, _| false);
        let err = db
            .validate_revision(&Revision::new("doc1", Body::new()), None)
            .unwrap_err();
        assert_eq!(err.status(), Status::Forbidden);
        assert_eq!(err.to_string(), "revision rejected (403): invalid document");
        db.close().unwrap();
    }

    #[test]
    fn validators_run_in_order_and_first_refusal_wins() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let calls: Rc<RefCell<Vec<u8>>> = Rc::default();

        let log = Rc::clone(&calls);
        db.add_validation(move |_, _| {
            log.borrow_mut().push(1);
            true
        });
        let log = Rc::clone(&calls);
        db.add_validation(move |_, ctx| {
            log.borrow_mut().push(2);
            ctx.set_error(Status::Unauthorized, "second says no");
            false
        });
        let log = Rc::clone(&calls);
        db.add_validation(move |_, _| {
            log.borrow_mut().push(3);
            true
        });

        let err = db
            .validate_revision(&Revision::new("doc1", Body::new()), None)
            .unwrap_err();
        assert_eq!(err.status(), Status::Unauthorized);
        assert_eq!(calls.borrow().as_slice(), [1, 2]);
        db.close().unwrap();
    }

    #[test]
    fn success_statuses_do_not_override() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        db.add_validation(|_, ctx| {
            ctx.set_error(Status::Ok, "should not stick");
            ctx.set_error_message("still refused");
            false
        });
        let err = db
            .validate_revision(&Revision::new("doc1", Body::new()), None)
            .unwrap_err();
        assert_eq!(err.status(), Status::Forbidden);
        assert!(err.to_string().contains("still refused"));
        db.close().unwrap();
    }

    #[test]
    fn validators_do_not_run_on_a_live_leaf_conflict() {
        use std::cell::Cell;
        use std::rc::Rc;

        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        db.put_revision(&Revision::new("doc1", Body::new()), None)
            .unwrap();

        let calls = Rc::new(Cell::new(0_u32));
        let counter = Rc::clone(&calls);
        db.add_validation(move |_, _| {
            counter.set(counter.get() + 1);
            false
        });

        // The structural conflict is decided before validation gets a say.
        let err = db
            .put_revision(&Revision::new("doc1", Body::new()), None)
            .unwrap_err();
        assert_eq!(err.status(), Status::Conflict);
        assert_eq!(calls.get(), 0);

        // Without a conflict the same validator runs and rejects.
        let err = db
            .put_revision(&Revision::new("doc2", Body::new()), None)
            .unwrap_err();
        assert_eq!(err.status(), Status::Forbidden);
        assert_eq!(calls.get(), 1);
        db.close().unwrap();
    }

    #[test]
    fn previous_revision_is_absent_for_first_inserts() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        db.add_validation(|_, ctx| ctx.previous_revision().is_none());
        db.validate_revision(&Revision::new("doc1", Body::new()), None)
            .unwrap();
        db.close().unwrap();
    }
}
