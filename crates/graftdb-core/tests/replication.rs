//! End-to-end exercises of the replication surfaces: grafting foreign
//! histories, the missing-revision negotiation, conflicts between
//! branches, and peer checkpoints.

use graftdb_core::{ChangesOptions, Database};
use graftdb_error::Status;
use graftdb_types::{Body, RevId, Revision, RevisionList};
use serde_json::{json, Value};
use tempfile::TempDir;

fn open_db(dir: &TempDir) -> Database {
    Database::open(dir.path().join("repl.graftdb")).unwrap()
}

fn body(value: Value) -> Body {
    match value {
        Value::Object(map) => Body::from(map),
        _ => panic!("test body must be an object"),
    }
}

fn revid(token: &str) -> RevId {
    RevId::parse(token).unwrap()
}

fn foreign(docid: &str, token: &str, value: Value) -> Revision {
    Revision {
        docid: docid.to_owned(),
        revid: Some(revid(token)),
        deleted: false,
        sequence: 0,
        body: Some(body(value)),
    }
}

fn history(tokens: &[&str]) -> Vec<RevId> {
    tokens.iter().map(|t| revid(t)).collect()
}

#[test]
fn graft_a_foreign_history_into_an_empty_store() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let mut leaf = foreign("a", "3-c", json!({"x": 1}));
    let status = db
        .force_insert(&mut leaf, &history(&["3-c", "2-b", "1-a"]), Some("https://peer.example/db"))
        .unwrap();
    assert_eq!(status, Status::Created);
    assert_eq!(leaf.sequence, 3);

    // Oldest ancestor got the first sequence; insertion order is
    // chronological.
    let all = db.get_all_revisions("a").unwrap();
    assert_eq!(all.len(), 3);
    let by_seq: Vec<(i64, &str)> = {
        let mut v: Vec<(i64, &str)> = all
            .iter()
            .map(|r| (r.sequence, r.revid.as_ref().unwrap().as_str()))
            .collect();
        v.sort_unstable();
        v
    };
    assert_eq!(by_seq, [(1, "1-a"), (2, "2-b"), (3, "3-c")]);

    // The parent chain follows the history, leaf first.
    let walk = db.get_revision_history(&leaf).unwrap();
    let tokens: Vec<&str> = walk.iter().map(|r| r.revid.as_ref().unwrap().as_str()).collect();
    assert_eq!(tokens, ["3-c", "2-b", "1-a"]);
    let generations: Vec<u64> = walk.iter().map(Revision::generation).collect();
    assert_eq!(generations, [3, 2, 1]);

    // Only the leaf carries a body; the stubs are placeholders.
    assert_eq!(
        db.get_document("a", Some(&revid("3-c"))).unwrap().body.unwrap().get("x"),
        Some(&json!(1))
    );
    for stub in ["2-b", "1-a"] {
        let mut rev = Revision::stored("a", revid(stub), false, 0);
        db.load_body(&mut rev, false).unwrap();
        let loaded = rev.body.unwrap();
        assert!(loaded.get("x").is_none(), "stub {stub} has a body");
        assert!(!rev.deleted);
    }

    // Only the leaf is current.
    let changes = db.changes_since(0, &ChangesOptions::default()).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes.iter().next().unwrap().revid.as_ref().unwrap().as_str(), "3-c");
    db.close().unwrap();
}

#[test]
fn grafting_onto_a_local_chain_adopts_the_ancestor() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let (local, _) = db
        .put_revision(&Revision::new("a", body(json!({"v": 1}))), None)
        .unwrap();
    let local_rev = local.revid.unwrap();

    let next_token = format!("2-{}", "f".repeat(8));
    let mut leaf = foreign("a", &next_token, json!({"v": 2}));
    db.force_insert(
        &mut leaf,
        &[revid(&next_token), local_rev.clone()],
        Some("https://peer.example/db"),
    )
    .unwrap();

    // No duplicate row for the adopted ancestor, and it is no longer a
    // leaf.
    assert_eq!(db.get_all_revisions("a").unwrap().len(), 2);
    let changes = db.changes_since(0, &ChangesOptions::default()).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes.iter().next().unwrap().revid.as_ref().map(RevId::as_str),
        Some(next_token.as_str())
    );

    let walk = db.get_revision_history(&leaf).unwrap();
    assert_eq!(walk.len(), 2);
    assert_eq!(walk[1].revid.as_ref(), Some(&local_rev));
    db.close().unwrap();
}

#[test]
fn divergent_grafts_conflict_and_the_greatest_revid_wins() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let mut root = foreign("a", "1-a", json!({"v": 0}));
    db.force_insert(&mut root, &history(&["1-a"]), None).unwrap();

    let mut branch_b = foreign("a", "2-b", json!({"v": "b"}));
    db.force_insert(&mut branch_b, &history(&["2-b", "1-a"]), None)
        .unwrap();
    let mut branch_a = foreign("a", "2-a", json!({"v": "a"}));
    db.force_insert(&mut branch_a, &history(&["2-a", "1-a"]), None)
        .unwrap();

    // Both branch tips are current: an unresolved conflict.
    let changes = db.changes_since(0, &ChangesOptions::default()).unwrap();
    let tokens: Vec<&str> = changes
        .iter()
        .map(|r| r.revid.as_ref().unwrap().as_str())
        .collect();
    assert_eq!(tokens, ["2-b", "2-a"]);

    // The winner is the lexicographically greatest revision id.
    let winner = db.get_document("a", None).unwrap();
    assert_eq!(winner.revid.as_ref().unwrap().as_str(), "2-b");
    assert_eq!(winner.body.unwrap().get("v"), Some(&json!("b")));

    // Either branch remains reachable by id.
    assert_eq!(
        db.get_document("a", Some(&revid("2-a"))).unwrap().body.unwrap().get("v"),
        Some(&json!("a"))
    );
    db.close().unwrap();
}

#[test]
fn regrafting_a_known_history_adds_no_rows() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let mut leaf = foreign("a", "3-c", json!({"x": 1}));
    db.force_insert(&mut leaf, &history(&["3-c", "2-b", "1-a"]), None)
        .unwrap();

    let mut again = foreign("a", "3-c", json!({"x": 1}));
    let status = db
        .force_insert(&mut again, &history(&["3-c", "2-b", "1-a"]), None)
        .unwrap();
    assert_eq!(status, Status::Created);
    assert_eq!(again.sequence, leaf.sequence);
    assert_eq!(db.get_all_revisions("a").unwrap().len(), 3);
    assert_eq!(db.last_sequence().unwrap(), 3);
    db.close().unwrap();
}

#[test]
fn malformed_grafts_are_bad_requests() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    // History must start with the revision being inserted.
    let mut leaf = foreign("a", "2-b", json!({}));
    let err = db
        .force_insert(&mut leaf, &history(&["1-a"]), None)
        .unwrap_err();
    assert_eq!(err.status(), Status::BadRequest);

    // An empty history cannot anchor anything.
    let err = db.force_insert(&mut leaf, &[], None).unwrap_err();
    assert_eq!(err.status(), Status::BadRequest);

    // The revision must carry an id.
    let mut bare = Revision::new("a", Body::new());
    let err = db
        .force_insert(&mut bare, &history(&["1-a"]), None)
        .unwrap_err();
    assert_eq!(err.status(), Status::BadRequest);

    assert_eq!(db.last_sequence().unwrap(), 0);
    db.close().unwrap();
}

#[test]
fn graft_validation_sees_the_common_ancestor() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);

    let seen: Rc<RefCell<Vec<Option<String>>>> = Rc::default();
    let sink = Rc::clone(&seen);
    db.add_validation(move |_, ctx| {
        sink.borrow_mut().push(
            ctx.previous_revision()
                .and_then(|r| r.revid.as_ref())
                .map(|r| r.as_str().to_owned()),
        );
        true
    });

    let mut root = foreign("a", "1-a", json!({"v": 0}));
    db.force_insert(&mut root, &history(&["1-a"]), None).unwrap();

    let mut leaf = foreign("a", "3-c", json!({"v": 3}));
    db.force_insert(&mut leaf, &history(&["3-c", "2-b", "1-a"]), None)
        .unwrap();

    assert_eq!(
        seen.borrow().as_slice(),
        [None, Some("1-a".to_owned())]
    );
    db.close().unwrap();
}

#[test]
fn rejected_grafts_leave_no_trace() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.add_validation(|rev, ctx| {
        ctx.set_error(Status::Forbidden, "foreign revisions unwelcome");
        rev.docid != "a"
    });

    let mut leaf = foreign("a", "2-b", json!({"x": 1}));
    let err = db
        .force_insert(&mut leaf, &history(&["2-b", "1-a"]), Some("https://peer.example/db"))
        .unwrap_err();
    assert_eq!(err.status(), Status::Forbidden);
    assert_eq!(db.last_sequence().unwrap(), 0);
    assert!(db.get_all_revisions("a").unwrap().is_empty());
    db.close().unwrap();
}

#[test]
fn missing_revisions_negotiation() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let mut root = foreign("a", "1-a", json!({"v": 0}));
    db.force_insert(&mut root, &history(&["1-a"]), None).unwrap();

    let mut wanted = RevisionList::new();
    wanted.push(Revision::stored("a", revid("1-a"), false, 0));
    wanted.push(Revision::stored("a", revid("2-b"), false, 0));
    wanted.push(Revision::stored("b", revid("1-x"), false, 0));

    db.find_missing_revisions(&mut wanted).unwrap();

    let remaining: Vec<(String, String)> = wanted
        .iter()
        .map(|r| (r.docid.clone(), r.revid.as_ref().unwrap().as_str().to_owned()))
        .collect();
    assert_eq!(
        remaining,
        [
            ("a".to_owned(), "2-b".to_owned()),
            ("b".to_owned(), "1-x".to_owned()),
        ]
    );

    // An empty candidate set short-circuits.
    let mut empty = RevisionList::new();
    db.find_missing_revisions(&mut empty).unwrap();
    assert!(empty.is_empty());
    db.close().unwrap();
}

#[test]
fn cross_document_pairs_must_match_both_dimensions() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let mut a = foreign("a", "1-a", json!({}));
    db.force_insert(&mut a, &history(&["1-a"]), None).unwrap();
    let mut b = foreign("b", "1-b", json!({}));
    db.force_insert(&mut b, &history(&["1-b"]), None).unwrap();

    // (b, 1-a) crosses the dimensions: both tokens exist locally but not
    // as a pair, so it is still missing.
    let mut wanted = RevisionList::new();
    wanted.push(Revision::stored("b", revid("1-a"), false, 0));
    db.find_missing_revisions(&mut wanted).unwrap();
    assert_eq!(wanted.len(), 1);
    db.close().unwrap();
}

#[test]
fn graft_notifications_carry_the_source() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    let seen: Rc<RefCell<Vec<Option<String>>>> = Rc::default();
    let sink = Rc::clone(&seen);
    db.add_change_observer(move |change| {
        sink.borrow_mut().push(change.source.clone());
    });

    let mut leaf = foreign("a", "1-a", json!({}));
    db.force_insert(&mut leaf, &history(&["1-a"]), Some("https://peer.example/db"))
        .unwrap();
    db.put_revision(&Revision::new("b", Body::new()), None)
        .unwrap();

    assert_eq!(
        seen.borrow().as_slice(),
        [Some("https://peer.example/db".to_owned()), None]
    );
    db.close().unwrap();
}

#[test]
fn tombstones_graft_like_any_other_leaf() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let mut root = foreign("a", "1-a", json!({"v": 0}));
    db.force_insert(&mut root, &history(&["1-a"]), None).unwrap();

    let mut tombstone = Revision {
        docid: "a".to_owned(),
        revid: Some(revid("2-dead")),
        deleted: true,
        sequence: 0,
        body: None,
    };
    db.force_insert(&mut tombstone, &history(&["2-dead", "1-a"]), None)
        .unwrap();

    assert_eq!(db.document_count().unwrap(), 0);
    assert!(db.get_document("a", None).unwrap_err().is_not_found());

    // The tombstone is the current leaf on the feed.
    let changes = db.changes_since(0, &ChangesOptions::default()).unwrap();
    assert_eq!(changes.len(), 1);
    assert!(changes.iter().next().unwrap().deleted);
    db.close().unwrap();
}
