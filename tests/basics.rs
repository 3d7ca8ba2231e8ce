//! Tree semantics integration tests.
//!
//! Exercises the store through its public API against both backends:
//! the fruits scenarios (save, merge, implicit ancestors, deletes) plus
//! the cross-cutting invariants (ancestor rev bumps, gap-free seqs,
//! change completeness, conflict detection).

use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use summadb::{SummaConfig, SummaDb, SummaError, TreePath};

fn open_memory() -> SummaDb {
    SummaDb::open(SummaConfig::default()).unwrap()
}

fn p(raw: &str) -> TreePath {
    TreePath::parse(raw).unwrap()
}

// =============================================================================
// Fruits scenarios
// =============================================================================

#[test]
fn save_tree_then_read_values_at_every_depth() {
    let db = open_memory();

    db.save_tree_at(
        &p("/fruits/banana"),
        &json!({"colour": "yellow", "hardness": "low", "_val": "a fruit."}),
    )
    .unwrap();

    assert_eq!(db.get_value_at(&p("/fruits/banana")).unwrap(), b"\"a fruit.\"");
    assert_eq!(
        db.get_value_at(&p("/fruits/banana/colour")).unwrap(),
        b"\"yellow\""
    );
    assert_eq!(
        db.get_value_at(&p("/fruits/banana/hardness")).unwrap(),
        b"\"low\""
    );

    // The intermediate node has no scalar of its own.
    assert!(matches!(
        db.get_value_at(&p("/fruits")),
        Err(SummaError::NotFound)
    ));

    let tree = db.get_tree_at(&p("/fruits")).unwrap();
    assert_eq!(tree["banana"]["_val"], json!("a fruit."));
    assert_eq!(tree["banana"]["colour"]["_val"], json!("yellow"));
    assert_eq!(tree["banana"]["hardness"]["_val"], json!("low"));
}

#[test]
fn save_value_modifies_one_leaf_only() {
    let db = open_memory();
    db.save_tree_at(
        &p("/fruits/banana"),
        &json!({"colour": "yellow", "hardness": "low"}),
    )
    .unwrap();

    db.save_value_at(&p("/fruits/banana/colour"), b"\"black-and-yellow\"".to_vec())
        .unwrap();

    assert_eq!(
        db.get_value_at(&p("/fruits/banana/colour")).unwrap(),
        b"\"black-and-yellow\""
    );
    assert_eq!(
        db.get_value_at(&p("/fruits/banana/hardness")).unwrap(),
        b"\"low\""
    );
}

#[test]
fn deep_write_creates_ancestors_implicitly() {
    let db = open_memory();
    db.save_tree_at(&p("/fruits/banana"), &json!({"colour": "yellow"}))
        .unwrap();

    db.save_value_at(&p("/fruits/mellon/season"), b"\"spring\"".to_vec())
        .unwrap();

    let tree = db.get_tree_at(&p("/fruits")).unwrap();
    assert!(tree.get("banana").is_some());
    assert_eq!(tree["mellon"]["season"]["_val"], json!("spring"));
}

#[test]
fn delete_leaf_leaves_tombstone_behind() {
    let db = open_memory();
    db.save_tree_at(
        &p("/fruits/banana"),
        &json!({"colour": "yellow", "hardness": "low"}),
    )
    .unwrap();

    db.delete_at(&p("/fruits/banana/colour")).unwrap();

    assert!(matches!(
        db.get_value_at(&p("/fruits/banana/colour")),
        Err(SummaError::NotFound)
    ));
    assert_eq!(
        db.get_value_at(&p("/fruits/banana/colour/_deleted")).unwrap(),
        b"true"
    );
    // Sibling untouched.
    assert_eq!(
        db.get_value_at(&p("/fruits/banana/hardness")).unwrap(),
        b"\"low\""
    );
}

#[test]
fn null_in_tree_tombstones_whole_subtree() {
    let db = open_memory();
    db.save_tree_at(
        &p("/fruits/mellon"),
        &json!({"colour": "orange", "season": "spring"}),
    )
    .unwrap();

    db.save_tree_at(&p("/fruits"), &json!({"mellon": null}))
        .unwrap();

    for leaf in ["/fruits/mellon", "/fruits/mellon/colour", "/fruits/mellon/season"] {
        assert!(
            matches!(db.get_value_at(&p(leaf)), Err(SummaError::NotFound)),
            "{leaf} should be gone"
        );
    }
    assert_eq!(
        db.get_value_at(&p("/fruits/mellon/_deleted")).unwrap(),
        b"true"
    );
}

#[test]
fn delete_subtree_then_whole_database() {
    let db = open_memory();
    db.save_tree_at(
        &p("/fruits/banana"),
        &json!({"colour": "yellow", "hardness": "low"}),
    )
    .unwrap();
    db.save_tree_at(&p("/fruits/orange"), &json!({"colour": "orange"}))
        .unwrap();

    db.delete_at(&p("/fruits/banana")).unwrap();
    assert_eq!(
        db.get_value_at(&p("/fruits/orange/colour")).unwrap(),
        b"\"orange\""
    );
    assert!(db.get_value_at(&p("/fruits/banana/hardness")).is_err());

    db.delete_at(&p("/fruits")).unwrap();
    assert!(db.get_value_at(&p("/fruits")).is_err());
    assert_eq!(db.get_value_at(&p("/fruits/orange/_deleted")).unwrap(), b"true");
    assert!(db.get_value_at(&p("/fruits/orange/colour")).is_err());
}

// =============================================================================
// Invariants
// =============================================================================

#[test]
fn ancestor_generations_bump_by_exactly_one() {
    let db = open_memory();
    db.save_value_at(&p("/a/b/c"), b"1".to_vec()).unwrap();

    let before: Vec<u64> = ["/a/b/c", "/a/b", "/a", "/"]
        .iter()
        .map(|raw| db.get_rev(&p(raw)).unwrap().generation())
        .collect();

    db.save_value_at(&p("/a/b/c"), b"2".to_vec()).unwrap();

    for (i, raw) in ["/a/b/c", "/a/b", "/a", "/"].iter().enumerate() {
        let after = db.get_rev(&p(raw)).unwrap().generation();
        assert_eq!(after, before[i] + 1, "generation at {raw}");
    }
}

#[test]
fn seqs_are_strictly_ordered_and_bounded() {
    let db = open_memory();
    let mut seqs = Vec::new();
    for i in 0..8u8 {
        db.save_value_at(&p(&format!("/docs/d{i}")), b"1".to_vec())
            .unwrap();
        seqs.push(db.global_update_seq());
    }
    for window in seqs.windows(2) {
        assert!(window[0] < window[1]);
    }
    assert_eq!(*seqs.last().unwrap(), db.global_update_seq());
}

#[test]
fn concurrent_writers_never_lose_a_seq() {
    let db = Arc::new(open_memory());
    let mut handles = Vec::new();

    for writer in 0..4 {
        let db = db.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..10 {
                db.save_value_at(
                    &TreePath::parse(&format!("/w{writer}/item{i}")).unwrap(),
                    b"1".to_vec(),
                )
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // 40 writes, gap-free counter, 40 leaf changes in the feed.
    assert_eq!(db.global_update_seq(), 40);
    let changes = db.list_changes_at(&p("/"), 0).unwrap();
    let leaves = changes
        .iter()
        .filter(|c| c.path.contains("/item"))
        .count();
    assert_eq!(leaves, 40);
}

#[test]
fn change_feed_is_complete_per_subtree() {
    let db = open_memory();
    db.save_value_at(&p("/a/one"), b"1".to_vec()).unwrap();
    let since = db.global_update_seq();
    db.save_value_at(&p("/a/two"), b"2".to_vec()).unwrap();
    db.save_value_at(&p("/b/other"), b"3".to_vec()).unwrap();
    db.save_value_at(&p("/a/two"), b"2b".to_vec()).unwrap();

    let changes = db.list_changes_at(&p("/a"), since).unwrap();
    // Exactly one entry per touched path under /a, coalesced to newest.
    let two: Vec<_> = changes.iter().filter(|c| c.path == "/a/two").collect();
    assert_eq!(two.len(), 1);
    assert_eq!(two[0].seq, db.global_update_seq());
    assert!(!changes.iter().any(|c| c.path.starts_with("/b")));
    assert!(!changes.iter().any(|c| c.path == "/a/one"));
}

#[test]
fn deleted_paths_stay_visible_to_changes() {
    let db = open_memory();
    db.save_value_at(&p("/doc"), b"1".to_vec()).unwrap();
    db.delete_at(&p("/doc")).unwrap();

    let feed = db.list_changes_at(&p("/"), 0).unwrap();
    let doc = feed.iter().find(|c| c.path == "/doc").unwrap();
    assert!(doc.deleted);
    assert!(!doc.rev.is_empty());
}

#[test]
fn stale_rev_loses_exactly_once() {
    let db = open_memory();
    let rev1 = db
        .replace_tree_at(&p("/doc"), &json!({"n": "1"}), false)
        .unwrap();

    let first = db.replace_tree_at(
        &p("/doc"),
        &json!({"n": "2", "_rev": rev1.to_string()}),
        false,
    );
    let second = db.replace_tree_at(
        &p("/doc"),
        &json!({"n": "3", "_rev": rev1.to_string()}),
        false,
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(SummaError::Conflict { .. })));
    assert_eq!(db.get_value_at(&p("/doc/n")).unwrap(), b"\"2\"");
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn data_and_seq_survive_reopen() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("summa.db");
    let config = SummaConfig {
        db_path: Some(file.to_string_lossy().into_owned()),
        ..Default::default()
    };

    let rev = {
        let db = SummaDb::open(config.clone()).unwrap();
        db.save_tree_at(&p("/fruits/banana"), &json!({"colour": "yellow"}))
            .unwrap();
        let rev = db.get_rev(&p("/fruits/banana")).unwrap();
        db.close().unwrap();
        rev
    };

    let db = SummaDb::open(config).unwrap();
    assert_eq!(
        db.get_value_at(&p("/fruits/banana/colour")).unwrap(),
        b"\"yellow\""
    );
    assert_eq!(db.get_rev(&p("/fruits/banana")).unwrap(), rev);
    assert_eq!(db.global_update_seq(), 1);

    // The next write continues the sequence instead of restarting it.
    db.save_value_at(&p("/fruits/banana/colour"), b"\"green\"".to_vec())
        .unwrap();
    assert_eq!(db.global_update_seq(), 2);
}

#[test]
fn erase_resets_the_database_file() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("summa.db");
    let config = SummaConfig {
        db_path: Some(file.to_string_lossy().into_owned()),
        ..Default::default()
    };

    {
        let db = SummaDb::open(config.clone()).unwrap();
        db.save_value_at(&p("/doc"), b"1".to_vec()).unwrap();
        db.close().unwrap();
    }

    SummaDb::erase(&file.to_string_lossy()).unwrap();

    let db = SummaDb::open(config).unwrap();
    assert_eq!(db.global_update_seq(), 0);
    assert!(db.get_value_at(&p("/doc")).is_err());
}
