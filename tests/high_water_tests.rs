use std::sync::Arc;

use migratemap::{FileStateStore, HighWaterTracker, MemoryStateStore, MigrateError, StateStore, Value};
use tempfile::TempDir;

#[test]
fn test_set_is_max_merge() {
    let tracker = HighWaterTracker::new(Arc::new(MemoryStateStore::new()));

    for (offered, expected) in [(20, 20), (50, 50), (30, 50), (50, 50), (51, 51)] {
        let stored = tracker.set("article", "changed", Value::Integer(offered)).unwrap();
        assert_eq!(stored, Some(Value::Integer(expected)));
    }
}

#[test]
fn test_text_timestamps_compare_lexically() {
    let tracker = HighWaterTracker::new(Arc::new(MemoryStateStore::new()));
    tracker
        .set("article", "updated", Value::from("2024-05-01T10:00:00Z"))
        .unwrap();
    tracker
        .set("article", "updated", Value::from("2024-04-30T23:59:59Z"))
        .unwrap();

    assert_eq!(
        tracker.get("article").unwrap(),
        Some(Value::from("2024-05-01T10:00:00Z"))
    );
}

#[test]
fn test_marks_are_per_migration() {
    let tracker = HighWaterTracker::new(Arc::new(MemoryStateStore::new()));
    tracker.set("article", "changed", Value::Integer(10)).unwrap();
    tracker.set("page", "changed", Value::Integer(99)).unwrap();

    assert_eq!(tracker.get("article").unwrap(), Some(Value::Integer(10)));
    tracker.reset("page").unwrap();
    assert_eq!(tracker.get("article").unwrap(), Some(Value::Integer(10)));
    assert!(tracker.get("page").unwrap().is_none());
}

#[test]
fn test_float_above_integer_mark() {
    let tracker = HighWaterTracker::new(Arc::new(MemoryStateStore::new()));
    tracker.set("article", "weight", Value::Integer(3)).unwrap();
    tracker.set("article", "weight", Value::Float(3.5)).unwrap();
    assert_eq!(tracker.get("article").unwrap(), Some(Value::Float(3.5)));

    assert!(matches!(
        tracker.set("article", "weight", Value::Boolean(true)),
        Err(MigrateError::TypeMismatch(_))
    ));
}

#[test]
fn test_file_backed_marks_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("state.json");

    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::open(&path).unwrap());
    let tracker = HighWaterTracker::new(store);
    tracker.set("article", "changed", Value::Integer(40)).unwrap();
    tracker.set("article", "changed", Value::Integer(35)).unwrap();
    drop(tracker);

    let reopened = HighWaterTracker::new(Arc::new(FileStateStore::open(&path).unwrap()));
    assert_eq!(reopened.get("article").unwrap(), Some(Value::Integer(40)));

    let mark = reopened.mark("article").unwrap().unwrap();
    assert_eq!(mark.property_name, "changed");
    assert_eq!(mark.migration_id, "article");
}
