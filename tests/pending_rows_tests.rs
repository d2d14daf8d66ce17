use std::sync::Arc;

use migratemap::{
    CancellationToken, Column, ConnectionInfo, ConnectionManager, DataType, HighWaterProperty, HighWaterTracker,
    IdMap, KeyField, MemoryStateStore, MigrationDescriptor, SourceIdStatus, SqlIdMap, SqlSource, TableSchema,
    TableSourcePlugin, Value,
};

struct Setup {
    source: SqlSource,
    id_map: Arc<SqlIdMap>,
    high_water: HighWaterTracker,
}

/// Five nodes with `changed` = 10..50; nodes 1..3 already imported; the
/// stored high-water mark is 30.
fn setup() -> Setup {
    let connections = ConnectionManager::new();
    let info = ConnectionInfo::new("memory", "legacy")
        .host("localhost")
        .port(3306)
        .credentials("migrate", "secret");
    let legacy = connections.open(info.clone()).unwrap();

    legacy
        .database()
        .create_table(
            TableSchema::new(
                "node",
                vec![
                    Column::new("nid", DataType::Integer).not_null(),
                    Column::new("title", DataType::Text),
                    Column::new("changed", DataType::Integer),
                ],
            )
            .with_primary_key(&["nid"]),
        )
        .unwrap();
    for (nid, changed) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
        legacy
            .database()
            .insert(
                "node",
                vec![Value::Integer(nid), Value::from(format!("Node {}", nid)), Value::Integer(changed)],
            )
            .unwrap();
    }

    let mut map_info = info;
    map_info.database = "tracking".into();
    let id_map = Arc::new(
        SqlIdMap::open(
            connections.open(map_info).unwrap(),
            "d7_node_article",
            vec![KeyField::new("nid", DataType::Integer)],
            vec![KeyField::new("id", DataType::Integer)],
        )
        .unwrap(),
    );
    for nid in 1..=3 {
        id_map
            .upsert(&[Value::Integer(nid)], Some(&[Value::Integer(nid * 100)]), SourceIdStatus::Imported, None)
            .unwrap();
    }

    let high_water = HighWaterTracker::new(Arc::new(MemoryStateStore::new()));
    high_water.set("d7_node_article", "changed", Value::Integer(30)).unwrap();

    let descriptor = MigrationDescriptor::new("d7_node_article")
        .source_key(KeyField::new("nid", DataType::Integer).with_alias("n"))
        .destination_key(KeyField::new("id", DataType::Integer))
        .high_water(HighWaterProperty::new("changed").with_alias("n"));
    let plugin = TableSourcePlugin::new("node", "n", vec![KeyField::new("nid", DataType::Integer)]);
    let source = SqlSource::new(Box::new(plugin), descriptor, legacy)
        .unwrap()
        .with_id_map(id_map.clone())
        .with_high_water(high_water.clone());

    Setup {
        source,
        id_map,
        high_water,
    }
}

fn pending(source: &SqlSource) -> Vec<i64> {
    source
        .cursor(CancellationToken::new())
        .unwrap()
        .map(|row| row.unwrap().source_ids()[0].as_i64().unwrap())
        .collect()
}

/// Rows returned by the augmented query itself, before the cursor's own
/// per-row filtering.
fn queried(source: &SqlSource) -> Vec<i64> {
    let result = source.connection().query(&source.pending_query().unwrap()).unwrap();
    result
        .column_values("nid")
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect()
}

#[test]
fn test_scenario_high_water_and_imported_rows() {
    let setup = setup();
    assert!(setup.source.is_map_joinable());
    assert_eq!(queried(&setup.source), vec![4, 5]);
    assert_eq!(pending(&setup.source), vec![4, 5]);
}

#[test]
fn test_scenario_needs_update_is_honored() {
    let setup = setup();
    assert!(setup.id_map.set_needs_update(&[Value::Integer(2)]).unwrap());
    assert_eq!(queried(&setup.source), vec![2, 4, 5]);
    assert_eq!(pending(&setup.source), vec![2, 4, 5]);
}

#[test]
fn test_rows_without_map_rows_are_pending() {
    let setup = setup();
    setup.high_water.reset("d7_node_article").unwrap();
    setup.id_map.delete(&[Value::Integer(1)]).unwrap();

    assert_eq!(pending(&setup.source), vec![1, 4, 5]);
}

#[test]
fn test_rows_above_high_water_are_pending_even_if_imported() {
    let setup = setup();
    for nid in 4..=5 {
        setup
            .id_map
            .upsert(&[Value::Integer(nid)], Some(&[Value::Integer(nid * 100)]), SourceIdStatus::Imported, None)
            .unwrap();
    }
    assert_eq!(pending(&setup.source), vec![4, 5]);

    setup.high_water.set("d7_node_article", "changed", Value::Integer(50)).unwrap();
    assert!(pending(&setup.source).is_empty());
}

#[test]
fn test_failed_rows_are_pending() {
    let setup = setup();
    setup
        .id_map
        .upsert(&[Value::Integer(1)], None, SourceIdStatus::Failed, None)
        .unwrap();
    assert_eq!(pending(&setup.source), vec![1, 4, 5]);
}

#[test]
fn test_count_covers_whole_source() {
    let setup = setup();
    assert_eq!(setup.source.count().unwrap(), 5);
    assert_eq!(pending(&setup.source).len(), 2);
}

#[test]
fn test_cursor_is_single_pass() {
    let setup = setup();
    let mut cursor = setup.source.cursor(CancellationToken::new()).unwrap();
    assert_eq!(cursor.by_ref().count(), 2);
    assert!(cursor.next().is_none());

    // A fresh cursor sees the rows again.
    assert_eq!(pending(&setup.source), vec![4, 5]);
}

#[test]
fn test_map_rows_are_projected_into_results() {
    let setup = setup();
    setup.id_map.set_needs_update(&[Value::Integer(3)]).unwrap();

    let result = setup
        .source
        .connection()
        .query(&setup.source.pending_query().unwrap())
        .unwrap();
    let records = result.into_records();
    let node3 = records.iter().find(|r| r["nid"] == Value::Integer(3)).unwrap();
    assert_eq!(node3["migrate_map_destid1"], Value::Integer(300));
    assert_eq!(node3["migrate_map_source_row_status"], Value::Integer(1));

    let node4 = records.iter().find(|r| r["nid"] == Value::Integer(4)).unwrap();
    assert_eq!(node4["migrate_map_destid1"], Value::Null);
}
