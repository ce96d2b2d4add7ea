//! Position and table-metadata persistence across process restarts,
//! simulated by opening two independent `MetaStore`s against the same
//! on-disk SQLite file.

use canal_rs::{MetaStore, Position, TableMeta};

#[tokio::test]
async fn position_and_table_meta_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("canal-meta.sqlite3");

    {
        let store = MetaStore::open(&db_path).unwrap();
        store
            .save_position("task-1", Position::new("mysql-bin.000004", 8192))
            .await
            .unwrap();
        store
            .save_table_meta(
                "shop",
                "orders",
                TableMeta {
                    schema: "shop".into(),
                    table: "orders".into(),
                    columns: vec!["id".into(), "total".into()],
                    types: vec!["int".into(), "decimal".into()],
                },
            )
            .await
            .unwrap();
    }

    let reopened = MetaStore::open(&db_path).unwrap();
    let position = reopened.load_position("task-1").await.unwrap();
    assert_eq!(position, Position::new("mysql-bin.000004", 8192));

    let meta = reopened.load_table_meta("shop", "orders").await.unwrap().unwrap();
    assert_eq!(meta.columns, vec!["id".to_string(), "total".to_string()]);
    assert_eq!(meta.types, vec!["int".to_string(), "decimal".to_string()]);

    // An instance that never checkpointed still resolves to the
    // initial sentinel, even after other instances have real rows.
    let fresh = reopened.load_position("task-2").await.unwrap();
    assert!(fresh.is_initial());
}
