#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rusqlite::Connection;
    use vent::{
        BlockUnit, Config, DbAdapterKind, EventDefinition, EventRow, Projection, RowAction,
        SqlStore, SqlValue, StoreError,
    };

    use crate::factory::update_spec_json;
    use crate::test_runner;

    fn sqlite_store_config(tag: &str) -> (Config, String) {
        let db_path = test_runner::fresh_db_path(tag);

        (Config::new(DbAdapterKind::Sqlite, &db_path), db_path)
    }

    fn projection() -> Projection {
        let definitions: Vec<EventDefinition> =
            serde_json::from_value(update_spec_json(false)).unwrap();

        Projection::build(&definitions, false).unwrap()
    }

    fn unit_at(height: &str, name: &str, description: &str) -> BlockUnit {
        BlockUnit {
            height: height.to_string(),
            tables: HashMap::from([(
                "eventtest".to_string(),
                vec![EventRow {
                    action: RowAction::Upsert,
                    data: HashMap::from([
                        (
                            "_height".to_string(),
                            SqlValue::Text(height.to_string()),
                        ),
                        ("testname".to_string(), SqlValue::Text(name.to_string())),
                        (
                            "testdescription".to_string(),
                            SqlValue::Text(description.to_string()),
                        ),
                    ]),
                }],
            )]),
        }
    }

    fn count(connection: &Connection, query: &str) -> i64 {
        connection.query_row(query, [], |row| row.get(0)).unwrap()
    }

    #[tokio::test]
    async fn initializes_system_tables_idempotently() {
        let (config, db_path) = sqlite_store_config("store-init");

        SqlStore::connect(&config).await.unwrap();
        SqlStore::connect(&config).await.unwrap();

        let connection = Connection::open(&db_path).unwrap();
        assert_eq!(
            count(
                &connection,
                "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('_vent_dictionary', '_vent_log')"
            ),
            2
        );
    }

    #[tokio::test]
    async fn empty_log_reports_height_zero() {
        let (config, _) = sqlite_store_config("store-empty");
        let mut store = SqlStore::connect(&config).await.unwrap();

        assert_eq!(store.last_height().await.unwrap(), "0");
    }

    #[tokio::test]
    async fn synchronize_is_deterministic_and_idempotent() {
        let (config, db_path) = sqlite_store_config("store-sync");
        let mut store = SqlStore::connect(&config).await.unwrap();
        let projection = projection();

        store.synchronize(&projection.tables).await.unwrap();

        let connection = Connection::open(&db_path).unwrap();
        let dictionary_rows = count(
            &connection,
            "SELECT COUNT(*) FROM _vent_dictionary WHERE _tablename = 'eventtest'",
        );
        assert_eq!(dictionary_rows, 7);
        let schema: String = connection
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name = 'eventtest'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        // a second pass from the same spec issues no DDL
        store.synchronize(&projection.tables).await.unwrap();

        assert_eq!(
            count(
                &connection,
                "SELECT COUNT(*) FROM _vent_dictionary WHERE _tablename = 'eventtest'"
            ),
            dictionary_rows
        );
        let schema_after: String = connection
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name = 'eventtest'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(schema, schema_after);
    }

    #[tokio::test]
    async fn commit_advances_the_checkpoint() {
        let (config, _) = sqlite_store_config("store-checkpoint");
        let mut store = SqlStore::connect(&config).await.unwrap();
        let projection = projection();
        store.synchronize(&projection.tables).await.unwrap();

        store
            .commit(&projection.tables, &unit_at("8", "TestEvent1", "d"))
            .await
            .unwrap();

        assert_eq!(store.last_height().await.unwrap(), "8");
    }

    #[tokio::test]
    async fn double_commit_produces_identical_rows() {
        let (config, db_path) = sqlite_store_config("store-idempotent");
        let mut store = SqlStore::connect(&config).await.unwrap();
        let projection = projection();
        store.synchronize(&projection.tables).await.unwrap();

        let unit = unit_at("8", "TestEvent1", "Description of TestEvent1");
        store.commit(&projection.tables, &unit).await.unwrap();

        let connection = Connection::open(&db_path).unwrap();
        let before: (String, String, String) = connection
            .query_row(
                "SELECT _height, testname, testdescription FROM eventtest",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();

        store.commit(&projection.tables, &unit).await.unwrap();

        assert_eq!(count(&connection, "SELECT COUNT(*) FROM eventtest"), 1);
        let after: (String, String, String) = connection
            .query_row(
                "SELECT _height, testname, testdescription FROM eventtest",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn failed_commits_leave_no_partial_rows() {
        let (config, db_path) = sqlite_store_config("store-rollback");
        let mut store = SqlStore::connect(&config).await.unwrap();
        let projection = projection();
        store.synchronize(&projection.tables).await.unwrap();

        let mut unit = unit_at("8", "TestEvent1", "d");
        unit.tables.get_mut("eventtest").unwrap()[0].data.remove("testname");

        let result = store.commit(&projection.tables, &unit).await;
        assert!(matches!(result, Err(StoreError::NullPrimaryKey { .. })));

        // the log row written before the failing upsert rolled back with it
        let connection = Connection::open(&db_path).unwrap();
        assert_eq!(count(&connection, "SELECT COUNT(*) FROM _vent_log"), 0);
        assert_eq!(store.last_height().await.unwrap(), "0");
    }

    #[tokio::test]
    async fn commit_recovers_from_schema_drift_once() {
        let (config, db_path) = sqlite_store_config("store-drift");
        let mut store = SqlStore::connect(&config).await.unwrap();
        let projection = projection();
        store.synchronize(&projection.tables).await.unwrap();

        // an external reset drops the projected table behind the store's back
        let connection = Connection::open(&db_path).unwrap();
        connection.execute_batch("DROP TABLE eventtest").unwrap();
        connection
            .execute_batch("DELETE FROM _vent_dictionary WHERE _tablename = 'eventtest'")
            .unwrap();

        store
            .commit(&projection.tables, &unit_at("9", "TestEvent1", "d"))
            .await
            .unwrap();

        assert_eq!(count(&connection, "SELECT COUNT(*) FROM eventtest"), 1);
        assert_eq!(store.last_height().await.unwrap(), "9");
    }

    #[tokio::test]
    async fn get_block_returns_the_committed_rows() {
        let (config, _) = sqlite_store_config("store-get-block");
        let mut store = SqlStore::connect(&config).await.unwrap();
        let projection = projection();
        store.synchronize(&projection.tables).await.unwrap();

        store
            .commit(&projection.tables, &unit_at("9", "TestEvent1", "d"))
            .await
            .unwrap();

        let block = store.get_block("EventType = 'LogEvent'", "9").await.unwrap();

        assert_eq!(block.height, "9");
        let rows = &block.tables["eventtest"];
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["testname"], "TestEvent1");
        assert_eq!(rows[0]["_height"], "9");
        // absent columns are not materialized
        assert!(!rows[0].contains_key("_txhash"));
    }

    #[tokio::test]
    async fn runs_against_the_server_dialect_when_configured() {
        let Some(db_url) = test_runner::postgres_url() else {
            return;
        };

        let config = Config::new(DbAdapterKind::Postgres, &db_url).with_schema("venttest");
        let mut store = SqlStore::connect(&config).await.unwrap();
        let projection = projection();

        store.synchronize(&projection.tables).await.unwrap();
        store
            .commit(&projection.tables, &unit_at("8", "TestEvent1", "d"))
            .await
            .unwrap();

        assert_eq!(store.last_height().await.unwrap(), "8");

        let block = store.get_block("EventType = 'LogEvent'", "8").await.unwrap();
        assert_eq!(block.tables["eventtest"][0]["testname"], "TestEvent1");
    }
}
