mod connection;

pub use connection::DbConn;

use std::collections::HashMap;

use derive_more::Display;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::adapters::{DbAdapter, PostgresAdapter, SqlErrorKind, SqliteAdapter};
use crate::buffer::{BlockUnit, RowAction};
use crate::config::{Config, DbAdapterKind};
use crate::tables;
use crate::tables::{SqlColumnType, SqlTable, SqlTableColumn};
use crate::values::SqlValue;

#[derive(Debug, Display)]
pub enum StoreError {
    #[display(fmt = "database error: {}", _0)]
    Postgres(tokio_postgres::Error),
    #[display(fmt = "database error: {}", _0)]
    Sqlite(rusqlite::Error),
    #[display(fmt = "null primary key for column {} in table {}", column, table)]
    NullPrimaryKey { table: String, column: String },
    #[display(fmt = "table {} has no primary key", _0)]
    NoPrimaryKey(String),
    #[display(fmt = "table {} has no columns", _0)]
    EmptyTable(String),
    #[display(fmt = "unknown column type code {} in dictionary", _0)]
    UnknownTypeCode(i64),
    #[display(fmt = "malformed row: {}", _0)]
    RowDecode(serde_json::Error),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(value: tokio_postgres::Error) -> StoreError {
        StoreError::Postgres(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> StoreError {
        StoreError::Sqlite(value)
    }
}

#[derive(Deserialize)]
struct HeightRow {
    #[serde(rename = "_height")]
    height: String,
}

#[derive(Deserialize)]
struct FoundRow {
    found: i64,
}

#[derive(Deserialize)]
struct ColumnDefinitionRow {
    #[serde(rename = "_columnname")]
    name: String,
    #[serde(rename = "_columntype")]
    column_type: i64,
    #[serde(rename = "_columnlength")]
    length: i64,
    #[serde(rename = "_primarykey")]
    primary: i64,
}

#[derive(Deserialize)]
struct LogEntryRow {
    #[serde(rename = "_tablename")]
    table_name: String,
}

/// Rows read back for one committed block, keyed by table then column. Values
/// are their string forms; used by block-inspection queries and tests.
#[derive(Debug, Default)]
pub struct StoredBlock {
    pub height: String,
    pub tables: HashMap<String, Vec<HashMap<String, String>>>,
}

/// Applies DDL to reconcile declared tables against the dictionary and
/// commits block units transactionally. Owns the only database connection.
pub struct SqlStore {
    conn: DbConn,
    adapter: Box<dyn DbAdapter>,
}

impl SqlStore {
    /// Opens the configured backend and ensures the dictionary and log tables
    /// exist. Creation order is fixed: dictionary first.
    pub async fn connect(config: &Config) -> Result<SqlStore, StoreError> {
        let adapter: Box<dyn DbAdapter> = match config.db_adapter {
            DbAdapterKind::Postgres => Box::new(PostgresAdapter::new(&config.db_schema)),
            DbAdapterKind::Sqlite => Box::new(SqliteAdapter::new()),
        };

        let conn = adapter.open(&config.db_url).await?;
        let mut store = SqlStore { conn, adapter };
        store.init().await?;

        Ok(store)
    }

    /// Idempotently ensures the dictionary and log tables exist, tolerating
    /// exactly the duplicate-table error on reruns.
    pub async fn init(&mut self) -> Result<(), StoreError> {
        info!("initializing system tables");
        self.create_table(&tables::dictionary_table()).await?;
        self.create_table(&tables::log_table()).await
    }

    /// The committed checkpoint: the height of the last log row, `"0"` when
    /// nothing was committed yet. Kept in string form so heights round-trip
    /// through SQL unchanged.
    pub async fn last_height(&mut self) -> Result<String, StoreError> {
        let query = self.adapter.last_height_query();
        let mut rows: Vec<HeightRow> = self.load(&query, &[]).await?;

        Ok(rows.pop().map(|row| row.height).unwrap_or_else(|| "0".to_string()))
    }

    /// Reconciles every declared table against the dictionary: absent tables
    /// are created, present ones gain their missing columns. Column-name diff
    /// only; type or length changes are ignored.
    pub async fn synchronize(&mut self, declared: &[SqlTable]) -> Result<(), StoreError> {
        info!("synchronizing database");

        for table in declared {
            if self.find_table(&table.name).await? {
                self.alter_table(table).await?;
            } else {
                self.create_table(table).await?;
            }
        }

        Ok(())
    }

    /// Commits one block unit in a single transaction. Schema drift
    /// (undefined table or column) triggers one synchronize-and-retry; any
    /// further failure propagates.
    pub async fn commit(
        &mut self,
        declared: &[SqlTable],
        unit: &BlockUnit,
    ) -> Result<(), StoreError> {
        match self.commit_once(declared, unit).await {
            Err(err)
                if self.adapter.error_equals(&err, SqlErrorKind::UndefinedTable)
                    || self.adapter.error_equals(&err, SqlErrorKind::UndefinedColumn) =>
            {
                warn!(height = %unit.height, %err, "schema drift during commit, synchronizing");
                self.synchronize(declared).await?;
                self.commit_once(declared, unit).await
            }
            result => result,
        }
    }

    /// Reads back every row committed at the given height for the tables the
    /// log associates with the filter.
    pub async fn get_block(
        &mut self,
        filter: &str,
        height: &str,
    ) -> Result<StoredBlock, StoreError> {
        let log_query = self.adapter.select_log_query();
        let entries: Vec<LogEntryRow> = self
            .load(
                &log_query,
                &[
                    SqlValue::Text(filter.to_string()),
                    SqlValue::Text(height.to_string()),
                ],
            )
            .await?;

        let mut block = StoredBlock {
            height: height.to_string(),
            tables: HashMap::new(),
        };

        for entry in entries {
            let columns = self.table_definition(&entry.table_name).await?;
            if columns.is_empty() {
                return Err(StoreError::EmptyTable(entry.table_name));
            }

            let fields = columns
                .iter()
                .map(|column| column.name.as_str())
                .collect::<Vec<&str>>()
                .join(", ");
            let query = self.adapter.select_row_query(&entry.table_name, &fields, height);

            let rows = self.conn.query_json(&query, &[]).await?;
            let rows = rows.into_iter().map(stringify_row).collect();

            block.tables.insert(entry.table_name, rows);
        }

        Ok(block)
    }

    async fn commit_once(
        &mut self,
        declared: &[SqlTable],
        unit: &BlockUnit,
    ) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN").await?;

        match self.apply_unit(declared, unit).await {
            Ok(()) => {
                debug!(height = %unit.height, "commit");
                self.conn.execute_batch("COMMIT").await
            }
            Err(err) => {
                if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK").await {
                    warn!(%rollback_err, "error rolling back block unit");
                }
                Err(err)
            }
        }
    }

    async fn apply_unit(
        &mut self,
        declared: &[SqlTable],
        unit: &BlockUnit,
    ) -> Result<(), StoreError> {
        let log_query = self.adapter.insert_log_query();

        for table in declared {
            let Some(rows) = unit.tables.get(&table.name) else {
                continue;
            };
            if rows.is_empty() {
                continue;
            }

            debug!(
                table = %table.name,
                event = %table.event_name,
                rows = rows.len(),
                height = %unit.height,
                "insert log"
            );
            self.conn
                .execute(
                    &log_query,
                    &[
                        SqlValue::Int64(rows.len() as i64),
                        SqlValue::Text(table.name.clone()),
                        SqlValue::Text(table.event_name.clone()),
                        SqlValue::Text(table.filter.clone()),
                        SqlValue::Text(unit.height.clone()),
                    ],
                )
                .await?;

            for row in rows {
                let (query, params) = match row.action {
                    RowAction::Upsert => self.adapter.upsert_query(table, row)?,
                    RowAction::Delete => self.adapter.delete_query(table, row)?,
                };

                debug!(query = %query, "apply row");
                self.conn.execute(&query, &params).await?;
            }
        }

        Ok(())
    }

    async fn find_table(&mut self, table_name: &str) -> Result<bool, StoreError> {
        let query = self.adapter.find_table_query();
        let rows: Vec<FoundRow> =
            self.load(&query, &[SqlValue::Text(table_name.to_string())]).await?;

        Ok(rows.first().map(|row| row.found > 0).unwrap_or(false))
    }

    /// The live definition of a table as the dictionary records it, in
    /// column order.
    async fn table_definition(
        &mut self,
        table_name: &str,
    ) -> Result<Vec<SqlTableColumn>, StoreError> {
        let query = self.adapter.table_definition_query();
        let rows: Vec<ColumnDefinitionRow> =
            self.load(&query, &[SqlValue::Text(table_name.to_string())]).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let column_type = SqlColumnType::from_code(row.column_type)
                .ok_or(StoreError::UnknownTypeCode(row.column_type))?;

            columns.push(SqlTableColumn {
                name: row.name,
                column_type,
                length: row.length as u32,
                primary: row.primary != 0,
                order: index as u32 + 1,
                bytes_to_string: false,
            });
        }

        Ok(columns)
    }

    async fn create_table(&mut self, table: &SqlTable) -> Result<(), StoreError> {
        info!(table = %table.name, "creating table");

        let (ddl, dictionary) = self.adapter.create_table_queries(table)?;
        self.conn.execute_batch("BEGIN").await?;

        if let Err(err) = self.conn.execute(&ddl, &[]).await {
            let _ = self.conn.execute_batch("ROLLBACK").await;
            if self.adapter.error_equals(&err, SqlErrorKind::DuplicateTable) {
                warn!(table = %table.name, "duplicated table");
                return Ok(());
            }
            return Err(err);
        }
        if let Err(err) = self.conn.execute(&dictionary, &[]).await {
            let _ = self.conn.execute_batch("ROLLBACK").await;
            return Err(err);
        }

        self.conn.execute_batch("COMMIT").await
    }

    async fn alter_table(&mut self, table: &SqlTable) -> Result<(), StoreError> {
        let current = self.table_definition(&table.name).await?;

        for column in table.sorted_columns() {
            if current.iter().any(|live| live.name == column.name) {
                continue;
            }

            info!(table = %table.name, column = %column.name, "altering table");

            let (ddl, dictionary) = self.adapter.alter_column_queries(&table.name, column)?;
            self.conn.execute_batch("BEGIN").await?;

            if let Err(err) = self.conn.execute(&ddl, &[]).await {
                let _ = self.conn.execute_batch("ROLLBACK").await;
                if self.adapter.error_equals(&err, SqlErrorKind::DuplicateColumn) {
                    warn!(column = %column.name, "duplicated column");
                    continue;
                }
                return Err(err);
            }
            if let Err(err) = self.conn.execute(&dictionary, &[]).await {
                let _ = self.conn.execute_batch("ROLLBACK").await;
                return Err(err);
            }

            self.conn.execute_batch("COMMIT").await?;
        }

        Ok(())
    }

    async fn load<T: DeserializeOwned>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<T>, StoreError> {
        let rows = self.conn.query_json(sql, params).await?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::RowDecode))
            .collect()
    }
}

fn stringify_row(row: serde_json::Value) -> HashMap<String, String> {
    let serde_json::Value::Object(object) = row else {
        return HashMap::new();
    };

    object
        .into_iter()
        .filter_map(|(column, value)| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some((column, text)),
            other => Some((column, other.to_string())),
        })
        .collect()
}
