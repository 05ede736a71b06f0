mod postgres_adapter;
mod sqlite_adapter;

pub use postgres_adapter::PostgresAdapter;
pub use sqlite_adapter::SqliteAdapter;

use async_trait::async_trait;

use crate::buffer::EventRow;
use crate::store::{DbConn, StoreError};
use crate::tables::{SqlColumnType, SqlTable, SqlTableColumn};
use crate::values::SqlValue;

/// Taxonomy the consumer's recovery logic depends on. Backend-native errors
/// are classified into it by each adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlErrorKind {
    Generic,
    DuplicateTable,
    DuplicateColumn,
    DuplicateSchema,
    UndefinedTable,
    UndefinedColumn,
    InvalidType,
}

/// Dialect-specific SQL rendering and error classification. The only
/// polymorphic surface of the engine.
#[async_trait]
pub trait DbAdapter: Send + Sync {
    /// Opens the database. The schema-aware dialect idempotently creates its
    /// configured schema.
    async fn open(&self, db_url: &str) -> Result<DbConn, StoreError>;

    /// Maps a logical column type to the dialect's SQL type literal.
    fn type_mapping(&self, column_type: SqlColumnType) -> Result<&'static str, StoreError>;

    /// True when a backend-native error is of the given kind. `Generic`
    /// matches any error originating from this adapter's backend.
    fn error_equals(&self, error: &StoreError, kind: SqlErrorKind) -> bool;

    /// Quotes a column identifier the dialect's way.
    fn secure_column_name(&self, column_name: &str) -> String;

    /// DDL for a new table plus the dictionary rows describing it.
    fn create_table_queries(&self, table: &SqlTable) -> Result<(String, String), StoreError>;

    /// DDL adding one column plus the dictionary row describing it.
    fn alter_column_queries(
        &self,
        table_name: &str,
        column: &SqlTableColumn,
    ) -> Result<(String, String), StoreError>;

    /// Parameter-free query returning the max committed height as a string,
    /// or `'0'` when the log is empty.
    fn last_height_query(&self) -> String;

    /// Parameterized by table name; counts the dictionary's knowledge of it.
    fn find_table_query(&self) -> String;

    /// Parameterized by table name; returns `(column, type, length, primary)`
    /// rows in column order.
    fn table_definition_query(&self) -> String;

    fn select_row_query(&self, table_name: &str, fields: &str, height: &str) -> String;

    /// Parameterized by filter and height; returns the tables a block touched.
    fn select_log_query(&self) -> String;

    /// Parameterized by `(row count, table, event, filter, height)`.
    fn insert_log_query(&self) -> String;

    /// INSERT with a primary-key-conflict clause for one row. Fails with
    /// `NullPrimaryKey` when the row misses a primary-key column; absent
    /// non-primary columns bind SQL NULL.
    fn upsert_query(
        &self,
        table: &SqlTable,
        row: &EventRow,
    ) -> Result<(String, Vec<SqlValue>), StoreError>;

    /// DELETE keyed on the table's primary-key columns.
    fn delete_query(
        &self,
        table: &SqlTable,
        row: &EventRow,
    ) -> Result<(String, Vec<SqlValue>), StoreError>;
}

/// Strips characters that would break out of an identifier position.
pub(crate) fn safe(identifier: &str) -> String {
    identifier.replace([';', ',', '\''], "")
}
