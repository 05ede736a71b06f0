use async_trait::async_trait;

use super::{safe, DbAdapter, SqlErrorKind};
use crate::buffer::EventRow;
use crate::store::{DbConn, StoreError};
use crate::tables;
use crate::tables::{SqlColumnType, SqlTable, SqlTableColumn};
use crate::values::SqlValue;

fn type_literal(column_type: SqlColumnType) -> &'static str {
    match column_type {
        SqlColumnType::Bool => "BOOLEAN",
        SqlColumnType::ByteA => "BLOB",
        SqlColumnType::Int => "INTEGER",
        SqlColumnType::Serial => "SERIAL",
        SqlColumnType::Text => "TEXT",
        SqlColumnType::Varchar => "VARCHAR",
        SqlColumnType::Timestamp => "TIMESTAMP",
        SqlColumnType::Numeric => "NUMERIC",
    }
}

/// Embedded file-based dialect: no schema namespace, conflict-target upsert,
/// autoincrement workaround for serial columns, message-based error
/// classification.
pub struct SqliteAdapter;

impl SqliteAdapter {
    pub fn new() -> SqliteAdapter {
        SqliteAdapter
    }
}

impl Default for SqliteAdapter {
    fn default() -> Self {
        SqliteAdapter::new()
    }
}

#[async_trait]
impl DbAdapter for SqliteAdapter {
    async fn open(&self, db_url: &str) -> Result<DbConn, StoreError> {
        let connection = rusqlite::Connection::open(db_url).map_err(StoreError::Sqlite)?;

        Ok(DbConn::Sqlite(connection))
    }

    fn type_mapping(&self, column_type: SqlColumnType) -> Result<&'static str, StoreError> {
        Ok(type_literal(column_type))
    }

    fn error_equals(&self, error: &StoreError, kind: SqlErrorKind) -> bool {
        let StoreError::Sqlite(err) = error else {
            return false;
        };
        let description = err.to_string();

        match kind {
            SqlErrorKind::Generic => true,
            SqlErrorKind::DuplicateTable => {
                description.contains("table") && description.contains("already exists")
            }
            SqlErrorKind::DuplicateColumn => description.contains("duplicate column"),
            SqlErrorKind::UndefinedTable => description.contains("no such table"),
            SqlErrorKind::UndefinedColumn => {
                description.contains("table") && description.contains("has no column named")
            }
            // not distinguishable from the embedded engine's errors
            SqlErrorKind::DuplicateSchema | SqlErrorKind::InvalidType => false,
        }
    }

    fn secure_column_name(&self, column_name: &str) -> String {
        format!("[{}]", safe(column_name))
    }

    fn create_table_queries(&self, table: &SqlTable) -> Result<(String, String), StoreError> {
        let table_name = safe(&table.name);
        let mut columns_def = String::new();
        let mut primary_key = String::new();
        let mut dictionary_values = String::new();
        let mut has_serial = false;

        for column in table.sorted_columns() {
            let secure_column = self.secure_column_name(&column.name);
            let sql_type = self.type_mapping(column.column_type)?;

            if !columns_def.is_empty() {
                columns_def.push_str(", ");
                dictionary_values.push_str(", ");
            }

            if column.column_type == SqlColumnType::Serial {
                // The embedded engine only autoincrements a single
                // INTEGER PRIMARY KEY column.
                columns_def
                    .push_str(&format!("{secure_column} INTEGER PRIMARY KEY AUTOINCREMENT"));
                has_serial = true;
            } else {
                columns_def.push_str(&format!("{secure_column} {sql_type}"));
                if column.length > 0 {
                    columns_def.push_str(&format!("({})", column.length));
                }
            }

            if column.primary && column.column_type != SqlColumnType::Serial {
                columns_def.push_str(" NOT NULL");
                if !primary_key.is_empty() {
                    primary_key.push_str(", ");
                }
                primary_key.push_str(&secure_column);
            }

            dictionary_values.push_str(&format!(
                "('{}','{}',{},{},{},{})",
                table_name,
                safe(&column.name),
                column.column_type.code(),
                column.length,
                i32::from(column.primary),
                column.order
            ));
        }

        let mut query = format!("CREATE TABLE {} ({}", table_name, columns_def);
        if !primary_key.is_empty() {
            if has_serial {
                query.push_str(&format!(", UNIQUE ({primary_key})"));
            } else {
                query.push_str(&format!(
                    ", CONSTRAINT {table_name}_pkey PRIMARY KEY ({primary_key})"
                ));
            }
        }
        query.push(')');

        let dictionary_query = format!(
            "INSERT INTO {} ({},{},{},{},{},{}) VALUES {}",
            tables::DICTIONARY_TABLE_NAME,
            tables::TABLE_NAME_COLUMN,
            tables::COLUMN_NAME_COLUMN,
            tables::COLUMN_TYPE_COLUMN,
            tables::COLUMN_LENGTH_COLUMN,
            tables::PRIMARY_KEY_COLUMN,
            tables::COLUMN_ORDER_COLUMN,
            dictionary_values
        );

        Ok((query, dictionary_query))
    }

    fn alter_column_queries(
        &self,
        table_name: &str,
        column: &SqlTableColumn,
    ) -> Result<(String, String), StoreError> {
        let mut sql_type = self.type_mapping(column.column_type)?.to_string();
        if column.length > 0 {
            sql_type.push_str(&format!("({})", column.length));
        }

        let query = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            safe(table_name),
            self.secure_column_name(&column.name),
            sql_type
        );

        let dictionary_query = format!(
            "INSERT INTO {} ({},{},{},{},{},{}) VALUES ('{}','{}',{},{},{},{})",
            tables::DICTIONARY_TABLE_NAME,
            tables::TABLE_NAME_COLUMN,
            tables::COLUMN_NAME_COLUMN,
            tables::COLUMN_TYPE_COLUMN,
            tables::COLUMN_LENGTH_COLUMN,
            tables::PRIMARY_KEY_COLUMN,
            tables::COLUMN_ORDER_COLUMN,
            safe(table_name),
            safe(&column.name),
            column.column_type.code(),
            column.length,
            i32::from(column.primary),
            column.order
        );

        Ok((query, dictionary_query))
    }

    fn last_height_query(&self) -> String {
        format!(
            "WITH ll AS (SELECT MAX({id}) AS {id} FROM {log}) \
             SELECT COALESCE({height}, '0') AS {height} \
             FROM ll LEFT OUTER JOIN {log} log ON (ll.{id} = log.{id})",
            id = tables::ID_COLUMN,
            height = tables::HEIGHT_COLUMN,
            log = tables::LOG_TABLE_NAME,
        )
    }

    fn find_table_query(&self) -> String {
        format!(
            "SELECT COUNT(*) AS found FROM {} WHERE {} = ?1",
            tables::DICTIONARY_TABLE_NAME,
            tables::TABLE_NAME_COLUMN
        )
    }

    fn table_definition_query(&self) -> String {
        format!(
            "SELECT {},{},{},{} FROM {} WHERE {} = ?1 ORDER BY {}",
            tables::COLUMN_NAME_COLUMN,
            tables::COLUMN_TYPE_COLUMN,
            tables::COLUMN_LENGTH_COLUMN,
            tables::PRIMARY_KEY_COLUMN,
            tables::DICTIONARY_TABLE_NAME,
            tables::TABLE_NAME_COLUMN,
            tables::COLUMN_ORDER_COLUMN
        )
    }

    fn select_row_query(&self, table_name: &str, fields: &str, height: &str) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = '{}'",
            fields,
            safe(table_name),
            tables::HEIGHT_COLUMN,
            safe(height)
        )
    }

    fn select_log_query(&self) -> String {
        format!(
            "SELECT DISTINCT {},{} FROM {} WHERE {} = ?1 AND {} = ?2",
            tables::TABLE_NAME_COLUMN,
            tables::EVENT_NAME_COLUMN,
            tables::LOG_TABLE_NAME,
            tables::EVENT_FILTER_COLUMN,
            tables::HEIGHT_COLUMN
        )
    }

    fn insert_log_query(&self) -> String {
        format!(
            "INSERT INTO {} ({},{},{},{},{},{}) VALUES (CURRENT_TIMESTAMP, ?1, ?2, ?3, ?4, ?5)",
            tables::LOG_TABLE_NAME,
            tables::TIMESTAMP_COLUMN,
            tables::ROW_COUNT_COLUMN,
            tables::TABLE_NAME_COLUMN,
            tables::EVENT_NAME_COLUMN,
            tables::EVENT_FILTER_COLUMN,
            tables::HEIGHT_COLUMN
        )
    }

    fn upsert_query(
        &self,
        table: &SqlTable,
        row: &EventRow,
    ) -> Result<(String, Vec<SqlValue>), StoreError> {
        let mut columns = String::new();
        let mut insert_values = String::new();
        let mut update_values = String::new();
        let mut primary_columns = String::new();
        let mut params = Vec::new();

        for (position, column) in table.sorted_columns().iter().enumerate() {
            let secure_column = self.secure_column_name(&column.name);
            let placeholder = position + 1;

            if !columns.is_empty() {
                columns.push_str(", ");
                insert_values.push_str(", ");
            }
            columns.push_str(&secure_column);
            insert_values.push_str(&format!("?{placeholder}"));

            match row.data.get(&column.name) {
                Some(value) => {
                    params.push(value.clone());

                    if !column.primary {
                        if !update_values.is_empty() {
                            update_values.push_str(", ");
                        }
                        update_values.push_str(&format!("{secure_column} = ?{placeholder}"));
                    }
                }
                None if column.primary => {
                    return Err(StoreError::NullPrimaryKey {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
                None => params.push(SqlValue::Null),
            }

            if column.primary {
                if !primary_columns.is_empty() {
                    primary_columns.push_str(", ");
                }
                primary_columns.push_str(&secure_column);
            }
        }

        let mut query = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            safe(&table.name),
            columns,
            insert_values
        );

        if !primary_columns.is_empty() {
            if update_values.is_empty() {
                query.push_str(&format!(" ON CONFLICT ({primary_columns}) DO NOTHING"));
            } else {
                query.push_str(&format!(
                    " ON CONFLICT ({primary_columns}) DO UPDATE SET {update_values}"
                ));
            }
        }

        Ok((query, params))
    }

    fn delete_query(
        &self,
        table: &SqlTable,
        row: &EventRow,
    ) -> Result<(String, Vec<SqlValue>), StoreError> {
        let primary_columns = table.primary_columns();
        if primary_columns.is_empty() {
            return Err(StoreError::NoPrimaryKey(table.name.clone()));
        }

        let mut clauses = Vec::with_capacity(primary_columns.len());
        let mut params = Vec::with_capacity(primary_columns.len());

        for (position, column) in primary_columns.iter().enumerate() {
            let value = row.data.get(&column.name).ok_or_else(|| StoreError::NullPrimaryKey {
                table: table.name.clone(),
                column: column.name.clone(),
            })?;

            clauses.push(format!(
                "{} = ?{}",
                self.secure_column_name(&column.name),
                position + 1
            ));
            params.push(value.clone());
        }

        let query = format!(
            "DELETE FROM {} WHERE {}",
            safe(&table.name),
            clauses.join(" AND ")
        );

        Ok((query, params))
    }
}
