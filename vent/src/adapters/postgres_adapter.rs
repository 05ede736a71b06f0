use async_trait::async_trait;
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;
use tracing::{error, info, warn};

use super::{safe, DbAdapter, SqlErrorKind};
use crate::buffer::EventRow;
use crate::store::{DbConn, StoreError};
use crate::tables;
use crate::tables::{SqlColumnType, SqlTable, SqlTableColumn};
use crate::values::SqlValue;

const DEFAULT_SCHEMA: &str = "public";

fn type_literal(column_type: SqlColumnType) -> &'static str {
    match column_type {
        SqlColumnType::Bool => "BOOLEAN",
        SqlColumnType::ByteA => "BYTEA",
        SqlColumnType::Int => "INTEGER",
        SqlColumnType::Serial => "SERIAL",
        SqlColumnType::Text => "TEXT",
        SqlColumnType::Varchar => "VARCHAR",
        SqlColumnType::Timestamp => "TIMESTAMP",
        SqlColumnType::Numeric => "NUMERIC",
    }
}

/// Server RDBMS dialect: schema-qualified names, native upsert through the
/// table's primary-key constraint, SQLSTATE error classification.
pub struct PostgresAdapter {
    schema: String,
}

impl PostgresAdapter {
    pub fn new(schema: &str) -> PostgresAdapter {
        let schema = safe(schema);

        PostgresAdapter {
            schema: if schema.is_empty() {
                DEFAULT_SCHEMA.to_string()
            } else {
                schema
            },
        }
    }

    fn prefixed(&self, table_name: &str) -> String {
        format!("{}.{}", self.schema, safe(table_name))
    }
}

#[async_trait]
impl DbAdapter for PostgresAdapter {
    async fn open(&self, db_url: &str) -> Result<DbConn, StoreError> {
        let (client, connection) =
            tokio_postgres::connect(db_url, NoTls).await.map_err(StoreError::Postgres)?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(%err, "database connection error");
            }
        });

        if self.schema != DEFAULT_SCHEMA {
            info!(schema = %self.schema, "creating schema");

            let query = format!("CREATE SCHEMA {}", self.schema);
            if let Err(err) = client.batch_execute(&query).await {
                let err = StoreError::Postgres(err);
                if self.error_equals(&err, SqlErrorKind::DuplicateSchema) {
                    warn!(schema = %self.schema, "duplicated schema");
                } else {
                    return Err(err);
                }
            }
        }

        Ok(DbConn::Postgres(client))
    }

    fn type_mapping(&self, column_type: SqlColumnType) -> Result<&'static str, StoreError> {
        Ok(type_literal(column_type))
    }

    fn error_equals(&self, error: &StoreError, kind: SqlErrorKind) -> bool {
        let StoreError::Postgres(err) = error else {
            return false;
        };

        if kind == SqlErrorKind::Generic {
            return true;
        }

        let Some(code) = err.code() else {
            return false;
        };

        match kind {
            SqlErrorKind::Generic => true,
            SqlErrorKind::DuplicateTable => *code == SqlState::DUPLICATE_TABLE,
            SqlErrorKind::DuplicateColumn => *code == SqlState::DUPLICATE_COLUMN,
            SqlErrorKind::DuplicateSchema => *code == SqlState::DUPLICATE_SCHEMA,
            SqlErrorKind::UndefinedTable => *code == SqlState::UNDEFINED_TABLE,
            SqlErrorKind::UndefinedColumn => *code == SqlState::UNDEFINED_COLUMN,
            SqlErrorKind::InvalidType => *code == SqlState::UNDEFINED_OBJECT,
        }
    }

    fn secure_column_name(&self, column_name: &str) -> String {
        format!("\"{}\"", safe(column_name))
    }

    fn create_table_queries(&self, table: &SqlTable) -> Result<(String, String), StoreError> {
        let table_name = safe(&table.name);
        let mut columns_def = String::new();
        let mut primary_key = String::new();
        let mut dictionary_values = String::new();

        for column in table.sorted_columns() {
            let secure_column = self.secure_column_name(&column.name);
            let sql_type = self.type_mapping(column.column_type)?;

            if !columns_def.is_empty() {
                columns_def.push_str(", ");
                dictionary_values.push_str(", ");
            }

            columns_def.push_str(&format!("{secure_column} {sql_type}"));
            if column.length > 0 {
                columns_def.push_str(&format!("({})", column.length));
            }

            if column.primary {
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

        let mut query = format!("CREATE TABLE {}.{} ({}", self.schema, table_name, columns_def);
        if !primary_key.is_empty() {
            query.push_str(&format!(
                ", CONSTRAINT {table_name}_pkey PRIMARY KEY ({primary_key})"
            ));
        }
        query.push(')');

        let dictionary_query = format!(
            "INSERT INTO {}.{} ({},{},{},{},{},{}) VALUES {}",
            self.schema,
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
            self.prefixed(table_name),
            self.secure_column_name(&column.name),
            sql_type
        );

        let dictionary_query = format!(
            "INSERT INTO {}.{} ({},{},{},{},{},{}) VALUES ('{}','{}',{},{},{},{})",
            self.schema,
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
            log = self.prefixed(tables::LOG_TABLE_NAME),
        )
    }

    fn find_table_query(&self) -> String {
        format!(
            "SELECT COUNT(*) AS found FROM {} WHERE {} = $1",
            self.prefixed(tables::DICTIONARY_TABLE_NAME),
            tables::TABLE_NAME_COLUMN
        )
    }

    fn table_definition_query(&self) -> String {
        format!(
            "SELECT {},{},{},{} FROM {} WHERE {} = $1 ORDER BY {}",
            tables::COLUMN_NAME_COLUMN,
            tables::COLUMN_TYPE_COLUMN,
            tables::COLUMN_LENGTH_COLUMN,
            tables::PRIMARY_KEY_COLUMN,
            self.prefixed(tables::DICTIONARY_TABLE_NAME),
            tables::TABLE_NAME_COLUMN,
            tables::COLUMN_ORDER_COLUMN
        )
    }

    fn select_row_query(&self, table_name: &str, fields: &str, height: &str) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = '{}'",
            fields,
            self.prefixed(table_name),
            tables::HEIGHT_COLUMN,
            safe(height)
        )
    }

    fn select_log_query(&self) -> String {
        format!(
            "SELECT DISTINCT {},{} FROM {} WHERE {} = $1 AND {} = $2",
            tables::TABLE_NAME_COLUMN,
            tables::EVENT_NAME_COLUMN,
            self.prefixed(tables::LOG_TABLE_NAME),
            tables::EVENT_FILTER_COLUMN,
            tables::HEIGHT_COLUMN
        )
    }

    fn insert_log_query(&self) -> String {
        format!(
            "INSERT INTO {} ({},{},{},{},{},{}) VALUES (CURRENT_TIMESTAMP, $1, $2, $3, $4, $5)",
            self.prefixed(tables::LOG_TABLE_NAME),
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
        let table_name = safe(&table.name);
        let mut columns = String::new();
        let mut insert_values = String::new();
        let mut update_values = String::new();
        let mut has_primary = false;
        let mut params = Vec::new();

        for (position, column) in table.sorted_columns().iter().enumerate() {
            let secure_column = self.secure_column_name(&column.name);
            let placeholder = position + 1;
            has_primary |= column.primary;

            if !columns.is_empty() {
                columns.push_str(", ");
                insert_values.push_str(", ");
            }
            columns.push_str(&secure_column);
            insert_values.push_str(&format!("${placeholder}"));

            match row.data.get(&column.name) {
                Some(value) => {
                    params.push(value.clone());

                    if !column.primary {
                        if !update_values.is_empty() {
                            update_values.push_str(", ");
                        }
                        update_values.push_str(&format!("{secure_column} = ${placeholder}"));
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
        }

        let mut query = format!(
            "INSERT INTO {}.{} ({}) VALUES ({})",
            self.schema, table_name, columns, insert_values
        );

        if has_primary {
            if update_values.is_empty() {
                query.push_str(&format!(
                    " ON CONFLICT ON CONSTRAINT {table_name}_pkey DO NOTHING"
                ));
            } else {
                query.push_str(&format!(
                    " ON CONFLICT ON CONSTRAINT {table_name}_pkey DO UPDATE SET {update_values}"
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
                "{} = ${}",
                self.secure_column_name(&column.name),
                position + 1
            ));
            params.push(value.clone());
        }

        let query = format!(
            "DELETE FROM {} WHERE {}",
            self.prefixed(&table.name),
            clauses.join(" AND ")
        );

        Ok((query, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RowAction;
    use std::collections::HashMap;

    fn adapter() -> PostgresAdapter {
        PostgresAdapter::new("vent")
    }

    fn column(name: &str, column_type: SqlColumnType, length: u32, primary: bool, order: u32) -> SqlTableColumn {
        SqlTableColumn {
            name: name.to_string(),
            column_type,
            length,
            primary,
            order,
            bytes_to_string: false,
        }
    }

    fn test_table() -> SqlTable {
        let columns = [
            column("_height", SqlColumnType::Varchar, 100, false, 1),
            column("testname", SqlColumnType::Varchar, 40, true, 2),
            column("testdescription", SqlColumnType::Text, 0, false, 3),
        ];

        SqlTable {
            name: "eventtest".to_string(),
            event_name: "UpdateTestEvent".to_string(),
            filter: "EventType = 'LogEvent'".to_string(),
            columns: columns.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    #[test]
    fn renders_create_table_with_named_pk_constraint() {
        let (ddl, dictionary) = adapter().create_table_queries(&test_table()).unwrap();

        assert_eq!(
            ddl,
            "CREATE TABLE vent.eventtest (\"_height\" VARCHAR(100), \
             \"testname\" VARCHAR(40) NOT NULL, \"testdescription\" TEXT, \
             CONSTRAINT eventtest_pkey PRIMARY KEY (\"testname\"))"
        );
        assert_eq!(
            dictionary,
            "INSERT INTO vent._vent_dictionary \
             (_tablename,_columnname,_columntype,_columnlength,_primarykey,_columnorder) \
             VALUES ('eventtest','_height',5,100,0,1), ('eventtest','testname',5,40,1,2), \
             ('eventtest','testdescription',4,0,0,3)"
        );
    }

    #[test]
    fn renders_alter_column_with_dictionary_insert() {
        let (ddl, dictionary) = adapter()
            .alter_column_queries("eventtest", &column("category", SqlColumnType::Text, 0, false, 4))
            .unwrap();

        assert_eq!(ddl, "ALTER TABLE vent.eventtest ADD COLUMN \"category\" TEXT");
        assert!(dictionary.contains("VALUES ('eventtest','category',4,0,0,4)"));
    }

    #[test]
    fn renders_upsert_with_conflict_update() {
        let row = EventRow {
            action: RowAction::Upsert,
            data: HashMap::from([
                ("_height".to_string(), SqlValue::Text("5".to_string())),
                ("testname".to_string(), SqlValue::Text("n".to_string())),
            ]),
        };

        let (query, params) = adapter().upsert_query(&test_table(), &row).unwrap();

        assert_eq!(
            query,
            "INSERT INTO vent.eventtest (\"_height\", \"testname\", \"testdescription\") \
             VALUES ($1, $2, $3) ON CONFLICT ON CONSTRAINT eventtest_pkey \
             DO UPDATE SET \"_height\" = $1"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text("5".to_string()),
                SqlValue::Text("n".to_string()),
                SqlValue::Null,
            ]
        );
    }

    #[test]
    fn missing_primary_key_fails_upsert_rendering() {
        let row = EventRow {
            action: RowAction::Upsert,
            data: HashMap::from([("_height".to_string(), SqlValue::Text("5".to_string()))]),
        };

        assert!(matches!(
            adapter().upsert_query(&test_table(), &row),
            Err(StoreError::NullPrimaryKey { .. })
        ));
    }

    #[test]
    fn renders_delete_keyed_on_primary_columns() {
        let row = EventRow {
            action: RowAction::Delete,
            data: HashMap::from([("testname".to_string(), SqlValue::Text("n".to_string()))]),
        };

        let (query, params) = adapter().delete_query(&test_table(), &row).unwrap();

        assert_eq!(query, "DELETE FROM vent.eventtest WHERE \"testname\" = $1");
        assert_eq!(params, vec![SqlValue::Text("n".to_string())]);
    }

    #[test]
    fn log_queries_are_schema_qualified() {
        let adapter = adapter();

        assert!(adapter.last_height_query().contains("vent._vent_log"));
        assert!(adapter.find_table_query().contains("vent._vent_dictionary"));
        assert!(adapter
            .insert_log_query()
            .starts_with("INSERT INTO vent._vent_log"));
        assert_eq!(
            adapter.select_row_query("eventtest", "_height, testname", "5"),
            "SELECT _height, testname FROM vent.eventtest WHERE _height = '5'"
        );
    }

    #[test]
    fn empty_schema_defaults_to_public() {
        let adapter = PostgresAdapter::new("");
        assert!(adapter.find_table_query().contains("public._vent_dictionary"));
    }
}
