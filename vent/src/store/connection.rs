use rusqlite::types::ValueRef;
use serde_json::{json, Map, Value};
use tokio_postgres::types::ToSql;

use super::StoreError;
use crate::values::SqlValue;

/// An open database connection, owned exclusively by the schema store and
/// driven only from the receiver task.
pub enum DbConn {
    Postgres(tokio_postgres::Client),
    Sqlite(rusqlite::Connection),
}

impl DbConn {
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError> {
        match self {
            DbConn::Postgres(client) => {
                let params: Vec<&(dyn ToSql + Sync)> =
                    params.iter().map(|value| value as &(dyn ToSql + Sync)).collect();

                Ok(client.execute(sql, &params).await?)
            }
            DbConn::Sqlite(connection) => {
                let changed = connection.execute(sql, rusqlite::params_from_iter(params.iter()))?;

                Ok(changed as u64)
            }
        }
    }

    pub async fn execute_batch(&mut self, sql: &str) -> Result<(), StoreError> {
        match self {
            DbConn::Postgres(client) => Ok(client.batch_execute(sql).await?),
            DbConn::Sqlite(connection) => Ok(connection.execute_batch(sql)?),
        }
    }

    /// Runs a query and materializes every row as a JSON object keyed by
    /// column name, the engine's only row-reading path.
    pub async fn query_json(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Value>, StoreError> {
        match self {
            DbConn::Postgres(client) => {
                // Aggregate server-side so values arrive backend-typed as JSON
                // instead of needing per-type wire decoding.
                let aggregated = format!(
                    "WITH result AS ({sql}) \
                     SELECT COALESCE(json_agg(result), '[]'::json) FROM result"
                );
                let params: Vec<&(dyn ToSql + Sync)> =
                    params.iter().map(|value| value as &(dyn ToSql + Sync)).collect();

                let rows = client.query(&aggregated, &params).await?;
                let aggregate: Value =
                    rows.first().map(|row| row.get(0)).unwrap_or(Value::Null);

                match aggregate {
                    Value::Array(rows) => Ok(rows),
                    _ => Ok(vec![]),
                }
            }
            DbConn::Sqlite(connection) => {
                let mut statement = connection.prepare(sql)?;
                let columns: Vec<String> =
                    statement.column_names().into_iter().map(String::from).collect();

                let mut rows = statement.query(rusqlite::params_from_iter(params.iter()))?;
                let mut collected = Vec::new();

                while let Some(row) = rows.next()? {
                    let mut object = Map::new();
                    for (index, column) in columns.iter().enumerate() {
                        object.insert(column.clone(), json_value(row.get_ref(index)?));
                    }
                    collected.push(Value::Object(object));
                }

                Ok(collected)
            }
        }
    }
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => json!(value),
        ValueRef::Real(value) => json!(value),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        // match the server dialect's hex rendering of binary columns
        ValueRef::Blob(blob) => Value::String(format!("\\x{}", hex::encode(blob))),
    }
}
