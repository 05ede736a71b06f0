use bytes::BytesMut;
use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
use tokio_postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};

/// A decoded scalar on its way into a SQL parameter. Each variant carries the
/// canonical string or byte form the backends receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlValue {
    /// 40-char unprefixed lowercase hex.
    Address(String),
    /// Arbitrary-precision integer as a decimal string.
    BigInt(String),
    Bytes(Vec<u8>),
    Int64(i64),
    Bool(bool),
    Text(String),
    Null,
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Compares against a delete-filter literal. Byte buffers are trimmed of
    /// trailing NULs before the comparison; everything else compares by its
    /// string form.
    pub fn matches_literal(&self, literal: &str) -> bool {
        match self {
            SqlValue::Address(value) | SqlValue::BigInt(value) | SqlValue::Text(value) => {
                value == literal
            }
            SqlValue::Bytes(bytes) => trim_trailing_nuls(bytes) == literal.as_bytes(),
            SqlValue::Int64(value) => value.to_string() == literal,
            SqlValue::Bool(value) => value.to_string() == literal,
            SqlValue::Null => false,
        }
    }
}

pub(crate) fn trim_trailing_nuls(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == 0 {
        end -= 1;
    }
    &bytes[..end]
}

// Parameters are sent in text format so the server parses them into whatever
// type the target column has; the engine never learns backend column types.
impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => return Ok(IsNull::Yes),
            SqlValue::Address(value) | SqlValue::BigInt(value) | SqlValue::Text(value) => {
                out.extend_from_slice(value.as_bytes());
            }
            SqlValue::Int64(value) => out.extend_from_slice(value.to_string().as_bytes()),
            SqlValue::Bool(value) => out.extend_from_slice(if *value { b"t" } else { b"f" }),
            SqlValue::Bytes(bytes) => {
                if *ty == Type::BYTEA {
                    out.extend_from_slice(format!("\\x{}", hex::encode(bytes)).as_bytes());
                } else {
                    // Raw passthrough into character columns; the backend's
                    // encoding validation decides whether this is acceptable.
                    out.extend_from_slice(bytes);
                }
            }
        }

        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlValue::Address(value) | SqlValue::BigInt(value) | SqlValue::Text(value) => {
                ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes()))
            }
            SqlValue::Bytes(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            SqlValue::Int64(value) => ToSqlOutput::Owned(SqliteValue::Integer(*value)),
            SqlValue::Bool(value) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*value))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_only_trailing_nuls() {
        assert_eq!(trim_trailing_nuls(b"abc\x00\x00"), b"abc");
        assert_eq!(trim_trailing_nuls(b"\x00abc"), b"\x00abc");
        assert_eq!(trim_trailing_nuls(b"\x00\x00"), b"");
        assert_eq!(trim_trailing_nuls(b""), b"");
    }

    #[test]
    fn delete_filter_literals_match_by_string_form() {
        assert!(SqlValue::Text("tombstone".into()).matches_literal("tombstone"));
        assert!(SqlValue::Bytes(b"tombstone\x00\x00\x00".to_vec()).matches_literal("tombstone"));
        assert!(SqlValue::Int64(7).matches_literal("7"));
        assert!(!SqlValue::Null.matches_literal(""));
        assert!(!SqlValue::Bytes(b"keep".to_vec()).matches_literal("tombstone"));
    }
}
