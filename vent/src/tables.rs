use std::collections::HashMap;

use ethers::abi::ParamType;

/// Self-describing metadata table consulted instead of the backend catalog.
pub const DICTIONARY_TABLE_NAME: &str = "_vent_dictionary";
/// Append-only log of committed block units of work; also the durable checkpoint.
pub const LOG_TABLE_NAME: &str = "_vent_log";
/// Whole-block capture table, populated only when block/tx capture is enabled.
pub const BLOCK_TABLE_NAME: &str = "_vent_block";
/// Whole-transaction capture table, populated only when block/tx capture is enabled.
pub const TX_TABLE_NAME: &str = "_vent_tx";

/// Declared table names must not collide with the engine's own tables.
pub const RESERVED_TABLE_PREFIX: &str = "_vent";

pub const ID_COLUMN: &str = "_id";
pub const TIMESTAMP_COLUMN: &str = "_timestamp";
pub const TABLE_NAME_COLUMN: &str = "_tablename";
pub const EVENT_NAME_COLUMN: &str = "_eventname";
pub const EVENT_FILTER_COLUMN: &str = "_eventfilter";
pub const ROW_COUNT_COLUMN: &str = "_rowcount";
pub const HEIGHT_COLUMN: &str = "_height";
pub const TX_HASH_COLUMN: &str = "_txhash";
pub const INDEX_COLUMN: &str = "_index";
pub const EVENT_TYPE_COLUMN: &str = "_eventtype";
pub const COLUMN_NAME_COLUMN: &str = "_columnname";
pub const COLUMN_TYPE_COLUMN: &str = "_columntype";
pub const COLUMN_LENGTH_COLUMN: &str = "_columnlength";
pub const PRIMARY_KEY_COLUMN: &str = "_primarykey";
pub const COLUMN_ORDER_COLUMN: &str = "_columnorder";
pub const BLOCK_HEADER_COLUMN: &str = "_blockheader";
pub const TX_EXECUTIONS_COLUMN: &str = "_txexecutions";
pub const ENVELOPE_COLUMN: &str = "_envelope";
pub const EVENTS_COLUMN: &str = "_events";
pub const RESULT_COLUMN: &str = "_result";
pub const RECEIPT_COLUMN: &str = "_receipt";
pub const EXCEPTION_COLUMN: &str = "_exception";

// Field keys under which the decoder emits the global columns. These share
// the namespace of ABI input names inside a decoded record.
pub const HEIGHT_LABEL: &str = "height";
pub const TX_HASH_LABEL: &str = "txHash";
pub const INDEX_LABEL: &str = "index";
pub const EVENT_TYPE_LABEL: &str = "eventType";
pub const EVENT_NAME_LABEL: &str = "eventName";

/// Closed set of logical column types the projector can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SqlColumnType {
    Bool,
    ByteA,
    Int,
    Serial,
    Text,
    Varchar,
    Timestamp,
    Numeric,
}

impl SqlColumnType {
    /// Stable integer code stored in the dictionary's `_columntype` column.
    pub fn code(self) -> i32 {
        match self {
            SqlColumnType::Bool => 0,
            SqlColumnType::ByteA => 1,
            SqlColumnType::Int => 2,
            SqlColumnType::Serial => 3,
            SqlColumnType::Text => 4,
            SqlColumnType::Varchar => 5,
            SqlColumnType::Timestamp => 6,
            SqlColumnType::Numeric => 7,
        }
    }

    pub fn from_code(code: i64) -> Option<SqlColumnType> {
        match code {
            0 => Some(SqlColumnType::Bool),
            1 => Some(SqlColumnType::ByteA),
            2 => Some(SqlColumnType::Int),
            3 => Some(SqlColumnType::Serial),
            4 => Some(SqlColumnType::Text),
            5 => Some(SqlColumnType::Varchar),
            6 => Some(SqlColumnType::Timestamp),
            7 => Some(SqlColumnType::Numeric),
            _ => None,
        }
    }
}

/// Definition of one column of a projected table. `order` is a dense 1-based
/// ordinal used for deterministic DDL rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqlTableColumn {
    pub name: String,
    pub column_type: SqlColumnType,
    pub length: u32,
    pub primary: bool,
    pub order: u32,
    pub bytes_to_string: bool,
}

/// Structure of one projected table. `columns` is keyed by the field key the
/// decoder emits (ABI input name or global-column label), not by column name.
#[derive(Clone, Debug)]
pub struct SqlTable {
    pub name: String,
    pub event_name: String,
    pub filter: String,
    pub columns: HashMap<String, SqlTableColumn>,
}

impl SqlTable {
    /// Columns in ascending `order`, the only order DDL and upserts may use.
    pub fn sorted_columns(&self) -> Vec<&SqlTableColumn> {
        let mut columns: Vec<&SqlTableColumn> = self.columns.values().collect();
        columns.sort_by_key(|column| column.order);
        columns
    }

    pub fn primary_columns(&self) -> Vec<&SqlTableColumn> {
        self.sorted_columns().into_iter().filter(|column| column.primary).collect()
    }

    pub fn column_for_field(&self, field: &str) -> Option<&SqlTableColumn> {
        self.columns.get(field)
    }
}

/// Maps an EVM type onto the logical lattice. Returns `(type, length)` or
/// `None` when the lattice has no mapping for the type.
pub fn column_type_for(param: &ParamType, bytes_to_string: bool) -> Option<(SqlColumnType, u32)> {
    match param {
        ParamType::Array(_) | ParamType::FixedArray(_, _) => Some((SqlColumnType::ByteA, 0)),
        ParamType::Address => Some((SqlColumnType::Varchar, 40)),
        ParamType::Bool => Some((SqlColumnType::Bool, 0)),
        ParamType::Bytes | ParamType::FixedBytes(_) => {
            if bytes_to_string {
                Some((SqlColumnType::Varchar, 40))
            } else {
                Some((SqlColumnType::ByteA, 0))
            }
        }
        ParamType::String => Some((SqlColumnType::Text, 0)),
        ParamType::Int(bits) => {
            if *bits <= 32 {
                Some((SqlColumnType::Int, 0))
            } else {
                Some((SqlColumnType::Numeric, 0))
            }
        }
        ParamType::Uint(bits) => {
            if *bits <= 16 {
                Some((SqlColumnType::Int, 0))
            } else {
                Some((SqlColumnType::Numeric, 0))
            }
        }
        ParamType::Tuple(_) => None,
    }
}

/// Global columns carried by every projected table, orders 1..=5. They are
/// primary-key-eligible but never primary by default.
pub fn global_columns() -> Vec<(String, SqlTableColumn)> {
    vec![
        (
            HEIGHT_LABEL.to_string(),
            varchar_column(HEIGHT_COLUMN, 100, false, 1),
        ),
        (
            TX_HASH_LABEL.to_string(),
            varchar_column(TX_HASH_COLUMN, 40, false, 2),
        ),
        (
            INDEX_LABEL.to_string(),
            plain_column(INDEX_COLUMN, SqlColumnType::Numeric, false, 3),
        ),
        (
            EVENT_TYPE_LABEL.to_string(),
            varchar_column(EVENT_TYPE_COLUMN, 100, false, 4),
        ),
        (
            EVENT_NAME_LABEL.to_string(),
            varchar_column(EVENT_NAME_COLUMN, 100, false, 5),
        ),
    ]
}

pub fn dictionary_table() -> SqlTable {
    system_table(
        DICTIONARY_TABLE_NAME,
        vec![
            varchar_column(TABLE_NAME_COLUMN, 100, true, 1),
            varchar_column(COLUMN_NAME_COLUMN, 100, true, 2),
            plain_column(COLUMN_TYPE_COLUMN, SqlColumnType::Int, false, 3),
            plain_column(COLUMN_LENGTH_COLUMN, SqlColumnType::Int, false, 4),
            plain_column(PRIMARY_KEY_COLUMN, SqlColumnType::Int, false, 5),
            plain_column(COLUMN_ORDER_COLUMN, SqlColumnType::Int, false, 6),
        ],
    )
}

pub fn log_table() -> SqlTable {
    system_table(
        LOG_TABLE_NAME,
        vec![
            plain_column(ID_COLUMN, SqlColumnType::Serial, true, 1),
            plain_column(TIMESTAMP_COLUMN, SqlColumnType::Timestamp, false, 2),
            varchar_column(TABLE_NAME_COLUMN, 100, false, 3),
            varchar_column(EVENT_NAME_COLUMN, 100, false, 4),
            plain_column(ROW_COUNT_COLUMN, SqlColumnType::Int, false, 5),
            varchar_column(EVENT_FILTER_COLUMN, 100, false, 6),
            varchar_column(HEIGHT_COLUMN, 100, false, 7),
        ],
    )
}

pub fn block_table() -> SqlTable {
    system_table(
        BLOCK_TABLE_NAME,
        vec![
            varchar_column(HEIGHT_COLUMN, 100, true, 1),
            plain_column(BLOCK_HEADER_COLUMN, SqlColumnType::Text, false, 2),
            plain_column(TX_EXECUTIONS_COLUMN, SqlColumnType::Text, false, 3),
        ],
    )
}

pub fn tx_table() -> SqlTable {
    system_table(
        TX_TABLE_NAME,
        vec![
            varchar_column(HEIGHT_COLUMN, 100, true, 1),
            varchar_column(TX_HASH_COLUMN, 40, true, 2),
            plain_column(INDEX_COLUMN, SqlColumnType::Numeric, false, 3),
            plain_column(ENVELOPE_COLUMN, SqlColumnType::Text, false, 4),
            plain_column(EVENTS_COLUMN, SqlColumnType::Text, false, 5),
            plain_column(RESULT_COLUMN, SqlColumnType::Text, false, 6),
            plain_column(RECEIPT_COLUMN, SqlColumnType::Text, false, 7),
            plain_column(EXCEPTION_COLUMN, SqlColumnType::Text, false, 8),
        ],
    )
}

fn system_table(name: &str, columns: Vec<SqlTableColumn>) -> SqlTable {
    // System tables key their columns by column name.
    let columns = columns
        .into_iter()
        .map(|column| (column.name.clone(), column))
        .collect();

    SqlTable {
        name: name.to_string(),
        event_name: String::new(),
        filter: String::new(),
        columns,
    }
}

fn plain_column(name: &str, column_type: SqlColumnType, primary: bool, order: u32) -> SqlTableColumn {
    SqlTableColumn {
        name: name.to_string(),
        column_type,
        length: 0,
        primary,
        order,
        bytes_to_string: false,
    }
}

fn varchar_column(name: &str, length: u32, primary: bool, order: u32) -> SqlTableColumn {
    SqlTableColumn {
        name: name.to_string(),
        column_type: SqlColumnType::Varchar,
        length,
        primary,
        order,
        bytes_to_string: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_evm_types_onto_the_lattice() {
        assert_eq!(
            column_type_for(&ParamType::Address, false),
            Some((SqlColumnType::Varchar, 40))
        );
        assert_eq!(
            column_type_for(&ParamType::Bool, false),
            Some((SqlColumnType::Bool, 0))
        );
        assert_eq!(
            column_type_for(&ParamType::String, false),
            Some((SqlColumnType::Text, 0))
        );
        assert_eq!(
            column_type_for(&ParamType::FixedBytes(32), false),
            Some((SqlColumnType::ByteA, 0))
        );
        assert_eq!(
            column_type_for(&ParamType::FixedBytes(32), true),
            Some((SqlColumnType::Varchar, 40))
        );
        assert_eq!(
            column_type_for(&ParamType::Array(Box::new(ParamType::Uint(256))), false),
            Some((SqlColumnType::ByteA, 0))
        );
    }

    #[test]
    fn splits_integers_by_width() {
        assert_eq!(
            column_type_for(&ParamType::Int(32), false),
            Some((SqlColumnType::Int, 0))
        );
        assert_eq!(
            column_type_for(&ParamType::Int(64), false),
            Some((SqlColumnType::Numeric, 0))
        );
        assert_eq!(
            column_type_for(&ParamType::Uint(16), false),
            Some((SqlColumnType::Int, 0))
        );
        assert_eq!(
            column_type_for(&ParamType::Uint(256), false),
            Some((SqlColumnType::Numeric, 0))
        );
    }

    #[test]
    fn rejects_types_outside_the_lattice() {
        assert_eq!(column_type_for(&ParamType::Tuple(vec![]), false), None);
    }

    #[test]
    fn global_columns_take_the_first_five_orders() {
        let columns = global_columns();
        let orders: Vec<u32> = columns.iter().map(|(_, column)| column.order).collect();

        assert_eq!(orders, vec![1, 2, 3, 4, 5]);
        assert!(columns.iter().all(|(_, column)| !column.primary));
    }

    #[test]
    fn column_type_codes_round_trip() {
        for column_type in [
            SqlColumnType::Bool,
            SqlColumnType::ByteA,
            SqlColumnType::Int,
            SqlColumnType::Serial,
            SqlColumnType::Text,
            SqlColumnType::Varchar,
            SqlColumnType::Timestamp,
            SqlColumnType::Numeric,
        ] {
            assert_eq!(
                SqlColumnType::from_code(column_type.code() as i64),
                Some(column_type)
            );
        }
        assert_eq!(SqlColumnType::from_code(42), None);
    }

    #[test]
    fn sorted_columns_follow_the_declared_order() {
        let table = log_table();
        let names: Vec<&str> =
            table.sorted_columns().iter().map(|column| column.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                ID_COLUMN,
                TIMESTAMP_COLUMN,
                TABLE_NAME_COLUMN,
                EVENT_NAME_COLUMN,
                ROW_COUNT_COLUMN,
                EVENT_FILTER_COLUMN,
                HEIGHT_COLUMN,
            ]
        );
    }
}
