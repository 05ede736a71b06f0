use std::collections::HashMap;

use derive_more::Display;
use ethers::abi::{RawLog, Token};
use ethers::types::{H256, I256};

use crate::abi::AbiIndex;
use crate::events::{EventHeader, LogEvent};
use crate::tables;
use crate::tables::SqlTable;
use crate::values::{trim_trailing_nuls, SqlValue};

/// A decoded log record keyed by ABI input name plus the global-column
/// labels, before projection onto a declared table.
#[derive(Clone, Debug)]
pub struct DecodedEvent {
    pub event_name: String,
    pub values: HashMap<String, SqlValue>,
}

#[derive(Debug, Display)]
pub enum DecodeError {
    #[display(fmt = "could not unpack event '{}': {}", event, message)]
    Unpack { event: String, message: String },
    #[display(fmt = "missing primary key column '{}' for table '{}'", column, table)]
    MissingPrimaryKey { table: String, column: String },
}

/// Decodes one log against the ABI index. A first topic matching no known
/// event id (or an absent first topic outside the anonymous entry) skips the
/// record rather than failing.
pub fn decode_event(
    header: &EventHeader,
    log: &LogEvent,
    abi: &AbiIndex,
) -> Result<Option<DecodedEvent>, DecodeError> {
    let event_id = log.topics.first().copied().unwrap_or_else(H256::zero);

    let Some(event) = abi.get(&event_id) else {
        return Ok(None);
    };

    let raw_log = RawLog {
        topics: log.topics.clone(),
        data: log.data.clone(),
    };
    let parsed = event.parse_log(raw_log).map_err(|err| DecodeError::Unpack {
        event: event.name.clone(),
        message: err.to_string(),
    })?;

    let mut values = HashMap::new();
    values.insert(
        tables::EVENT_NAME_LABEL.to_string(),
        SqlValue::Text(event.name.clone()),
    );
    values.insert(
        tables::HEIGHT_LABEL.to_string(),
        SqlValue::Text(header.height.to_string()),
    );
    values.insert(
        tables::EVENT_TYPE_LABEL.to_string(),
        SqlValue::Text(header.event_type.to_string()),
    );
    values.insert(
        tables::TX_HASH_LABEL.to_string(),
        SqlValue::Text(hex::encode(&header.tx_hash)),
    );
    values.insert(
        tables::INDEX_LABEL.to_string(),
        SqlValue::Int64(header.index as i64),
    );

    for param in parsed.params {
        values.insert(param.name, token_to_value(param.value));
    }

    Ok(Some(DecodedEvent {
        event_name: event.name.clone(),
        values,
    }))
}

/// Projects a decoded record onto a declared table: values without a mapped
/// column are discarded, `bytes_to_string` columns are NUL-trimmed into text,
/// and every primary-key column must end up present.
pub fn project_row(
    decoded: &DecodedEvent,
    table: &SqlTable,
) -> Result<HashMap<String, SqlValue>, DecodeError> {
    let mut row = HashMap::new();

    for (field, value) in &decoded.values {
        let Some(column) = table.column_for_field(field) else {
            continue;
        };

        let value = if column.bytes_to_string {
            bytes_to_text(value)
        } else {
            value.clone()
        };
        row.insert(column.name.clone(), value);
    }

    for column in table.primary_columns() {
        if !row.contains_key(&column.name) {
            return Err(DecodeError::MissingPrimaryKey {
                table: table.name.clone(),
                column: column.name.clone(),
            });
        }
    }

    Ok(row)
}

fn bytes_to_text(value: &SqlValue) -> SqlValue {
    let SqlValue::Bytes(bytes) = value else {
        return value.clone();
    };

    let trimmed = trim_trailing_nuls(bytes);
    match String::from_utf8(trimmed.to_vec()) {
        Ok(text) => SqlValue::Text(text),
        // Not valid UTF-8: hand the raw bytes to the backend and let its
        // encoding validation accept or reject them.
        Err(_) => SqlValue::Bytes(trimmed.to_vec()),
    }
}

fn token_to_value(token: Token) -> SqlValue {
    match token {
        Token::Address(address) => SqlValue::Address(format!("{address:x}")),
        Token::Int(value) => SqlValue::BigInt(I256::from_raw(value).to_string()),
        Token::Uint(value) => SqlValue::BigInt(value.to_string()),
        Token::Bool(value) => SqlValue::Bool(value),
        Token::String(value) => SqlValue::Text(value),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => SqlValue::Bytes(bytes),
        // Composite values project as their packed encoding.
        token @ (Token::Array(_) | Token::FixedArray(_) | Token::Tuple(_)) => {
            SqlValue::Bytes(ethers::abi::encode(&[token]))
        }
    }
}
