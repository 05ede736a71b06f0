use ethers::abi::Token;
use ethers::types::H256;
use serde_json::json;
use vent::{Block, EventDecl, EventHeader, EventRecord, EventType, InputDecl, LogEvent, TxRecord};

pub fn update_event_decl(with_category: bool) -> EventDecl {
    let mut inputs = vec![
        input("name", "bytes32"),
        input("description", "string"),
    ];
    if with_category {
        inputs.push(input("category", "string"));
    }

    EventDecl {
        name: "UpdateTestEvent".to_string(),
        anonymous: false,
        inputs,
    }
}

pub fn delete_event_decl() -> EventDecl {
    EventDecl {
        name: "DeleteTestEvent".to_string(),
        anonymous: false,
        inputs: vec![
            input("name", "bytes32"),
            input("marker", "bytes32"),
            input("description", "string"),
        ],
    }
}

/// A log carrying `UpdateTestEvent(name, description)`.
pub fn update_log(name: &str, description: &str) -> LogEvent {
    LogEvent {
        topics: vec![update_event_decl(false).event_id().unwrap()],
        data: ethers::abi::encode(&[
            Token::FixedBytes(pad32(name)),
            Token::String(description.to_string()),
        ]),
    }
}

/// A log carrying `DeleteTestEvent(name, marker, description)`.
pub fn delete_log(name: &str, marker: &str, description: &str) -> LogEvent {
    LogEvent {
        topics: vec![delete_event_decl().event_id().unwrap()],
        data: ethers::abi::encode(&[
            Token::FixedBytes(pad32(name)),
            Token::FixedBytes(pad32(marker)),
            Token::String(description.to_string()),
        ]),
    }
}

/// A log whose first topic matches no known event id.
pub fn unknown_log() -> LogEvent {
    LogEvent {
        topics: vec![H256::repeat_byte(0x77)],
        data: vec![],
    }
}

/// One block holding one transaction that emitted the given logs.
pub fn block_with_logs(height: u64, logs: Vec<LogEvent>) -> Block {
    let hash = tx_hash(height);
    let events = logs
        .into_iter()
        .enumerate()
        .map(|(index, log)| EventRecord {
            header: EventHeader {
                height,
                tx_hash: hash.clone(),
                index: index as u64,
                event_type: EventType::Log,
            },
            log,
        })
        .collect();

    Block {
        height,
        header: json!({ "height": height }),
        transactions: vec![TxRecord {
            hash,
            index: 0,
            envelope: json!({ "signatories": 1 }),
            events,
            result: json!({}),
            receipt: json!({}),
            exception: serde_json::Value::Null,
        }],
    }
}

fn input(name: &str, evm_type: &str) -> InputDecl {
    InputDecl {
        name: name.to_string(),
        evm_type: evm_type.to_string(),
        indexed: false,
    }
}

fn pad32(value: &str) -> Vec<u8> {
    let mut padded = vec![0u8; 32];
    padded[..value.len()].copy_from_slice(value.as_bytes());
    padded
}

fn tx_hash(height: u64) -> Vec<u8> {
    let mut hash = vec![0u8; 20];
    hash[12..].copy_from_slice(&height.to_be_bytes());
    hash
}
