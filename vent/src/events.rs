use std::collections::HashMap;
use std::fmt;

use ethers::types::H256;
use serde::Serialize;

use crate::values::trim_trailing_nuls;

/// One streamed block: execution header plus every transaction it contains.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Block {
    pub height: u64,
    pub header: serde_json::Value,
    pub transactions: Vec<TxRecord>,
}

/// One executed transaction inside a block.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TxRecord {
    pub hash: Vec<u8>,
    pub index: u64,
    pub envelope: serde_json::Value,
    pub events: Vec<EventRecord>,
    pub result: serde_json::Value,
    pub receipt: serde_json::Value,
    pub exception: serde_json::Value,
}

/// One emitted log event: provenance header plus the raw log payload.
#[derive(Clone, Debug, Serialize)]
pub struct EventRecord {
    pub header: EventHeader,
    pub log: LogEvent,
}

#[derive(Clone, Debug, Serialize)]
pub struct EventHeader {
    pub height: u64,
    pub tx_hash: Vec<u8>,
    pub index: u64,
    pub event_type: EventType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EventType {
    Log,
    Call,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Log => write!(f, "LogEvent"),
            EventType::Call => write!(f, "CallEvent"),
        }
    }
}

/// The raw EVM log: topics (the first one carries the event id for
/// non-anonymous events) and the packed data blob.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LogEvent {
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

impl EventRecord {
    /// Tags the event for filter evaluation. Topic tags come in two forms:
    /// `Log<n>` as uppercase hex and `Log<n>Text` as NUL-trimmed text.
    pub fn tagged(&self) -> TaggedEvent {
        let mut tags = HashMap::new();

        tags.insert("EventType".to_string(), self.header.event_type.to_string());
        tags.insert("Height".to_string(), self.header.height.to_string());
        tags.insert(
            "TxHash".to_string(),
            hex::encode_upper(&self.header.tx_hash),
        );
        tags.insert("Index".to_string(), self.header.index.to_string());

        for (position, topic) in self.log.topics.iter().enumerate() {
            tags.insert(
                format!("Log{position}"),
                hex::encode_upper(topic.as_bytes()),
            );
            tags.insert(
                format!("Log{position}Text"),
                String::from_utf8_lossy(trim_trailing_nuls(topic.as_bytes())).into_owned(),
            );
        }

        TaggedEvent { tags }
    }
}

/// Tag view of an event, matched against filter predicates.
#[derive(Clone, Debug)]
pub struct TaggedEvent {
    tags: HashMap<String, String>,
}

impl TaggedEvent {
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.tags.get(tag).map(String::as_str)
    }
}
