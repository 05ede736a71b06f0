use std::collections::HashMap;
use std::mem;

use crate::values::SqlValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowAction {
    Upsert,
    Delete,
}

/// One projected row awaiting commit, keyed by column name.
#[derive(Clone, Debug)]
pub struct EventRow {
    pub action: RowAction,
    pub data: HashMap<String, SqlValue>,
}

/// The unit of work produced by one block: every row it contributed, grouped
/// by table, committed in a single transaction.
#[derive(Clone, Debug, Default)]
pub struct BlockUnit {
    pub height: String,
    pub tables: HashMap<String, Vec<EventRow>>,
}

/// Accumulates decoded rows for a single height until the block boundary is
/// reached. Never shared; reset by `drain`.
#[derive(Debug, Default)]
pub struct BlockBuffer {
    height: String,
    tables: HashMap<String, Vec<EventRow>>,
}

impl BlockBuffer {
    pub fn new() -> BlockBuffer {
        BlockBuffer::default()
    }

    pub fn set_height(&mut self, height: &str) {
        self.height = height.to_string();
    }

    pub fn add_row(&mut self, table_name: &str, row: EventRow) {
        self.tables.entry(table_name.to_string()).or_default().push(row);
    }

    /// True when rows are buffered for the given height.
    pub fn pending(&self, height: &str) -> bool {
        self.height == height && !self.tables.is_empty()
    }

    pub fn drain(&mut self) -> BlockUnit {
        BlockUnit {
            height: mem::take(&mut self.height),
            tables: mem::take(&mut self.tables),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_row() -> EventRow {
        EventRow {
            action: RowAction::Upsert,
            data: HashMap::from([("testname".to_string(), SqlValue::Text("x".to_string()))]),
        }
    }

    #[test]
    fn sets_the_block_height() {
        let mut buffer = BlockBuffer::new();
        buffer.set_height("44");

        assert!(!buffer.pending("44"));
        buffer.add_row("test_table", test_row());
        assert!(buffer.pending("44"));
    }

    #[test]
    fn accumulates_rows_per_table() {
        let mut buffer = BlockBuffer::new();
        buffer.set_height("99");
        buffer.add_row("test_table", test_row());
        buffer.add_row("test_table", test_row());
        buffer.add_row("other_table", test_row());

        let unit = buffer.drain();
        assert_eq!(unit.height, "99");
        assert_eq!(unit.tables.len(), 2);
        assert_eq!(unit.tables["test_table"].len(), 2);
        assert_eq!(unit.tables["other_table"].len(), 1);
    }

    #[test]
    fn pending_requires_a_height_match() {
        let mut buffer = BlockBuffer::new();
        buffer.add_row("test_table", test_row());
        buffer.set_height("99");

        assert!(buffer.pending("99"));
        assert!(!buffer.pending("88"));
    }

    #[test]
    fn pending_is_false_without_rows() {
        let buffer = BlockBuffer::new();
        assert!(!buffer.pending("999"));
    }

    #[test]
    fn drain_resets_the_buffer() {
        let mut buffer = BlockBuffer::new();
        buffer.set_height("7");
        buffer.add_row("test_table", test_row());

        let unit = buffer.drain();
        assert_eq!(unit.tables.len(), 1);
        assert!(!buffer.pending("7"));
        assert!(buffer.drain().tables.is_empty());
    }
}
