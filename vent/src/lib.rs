mod abi;
mod adapters;
mod buffer;
mod config;
mod consumer;
mod decoder;
mod events;
mod query;
mod source;
pub mod spec;
mod store;
pub mod tables;
mod values;

pub use abi::{parse_evm_type, AbiIndex, EventDecl, EventId, InputDecl};
pub use adapters::{DbAdapter, PostgresAdapter, SqlErrorKind, SqliteAdapter};
pub use buffer::{BlockBuffer, BlockUnit, EventRow, RowAction};
pub use config::{Config, ConfigError, DbAdapterKind, LogLevel};
pub use consumer::{Consumer, ConsumerError, ShutdownHandle};
pub use decoder::{decode_event, project_row, DecodeError, DecodedEvent};
pub use events::{Block, EventHeader, EventRecord, EventType, LogEvent, TaggedEvent, TxRecord};
pub use query::{Query, QueryError};
pub use source::{BlockRange, BlockSource, BlockStream, EndMode, SourceError};
pub use spec::{
    ColumnSpec, DeleteFilter, EventDefinition, EventProjection, Projection, SpecError, SpecSource,
};
pub use store::{DbConn, SqlStore, StoreError, StoredBlock};
pub use tables::{SqlColumnType, SqlTable, SqlTableColumn};
pub use values::SqlValue;
