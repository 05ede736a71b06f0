use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::abi::AbiIndex;
use crate::buffer::{BlockBuffer, BlockUnit, EventRow, RowAction};
use crate::config::{Config, ConfigError};
use crate::decoder::{decode_event, project_row, DecodeError};
use crate::events::{Block, TxRecord};
use crate::source::{BlockRange, BlockSource, BlockStream, SourceError};
use crate::spec;
use crate::spec::{Projection, SpecError};
use crate::store::{SqlStore, StoreError};
use crate::tables;
use crate::values::SqlValue;

const STREAM_POLL_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Display)]
pub enum ConsumerError {
    #[display(fmt = "configuration error: {:?}", _0)]
    Config(ConfigError),
    #[display(fmt = "spec error: {}", _0)]
    Spec(SpecError),
    #[display(fmt = "store error: {}", _0)]
    Store(StoreError),
    #[display(fmt = "block stream error: {}", _0)]
    Source(SourceError),
    #[display(fmt = "decode error: {}", _0)]
    Decode(DecodeError),
    #[display(fmt = "malformed committed height: {}", _0)]
    MalformedHeight(String),
    #[display(fmt = "error building capture row: {}", _0)]
    Capture(serde_json::Error),
}

impl From<ConfigError> for ConsumerError {
    fn from(value: ConfigError) -> ConsumerError {
        ConsumerError::Config(value)
    }
}

impl From<SpecError> for ConsumerError {
    fn from(value: SpecError) -> ConsumerError {
        ConsumerError::Spec(value)
    }
}

impl From<StoreError> for ConsumerError {
    fn from(value: StoreError) -> ConsumerError {
        ConsumerError::Store(value)
    }
}

impl From<SourceError> for ConsumerError {
    fn from(value: SourceError) -> ConsumerError {
        ConsumerError::Source(value)
    }
}

impl From<DecodeError> for ConsumerError {
    fn from(value: DecodeError) -> ConsumerError {
        ConsumerError::Decode(value)
    }
}

/// Signals the consumer loop to stop between block receives.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drives the block stream: opens it at the committed checkpoint, decodes and
/// buffers every matching log, and commits one unit of work per block.
pub struct Consumer {
    config: Config,
    closing: Arc<AtomicBool>,
    observer: Option<mpsc::Sender<BlockUnit>>,
}

impl Consumer {
    pub fn new(config: Config) -> Consumer {
        Consumer {
            config,
            closing: Arc::new(AtomicBool::new(false)),
            observer: None,
        }
    }

    /// Attaches a channel receiving every committed unit. Writes never block:
    /// when the channel is full the notification is dropped, not the commit.
    pub fn with_observer(mut self, observer: mpsc::Sender<BlockUnit>) -> Consumer {
        self.observer = Some(observer);

        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.closing.clone())
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    /// Runs until shutdown or an unrecoverable error. The spec and ABI load
    /// and validate before any connection is opened.
    pub async fn run(&self, source: &impl BlockSource) -> Result<(), ConsumerError> {
        self.config.validate()?;

        let projection = spec::load(&self.config.spec_source()?, self.config.db_block_tx)?;
        let abi = AbiIndex::load(&self.config.abi_source()?)?;

        if projection.events.is_empty() {
            info!("no event specifications found");
            return Ok(());
        }

        info!("connecting to SQL database");
        let mut store = SqlStore::connect(&self.config).await?;
        store.synchronize(&projection.tables).await?;

        info!("getting last processed height from the log table");
        let last_height = store.last_height().await?;
        let start = last_height
            .parse::<u64>()
            .map_err(|_| ConsumerError::MalformedHeight(last_height.clone()))?;

        info!(start, "opening block stream");
        let mut stream =
            source.open(BlockRange::streaming_from(start), &projection.filters()).await?;

        loop {
            if self.is_closing() {
                break;
            }

            match stream.recv().await {
                Ok(Some(block)) => {
                    self.process_block(&mut store, &projection, &abi, &block).await?;
                }
                Ok(None) => {
                    // The stream may reopen; keep polling until shutdown.
                    debug!("end of stream received");
                    sleep(STREAM_POLL_PAUSE).await;
                }
                Err(err) if self.is_closing() => {
                    info!(%err, "block stream closed during shutdown");
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!("done");
        Ok(())
    }

    async fn process_block(
        &self,
        store: &mut SqlStore,
        projection: &Projection,
        abi: &AbiIndex,
        block: &Block,
    ) -> Result<(), ConsumerError> {
        let height = block.height.to_string();
        debug!(height = %height, transactions = block.transactions.len(), "block received");

        let mut buffer = BlockBuffer::new();
        buffer.set_height(&height);

        if self.config.db_block_tx {
            buffer.add_row(tables::BLOCK_TABLE_NAME, block_capture_row(block)?);
        }

        for tx in &block.transactions {
            if self.config.db_block_tx {
                buffer.add_row(tables::TX_TABLE_NAME, tx_capture_row(&height, tx)?);
            }

            for event in &tx.events {
                let tagged = event.tagged();

                for class in &projection.events {
                    if !class.query.matches(&tagged) {
                        continue;
                    }

                    let Some(decoded) = decode_event(&event.header, &event.log, abi)? else {
                        continue;
                    };

                    let action = match &class.delete_filter {
                        Some(filter)
                            if decoded
                                .values
                                .get(&filter.attr)
                                .is_some_and(|value| value.matches_literal(&filter.value)) =>
                        {
                            RowAction::Delete
                        }
                        _ => RowAction::Upsert,
                    };

                    let table = projection.table(class);
                    let data = project_row(&decoded, table)?;
                    buffer.add_row(&table.name, EventRow { action, data });
                }
            }
        }

        if buffer.pending(&height) {
            let unit = buffer.drain();
            info!(height = %height, "committing block unit");
            store.commit(&projection.tables, &unit).await?;

            if let Some(observer) = &self.observer {
                // Non-blocking: a full or readerless channel drops the
                // notification, never the commit.
                let _ = observer.try_send(unit);
            }
        }

        Ok(())
    }
}

fn block_capture_row(block: &Block) -> Result<EventRow, ConsumerError> {
    let transactions =
        serde_json::to_string(&block.transactions).map_err(ConsumerError::Capture)?;

    Ok(EventRow {
        action: RowAction::Upsert,
        data: HashMap::from([
            (
                tables::HEIGHT_COLUMN.to_string(),
                SqlValue::Text(block.height.to_string()),
            ),
            (
                tables::BLOCK_HEADER_COLUMN.to_string(),
                SqlValue::Text(block.header.to_string()),
            ),
            (
                tables::TX_EXECUTIONS_COLUMN.to_string(),
                SqlValue::Text(transactions),
            ),
        ]),
    })
}

fn tx_capture_row(height: &str, tx: &TxRecord) -> Result<EventRow, ConsumerError> {
    let events = serde_json::to_string(&tx.events).map_err(ConsumerError::Capture)?;

    Ok(EventRow {
        action: RowAction::Upsert,
        data: HashMap::from([
            (
                tables::HEIGHT_COLUMN.to_string(),
                SqlValue::Text(height.to_string()),
            ),
            (
                tables::TX_HASH_COLUMN.to_string(),
                SqlValue::Text(hex::encode(&tx.hash)),
            ),
            (
                tables::INDEX_COLUMN.to_string(),
                SqlValue::Int64(tx.index as i64),
            ),
            (
                tables::ENVELOPE_COLUMN.to_string(),
                SqlValue::Text(tx.envelope.to_string()),
            ),
            (tables::EVENTS_COLUMN.to_string(), SqlValue::Text(events)),
            (
                tables::RESULT_COLUMN.to_string(),
                SqlValue::Text(tx.result.to_string()),
            ),
            (
                tables::RECEIPT_COLUMN.to_string(),
                SqlValue::Text(tx.receipt.to_string()),
            ),
            (
                tables::EXCEPTION_COLUMN.to_string(),
                SqlValue::Text(tx.exception.to_string()),
            ),
        ]),
    })
}
