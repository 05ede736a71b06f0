use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use vent::{Block, BlockRange, BlockSource, BlockStream, SourceError};

/// In-memory block source delivering a fixed sequence of blocks at or above
/// the requested lower bound, then reporting end of stream forever.
pub struct StaticBlockSource {
    blocks: Vec<Block>,
    opened: Mutex<Option<BlockRange>>,
    drained: Arc<AtomicBool>,
}

impl StaticBlockSource {
    pub fn new(blocks: Vec<Block>) -> StaticBlockSource {
        StaticBlockSource {
            blocks,
            opened: Mutex::new(None),
            drained: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The range the consumer requested on the last `open` call.
    pub fn last_opened_range(&self) -> Option<BlockRange> {
        *self.opened.lock().unwrap()
    }

    /// True once every queued block has been delivered.
    pub fn drained(&self) -> bool {
        self.drained.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlockSource for StaticBlockSource {
    type Stream = StaticBlockStream;

    async fn open(
        &self,
        range: BlockRange,
        _filters: &[String],
    ) -> Result<StaticBlockStream, SourceError> {
        *self.opened.lock().unwrap() = Some(range);
        self.drained.store(false, Ordering::Relaxed);

        Ok(StaticBlockStream {
            queue: self
                .blocks
                .iter()
                .filter(|block| block.height >= range.start)
                .cloned()
                .collect(),
            drained: self.drained.clone(),
        })
    }
}

pub struct StaticBlockStream {
    queue: VecDeque<Block>,
    drained: Arc<AtomicBool>,
}

#[async_trait]
impl BlockStream for StaticBlockStream {
    async fn recv(&mut self) -> Result<Option<Block>, SourceError> {
        match self.queue.pop_front() {
            Some(block) => Ok(Some(block)),
            None => {
                self.drained.store(true, Ordering::Relaxed);
                Ok(None)
            }
        }
    }
}
