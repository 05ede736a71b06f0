use async_trait::async_trait;
use derive_more::Display;

use crate::events::Block;

/// Upper bound of a block subscription. `Latest` ends at the chain head known
/// when the stream opens; `StreamingTip` follows the head as it advances and
/// is the only race-free choice on a fresh chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndMode {
    Latest,
    StreamingTip,
}

/// Half-open subscription range starting at `start` (inclusive).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: EndMode,
}

impl BlockRange {
    pub fn streaming_from(start: u64) -> BlockRange {
        BlockRange {
            start,
            end: EndMode::StreamingTip,
        }
    }
}

#[derive(Debug, Display)]
pub enum SourceError {
    #[display(fmt = "error connecting to block stream: {}", _0)]
    Connection(String),
    #[display(fmt = "error receiving blocks: {}", _0)]
    Stream(String),
}

/// The consumed block-stream contract. The node transport behind it is an
/// external collaborator; tests substitute an in-memory implementation.
#[async_trait]
pub trait BlockSource: Send + Sync {
    type Stream: BlockStream;

    /// Opens a subscription over `range`, forwarding the declared event
    /// filters for optional server-side pre-filtering.
    async fn open(&self, range: BlockRange, filters: &[String])
        -> Result<Self::Stream, SourceError>;
}

#[async_trait]
pub trait BlockStream: Send {
    /// The next block, or `None` at end of stream. End of stream is not
    /// terminal: the subscription may resume delivering after a reopen.
    async fn recv(&mut self) -> Result<Option<Block>, SourceError>;
}
