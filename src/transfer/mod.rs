//! Producer and consumer ends of a streamed file transfer.
//!
//! A [`DataSource`] hands out chunks without blocking and announces through
//! [`SourceEvent`]s when more may be available. A [`DataTarget`] accepts
//! chunks, reports backpressure from [`DataTarget::write`] and announces
//! flushes, relief and completion through [`TargetEvent`]s. Both event
//! methods must be cancel safe: the copy engine waits on them concurrently.

mod source;
mod target;

use bytes::Bytes;
use tokio::sync::mpsc;

pub use source::{BufferDataSource, FileDataSource};
pub use target::{BufferDataTarget, FileDataTarget};

use crate::{
    error::Error,
    protocol::{FileAttributes, Item},
};

/// Size of a single read request
pub const CHUNK_SIZE: u32 = 32 * 1024;
/// Chunks a file source may read ahead of the consumer
pub const READ_AHEAD: usize = 4;
/// Unflushed chunks a file target accepts before it reports backpressure
pub const HIGH_WATER_MARK: usize = 4;

#[derive(Debug)]
pub enum SourceEvent {
    /// More data may be available from `read`
    Readable,
    /// The source is exhausted
    End,
    Error(Error),
}

#[derive(Debug)]
pub enum TargetEvent {
    /// A chunk of the given length has been written out
    Flushed(usize),
    /// Backpressure relieved
    Drain,
    /// All written data flushed and the target closed
    Finish,
    Error(Error),
}

#[async_trait]
pub trait DataSource: Send {
    fn name(&self) -> Option<&str>;

    /// Declared length in bytes
    fn length(&self) -> u64;

    fn stats(&self) -> Option<&FileAttributes> {
        None
    }

    fn path(&self) -> Option<&str> {
        None
    }

    fn relative_path(&self) -> Option<&str> {
        None
    }

    /// Waits for the next lifecycle notification
    async fn event(&mut self) -> SourceEvent;

    /// Returns the next available chunk, or `None` if nothing is ready right now
    fn read(&mut self) -> Option<Bytes>;

    /// Releases underlying resources before natural exhaustion
    fn close(&mut self);
}

#[async_trait]
pub trait DataTarget: Send {
    fn name(&self) -> Option<&str> {
        None
    }

    /// Whether an empty source should still produce one zero-length write
    fn accepts_empty_blocks(&self) -> bool {
        false
    }

    /// Queues `chunk`. Returns `false` when the caller should wait for
    /// [`TargetEvent::Drain`] before writing more.
    fn write(&mut self, chunk: Bytes) -> bool;

    /// No more input is coming
    fn end(&mut self);

    /// Waits for the next lifecycle notification
    async fn event(&mut self) -> TargetEvent;
}

/// Notifications produced while transferring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Transferring(Item),
    Progress {
        path: Option<String>,
        transferred: u64,
        total: u64,
    },
    Transferred(Item),
}

/// Notification stream of one operation. A silent task drops everything.
#[derive(Debug, Clone, Default)]
pub struct Task {
    tx: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl Task {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            // a dropped receiver only means nobody is listening
            let _ = tx.send(event);
        }
    }
}
