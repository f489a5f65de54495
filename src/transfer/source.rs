use bytes::Bytes;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::mpsc::{self, error::TryRecvError};

use super::{DataSource, SourceEvent, CHUNK_SIZE, READ_AHEAD};
use crate::{
    error::FsResult,
    fs::Filesystem,
    path::Path,
    protocol::{FileAttributes, OpenFlags},
};

async fn run_reader(fs: Arc<dyn Filesystem>, path: String, tx: mpsc::Sender<FsResult<Bytes>>) {
    let handle = match fs.open(&path, OpenFlags::READ, FileAttributes::default()).await {
        Ok(handle) => handle,
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            return;
        }
    };

    let mut offset = 0;
    loop {
        match fs.read(&handle, offset, CHUNK_SIZE).await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => {
                offset += chunk.len() as u64;
                if tx.send(Ok(chunk)).await.is_err() {
                    trace!("reader of {} closed at offset {}", path, offset);
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                break;
            }
        }
    }

    if let Err(err) = fs.close(&handle).await {
        warn!("failed to close {}: {}", path, err);
    }
}

/// Streams a file from any [`Filesystem`].
///
/// Nothing is opened until the first call to `event`; a background task then
/// reads ahead at most [`READ_AHEAD`] chunks.
pub struct FileDataSource {
    fs: Arc<dyn Filesystem>,
    path: String,
    name: String,
    relative_path: Option<String>,
    stats: Option<FileAttributes>,
    chunks: Option<mpsc::Receiver<FsResult<Bytes>>>,
    ready: VecDeque<Bytes>,
    pending: Option<SourceEvent>,
    closed: bool,
}

impl FileDataSource {
    pub fn new<P: Into<String>>(
        fs: Arc<dyn Filesystem>,
        path: P,
        stats: Option<FileAttributes>,
    ) -> Self {
        let path = path.into();
        let name = Path::on(path.as_str(), fs.as_ref()).get_name().to_owned();

        Self {
            fs,
            path,
            name,
            relative_path: None,
            stats,
            chunks: None,
            ready: VecDeque::new(),
            pending: None,
            closed: false,
        }
    }

    /// Stats `path` first so the declared length is known
    pub async fn open<P: Into<String>>(fs: Arc<dyn Filesystem>, path: P) -> FsResult<Self> {
        let path = path.into();
        let stats = fs.stat(&path).await?;
        Ok(Self::new(fs, path, Some(stats)))
    }

    #[must_use]
    pub fn with_relative_path<P: Into<String>>(mut self, relative_path: P) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    fn spawn_reader(&self) -> mpsc::Receiver<FsResult<Bytes>> {
        let (tx, rx) = mpsc::channel(READ_AHEAD);
        debug!("reading {}", self.path);
        let _reader = tokio::spawn(run_reader(self.fs.clone(), self.path.clone(), tx));
        rx
    }
}

#[async_trait]
impl DataSource for FileDataSource {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn length(&self) -> u64 {
        self.stats.as_ref().map_or(0, FileAttributes::len)
    }

    fn stats(&self) -> Option<&FileAttributes> {
        self.stats.as_ref()
    }

    fn path(&self) -> Option<&str> {
        Some(&self.path)
    }

    fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    async fn event(&mut self) -> SourceEvent {
        if let Some(event) = self.pending.take() {
            return event;
        }
        if !self.ready.is_empty() {
            return SourceEvent::Readable;
        }
        if self.closed {
            return SourceEvent::End;
        }

        if self.chunks.is_none() {
            self.chunks = Some(self.spawn_reader());
        }
        let Some(chunks) = self.chunks.as_mut() else {
            return SourceEvent::End;
        };

        match chunks.recv().await {
            Some(Ok(chunk)) => {
                self.ready.push_back(chunk);
                SourceEvent::Readable
            }
            Some(Err(err)) => SourceEvent::Error(err),
            None => SourceEvent::End,
        }
    }

    fn read(&mut self) -> Option<Bytes> {
        if let Some(chunk) = self.ready.pop_front() {
            return Some(chunk);
        }
        if self.pending.is_some() {
            return None;
        }

        match self.chunks.as_mut()?.try_recv() {
            Ok(Ok(chunk)) => Some(chunk),
            Ok(Err(err)) => {
                self.pending = Some(SourceEvent::Error(err));
                None
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.pending = Some(SourceEvent::End);
                None
            }
        }
    }

    fn close(&mut self) {
        debug!("closing {}", self.path);
        self.closed = true;
        self.ready.clear();
        if let Some(mut chunks) = self.chunks.take() {
            chunks.close();
        }
    }
}

/// Serves bytes already held in memory
pub struct BufferDataSource {
    name: String,
    data: Bytes,
    offset: usize,
    relative_path: Option<String>,
    stats: Option<FileAttributes>,
}

impl BufferDataSource {
    pub fn new<N: Into<String>, D: Into<Bytes>>(name: N, data: D) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            offset: 0,
            relative_path: None,
            stats: None,
        }
    }

    #[must_use]
    pub fn with_relative_path<P: Into<String>>(mut self, relative_path: P) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: FileAttributes) -> Self {
        self.stats = Some(stats);
        self
    }
}

#[async_trait]
impl DataSource for BufferDataSource {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn stats(&self) -> Option<&FileAttributes> {
        self.stats.as_ref()
    }

    fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    async fn event(&mut self) -> SourceEvent {
        if self.offset < self.data.len() {
            SourceEvent::Readable
        } else {
            SourceEvent::End
        }
    }

    fn read(&mut self) -> Option<Bytes> {
        if self.offset >= self.data.len() {
            return None;
        }

        let end = (self.offset + CHUNK_SIZE as usize).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Some(chunk)
    }

    fn close(&mut self) {
        self.offset = self.data.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;

    #[tokio::test]
    async fn buffer_source_chunks_then_ends() {
        let data = vec![7u8; CHUNK_SIZE as usize + 10];
        let mut source = BufferDataSource::new("blob", data);

        assert!(matches!(source.event().await, SourceEvent::Readable));
        assert_eq!(source.read().unwrap().len(), CHUNK_SIZE as usize);
        assert_eq!(source.read().unwrap().len(), 10);
        assert!(source.read().is_none());
        assert!(matches!(source.event().await, SourceEvent::End));
    }

    #[tokio::test]
    async fn file_source_reads_whole_file() {
        let fs = Arc::new(MemoryFilesystem::new());
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        fs.insert_file("/src/data.bin", data.clone()).await;

        let mut source = FileDataSource::open(fs, "/src/data.bin").await.unwrap();
        assert_eq!(source.name(), Some("data.bin"));
        assert_eq!(source.length(), 100_000);

        let mut received = Vec::new();
        loop {
            match source.event().await {
                SourceEvent::Readable => {
                    while let Some(chunk) = source.read() {
                        received.extend_from_slice(&chunk);
                    }
                }
                SourceEvent::End => break,
                SourceEvent::Error(err) => panic!("unexpected error: {err}"),
            }
        }

        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn file_source_reports_missing_file() {
        let fs = Arc::new(MemoryFilesystem::new());
        let mut source = FileDataSource::new(fs, "/nope", None);

        match source.event().await {
            SourceEvent::Error(err) => assert!(err.is_not_found()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
