use bytes::{Bytes, BytesMut};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::mpsc;

use super::{DataTarget, TargetEvent, HIGH_WATER_MARK};
use crate::{
    error::Error,
    fs::Filesystem,
    path::Path,
    protocol::{FileAttributes, OpenFlags},
};

#[derive(Debug)]
enum Command {
    Write(Bytes),
    End,
}

async fn run_writer(
    fs: Arc<dyn Filesystem>,
    path: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TargetEvent>,
) {
    let flags = OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE;
    let handle = match fs.open(&path, flags, FileAttributes::default()).await {
        Ok(handle) => handle,
        Err(err) => {
            let _ = events.send(TargetEvent::Error(err));
            return;
        }
    };

    let mut offset = 0;
    while let Some(command) = commands.recv().await {
        match command {
            Command::Write(chunk) => {
                let len = chunk.len();
                if let Err(err) = fs.write(&handle, offset, chunk).await {
                    if let Err(close) = fs.close(&handle).await {
                        warn!("failed to close {}: {}", path, close);
                    }
                    let _ = events.send(TargetEvent::Error(err));
                    return;
                }

                offset += len as u64;
                let _ = events.send(TargetEvent::Flushed(len));
            }
            Command::End => {
                let event = match fs.close(&handle).await {
                    Ok(()) => TargetEvent::Finish,
                    Err(err) => TargetEvent::Error(err),
                };
                let _ = events.send(event);
                return;
            }
        }
    }

    trace!("writer of {} dropped before end", path);
    if let Err(err) = fs.close(&handle).await {
        warn!("failed to close {}: {}", path, err);
    }
}

/// Writes a file on any [`Filesystem`], creating or truncating it.
///
/// The file is opened on the first `write` or `end`. Writes are performed in
/// order by a background task; more than [`HIGH_WATER_MARK`] unflushed
/// chunks make `write` report backpressure.
pub struct FileDataTarget {
    fs: Arc<dyn Filesystem>,
    path: String,
    name: String,
    commands: Option<mpsc::UnboundedSender<Command>>,
    events: Option<mpsc::UnboundedReceiver<TargetEvent>>,
    queued: VecDeque<TargetEvent>,
    in_flight: usize,
    needs_drain: bool,
}

impl FileDataTarget {
    pub fn new<P: Into<String>>(fs: Arc<dyn Filesystem>, path: P) -> Self {
        let path = path.into();
        let name = Path::on(path.as_str(), fs.as_ref()).get_name().to_owned();

        Self {
            fs,
            path,
            name,
            commands: None,
            events: None,
            queued: VecDeque::new(),
            in_flight: 0,
            needs_drain: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn send(&mut self, command: Command) {
        let commands = self.commands.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let (events_tx, events_rx) = mpsc::unbounded_channel();

            debug!("writing {}", self.path);
            let _writer = tokio::spawn(run_writer(self.fs.clone(), self.path.clone(), rx, events_tx));
            self.events = Some(events_rx);
            tx
        });

        if commands.send(command).is_err() {
            // the writer already reported why it stopped
            trace!("writer of {} is gone", self.path);
        }
    }
}

#[async_trait]
impl DataTarget for FileDataTarget {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn write(&mut self, chunk: Bytes) -> bool {
        self.send(Command::Write(chunk));
        self.in_flight += 1;

        if self.in_flight < HIGH_WATER_MARK {
            return true;
        }

        self.needs_drain = true;
        false
    }

    fn end(&mut self) {
        self.send(Command::End);
    }

    async fn event(&mut self) -> TargetEvent {
        if let Some(event) = self.queued.pop_front() {
            return event;
        }

        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };

        match events.recv().await {
            Some(TargetEvent::Flushed(len)) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if self.needs_drain && self.in_flight <= HIGH_WATER_MARK / 2 {
                    self.needs_drain = false;
                    self.queued.push_back(TargetEvent::Drain);
                }
                TargetEvent::Flushed(len)
            }
            Some(event) => event,
            None => TargetEvent::Error(Error::Unspecified),
        }
    }
}

/// Collects everything written into memory
#[derive(Debug, Default)]
pub struct BufferDataTarget {
    buffer: BytesMut,
    events: VecDeque<TargetEvent>,
}

impl BufferDataTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

#[async_trait]
impl DataTarget for BufferDataTarget {
    fn write(&mut self, chunk: Bytes) -> bool {
        self.buffer.extend_from_slice(&chunk);
        self.events.push_back(TargetEvent::Flushed(chunk.len()));
        true
    }

    fn end(&mut self) {
        self.events.push_back(TargetEvent::Finish);
    }

    async fn event(&mut self) -> TargetEvent {
        match self.events.pop_front() {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;

    #[tokio::test]
    async fn file_target_reports_backpressure_then_drain() {
        let fs = Arc::new(MemoryFilesystem::new());
        let mut target = FileDataTarget::new(fs.clone(), "/out.bin");
        assert_eq!(target.name(), Some("out.bin"));

        for i in 0..HIGH_WATER_MARK {
            let accepted = target.write(Bytes::from(vec![i as u8; 8]));
            assert_eq!(accepted, i + 1 < HIGH_WATER_MARK);
        }

        assert!(matches!(target.event().await, TargetEvent::Flushed(8)));
        assert!(matches!(target.event().await, TargetEvent::Flushed(8)));
        assert!(matches!(target.event().await, TargetEvent::Drain));

        target.end();
        assert!(matches!(target.event().await, TargetEvent::Flushed(8)));
        assert!(matches!(target.event().await, TargetEvent::Flushed(8)));
        assert!(matches!(target.event().await, TargetEvent::Finish));

        let written = fs.contents("/out.bin").await.unwrap();
        assert_eq!(written.len(), 8 * HIGH_WATER_MARK);
        assert_eq!(written[8 * 3], 3);
    }

    #[tokio::test]
    async fn file_target_fails_without_parent() {
        let fs = Arc::new(MemoryFilesystem::new());
        let mut target = FileDataTarget::new(fs, "/missing/out.bin");

        assert!(target.write(Bytes::from_static(b"data")));
        match target.event().await {
            TargetEvent::Error(err) => assert!(err.is_not_found()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn buffer_target_collects_writes() {
        let mut target = BufferDataTarget::new();
        assert!(target.write(Bytes::from_static(b"abc")));
        assert!(target.write(Bytes::from_static(b"def")));
        target.end();

        assert!(matches!(target.event().await, TargetEvent::Flushed(3)));
        assert!(matches!(target.event().await, TargetEvent::Flushed(3)));
        assert!(matches!(target.event().await, TargetEvent::Finish));
        assert_eq!(target.into_bytes(), Bytes::from_static(b"abcdef"));
    }
}
