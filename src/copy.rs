//! Streams one [`DataSource`] into one [`DataTarget`].

use bytes::Bytes;

use crate::{
    error::{Error, FsResult},
    protocol::{FileAttributes, Item},
    transfer::{DataSource, DataTarget, SourceEvent, TargetEvent, Task, TransferEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the source to announce data
    AwaitingData,
    /// Moving every available chunk into the target
    Pulling,
    /// The target asked us to stop writing until it drains
    Draining,
    /// The target has been ended; waiting for it to finish
    Finishing,
    Closed,
}

struct Copier<'a, S: ?Sized, T: ?Sized> {
    source: &'a mut S,
    target: &'a mut T,
    task: &'a Task,
    state: State,
    empty_so_far: bool,
    source_at_eof: bool,
    transferred: u64,
    item: Option<Item>,
    error: Option<Error>,
}

impl<'a, S, T> Copier<'a, S, T>
where
    S: DataSource + ?Sized,
    T: DataTarget + ?Sized,
{
    fn new(source: &'a mut S, target: &'a mut T, task: &'a Task) -> Self {
        Self {
            source,
            target,
            task,
            state: State::AwaitingData,
            empty_so_far: true,
            source_at_eof: false,
            transferred: 0,
            item: None,
            error: None,
        }
    }

    async fn run(mut self) -> FsResult<()> {
        while self.state != State::Closed {
            if self.state == State::Pulling {
                self.pull();
                continue;
            }

            let wants_data = self.state == State::AwaitingData;
            tokio::select! {
                event = self.source.event(), if wants_data => self.on_source(event),
                event = self.target.event() => self.on_target(event),
            }
        }

        self.finalize()
    }

    fn describe(&self) -> Item {
        let name = self
            .source
            .name()
            .or_else(|| self.target.name())
            .unwrap_or_default()
            .to_owned();
        let stats = self
            .source
            .stats()
            .cloned()
            .unwrap_or_else(|| FileAttributes::with_size(self.source.length()));
        let path = self.source.relative_path().unwrap_or(&name).to_owned();

        Item {
            path: Some(path),
            ..Item::new(name, stats)
        }
    }

    fn pull(&mut self) {
        while let Some(chunk) = self.source.read() {
            trace!("writing chunk of {} bytes", chunk.len());
            self.empty_so_far = false;

            if !self.target.write(chunk) {
                self.state = State::Draining;
                return;
            }
        }

        self.state = State::AwaitingData;
    }

    fn capture(&mut self, err: Error) {
        if self.error.is_none() {
            warn!("transfer failed: {}", err);
            self.error = Some(err);
        } else {
            debug!("dropping subsequent error: {}", err);
        }
    }

    fn end_target(&mut self) {
        self.source_at_eof = true;
        self.target.end();
        self.state = State::Finishing;
    }

    fn on_source(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Readable => {
                if self.item.is_none() {
                    let item = self.describe();
                    debug!("transferring {}", item.filename);
                    self.task.emit(TransferEvent::Transferring(item.clone()));
                    self.item = Some(item);
                }
                self.state = State::Pulling;
            }
            SourceEvent::End => {
                if self.empty_so_far && self.target.accepts_empty_blocks() {
                    self.empty_so_far = false;
                    let _ = self.target.write(Bytes::new());
                }
                self.end_target();
            }
            SourceEvent::Error(err) => {
                self.capture(err);
                self.end_target();
            }
        }
    }

    fn on_target(&mut self, event: TargetEvent) {
        match event {
            TargetEvent::Flushed(len) => {
                self.transferred += len as u64;
                self.task.emit(TransferEvent::Progress {
                    path: self.source.path().map(str::to_owned),
                    transferred: self.transferred,
                    total: self.source.length(),
                });
            }
            TargetEvent::Drain => {
                if self.state == State::Draining {
                    self.state = State::Pulling;
                }
            }
            TargetEvent::Finish => {
                if let Some(item) = self.item.take() {
                    debug!("transferred {} ({} bytes)", item.filename, self.transferred);
                    self.task.emit(TransferEvent::Transferred(item));
                }
                self.state = State::Closed;
            }
            TargetEvent::Error(err) => {
                self.capture(err);
                self.state = State::Closed;
            }
        }
    }

    fn finalize(self) -> FsResult<()> {
        if !self.source_at_eof {
            self.source.close();
        }

        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Copies everything `source` produces into `target`.
///
/// Chunks are pulled only while the target accepts them. The first error
/// from either side is returned; later ones are logged and dropped. If the
/// target stops before the source is exhausted, the source is closed.
pub async fn copy<S, T>(source: &mut S, target: &mut T, task: &Task) -> FsResult<()>
where
    S: DataSource + ?Sized,
    T: DataTarget + ?Sized,
{
    Copier::new(source, target, task).run().await
}
