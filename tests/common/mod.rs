#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use sftp_plus::{
    fs::MemoryFilesystem,
    protocol::{FileAttributes, Item, OpenFlags, StatusCode},
    transfer::TransferEvent,
    Error, Filesystem, FsResult,
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc::UnboundedReceiver;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wraps a [`MemoryFilesystem`], recording calls and failing writes on demand
#[derive(Default)]
pub struct RecordingFilesystem {
    pub inner: MemoryFilesystem,
    stats: Mutex<Vec<String>>,
    mkdirs: Mutex<Vec<String>>,
    opens: Mutex<Vec<String>>,
    failing_paths: Mutex<HashSet<String>>,
    failing_handles: Mutex<HashSet<String>>,
}

impl RecordingFilesystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Writes past the first chunk of `path` fail
    pub fn fail_writes_to(&self, path: &str) {
        let _ = self.failing_paths.lock().unwrap().insert(path.to_owned());
    }

    pub fn stats(&self) -> Vec<String> {
        self.stats.lock().unwrap().clone()
    }

    pub fn mkdirs(&self) -> Vec<String> {
        self.mkdirs.lock().unwrap().clone()
    }

    pub fn opens(&self) -> Vec<String> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Filesystem for RecordingFilesystem {
    async fn open(&self, path: &str, flags: OpenFlags, attrs: FileAttributes) -> FsResult<String> {
        self.opens.lock().unwrap().push(path.to_owned());
        let handle = self.inner.open(path, flags, attrs).await?;

        if self.failing_paths.lock().unwrap().contains(path) {
            let _ = self.failing_handles.lock().unwrap().insert(handle.clone());
        }
        Ok(handle)
    }

    async fn close(&self, handle: &str) -> FsResult<()> {
        self.inner.close(handle).await
    }

    async fn read(&self, handle: &str, offset: u64, len: u32) -> FsResult<Bytes> {
        self.inner.read(handle, offset, len).await
    }

    async fn write(&self, handle: &str, offset: u64, data: Bytes) -> FsResult<()> {
        if offset > 0 && self.failing_handles.lock().unwrap().contains(handle) {
            return Err(Error::status(StatusCode::Failure, "write failed"));
        }
        self.inner.write(handle, offset, data).await
    }

    async fn lstat(&self, path: &str) -> FsResult<FileAttributes> {
        self.inner.lstat(path).await
    }

    async fn fstat(&self, handle: &str) -> FsResult<FileAttributes> {
        self.inner.fstat(handle).await
    }

    async fn opendir(&self, path: &str) -> FsResult<String> {
        self.inner.opendir(path).await
    }

    async fn readdir(&self, handle: &str) -> FsResult<Option<Vec<Item>>> {
        self.inner.readdir(handle).await
    }

    async fn unlink(&self, path: &str) -> FsResult<()> {
        self.inner.unlink(path).await
    }

    async fn mkdir(&self, path: &str, attrs: FileAttributes) -> FsResult<()> {
        self.mkdirs.lock().unwrap().push(path.to_owned());
        self.inner.mkdir(path, attrs).await
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        self.inner.rmdir(path).await
    }

    async fn realpath(&self, path: &str) -> FsResult<String> {
        self.inner.realpath(path).await
    }

    async fn stat(&self, path: &str) -> FsResult<FileAttributes> {
        self.stats.lock().unwrap().push(path.to_owned());
        self.inner.stat(path).await
    }

    async fn rename(&self, oldpath: &str, newpath: &str) -> FsResult<()> {
        self.inner.rename(oldpath, newpath).await
    }
}

pub fn collect(rx: &mut UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
