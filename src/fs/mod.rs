//! Filesystem capability contract and its backends.

mod local;
mod memory;

use bytes::Bytes;

pub use local::LocalFilesystem;
pub use memory::MemoryFilesystem;

use crate::{
    error::{Error, FsResult},
    path::{Path, PathStyle},
    protocol::{FileAttributes, Item, OpenFlags, StatusCode},
};

/// Operation set every backing store implements. This is `async_trait`
///
/// Handles are opaque strings issued by `open` and `opendir` and released
/// by `close`. Operations a backend cannot provide fail with
/// [`StatusCode::OpUnsupported`].
#[async_trait]
pub trait Filesystem: Send + Sync {
    fn unimplemented(&self) -> Error {
        StatusCode::OpUnsupported.into()
    }

    /// Whether paths use the drive-letter convention
    fn is_windows(&self) -> bool {
        false
    }

    async fn open(&self, path: &str, flags: OpenFlags, attrs: FileAttributes)
        -> FsResult<String>;

    async fn close(&self, handle: &str) -> FsResult<()>;

    /// Reads up to `len` bytes at `offset`. An empty buffer means end of file.
    async fn read(&self, handle: &str, offset: u64, len: u32) -> FsResult<Bytes>;

    async fn write(&self, handle: &str, offset: u64, data: Bytes) -> FsResult<()>;

    async fn lstat(&self, path: &str) -> FsResult<FileAttributes>;

    async fn fstat(&self, handle: &str) -> FsResult<FileAttributes>;

    #[allow(unused_variables)]
    async fn setstat(&self, path: &str, attrs: FileAttributes) -> FsResult<()> {
        Err(self.unimplemented())
    }

    #[allow(unused_variables)]
    async fn fsetstat(&self, handle: &str, attrs: FileAttributes) -> FsResult<()> {
        Err(self.unimplemented())
    }

    async fn opendir(&self, path: &str) -> FsResult<String>;

    /// Returns the next batch of entries, `None` once the directory is exhausted
    async fn readdir(&self, handle: &str) -> FsResult<Option<Vec<Item>>>;

    async fn unlink(&self, path: &str) -> FsResult<()>;

    async fn mkdir(&self, path: &str, attrs: FileAttributes) -> FsResult<()>;

    async fn rmdir(&self, path: &str) -> FsResult<()>;

    async fn realpath(&self, path: &str) -> FsResult<String>;

    async fn stat(&self, path: &str) -> FsResult<FileAttributes>;

    async fn rename(&self, oldpath: &str, newpath: &str) -> FsResult<()>;

    #[allow(unused_variables)]
    async fn readlink(&self, path: &str) -> FsResult<String> {
        Err(self.unimplemented())
    }

    #[allow(unused_variables)]
    async fn symlink(&self, targetpath: &str, linkpath: &str) -> FsResult<()> {
        Err(self.unimplemented())
    }

    #[allow(unused_variables)]
    async fn link(&self, oldpath: &str, newpath: &str) -> FsResult<()> {
        Err(self.unimplemented())
    }

    /// Joins path segments using this filesystem's convention
    fn join(&self, paths: &[&str]) -> String {
        let style = if self.is_windows() {
            PathStyle::Windows
        } else {
            PathStyle::Unix
        };

        Path::new("", style).join(paths).normalize().into_string()
    }
}
