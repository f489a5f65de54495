use bytes::Bytes;
use std::sync::Arc;

use crate::{
    batch::{self, TransferInput},
    copy::copy,
    error::{Error, FsResult},
    fs::Filesystem,
    path::Path,
    protocol::{FileAttributes, Item, OpenFlags},
    search::{self, SearchOptions},
    transfer::{BufferDataTarget, FileDataSource, FileDataTarget, Task},
};

/// A filesystem together with higher level operations built on it.
///
/// `fs` is the filesystem being served, usually remote. `local` is the
/// filesystem that uploads read from and downloads write to.
#[derive(Clone)]
pub struct FilesystemPlus {
    fs: Arc<dyn Filesystem>,
    local: Option<Arc<dyn Filesystem>>,
}

impl FilesystemPlus {
    pub fn new(fs: Arc<dyn Filesystem>, local: Option<Arc<dyn Filesystem>>) -> Self {
        Self { fs, local }
    }

    fn local(&self) -> FsResult<&Arc<dyn Filesystem>> {
        self.local
            .as_ref()
            .ok_or_else(|| Error::missing("local filesystem"))
    }

    /// Entries of a directory, without `.` and `..`, sorted by name
    pub async fn list(&self, remote_path: &str) -> FsResult<Vec<Item>> {
        let path = Path::check(Some(remote_path), "remote_path")?;
        search::search(self.fs.as_ref(), &path, &SearchOptions::list()).await
    }

    /// One level of a directory, keeping `.` and `..` when the backend
    /// lists them
    pub async fn list_all(&self, remote_path: &str) -> FsResult<Vec<Item>> {
        let path = Path::check(Some(remote_path), "remote_path")?;
        let options = SearchOptions {
            dotdirs: true,
            ..SearchOptions::list()
        };
        search::search(self.fs.as_ref(), &path, &options).await
    }

    pub async fn search(&self, remote_path: &str, options: &SearchOptions) -> FsResult<Vec<Item>> {
        let path = Path::check(Some(remote_path), "remote_path")?;
        search::search(self.fs.as_ref(), &path, options).await
    }

    /// The entry at `remote_path` itself
    pub async fn info(&self, remote_path: &str) -> FsResult<Item> {
        let path = Path::check(Some(remote_path), "remote_path")?;
        let mut items = search::search(self.fs.as_ref(), &path, &SearchOptions::item()).await?;

        match (items.pop(), items.is_empty()) {
            (Some(item), true) => Ok(item),
            _ => Err(Error::UnexpectedResult),
        }
    }

    pub async fn read_file(&self, remote_path: &str, task: &Task) -> FsResult<Bytes> {
        let remote = Path::create(Some(remote_path), self.fs.as_ref(), "remote_path")?;

        let mut source = FileDataSource::open(self.fs.clone(), remote.into_string()).await?;
        let mut target = BufferDataTarget::new();
        copy(&mut source, &mut target, task).await?;

        Ok(target.into_bytes())
    }

    pub async fn read_text(&self, remote_path: &str, task: &Task) -> FsResult<String> {
        let data = self.read_file(remote_path, task).await?;
        String::from_utf8(data.to_vec()).map_err(|err| Error::InvalidData(err.to_string()))
    }

    /// Copies a local file to the served filesystem. A destination ending
    /// with a separator receives the source's name.
    pub async fn put_file(&self, local_path: &str, remote_path: &str, task: &Task) -> FsResult<()> {
        let local = self.local()?;
        let from = Path::create(Some(local_path), local.as_ref(), "local_path")?;
        let to = Path::create(Some(remote_path), self.fs.as_ref(), "remote_path")?;

        copy_file(local, from, &self.fs, to, task).await
    }

    /// Copies a file from the served filesystem to the local one. A
    /// destination ending with a separator receives the source's name.
    pub async fn get_file(&self, remote_path: &str, local_path: &str, task: &Task) -> FsResult<()> {
        let local = self.local()?;
        let from = Path::create(Some(remote_path), self.fs.as_ref(), "remote_path")?;
        let to = Path::create(Some(local_path), local.as_ref(), "local_path")?;

        copy_file(&self.fs, from, local, to, task).await
    }

    /// Transfers local entries into the remote directory `remote_path`
    pub async fn upload<I: Into<TransferInput>>(
        &self,
        input: I,
        remote_path: &str,
        task: &Task,
    ) -> FsResult<()> {
        let remote = Path::create(Some(remote_path), self.fs.as_ref(), "remote_path")?;
        batch::transfer(input.into(), self.local.clone(), &self.fs, &remote, task).await
    }

    /// Transfers remote entries into the local directory `local_path`
    pub async fn download<I: Into<TransferInput>>(
        &self,
        input: I,
        local_path: &str,
        task: &Task,
    ) -> FsResult<()> {
        let local = self.local()?;
        let to = Path::create(Some(local_path), local.as_ref(), "local_path")?;
        batch::transfer(input.into(), Some(self.fs.clone()), local, &to, task).await
    }
}

async fn copy_file(
    from_fs: &Arc<dyn Filesystem>,
    from: Path,
    to_fs: &Arc<dyn Filesystem>,
    mut to: Path,
    task: &Task,
) -> FsResult<()> {
    if to.ends_with_slash() {
        to = to.join([from.get_name()]);
    }

    debug!("copying {} to {}", from, to);
    let mut source = FileDataSource::open(from_fs.clone(), from.into_string()).await?;
    let mut target = FileDataTarget::new(to_fs.clone(), to.into_string());
    copy(&mut source, &mut target, task).await
}

#[async_trait]
impl Filesystem for FilesystemPlus {
    fn is_windows(&self) -> bool {
        self.fs.is_windows()
    }

    async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: FileAttributes,
    ) -> FsResult<String> {
        self.fs.open(path, flags, attrs).await
    }

    async fn close(&self, handle: &str) -> FsResult<()> {
        self.fs.close(handle).await
    }

    async fn read(&self, handle: &str, offset: u64, len: u32) -> FsResult<Bytes> {
        self.fs.read(handle, offset, len).await
    }

    async fn write(&self, handle: &str, offset: u64, data: Bytes) -> FsResult<()> {
        self.fs.write(handle, offset, data).await
    }

    async fn lstat(&self, path: &str) -> FsResult<FileAttributes> {
        self.fs.lstat(path).await
    }

    async fn fstat(&self, handle: &str) -> FsResult<FileAttributes> {
        self.fs.fstat(handle).await
    }

    async fn setstat(&self, path: &str, attrs: FileAttributes) -> FsResult<()> {
        self.fs.setstat(path, attrs).await
    }

    async fn fsetstat(&self, handle: &str, attrs: FileAttributes) -> FsResult<()> {
        self.fs.fsetstat(handle, attrs).await
    }

    async fn opendir(&self, path: &str) -> FsResult<String> {
        self.fs.opendir(path).await
    }

    async fn readdir(&self, handle: &str) -> FsResult<Option<Vec<Item>>> {
        self.fs.readdir(handle).await
    }

    async fn unlink(&self, path: &str) -> FsResult<()> {
        self.fs.unlink(path).await
    }

    async fn mkdir(&self, path: &str, attrs: FileAttributes) -> FsResult<()> {
        self.fs.mkdir(path, attrs).await
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        self.fs.rmdir(path).await
    }

    async fn realpath(&self, path: &str) -> FsResult<String> {
        self.fs.realpath(path).await
    }

    async fn stat(&self, path: &str) -> FsResult<FileAttributes> {
        self.fs.stat(path).await
    }

    async fn rename(&self, oldpath: &str, newpath: &str) -> FsResult<()> {
        self.fs.rename(oldpath, newpath).await
    }

    async fn readlink(&self, path: &str) -> FsResult<String> {
        self.fs.readlink(path).await
    }

    async fn symlink(&self, targetpath: &str, linkpath: &str) -> FsResult<()> {
        self.fs.symlink(targetpath, linkpath).await
    }

    async fn link(&self, oldpath: &str, newpath: &str) -> FsResult<()> {
        self.fs.link(oldpath, newpath).await
    }
}
