use bytes::Bytes;
use std::{
    collections::HashMap,
    io::SeekFrom,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    fs::{self, File, OpenOptions, ReadDir},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

use super::Filesystem;
use crate::{
    error::{Error, FsResult},
    protocol::{FileAttributes, Item, OpenFlags, StatusCode},
};

const READDIR_BATCH: usize = 64;

enum LocalHandle {
    File(Arc<Mutex<File>>),
    Dir(Arc<Mutex<ReadDir>>),
}

/// Filesystem backed by the local disk through [`tokio::fs`]
pub struct LocalFilesystem {
    handles: Mutex<HashMap<String, LocalHandle>>,
    next_handle: AtomicU64,
}

impl Default for LocalFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFilesystem {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    async fn register(&self, handle: LocalHandle) -> String {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst).to_string();
        let _ = self.handles.lock().await.insert(id.clone(), handle);
        id
    }

    async fn file(&self, handle: &str) -> FsResult<Arc<Mutex<File>>> {
        match self.handles.lock().await.get(handle) {
            Some(LocalHandle::File(file)) => Ok(file.clone()),
            _ => Err(Error::status(StatusCode::Failure, "Invalid handle")),
        }
    }

    async fn dir(&self, handle: &str) -> FsResult<Arc<Mutex<ReadDir>>> {
        match self.handles.lock().await.get(handle) {
            Some(LocalHandle::Dir(dir)) => Ok(dir.clone()),
            _ => Err(Error::status(StatusCode::Failure, "Invalid handle")),
        }
    }

    async fn apply_attrs(file: Option<&File>, path: &str, attrs: &FileAttributes) -> FsResult<()> {
        if let Some(size) = attrs.size {
            match file {
                Some(file) => file.set_len(size).await?,
                None => {
                    OpenOptions::new()
                        .write(true)
                        .open(path)
                        .await?
                        .set_len(size)
                        .await?;
                }
            }
        }

        #[cfg(unix)]
        if let Some(mode) = attrs.permissions {
            use std::os::unix::fs::PermissionsExt;

            let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
            match file {
                Some(file) => file.set_permissions(permissions).await?,
                None => fs::set_permissions(path, permissions).await?,
            }
        }

        if attrs.atime.is_some() || attrs.mtime.is_some() {
            debug!("ignoring time attributes for {}", path);
        }

        Ok(())
    }
}

#[async_trait]
impl Filesystem for LocalFilesystem {
    fn is_windows(&self) -> bool {
        cfg!(windows)
    }

    async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: FileAttributes,
    ) -> FsResult<String> {
        let mut options = OpenOptions::new();
        let _ = options
            .read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .append(flags.contains(OpenFlags::APPEND))
            .truncate(flags.contains(OpenFlags::TRUNCATE));

        if flags.contains(OpenFlags::EXCLUDE) {
            let _ = options.create_new(true);
        } else if flags.contains(OpenFlags::CREATE) {
            let _ = options.create(true);
        }

        #[cfg(unix)]
        if let Some(mode) = attrs.permissions {
            let _ = options.mode(mode & 0o7777);
        }
        #[cfg(not(unix))]
        let _ = attrs;

        let file = options.open(path).await?;
        trace!("opened {}", path);
        Ok(self
            .register(LocalHandle::File(Arc::new(Mutex::new(file))))
            .await)
    }

    async fn close(&self, handle: &str) -> FsResult<()> {
        let removed = self.handles.lock().await.remove(handle);
        match removed {
            Some(LocalHandle::File(file)) => {
                file.lock().await.flush().await?;
                Ok(())
            }
            Some(LocalHandle::Dir(_)) => Ok(()),
            None => Err(Error::status(StatusCode::Failure, "Invalid handle")),
        }
    }

    async fn read(&self, handle: &str, offset: u64, len: u32) -> FsResult<Bytes> {
        let file = self.file(handle).await?;
        let mut file = file.lock().await;

        let _ = file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0; len as usize];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);

        Ok(Bytes::from(buf))
    }

    async fn write(&self, handle: &str, offset: u64, data: Bytes) -> FsResult<()> {
        let file = self.file(handle).await?;
        let mut file = file.lock().await;

        let _ = file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;

        Ok(())
    }

    async fn lstat(&self, path: &str) -> FsResult<FileAttributes> {
        Ok(FileAttributes::from(&fs::symlink_metadata(path).await?))
    }

    async fn fstat(&self, handle: &str) -> FsResult<FileAttributes> {
        let file = self.file(handle).await?;
        let metadata = file.lock().await.metadata().await?;
        Ok(FileAttributes::from(&metadata))
    }

    async fn setstat(&self, path: &str, attrs: FileAttributes) -> FsResult<()> {
        Self::apply_attrs(None, path, &attrs).await
    }

    async fn fsetstat(&self, handle: &str, attrs: FileAttributes) -> FsResult<()> {
        let file = self.file(handle).await?;
        let file = file.lock().await;
        Self::apply_attrs(Some(&*file), handle, &attrs).await
    }

    async fn opendir(&self, path: &str) -> FsResult<String> {
        let dir = fs::read_dir(path).await?;
        Ok(self
            .register(LocalHandle::Dir(Arc::new(Mutex::new(dir))))
            .await)
    }

    async fn readdir(&self, handle: &str) -> FsResult<Option<Vec<Item>>> {
        let dir = self.dir(handle).await?;
        let mut dir = dir.lock().await;

        let mut items = Vec::new();
        while items.len() < READDIR_BATCH {
            let Some(entry) = dir.next_entry().await? else {
                break;
            };

            let metadata = entry.metadata().await?;
            items.push(Item::new(
                entry.file_name().to_string_lossy(),
                FileAttributes::from(&metadata),
            ));
        }

        Ok((!items.is_empty()).then_some(items))
    }

    async fn unlink(&self, path: &str) -> FsResult<()> {
        Ok(fs::remove_file(path).await?)
    }

    async fn mkdir(&self, path: &str, attrs: FileAttributes) -> FsResult<()> {
        let mut builder = fs::DirBuilder::new();

        #[cfg(unix)]
        if let Some(mode) = attrs.permissions {
            let _ = builder.mode(mode & 0o7777);
        }
        #[cfg(not(unix))]
        let _ = attrs;

        Ok(builder.create(path).await?)
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        Ok(fs::remove_dir(path).await?)
    }

    async fn realpath(&self, path: &str) -> FsResult<String> {
        let resolved = fs::canonicalize(path).await?;
        Ok(resolved.to_string_lossy().into_owned())
    }

    async fn stat(&self, path: &str) -> FsResult<FileAttributes> {
        Ok(FileAttributes::from(&fs::metadata(path).await?))
    }

    async fn rename(&self, oldpath: &str, newpath: &str) -> FsResult<()> {
        Ok(fs::rename(oldpath, newpath).await?)
    }

    async fn readlink(&self, path: &str) -> FsResult<String> {
        let target = fs::read_link(path).await?;
        Ok(target.to_string_lossy().into_owned())
    }

    async fn symlink(&self, targetpath: &str, linkpath: &str) -> FsResult<()> {
        #[cfg(unix)]
        return Ok(fs::symlink(targetpath, linkpath).await?);

        #[cfg(windows)]
        return Ok(fs::symlink_file(targetpath, linkpath).await?);

        #[cfg(not(any(unix, windows)))]
        {
            let _ = (targetpath, linkpath);
            Err(self.unimplemented())
        }
    }

    async fn link(&self, oldpath: &str, newpath: &str) -> FsResult<()> {
        Ok(fs::hard_link(oldpath, newpath).await?)
    }
}
