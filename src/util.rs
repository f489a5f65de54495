use chrono::{DateTime, Utc};
use std::time::SystemTime;

use crate::{
    error::{Error, FsResult},
    fs::Filesystem,
    protocol::FileAttributes,
};

pub fn unix(time: SystemTime) -> u32 {
    u32::try_from(DateTime::<Utc>::from(time).timestamp()).unwrap_or(0)
}

pub fn now() -> u32 {
    unix(SystemTime::now())
}

/// Returns `true` if `path` exists and is a directory
pub async fn is_directory(fs: &dyn Filesystem, path: &str) -> FsResult<bool> {
    match fs.stat(path).await {
        Ok(stats) => Ok(stats.is_dir()),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Returns `true` if `path` exists and is a regular file
pub async fn is_file(fs: &dyn Filesystem, path: &str) -> FsResult<bool> {
    match fs.stat(path).await {
        Ok(stats) => Ok(stats.is_regular()),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Creates `path` unless a directory already exists there.
///
/// Only a missing path leads to creation; any other stat failure is
/// returned unchanged.
pub async fn mkdir(fs: &dyn Filesystem, path: &str) -> FsResult<()> {
    match fs.stat(path).await {
        Ok(stats) if stats.is_dir() => Ok(()),
        Ok(_) => Err(Error::NotADirectory(path.to_owned())),
        Err(err) if err.is_not_found() => {
            debug!("creating directory {}", path);
            fs.mkdir(path, FileAttributes::directory(0o755)).await
        }
        Err(err) => Err(err),
    }
}
