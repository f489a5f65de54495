use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;

use super::Filesystem;
use crate::{
    error::{Error, FsResult},
    path::{Path, PathStyle},
    protocol::{FileAttributes, FileType, Item, OpenFlags, StatusCode},
    util,
};

enum Node {
    File { data: Vec<u8>, attrs: FileAttributes },
    Dir { attrs: FileAttributes },
    Link { target: String, attrs: FileAttributes },
}

impl Node {
    fn attrs(&self) -> FileAttributes {
        match self {
            Self::File { data, attrs } => FileAttributes {
                size: Some(data.len() as u64),
                ..attrs.clone()
            },
            Self::Dir { attrs } => attrs.clone(),
            Self::Link { target, attrs } => FileAttributes {
                size: Some(target.len() as u64),
                ..attrs.clone()
            },
        }
    }
}

enum OpenNode {
    File { path: String, flags: OpenFlags },
    Dir { entries: Option<Vec<Item>> },
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    handles: HashMap<String, OpenNode>,
    next_handle: u64,
}

const MAX_LINK_HOPS: usize = 32;

fn not_found(path: &str) -> Error {
    Error::status(StatusCode::NoSuchFile, path)
}

fn failure<M: Into<String>>(message: M) -> Error {
    Error::status(StatusCode::Failure, message)
}

/// Resolves `path` against `/`, collapsing `.` and `..` segments
fn canonical(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                let _ = parts.pop();
            }
            part => parts.push(part),
        }
    }

    format!("/{}", parts.join("/"))
}

fn components(path: &str) -> impl DoubleEndedIterator<Item = String> + '_ {
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
}

fn parent_of(path: &str) -> String {
    let parent = Path::new(path, PathStyle::Unix).get_parent();
    if parent.is_top() {
        "/".to_owned()
    } else {
        parent.into_string()
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl Inner {
    fn node(&self, path: &str) -> FsResult<&Node> {
        self.nodes.get(path).ok_or_else(|| not_found(path))
    }

    /// Follows symbolic links in every component of `path`
    fn resolve(&self, path: &str) -> FsResult<String> {
        let mut pending: VecDeque<String> = components(path).collect();
        let mut current = "/".to_owned();
        let mut hops = 0;

        while let Some(part) = pending.pop_front() {
            let next = canonical(&format!("{current}/{part}"));
            match self.node(&next)? {
                Node::Link { target, .. } => {
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        return Err(failure("Too many levels of symbolic links"));
                    }

                    let target = if target.starts_with('/') {
                        canonical(target)
                    } else {
                        canonical(&format!("{current}/{target}"))
                    };
                    for part in components(&target).rev() {
                        pending.push_front(part);
                    }
                    current = "/".to_owned();
                }
                _ => current = next,
            }
        }

        Ok(current)
    }

    /// Resolves the parent of `path` but not its last component
    fn resolve_parent(&self, path: &str) -> FsResult<String> {
        if path == "/" {
            return Ok(path.to_owned());
        }

        let parent = self.resolve(&parent_of(path))?;
        Ok(canonical(&format!("{parent}/{}", name_of(path))))
    }

    fn ensure_parent_dir(&self, path: &str) -> FsResult<()> {
        let parent = parent_of(path);
        match self.node(&parent)? {
            Node::Dir { .. } => Ok(()),
            _ => Err(Error::NotADirectory(parent)),
        }
    }

    fn children(&self, dir: &str) -> Vec<Item> {
        self.nodes
            .iter()
            .filter(|(path, _)| path.as_str() != "/" && parent_of(path) == dir)
            .map(|(path, node)| Item::new(name_of(path), node.attrs()))
            .collect()
    }

    fn register(&mut self, node: OpenNode) -> String {
        self.next_handle += 1;
        let handle = self.next_handle.to_string();
        let _ = self.handles.insert(handle.clone(), node);
        handle
    }

    fn open_file(&self, handle: &str) -> FsResult<(String, OpenFlags)> {
        match self.handles.get(handle) {
            Some(OpenNode::File { path, flags }) => Ok((path.clone(), *flags)),
            _ => Err(failure("Invalid handle")),
        }
    }
}

/// Volatile filesystem kept entirely in memory.
///
/// Paths are unix style; relative paths are resolved against `/`.
pub struct MemoryFilesystem {
    inner: Mutex<Inner>,
}

impl Default for MemoryFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        let _ = inner.nodes.insert(
            "/".to_owned(),
            Node::Dir {
                attrs: FileAttributes::directory(0o755),
            },
        );

        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Creates or replaces a file, creating missing parent directories
    pub async fn insert_file<P: AsRef<str>, D: Into<Vec<u8>>>(&self, path: P, data: D) {
        let path = canonical(path.as_ref());
        let mut inner = self.inner.lock().await;

        let mut ancestor = parent_of(&path);
        let mut missing = Vec::new();
        while !inner.nodes.contains_key(&ancestor) {
            missing.push(ancestor.clone());
            ancestor = parent_of(&ancestor);
        }
        for dir in missing.into_iter().rev() {
            let _ = inner.nodes.insert(
                dir,
                Node::Dir {
                    attrs: FileAttributes::directory(0o755),
                },
            );
        }

        let _ = inner.nodes.insert(
            path,
            Node::File {
                data: data.into(),
                attrs: FileAttributes {
                    mtime: Some(util::now()),
                    ..FileAttributes::file(0, 0o644)
                },
            },
        );
    }

    /// Returns the content of a regular file, if there is one at `path`
    pub async fn contents<P: AsRef<str>>(&self, path: P) -> Option<Vec<u8>> {
        let path = canonical(path.as_ref());
        match self.inner.lock().await.nodes.get(&path) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl Filesystem for MemoryFilesystem {
    async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: FileAttributes,
    ) -> FsResult<String> {
        let mut inner = self.inner.lock().await;
        let path = canonical(path);
        let path = match inner.resolve(&path) {
            Ok(resolved) => resolved,
            Err(_) => inner.resolve_parent(&path).unwrap_or(path),
        };

        if !inner.nodes.contains_key(&path) {
            if !flags.intersects(OpenFlags::CREATE | OpenFlags::EXCLUDE) {
                return Err(not_found(&path));
            }

            inner.ensure_parent_dir(&path)?;
            let mode = attrs.permissions.unwrap_or(0o644);
            let _ = inner.nodes.insert(
                path.clone(),
                Node::File {
                    data: Vec::new(),
                    attrs: FileAttributes {
                        mtime: Some(util::now()),
                        ..FileAttributes::file(0, mode)
                    },
                },
            );
        } else {
            match inner.nodes.get_mut(&path) {
                Some(Node::File { .. }) if flags.contains(OpenFlags::EXCLUDE) => {
                    return Err(failure(format!("{path} already exists")));
                }
                Some(Node::File { data, .. }) => {
                    if flags.contains(OpenFlags::TRUNCATE) {
                        data.clear();
                    }
                }
                Some(Node::Dir { .. }) => return Err(failure(format!("{path} is a directory"))),
                _ => return Err(not_found(&path)),
            }
        }

        Ok(inner.register(OpenNode::File { path, flags }))
    }

    async fn close(&self, handle: &str) -> FsResult<()> {
        match self.inner.lock().await.handles.remove(handle) {
            Some(_) => Ok(()),
            None => Err(failure("Invalid handle")),
        }
    }

    async fn read(&self, handle: &str, offset: u64, len: u32) -> FsResult<Bytes> {
        let inner = self.inner.lock().await;
        let (path, flags) = inner.open_file(handle)?;
        if !flags.contains(OpenFlags::READ) {
            return Err(Error::status(StatusCode::PermissionDenied, "not opened for reading"));
        }

        match inner.node(&path)? {
            Node::File { data, .. } => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let end = start.saturating_add(len as usize).min(data.len());
                Ok(Bytes::copy_from_slice(&data[start..end]))
            }
            _ => Err(failure("Invalid handle")),
        }
    }

    async fn write(&self, handle: &str, offset: u64, data: Bytes) -> FsResult<()> {
        let mut inner = self.inner.lock().await;
        let (path, flags) = inner.open_file(handle)?;
        if !flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND) {
            return Err(Error::status(StatusCode::PermissionDenied, "not opened for writing"));
        }

        match inner.nodes.get_mut(&path) {
            Some(Node::File { data: content, attrs }) => {
                let start = if flags.contains(OpenFlags::APPEND) {
                    content.len()
                } else {
                    usize::try_from(offset).map_err(|_| failure("offset too large"))?
                };

                let end = start
                    .checked_add(data.len())
                    .ok_or_else(|| failure("offset too large"))?;
                if content.len() < end {
                    content.resize(end, 0);
                }
                content[start..end].copy_from_slice(&data);
                attrs.mtime = Some(util::now());
                Ok(())
            }
            _ => Err(not_found(&path)),
        }
    }

    async fn lstat(&self, path: &str) -> FsResult<FileAttributes> {
        let inner = self.inner.lock().await;
        let path = inner.resolve_parent(&canonical(path))?;
        Ok(inner.node(&path)?.attrs())
    }

    async fn fstat(&self, handle: &str) -> FsResult<FileAttributes> {
        let inner = self.inner.lock().await;
        let (path, _) = inner.open_file(handle)?;
        Ok(inner.node(&path)?.attrs())
    }

    async fn setstat(&self, path: &str, attrs: FileAttributes) -> FsResult<()> {
        let mut inner = self.inner.lock().await;
        let path = inner.resolve(&canonical(path))?;

        match inner.nodes.get_mut(&path) {
            Some(Node::File {
                data,
                attrs: current,
            }) => {
                if let Some(size) = attrs.size {
                    data.resize(usize::try_from(size).map_err(|_| failure("size too large"))?, 0);
                }
                merge_attrs(current, &attrs);
                Ok(())
            }
            Some(Node::Dir { attrs: current } | Node::Link { attrs: current, .. }) => {
                merge_attrs(current, &attrs);
                Ok(())
            }
            None => Err(not_found(&path)),
        }
    }

    async fn fsetstat(&self, handle: &str, attrs: FileAttributes) -> FsResult<()> {
        let (path, _) = self.inner.lock().await.open_file(handle)?;
        self.setstat(&path, attrs).await
    }

    async fn opendir(&self, path: &str) -> FsResult<String> {
        let mut inner = self.inner.lock().await;
        let path = inner.resolve(&canonical(path))?;

        if !matches!(inner.node(&path)?, Node::Dir { .. }) {
            return Err(Error::NotADirectory(path));
        }

        let entries = inner.children(&path);
        Ok(inner.register(OpenNode::Dir {
            entries: Some(entries),
        }))
    }

    async fn readdir(&self, handle: &str) -> FsResult<Option<Vec<Item>>> {
        let mut inner = self.inner.lock().await;
        match inner.handles.get_mut(handle) {
            Some(OpenNode::Dir { entries }) => Ok(entries.take().filter(|e| !e.is_empty())),
            _ => Err(failure("Invalid handle")),
        }
    }

    async fn unlink(&self, path: &str) -> FsResult<()> {
        let mut inner = self.inner.lock().await;
        let path = canonical(path);

        if matches!(inner.node(&path)?, Node::Dir { .. }) {
            return Err(failure(format!("{path} is a directory")));
        }

        let _ = inner.nodes.remove(&path);
        Ok(())
    }

    async fn mkdir(&self, path: &str, attrs: FileAttributes) -> FsResult<()> {
        let mut inner = self.inner.lock().await;
        let path = canonical(path);

        if inner.nodes.contains_key(&path) {
            return Err(failure(format!("{path} already exists")));
        }
        inner.ensure_parent_dir(&path)?;

        let mut attrs = FileAttributes {
            mtime: Some(util::now()),
            ..attrs
        };
        if attrs.permissions.is_none() {
            attrs.permissions = Some(0o755);
        }
        attrs.set_type(FileType::DIR);

        let _ = inner.nodes.insert(path, Node::Dir { attrs });
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> FsResult<()> {
        let mut inner = self.inner.lock().await;
        let path = canonical(path);

        if !matches!(inner.node(&path)?, Node::Dir { .. }) {
            return Err(Error::NotADirectory(path));
        }
        if path == "/" {
            return Err(failure("cannot remove root"));
        }
        if !inner.children(&path).is_empty() {
            return Err(failure(format!("{path} is not empty")));
        }

        let _ = inner.nodes.remove(&path);
        Ok(())
    }

    async fn realpath(&self, path: &str) -> FsResult<String> {
        let inner = self.inner.lock().await;
        let path = canonical(path);
        match inner.resolve(&path) {
            Ok(resolved) => Ok(resolved),
            Err(err) if err.is_not_found() => Ok(path),
            Err(err) => Err(err),
        }
    }

    async fn stat(&self, path: &str) -> FsResult<FileAttributes> {
        let inner = self.inner.lock().await;
        let path = inner.resolve(&canonical(path))?;
        Ok(inner.node(&path)?.attrs())
    }

    async fn rename(&self, oldpath: &str, newpath: &str) -> FsResult<()> {
        let mut inner = self.inner.lock().await;
        let oldpath = canonical(oldpath);
        let newpath = canonical(newpath);

        let _ = inner.node(&oldpath)?;
        if inner.nodes.contains_key(&newpath) {
            return Err(failure(format!("{newpath} already exists")));
        }
        inner.ensure_parent_dir(&newpath)?;

        let prefix = format!("{oldpath}/");
        let moved: Vec<String> = inner
            .nodes
            .keys()
            .filter(|key| **key == oldpath || key.starts_with(&prefix))
            .cloned()
            .collect();

        for key in moved {
            if let Some(node) = inner.nodes.remove(&key) {
                let renamed = format!("{newpath}{}", &key[oldpath.len()..]);
                let _ = inner.nodes.insert(renamed, node);
            }
        }

        Ok(())
    }

    async fn readlink(&self, path: &str) -> FsResult<String> {
        let inner = self.inner.lock().await;
        let path = canonical(path);
        match inner.node(&path)? {
            Node::Link { target, .. } => Ok(target.clone()),
            _ => Err(failure(format!("{path} is not a symbolic link"))),
        }
    }

    async fn symlink(&self, targetpath: &str, linkpath: &str) -> FsResult<()> {
        let mut inner = self.inner.lock().await;
        let linkpath = canonical(linkpath);

        if inner.nodes.contains_key(&linkpath) {
            return Err(failure(format!("{linkpath} already exists")));
        }
        inner.ensure_parent_dir(&linkpath)?;

        let mut attrs = FileAttributes {
            permissions: Some(0o777),
            mtime: Some(util::now()),
            ..Default::default()
        };
        attrs.set_symlink();

        let _ = inner.nodes.insert(
            linkpath,
            Node::Link {
                target: targetpath.to_owned(),
                attrs,
            },
        );
        Ok(())
    }
}

fn merge_attrs(current: &mut FileAttributes, attrs: &FileAttributes) {
    if let Some(mode) = attrs.permissions {
        let file_type = current.file_type();
        current.permissions = Some(mode & 0o7777);
        current.set_type(file_type);
    }
    if attrs.uid.is_some() {
        current.uid = attrs.uid;
    }
    if attrs.gid.is_some() {
        current.gid = attrs.gid;
    }
    if attrs.atime.is_some() {
        current.atime = attrs.atime;
    }
    if attrs.mtime.is_some() {
        current.mtime = attrs.mtime;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mkdir_requires_parent() {
        let fs = MemoryFilesystem::new();
        let err = fs.mkdir("/a/b", FileAttributes::default()).await.unwrap_err();
        assert!(err.is_not_found());

        fs.mkdir("/a", FileAttributes::default()).await.unwrap();
        fs.mkdir("/a/b", FileAttributes::default()).await.unwrap();
        assert!(fs.stat("/a/b").await.unwrap().is_dir());
        assert!(fs.mkdir("/a", FileAttributes::default()).await.is_err());
    }

    #[tokio::test]
    async fn create_write_read() {
        let fs = MemoryFilesystem::new();
        let handle = fs
            .open(
                "/f.txt",
                OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE,
                FileAttributes::default(),
            )
            .await
            .unwrap();
        fs.write(&handle, 0, Bytes::from_static(b"abc")).await.unwrap();
        fs.write(&handle, 5, Bytes::from_static(b"xy")).await.unwrap();
        fs.close(&handle).await.unwrap();

        assert_eq!(fs.contents("/f.txt").await.unwrap(), b"abc\0\0xy");
        let stats = fs.stat("f.txt").await.unwrap();
        assert!(stats.is_regular());
        assert_eq!(stats.len(), 7);

        let handle = fs.open("/f.txt", OpenFlags::READ, FileAttributes::default()).await.unwrap();
        assert_eq!(&fs.read(&handle, 1, 3).await.unwrap()[..], b"bc\0");
        assert!(fs.read(&handle, 7, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn readdir_returns_children_once() {
        let fs = MemoryFilesystem::new();
        fs.insert_file("/d/a.txt", "a").await;
        fs.insert_file("/d/sub/b.txt", "b").await;

        let handle = fs.opendir("/d").await.unwrap();
        let names: Vec<String> = fs
            .readdir(&handle)
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|item| item.filename)
            .collect();
        assert_eq!(names, vec!["a.txt", "sub"]);
        assert!(fs.readdir(&handle).await.unwrap().is_none());
        fs.close(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn symlinks_are_followed_by_stat_only() {
        let fs = MemoryFilesystem::new();
        fs.insert_file("/data/file", "12345").await;
        fs.symlink("file", "/data/link").await.unwrap();

        assert!(fs.lstat("/data/link").await.unwrap().is_symlink());
        assert_eq!(fs.stat("/data/link").await.unwrap().len(), 5);
        assert_eq!(fs.readlink("/data/link").await.unwrap(), "file");
        assert_eq!(fs.realpath("/data/./link").await.unwrap(), "/data/file");
    }

    #[tokio::test]
    async fn links_inside_paths_are_followed() {
        let fs = MemoryFilesystem::new();
        fs.insert_file("/data/real/a.txt", "a").await;
        fs.symlink("real", "/data/alias").await.unwrap();

        assert!(fs.stat("/data/alias").await.unwrap().is_dir());
        assert_eq!(fs.stat("/data/alias/a.txt").await.unwrap().len(), 1);
        assert!(fs.lstat("/data/alias/a.txt").await.unwrap().is_regular());
        assert_eq!(fs.realpath("/data/alias/a.txt").await.unwrap(), "/data/real/a.txt");

        let handle = fs
            .open("/data/alias/b.txt", OpenFlags::CREATE | OpenFlags::WRITE, FileAttributes::default())
            .await
            .unwrap();
        fs.close(&handle).await.unwrap();
        assert_eq!(fs.contents("/data/real/b.txt").await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn link_loops_are_reported() {
        let fs = MemoryFilesystem::new();
        fs.symlink("/b", "/a").await.unwrap();
        fs.symlink("/a", "/b").await.unwrap();

        let err = fs.stat("/a").await.unwrap_err();
        assert_eq!(err.to_string(), "Failure: Too many levels of symbolic links");
    }

    #[tokio::test]
    async fn write_past_addressable_range_fails() {
        let fs = MemoryFilesystem::new();
        let handle = fs
            .open("/f.bin", OpenFlags::CREATE | OpenFlags::WRITE, FileAttributes::default())
            .await
            .unwrap();

        let err = fs
            .write(&handle, usize::MAX as u64, Bytes::from_static(b"xy"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failure: offset too large");
    }

    #[tokio::test]
    async fn rename_moves_subtree() {
        let fs = MemoryFilesystem::new();
        fs.insert_file("/a/x/y.txt", "y").await;
        fs.rename("/a", "/b").await.unwrap();

        assert!(fs.stat("/a").await.unwrap_err().is_not_found());
        assert_eq!(fs.contents("/b/x/y.txt").await.unwrap(), b"y");
    }

    #[tokio::test]
    async fn rmdir_refuses_non_empty() {
        let fs = MemoryFilesystem::new();
        fs.insert_file("/a/y.txt", "y").await;
        assert!(fs.rmdir("/a").await.is_err());
        fs.unlink("/a/y.txt").await.unwrap();
        fs.rmdir("/a").await.unwrap();
    }

    #[tokio::test]
    async fn link_is_unsupported() {
        let fs = MemoryFilesystem::new();
        let err = fs.link("/a", "/b").await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::OpUnsupported);
    }
}
