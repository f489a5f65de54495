//! Sequential transfer of many entries into one destination directory.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use crate::{
    copy::copy,
    error::{Error, FsResult},
    fs::Filesystem,
    path::{Path, PathStyle},
    protocol::FileAttributes,
    search::{search, search_base, SearchOptions},
    transfer::{DataSource, FileDataSource, FileDataTarget, Task},
    util,
};

/// What a batch transfers
pub enum TransferInput {
    Path(String),
    Paths(Vec<String>),
    /// Sources built by the caller; relative paths are kept as given
    Sources(Vec<Box<dyn DataSource>>),
}

impl TransferInput {
    fn validate(&self, from_fs: Option<&Arc<dyn Filesystem>>) -> FsResult<()> {
        let paths = match self {
            Self::Sources(_) => return Ok(()),
            Self::Path(path) => std::slice::from_ref(path),
            Self::Paths(paths) => paths.as_slice(),
        };

        if from_fs.is_none() {
            return Err(Error::missing("source filesystem"));
        }
        for path in paths {
            let _ = Path::check(Some(path.as_str()), "path")?;
        }

        Ok(())
    }

    async fn expand(
        self,
        from_fs: Option<&Arc<dyn Filesystem>>,
    ) -> FsResult<VecDeque<Box<dyn DataSource>>> {
        let paths = match self {
            Self::Sources(sources) => return Ok(sources.into()),
            Self::Path(path) => vec![path],
            Self::Paths(paths) => paths,
        };
        let fs = from_fs.ok_or_else(|| Error::missing("source filesystem"))?;

        let mut sources: VecDeque<Box<dyn DataSource>> = VecDeque::new();
        for path in paths {
            let base = search_base(fs.as_ref(), &path);
            for item in search(fs.as_ref(), &path, &SearchOptions::default()).await? {
                let Some(relative) = item.path else {
                    continue;
                };
                let stats = &item.stats;
                if !(stats.file_type().is_empty() || stats.is_regular() || stats.is_dir()) {
                    debug!("skipping {}: not a file or directory", relative);
                    continue;
                }

                let full = base.join([relative.as_str()]);
                let source = FileDataSource::new(fs.clone(), full.into_string(), Some(item.stats))
                    .with_relative_path(relative);
                sources.push_back(Box::new(source));
            }
        }

        Ok(sources)
    }
}

impl From<&str> for TransferInput {
    fn from(path: &str) -> Self {
        Self::Path(path.to_owned())
    }
}

impl From<String> for TransferInput {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<String>> for TransferInput {
    fn from(paths: Vec<String>) -> Self {
        Self::Paths(paths)
    }
}

impl From<Vec<&str>> for TransferInput {
    fn from(paths: Vec<&str>) -> Self {
        Self::Paths(paths.into_iter().map(str::to_owned).collect())
    }
}

impl From<Vec<Box<dyn DataSource>>> for TransferInput {
    fn from(sources: Vec<Box<dyn DataSource>>) -> Self {
        Self::Sources(sources)
    }
}

struct Batch<'a> {
    to_fs: &'a Arc<dyn Filesystem>,
    to: Path,
    style: PathStyle,
    task: &'a Task,
    /// Relative directories known to exist at the destination
    directories: HashSet<String>,
}

impl Batch<'_> {
    async fn ensure_parents(&mut self, relative: &Path) -> FsResult<()> {
        let mut missing = Vec::new();
        let mut parent = relative.get_parent();
        while !parent.is_top() && !self.directories.contains(parent.as_str()) {
            let next = parent.get_parent();
            missing.push(parent);
            parent = next;
        }

        for dir in missing.into_iter().rev() {
            let target = self.to.join_path(&dir);
            util::mkdir(self.to_fs.as_ref(), target.as_str()).await?;
            let _ = self.directories.insert(dir.into_string());
        }

        Ok(())
    }

    async fn transfer(&mut self, source: &mut dyn DataSource) -> FsResult<()> {
        let (target, relative) = match source.relative_path() {
            Some(relative) => {
                let relative = Path::new(relative, self.style);
                self.ensure_parents(&relative).await?;
                (self.to.join_path(&relative).normalize(), Some(relative))
            }
            None => (self.to.join([source.name().unwrap_or_default()]), None),
        };

        if source.stats().is_some_and(FileAttributes::is_dir) {
            util::mkdir(self.to_fs.as_ref(), target.as_str()).await?;
            if let Some(relative) = relative {
                let _ = self.directories.insert(relative.into_string());
            }
            return Ok(());
        }

        debug!("copying to {}", target);
        let mut file = FileDataTarget::new(self.to_fs.clone(), target.into_string());
        copy(source, &mut file, self.task).await
    }
}

/// Transfers every entry of `input` into the directory `to_path` on `to_fs`,
/// one at a time.
///
/// Entries with a relative path keep their directory structure; missing
/// intermediate directories are created once per batch. The first failure
/// aborts the remaining entries; entries already transferred stay in place.
pub async fn transfer(
    input: TransferInput,
    from_fs: Option<Arc<dyn Filesystem>>,
    to_fs: &Arc<dyn Filesystem>,
    to_path: &Path,
    task: &Task,
) -> FsResult<()> {
    input.validate(from_fs.as_ref())?;

    let to = to_path.remove_trailing_slash();
    let stats = to_fs.stat(to.as_str()).await?;
    if !stats.is_dir() {
        return Err(Error::NotADirectory(to.into_string()));
    }

    let mut sources = input.expand(from_fs.as_ref()).await?;
    debug!("transferring {} entries into {}", sources.len(), to);

    let mut batch = Batch {
        to_fs,
        to,
        style: from_fs.map_or(PathStyle::Unix, |fs| PathStyle::of(fs.as_ref())),
        task,
        directories: HashSet::new(),
    };

    while let Some(mut source) = sources.pop_front() {
        batch.transfer(source.as_mut()).await?;
    }

    Ok(())
}
