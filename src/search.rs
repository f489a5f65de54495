//! Literal path expansion over a [`Filesystem`].
//!
//! Paths are taken as given; wildcard matching is left to callers.

use std::collections::HashSet;

use crate::{
    error::FsResult,
    fs::Filesystem,
    path::Path,
    protocol::Item,
};

/// Controls which entries [`search`] reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Report everything that is not a directory
    pub files: bool,
    pub directories: bool,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Report `.` and `..` when the backend lists them
    pub dotdirs: bool,
    /// Order each directory's entries by name
    pub sort: bool,
    /// Report the contents of a directory but not the directory itself
    pub list_only: bool,
    /// Report the path itself and nothing else
    pub item_only: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            files: true,
            directories: true,
            recursive: true,
            dotdirs: false,
            sort: true,
            list_only: false,
            item_only: false,
        }
    }
}

impl SearchOptions {
    /// One level of a directory
    pub fn list() -> Self {
        Self {
            recursive: false,
            list_only: true,
            ..Self::default()
        }
    }

    /// The path itself
    pub fn item() -> Self {
        Self {
            item_only: true,
            ..Self::default()
        }
    }

    fn wants(&self, item: &Item) -> bool {
        if item.stats.is_dir() {
            self.directories
        } else {
            self.files
        }
    }
}

fn is_dot(name: &str) -> bool {
    name == "." || name == ".."
}

async fn read_entries(
    fs: &dyn Filesystem,
    dir: &Path,
    options: &SearchOptions,
) -> FsResult<Vec<Item>> {
    let handle = fs.opendir(dir.as_str()).await?;

    let mut entries = Vec::new();
    let listed = loop {
        match fs.readdir(&handle).await {
            Ok(Some(batch)) => entries.extend(batch),
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    let closed = fs.close(&handle).await;
    listed?;
    closed?;

    entries.retain(|item| options.dotdirs || !is_dot(&item.filename));
    if options.sort {
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
    }

    trace!("{} entries in {}", entries.len(), dir);
    Ok(entries)
}

/// Replaces the stats of a symbolic link with those of what it points to.
/// Returns `false` for dangling links, which keep their own stats.
async fn follow_link(fs: &dyn Filesystem, path: &Path, item: &mut Item) -> FsResult<bool> {
    match fs.stat(path.as_str()).await {
        Ok(stats) => {
            item.stats = stats;
            Ok(true)
        }
        Err(err) if err.is_not_found() => {
            debug!("dangling link {}", path);
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Decides whether to descend into the directory a link at `path` points to.
/// Links back into their own ancestry and targets already walked are not
/// followed.
async fn enter_link(fs: &dyn Filesystem, path: &Path, followed: &mut HashSet<String>) -> bool {
    let (target, parent) = match (
        fs.realpath(path.as_str()).await,
        fs.realpath(path.get_parent().as_str()).await,
    ) {
        (Ok(target), Ok(parent)) => (target, parent),
        (Err(err), _) | (_, Err(err)) => {
            debug!("not following {}: {}", path, err);
            return false;
        }
    };

    if Path::new(parent, path.style()).is_within(&target) || !followed.insert(target) {
        debug!("not following {} again", path);
        return false;
    }

    true
}

/// Directory the relative paths returned by [`search`] are relative to
pub fn search_base(fs: &dyn Filesystem, path: &str) -> Path {
    Path::on(path, fs).remove_trailing_slash().get_parent()
}

/// Expands `path` into the entries it denotes, in pre-order.
///
/// Every returned item carries its path relative to [`search_base`], so a
/// directory `/src/dir` yields `dir`, `dir/a`, `dir/a/b` and so on.
///
/// Symbolic links are reported with the stats of their target, and linked
/// directories are walked like real ones. Dangling links keep their own stats.
pub async fn search(
    fs: &dyn Filesystem,
    path: &str,
    options: &SearchOptions,
) -> FsResult<Vec<Item>> {
    let root = Path::on(path, fs).remove_trailing_slash();
    let base = root.get_parent();
    let stats = fs.stat(root.as_str()).await?;

    let name = root.get_name().to_owned();
    let relative_root = if name.is_empty() {
        Path::new("", root.style())
    } else {
        Path::new("", root.style()).join([name.as_str()])
    };
    let mut root_item = Item::new(name.as_str(), stats);
    root_item.path = Some(relative_root.to_string());

    if options.item_only {
        return Ok(vec![root_item]);
    }
    if !root_item.stats.is_dir() {
        return Ok(if options.wants(&root_item) {
            vec![root_item]
        } else {
            Vec::new()
        });
    }

    let mut items = Vec::new();
    if !options.list_only && !name.is_empty() && options.wants(&root_item) {
        items.push(root_item);
    }

    let mut followed = HashSet::new();
    let mut stack: Vec<(Path, Item)> = Vec::new();
    for entry in read_entries(fs, &root, options).await?.into_iter().rev() {
        stack.push((relative_root.join([entry.filename.as_str()]), entry));
    }

    while let Some((relative, mut item)) = stack.pop() {
        let mut linked = false;
        if item.stats.is_symlink() && !is_dot(&item.filename) {
            linked = follow_link(fs, &base.join_path(&relative), &mut item).await?;
        }

        let mut descend = options.recursive && item.stats.is_dir() && !is_dot(&item.filename);
        if descend && linked {
            descend = enter_link(fs, &base.join_path(&relative), &mut followed).await;
        }

        if options.wants(&item) {
            item.path = Some(relative.to_string());
            items.push(item);
        }

        if descend {
            let dir = base.join_path(&relative);
            for entry in read_entries(fs, &dir, options).await?.into_iter().rev() {
                stack.push((relative.join([entry.filename.as_str()]), entry));
            }
        }
    }

    debug!("search of {} found {} items", root, items.len());
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;

    async fn tree() -> MemoryFilesystem {
        let fs = MemoryFilesystem::new();
        fs.insert_file("/src/dir/b.txt", "b").await;
        fs.insert_file("/src/dir/a/x.txt", "x").await;
        fs.insert_file("/src/dir/a/y.txt", "y").await;
        fs.insert_file("/src/top.txt", "top").await;
        fs
    }

    fn paths(items: &[Item]) -> Vec<&str> {
        items.iter().filter_map(|i| i.path.as_deref()).collect()
    }

    #[tokio::test]
    async fn directory_expands_in_pre_order() {
        let fs = tree().await;
        let items = search(&fs, "/src/dir/", &SearchOptions::default()).await.unwrap();

        assert_eq!(
            paths(&items),
            vec!["dir", "dir/a", "dir/a/x.txt", "dir/a/y.txt", "dir/b.txt"]
        );
        assert_eq!(search_base(&fs, "/src/dir/").as_str(), "/src");
    }

    #[tokio::test]
    async fn files_only() {
        let fs = tree().await;
        let options = SearchOptions {
            directories: false,
            ..SearchOptions::default()
        };
        let items = search(&fs, "/src/dir", &options).await.unwrap();
        assert_eq!(paths(&items), vec!["dir/a/x.txt", "dir/a/y.txt", "dir/b.txt"]);
    }

    #[tokio::test]
    async fn list_is_one_level() {
        let fs = tree().await;
        let items = search(&fs, "/src", &SearchOptions::list()).await.unwrap();

        let names: Vec<&str> = items.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["dir", "top.txt"]);
    }

    #[tokio::test]
    async fn single_file() {
        let fs = tree().await;
        let items = search(&fs, "/src/top.txt", &SearchOptions::default()).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].filename, "top.txt");
        assert_eq!(items[0].path.as_deref(), Some("top.txt"));
        assert_eq!(items[0].stats.len(), 3);
    }

    #[tokio::test]
    async fn item_only_returns_directory_itself() {
        let fs = tree().await;
        let items = search(&fs, "/src/dir", &SearchOptions::item()).await.unwrap();

        assert_eq!(items.len(), 1);
        assert!(items[0].stats.is_dir());
    }

    #[tokio::test]
    async fn linked_directories_are_walked() {
        let fs = tree().await;
        fs.symlink("dir/a", "/src/link").await.unwrap();
        fs.symlink("missing", "/src/dangling").await.unwrap();

        let items = search(&fs, "/src", &SearchOptions::default()).await.unwrap();
        assert_eq!(
            paths(&items),
            vec![
                "src",
                "src/dangling",
                "src/dir",
                "src/dir/a",
                "src/dir/a/x.txt",
                "src/dir/a/y.txt",
                "src/dir/b.txt",
                "src/link",
                "src/link/x.txt",
                "src/link/y.txt",
                "src/top.txt",
            ]
        );

        let link = items.iter().find(|i| i.filename == "link").unwrap();
        assert!(link.stats.is_dir());
        let dangling = items.iter().find(|i| i.filename == "dangling").unwrap();
        assert!(dangling.stats.is_symlink());
    }

    #[tokio::test]
    async fn link_to_an_ancestor_is_not_walked() {
        let fs = tree().await;
        fs.symlink("..", "/src/dir/up").await.unwrap();

        let items = search(&fs, "/src/dir", &SearchOptions::default()).await.unwrap();
        assert_eq!(
            paths(&items),
            vec!["dir", "dir/a", "dir/a/x.txt", "dir/a/y.txt", "dir/b.txt", "dir/up"]
        );
        assert!(items[5].stats.is_dir());
    }

    #[tokio::test]
    async fn missing_path_fails() {
        let fs = tree().await;
        let err = search(&fs, "/nope", &SearchOptions::default()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
