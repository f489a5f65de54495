//! Platform-aware path values.
//!
//! A [`Path`] is a plain string tagged with the separator convention of the
//! filesystem it belongs to. It never touches the filesystem itself.

use std::fmt;

use crate::{
    error::{Error, FsResult},
    fs::Filesystem,
};

/// Separator convention of a filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PathStyle {
    /// `/` only
    #[default]
    Unix,
    /// Drive letters, `\` and `/` both accepted, `\` preferred
    Windows,
}

impl PathStyle {
    pub fn of(fs: &dyn Filesystem) -> Self {
        if fs.is_windows() {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    fn is_windows(self) -> bool {
        self == Self::Windows
    }

    fn is_separator(self, c: char) -> bool {
        c == '/' || (self.is_windows() && c == '\\')
    }
}

/// Immutable path value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path {
    path: String,
    style: PathStyle,
}

impl Path {
    pub fn new<T: Into<String>>(path: T, style: PathStyle) -> Self {
        Self {
            path: path.into(),
            style,
        }
    }

    /// Path using the convention of `fs`
    pub fn on<T: Into<String>>(path: T, fs: &dyn Filesystem) -> Self {
        Self::new(path, PathStyle::of(fs))
    }

    /// Validates `value`, then builds a normalized path for `fs`
    pub fn create(value: Option<&str>, fs: &dyn Filesystem, name: &str) -> FsResult<Self> {
        let path = Self::check(value, name)?;
        Ok(Self::on(path, fs).normalize())
    }

    /// Validates an argument that must be a non-empty path
    pub fn check(value: Option<&str>, name: &str) -> FsResult<String> {
        match value {
            None => Err(Error::missing(name)),
            Some("") => Err(Error::Empty(name.to_owned())),
            Some(path) => Ok(path.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn into_string(self) -> String {
        self.path
    }

    pub fn style(&self) -> PathStyle {
        self.style
    }

    fn with_path(&self, path: String) -> Self {
        Self::new(path, self.style)
    }

    fn last_separator(&self) -> Option<usize> {
        self.path
            .rfind('/')
            .or_else(|| self.style.is_windows().then(|| self.path.rfind('\\')).flatten())
    }

    /// Returns `true` if the path has no further ancestor
    pub fn is_top(&self) -> bool {
        let path = self.path.as_str();
        if path.is_empty() || path == "/" {
            return true;
        }

        if self.style.is_windows() {
            if path == "\\" {
                return true;
            }

            let bytes = path.as_bytes();
            if bytes.get(1) != Some(&b':') {
                return false;
            }

            match bytes.len() {
                2 => return true,
                3 => return bytes[2] == b'/' || bytes[2] == b'\\',
                _ => {}
            }
        }

        false
    }

    pub fn get_name(&self) -> &str {
        match self.last_separator() {
            Some(n) => &self.path[n + 1..],
            None => &self.path,
        }
    }

    pub fn get_parent(&self) -> Self {
        let parent = match self.last_separator() {
            None => String::new(),
            Some(0) => "/".to_owned(),
            Some(n) => self.path[..n].to_owned(),
        };

        self.with_path(parent)
    }

    pub fn starts_with(&self, value: &str) -> bool {
        !value.is_empty() && self.path.starts_with(value)
    }

    /// Returns `true` if this path is `dir` or lies below it
    pub fn is_within(&self, dir: &str) -> bool {
        match self.path.strip_prefix(dir) {
            Some(rest) => {
                rest.is_empty()
                    || dir.ends_with(|c: char| self.style.is_separator(c))
                    || rest.starts_with(|c: char| self.style.is_separator(c))
            }
            None => false,
        }
    }

    pub fn ends_with_slash(&self) -> bool {
        self.path
            .chars()
            .next_back()
            .is_some_and(|c| self.style.is_separator(c))
    }

    pub fn remove_trailing_slash(&self) -> Self {
        if self.path.len() > 1 && self.ends_with_slash() {
            let mut path = self.path.clone();
            let _ = path.pop();
            return self.with_path(path);
        }

        self.clone()
    }

    pub fn normalize(&self) -> Self {
        let path = if self.style.is_windows() {
            self.path.replace('/', "\\")
        } else {
            self.path.replace('\\', "/")
        };

        self.with_path(path)
    }

    fn is_absolute_segment(&self, segment: &str) -> bool {
        if segment.starts_with('/') || segment == "~" || segment.starts_with("~/") {
            return true;
        }

        self.style.is_windows()
            && (segment.starts_with('\\')
                || segment.starts_with("~\\")
                || segment.as_bytes().get(1) == Some(&b':'))
    }

    /// Folds `segments` onto this path. Absolute segments replace everything
    /// accumulated so far; empty ones are skipped.
    pub fn join<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = self.path.clone();

        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }

            if path.is_empty() || self.is_absolute_segment(segment) {
                path = segment.to_owned();
                continue;
            }

            if !path.ends_with(|c: char| self.style.is_separator(c)) {
                path.push('/');
            }
            path.push_str(segment);
        }

        if path.is_empty() {
            path = ".".to_owned();
        }

        self.with_path(path).normalize()
    }

    pub fn join_path(&self, other: &Path) -> Self {
        self.join([other.as_str()])
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.path
    }
}
