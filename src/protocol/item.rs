use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::FileAttributes;

/// A named filesystem entry: directory listings, search results and
/// transfer notifications all carry one.
///
/// `path` is the entry's path relative to the root of the operation that
/// produced it, when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub filename: String,
    pub stats: FileAttributes,
    pub path: Option<String>,
}

impl Item {
    pub fn new<T: Into<String>>(filename: T, stats: FileAttributes) -> Self {
        Self {
            filename: filename.into(),
            stats,
            path: None,
        }
    }

    /// Get formed longname
    pub fn longname(&self) -> String {
        self.stats.long_listing(&self.filename, Utc::now())
    }
}
