//! Filesystem transfer toolkit: a capability trait over local, in-memory or
//! remote stores, a backpressure-aware copy engine and batch transfers that
//! preserve directory structure.

#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate async_trait;

/// Batch transfers into a destination directory
pub mod batch;
pub mod copy;
mod error;
/// Filesystem capability trait and backends
pub mod fs;
pub mod path;
pub mod plus;
/// Stats, items and status codes
pub mod protocol;
pub mod search;
/// Data sources, data targets and transfer notifications
pub mod transfer;
pub mod util;

pub use self::{
    error::{Error, FsResult},
    fs::Filesystem,
    path::{Path, PathStyle},
    plus::FilesystemPlus,
};
