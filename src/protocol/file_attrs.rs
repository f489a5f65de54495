use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::{
    fs::Metadata,
    io::ErrorKind,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::util;

/// Types according to mode unix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType(u32);

/// Permission bits according to mode unix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMode(u32);

bitflags! {
    impl FileType: u32 {
        const FIFO = 0x1000;
        const CHR = 0x2000;
        const DIR = 0x4000;
        const BLK = 0x6000;
        const REG = 0x8000;
        const LNK = 0xA000;
        const SOCK = 0xC000;
        const ALL = 0xF000;
    }

    impl FileMode: u32 {
        const OWNER_READ = 0o400;
        const OWNER_WRITE = 0o200;
        const OWNER_EXEC = 0o100;
        const GROUP_READ = 0o40;
        const GROUP_WRITE = 0o20;
        const GROUP_EXEC = 0o10;
        const OTHERS_READ = 0o4;
        const OTHERS_WRITE = 0o2;
        const OTHERS_EXEC = 0o1;
    }
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Stats of a filesystem entry. Implements most [Metadata](std::fs::Metadata) methods
///
/// `permissions` holds the whole unix mode: type bits in the `0xF000` field
/// and permission bits in the low nine bits.
///
/// The fields `user` and `group` are string names of users and groups for
/// clients that can be displayed in longname. Can be omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub user: Option<String>,
    pub gid: Option<u32>,
    pub group: Option<String>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    pub nlink: Option<u32>,
}

macro_rules! impl_fn_type {
    ($get_name:ident, $set_name:ident, $doc_name:expr, $flag:ident) => {
        #[doc = "Returns `true` if is a "]
        #[doc = $doc_name]
        pub fn $get_name(&self) -> bool {
            self.file_type() == FileType::$flag
        }

        #[doc = "Set type to "]
        #[doc = $doc_name]
        pub fn $set_name(&mut self) {
            self.set_type(FileType::$flag);
        }
    };
}

impl FileAttributes {
    impl_fn_type!(is_dir, set_dir, "dir", DIR);
    impl_fn_type!(is_regular, set_regular, "regular", REG);
    impl_fn_type!(is_symlink, set_symlink, "symlink", LNK);
    impl_fn_type!(is_character, set_character, "character", CHR);
    impl_fn_type!(is_block, set_block, "block", BLK);
    impl_fn_type!(is_fifo, set_fifo, "fifo", FIFO);
    impl_fn_type!(is_socket, set_socket, "socket", SOCK);

    /// Attributes of a directory with the given permission bits
    pub fn directory(mode: u32) -> Self {
        Self {
            permissions: Some((mode & 0o7777) | FileType::DIR.bits()),
            ..Default::default()
        }
    }

    /// Attributes of a regular file of the given size
    pub fn file(size: u64, mode: u32) -> Self {
        Self {
            size: Some(size),
            permissions: Some((mode & 0o7777) | FileType::REG.bits()),
            ..Default::default()
        }
    }

    /// Attributes that only carry a size, used when a source has no stats
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }

    /// Returns the type bits of the mode
    pub fn file_type(&self) -> FileType {
        FileType::from_bits_retain(self.permissions.unwrap_or(0) & FileType::ALL.bits())
    }

    /// Returns the permission bits of the mode
    pub fn mode(&self) -> FileMode {
        FileMode::from_bits_truncate(self.permissions.unwrap_or(0))
    }

    /// Replace the type bits, keeping permissions
    pub fn set_type(&mut self, r#type: FileType) {
        let perms = self.permissions.unwrap_or(0) & !FileType::ALL.bits();
        self.permissions = Some(perms | r#type.bits());
    }

    /// Returns the size of the file
    pub fn len(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the last access time
    pub fn accessed(&self) -> std::io::Result<SystemTime> {
        match self.atime {
            Some(time) => Ok(UNIX_EPOCH + Duration::from_secs(u64::from(time))),
            None => Err(ErrorKind::InvalidData.into()),
        }
    }

    /// Returns the last modification time
    pub fn modified(&self) -> std::io::Result<SystemTime> {
        match self.mtime {
            Some(time) => Ok(UNIX_EPOCH + Duration::from_secs(u64::from(time))),
            None => Err(ErrorKind::InvalidData.into()),
        }
    }

    fn type_char(&self) -> char {
        match self.file_type() {
            FileType::CHR => 'c',
            FileType::DIR => 'd',
            FileType::BLK => 'b',
            FileType::LNK => 'l',
            FileType::SOCK => 's',
            FileType::FIFO => 'p',
            _ => '-',
        }
    }

    fn permissions_string(&self) -> String {
        let mode = self.mode();
        [
            (FileMode::OWNER_READ, 'r'),
            (FileMode::OWNER_WRITE, 'w'),
            (FileMode::OWNER_EXEC, 'x'),
            (FileMode::GROUP_READ, 'r'),
            (FileMode::GROUP_WRITE, 'w'),
            (FileMode::GROUP_EXEC, 'x'),
            (FileMode::OTHERS_READ, 'r'),
            (FileMode::OTHERS_WRITE, 'w'),
            (FileMode::OTHERS_EXEC, 'x'),
        ]
        .iter()
        .fold(self.type_char().to_string(), |mut acc, (flag, c)| {
            acc.push(if mode.contains(*flag) { *c } else { '-' });
            acc
        })
    }

    fn date_column(&self, now: DateTime<Utc>) -> String {
        let modified = DateTime::<Utc>::from(self.modified().unwrap_or(UNIX_EPOCH));
        let month = MONTHS[modified.month0() as usize];
        let day = modified.day();

        let age = now.signed_duration_since(modified);
        if age < ChronoDuration::days(-30) || age > ChronoDuration::days(180) {
            format!("{month} {day:>2}  {}", modified.year())
        } else {
            format!(
                "{month} {day:>2} {:02}:{:02}",
                modified.hour(),
                modified.minute()
            )
        }
    }

    /// Renders an `ls -l` style line for `filename` relative to `now`
    pub fn long_listing(&self, filename: &str, now: DateTime<Utc>) -> String {
        let user = self
            .user
            .clone()
            .or_else(|| self.uid.map(|uid| uid.to_string()))
            .unwrap_or_else(|| "user".to_owned());
        let group = self
            .group
            .clone()
            .or_else(|| self.gid.map(|gid| gid.to_string()))
            .unwrap_or_else(|| "group".to_owned());

        format!(
            "{} {} {} {} {:>9} {} {}",
            self.permissions_string(),
            self.nlink.unwrap_or(1),
            user,
            group,
            self.len(),
            self.date_column(now),
            filename
        )
    }
}

/// For simple conversion of `Metadata` into file attributes
impl From<&Metadata> for FileAttributes {
    fn from(metadata: &Metadata) -> Self {
        #[cfg(unix)]
        let attrs = Self {
            size: Some(metadata.len()),
            uid: Some(metadata.uid()),
            gid: Some(metadata.gid()),
            permissions: Some(metadata.mode()),
            atime: Some(util::unix(metadata.accessed().unwrap_or(UNIX_EPOCH))),
            mtime: Some(util::unix(metadata.modified().unwrap_or(UNIX_EPOCH))),
            nlink: u32::try_from(metadata.nlink()).ok(),
            ..Default::default()
        };

        #[cfg(not(unix))]
        let attrs = {
            let mut attrs = Self {
                size: Some(metadata.len()),
                permissions: Some(if metadata.permissions().readonly() {
                    0o555
                } else {
                    0o777
                }),
                atime: Some(util::unix(metadata.accessed().unwrap_or(UNIX_EPOCH))),
                mtime: Some(util::unix(metadata.modified().unwrap_or(UNIX_EPOCH))),
                ..Default::default()
            };

            let file_type = metadata.file_type();
            if file_type.is_dir() {
                attrs.set_dir();
            } else if file_type.is_symlink() {
                attrs.set_symlink();
            } else {
                attrs.set_regular();
            }

            attrs
        };

        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(mtime: DateTime<Utc>, permissions: u32, size: u64) -> FileAttributes {
        FileAttributes {
            size: Some(size),
            permissions: Some(permissions),
            mtime: Some(u32::try_from(mtime.timestamp()).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn type_bits_are_masked() {
        let block = FileAttributes {
            permissions: Some(0x6000 | 0o644),
            ..Default::default()
        };
        assert!(block.is_block());
        assert!(!block.is_dir());
        assert!(!block.is_character());

        let mut attrs = FileAttributes::file(3, 0o644);
        assert!(attrs.is_regular());
        attrs.set_dir();
        assert!(attrs.is_dir());
        assert_eq!(attrs.permissions, Some(0x4000 | 0o644));
    }

    #[test]
    fn missing_mode_is_neither_file_nor_dir() {
        let attrs = FileAttributes::with_size(10);
        assert!(!attrs.is_dir());
        assert!(!attrs.is_regular());
        assert_eq!(attrs.len(), 10);
    }

    #[test]
    fn long_listing_recent_file() {
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
        let modified = Utc.with_ymd_and_hms(2024, 6, 5, 9, 7, 0).unwrap();
        let attrs = at(modified, 0x8000 | 0o754, 1234);

        assert_eq!(
            attrs.long_listing("notes.txt", now),
            "-rwxr-xr-- 1 user group      1234 Jun  5 09:07 notes.txt"
        );
    }

    #[test]
    fn long_listing_old_directory_shows_year() {
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
        let modified = Utc.with_ymd_and_hms(2022, 11, 23, 9, 7, 0).unwrap();
        let mut attrs = at(modified, 0x4000 | 0o700, 4096);
        attrs.nlink = Some(3);
        attrs.user = Some("alice".into());
        attrs.gid = Some(100);

        assert_eq!(
            attrs.long_listing("src", now),
            "drwx------ 3 alice 100      4096 Nov 23  2022 src"
        );
    }

    #[test]
    fn long_listing_far_future_shows_year() {
        let now = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
        let modified = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let attrs = at(modified, 0xA000 | 0o777, 7);

        assert_eq!(
            attrs.long_listing("link", now),
            "lrwxrwxrwx 1 user group         7 Sep  1  2024 link"
        );
    }
}
