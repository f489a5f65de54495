use serde::{Deserialize, Serialize};

/// Flags accepted by `Filesystem::open`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags(u32);

bitflags! {
    impl OpenFlags: u32 {
        const READ = 0x0000_0001;
        const WRITE = 0x0000_0002;
        const APPEND = 0x0000_0004;
        const CREATE = 0x0000_0008;
        const TRUNCATE = 0x0000_0010;
        const EXCLUDE = 0x0000_0020;
    }
}
