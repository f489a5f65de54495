use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes used to classify backing-store failures.
/// The numeric values follow `SSH_FXP_STATUS`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    #[error("Eof")]
    Eof = 1,
    #[error("No such file")]
    NoSuchFile = 2,
    #[error("Permission denied")]
    PermissionDenied = 3,
    #[error("Failure")]
    Failure = 4,
    #[error("Operation unsupported")]
    OpUnsupported = 8,
}

#[cfg(test)]
mod tests {
    use super::StatusCode;

    #[test]
    fn codes_keep_wire_values() {
        assert_eq!(StatusCode::NoSuchFile as u32, 2);
        assert_eq!(StatusCode::OpUnsupported as u32, 8);
        assert_eq!(StatusCode::OpUnsupported.to_string(), "Operation unsupported");
    }
}
