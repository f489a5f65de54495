use std::io;
use thiserror::Error;

use crate::protocol::StatusCode;

pub type FsResult<T> = Result<T, Error>;

/// Enum for filesystem and transfer errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A required argument was missing or had an unusable type
    #[error("{0}")]
    InvalidArgument(String),
    /// A required argument was an empty string
    #[error("Empty {0}")]
    Empty(String),
    /// The path exists but is not a directory
    #[error("Path is not a directory: {0}")]
    NotADirectory(String),
    /// Failure reported by the backing store
    #[error("{code}: {message}")]
    Status { code: StatusCode, message: String },
    /// Data could not be decoded into the requested form
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Unexpected result")]
    UnexpectedResult,
    #[error("Unspecified error")]
    Unspecified,
}

impl Error {
    pub fn status<M: Into<String>>(code: StatusCode, message: M) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    pub fn missing(name: &str) -> Self {
        Self::InvalidArgument(format!("Missing {name}"))
    }

    /// Returns the status code carried by a backing-store failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { code, .. } => *code,
            _ => StatusCode::Failure,
        }
    }

    /// Returns `true` if the error means the path does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Status {
                code: StatusCode::NoSuchFile,
                ..
            }
        )
    }
}

impl From<StatusCode> for Error {
    fn from(code: StatusCode) -> Self {
        Self::status(code, code.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => StatusCode::NoSuchFile,
            io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
            io::ErrorKind::Unsupported => StatusCode::OpUnsupported,
            io::ErrorKind::UnexpectedEof => StatusCode::Eof,
            _ => StatusCode::Failure,
        };

        Self::status(code, err.to_string())
    }
}
