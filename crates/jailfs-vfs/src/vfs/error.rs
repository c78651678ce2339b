//! VFS error types.
//!
//! Every operation fails with exactly one [`VfsError`] carrying a canonical
//! [`ErrorCode`]. Host failures enter as [`HostError`] and are normalized once,
//! through `From<HostError> for VfsError`; a `VfsError` is never re-wrapped.

use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

use super::host::HostError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Canonical error codes exposed by the VFS.
///
/// The string form of each code is its POSIX name, so a host error code can be
/// parsed straight into this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorCode {
    /// File or directory not found.
    #[strum(serialize = "ENOENT")]
    NotFound,
    /// Expected a directory.
    #[strum(serialize = "ENOTDIR")]
    NotADirectory,
    /// Expected a file.
    #[strum(serialize = "EISDIR")]
    IsADirectory,
    /// Directory not empty.
    #[strum(serialize = "ENOTEMPTY")]
    DirectoryNotEmpty,
    /// Permission denied.
    #[strum(to_string = "EACCES", serialize = "EPERM")]
    PermissionDenied,
    /// Too many open files in this process.
    #[strum(serialize = "EMFILE")]
    TooManyOpenFiles,
    /// Too many open files system-wide.
    #[strum(serialize = "ENFILE")]
    TooManyOpenFilesInSystem,
    /// Bad file handle.
    #[strum(serialize = "EBADF")]
    BadHandle,
    /// Invalid argument, including jail escapes and symlink loops.
    #[strum(serialize = "EINVAL")]
    InvalidArgument,
    /// Path already exists.
    #[strum(serialize = "EEXIST")]
    AlreadyExists,
    /// Operation not supported.
    #[strum(serialize = "ENOTSUP")]
    Unsupported,
    /// Operation was cancelled by the caller.
    #[strum(serialize = "ECANCELED")]
    Cancelled,
    /// Anything the host reports that has no canonical code.
    #[strum(serialize = "UNKNOWN")]
    Unknown,
}

impl ErrorCode {
    /// The code string, e.g. `"ENOENT"`.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Canonical VFS error: `{code, message, source}`.
#[derive(Debug, Error)]
pub struct VfsError {
    code: ErrorCode,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl VfsError {
    /// Create an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The canonical code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message, without the code prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this error reports a missing path.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    /// Returns true if this error reports cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    /// Create a NotFound error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, msg)
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, msg)
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, msg)
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotADirectory, msg)
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, msg)
    }

    /// Create an Unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unsupported, msg)
    }

    /// Create a Cancelled error.
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "operation was cancelled")
    }

    /// Create an Unknown error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, msg)
    }
}

/// Normalize a host failure.
///
/// A host code inside the canonical set is kept and the redundant
/// `"<code>: "` prefix is stripped from the message. Anything else becomes
/// [`ErrorCode::Unknown`] with the original message intact.
impl From<HostError> for VfsError {
    fn from(err: HostError) -> Self {
        let canonical = err
            .code()
            .and_then(|code| ErrorCode::from_str(code).ok().map(|c| (code, c)))
            .filter(|(_, c)| !matches!(c, ErrorCode::Cancelled | ErrorCode::Unknown));

        match canonical {
            Some((host_code, code)) => {
                let message = err
                    .message()
                    .strip_prefix(host_code)
                    .and_then(|rest| rest.strip_prefix(": "))
                    .unwrap_or(err.message())
                    .to_string();
                Self::new(code, message).with_source(err)
            }
            None => Self::new(ErrorCode::Unknown, err.message().to_string()).with_source(err),
        }
    }
}

/// Errors without a path context (e.g. from an already-open handle).
impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        HostError::from_io(err).into()
    }
}

/// Structural errors from the change notifier.
impl From<notify::Error> for VfsError {
    fn from(err: notify::Error) -> Self {
        match err.kind {
            notify::ErrorKind::Io(io) => io.into(),
            notify::ErrorKind::PathNotFound => {
                Self::not_found(format!("watch path not found: {:?}", err.paths))
            }
            notify::ErrorKind::MaxFilesWatch => {
                Self::new(ErrorCode::TooManyOpenFilesInSystem, "watch limit reached")
            }
            _ => Self::other(err.to_string()).with_source(err),
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for std::io::Error {
    fn from(e: VfsError) -> Self {
        use std::io::ErrorKind;

        let kind = match e.code {
            ErrorCode::NotFound => ErrorKind::NotFound,
            ErrorCode::AlreadyExists => ErrorKind::AlreadyExists,
            ErrorCode::PermissionDenied => ErrorKind::PermissionDenied,
            ErrorCode::NotADirectory => ErrorKind::NotADirectory,
            ErrorCode::IsADirectory => ErrorKind::IsADirectory,
            ErrorCode::DirectoryNotEmpty => ErrorKind::DirectoryNotEmpty,
            ErrorCode::InvalidArgument => ErrorKind::InvalidInput,
            ErrorCode::Unsupported => ErrorKind::Unsupported,
            ErrorCode::Cancelled => ErrorKind::Interrupted,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
