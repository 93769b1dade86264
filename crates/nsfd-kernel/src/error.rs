//! Namespace error types.

use std::fmt;
use std::io;
use thiserror::Error;

/// Opaque failure reported by a remote peer.
///
/// The core never interprets or rewrites these; they travel back to the
/// caller exactly as the peer produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Peer-defined status code (negative errno by convention).
    pub status: i32,
    /// Human-readable detail from the peer.
    pub message: String,
}

impl RemoteError {
    /// Create a remote error with a status and message.
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.message, self.status)
    }
}

impl std::error::Error for RemoteError {}

/// Namespace error type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NsError {
    /// No such path or segment, or the unbind target is not a mount.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bind target is already occupied.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Shadowing attempted, or operation invoked on the wrong node kind.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Segment or total path length exceeds the bounds.
    #[error("bad path: {0}")]
    BadPath(String),

    /// Malformed call.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// No free descriptor slot.
    #[error("descriptor table exhausted")]
    Exhausted,

    /// Directory-only path opened with file-only access.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Pass-through failure from a remote peer.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl NsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a NotSupported error.
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported(what.into())
    }

    /// Create a BadPath error.
    pub fn bad_path(path: impl Into<String>) -> Self {
        Self::BadPath(path.into())
    }

    /// Create an InvalidArgs error.
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    /// Create a NotAFile error.
    pub fn not_a_file(path: impl Into<String>) -> Self {
        Self::NotAFile(path.into())
    }

    /// Negative POSIX status a call shim would hand back to the application.
    pub fn errno(&self) -> i32 {
        match self {
            NsError::NotFound(_) => -libc::ENOENT,
            NsError::AlreadyExists(_) => -libc::EEXIST,
            NsError::NotSupported(_) => -libc::ENOTSUP,
            NsError::BadPath(_) => -libc::ENAMETOOLONG,
            NsError::InvalidArgs(_) => -libc::EINVAL,
            NsError::Exhausted => -libc::EMFILE,
            NsError::NotAFile(_) => -libc::EISDIR,
            NsError::Remote(e) => e.status,
        }
    }
}

/// Convert NsError to std::io::Error for compatibility.
impl From<NsError> for io::Error {
    fn from(e: NsError) -> Self {
        match e {
            NsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            NsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            NsError::NotSupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            NsError::BadPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            NsError::InvalidArgs(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            NsError::Exhausted => io::Error::other("descriptor table exhausted"),
            NsError::NotAFile(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            NsError::Remote(e) => io::Error::from_raw_os_error(-e.status),
        }
    }
}

/// Namespace result type.
pub type NsResult<T> = Result<T, NsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(NsError::not_found("/x").errno(), -libc::ENOENT);
        assert_eq!(NsError::Exhausted.errno(), -libc::EMFILE);
        assert_eq!(NsError::bad_path("long").errno(), -libc::ENAMETOOLONG);
        assert_eq!(NsError::not_supported("x").errno(), -libc::ENOTSUP);
    }

    #[test]
    fn test_remote_passthrough() {
        let remote = RemoteError::new(-13, "access denied");
        let err: NsError = remote.clone().into();
        assert_eq!(err.errno(), -13);
        assert_eq!(err, NsError::Remote(remote));
    }

    #[test]
    fn test_io_error_kind() {
        let io: io::Error = NsError::already_exists("/svc").into();
        assert_eq!(io.kind(), io::ErrorKind::AlreadyExists);

        let io: io::Error = NsError::not_a_file("dir/").into();
        assert_eq!(io.kind(), io::ErrorKind::IsADirectory);
    }
}
