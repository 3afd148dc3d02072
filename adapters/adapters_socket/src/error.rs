//! Socket Errors
//!
//! OS error codes are carried verbatim in `SocketError::Os`; the remaining
//! variants are the conditions this layer detects itself.

use std::io;

use entities_context::ContextError;
use thiserror::Error;

/// Socket error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The owning context could not account for the handle
    #[error("out of memory")]
    OutOfMemory,
    /// The handle is missing or its descriptor is closed
    #[error("not a socket")]
    NotASocket,
    /// The context is missing or already torn down
    #[error("no context")]
    NoContext,
    /// The resolver reported a transient failure; retrying may succeed
    #[error("temporary failure in name resolution")]
    TemporaryResolutionFailure,
    /// The resolver failed permanently
    #[error("name resolution failed ({code}): {message}")]
    Resolution { code: i32, message: String },
    /// No user data under the requested key
    #[error("no socket data stored under key")]
    DataNotFound,
    /// Error code returned by the failing OS call
    #[error("{}", os_message(.0))]
    Os(i32),
}

fn os_message(code: &i32) -> io::Error {
    io::Error::from_raw_os_error(*code)
}

impl SocketError {
    /// OS error code, if this error came from a system call
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            SocketError::Os(code) => Some(*code),
            _ => None,
        }
    }

    /// Whether name resolution, rather than the socket, failed
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            SocketError::TemporaryResolutionFailure | SocketError::Resolution { .. }
        )
    }
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => SocketError::Os(code),
            None if err.kind() == io::ErrorKind::InvalidInput => SocketError::Os(libc::EINVAL),
            None => SocketError::Os(libc::EIO),
        }
    }
}

impl From<ContextError> for SocketError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::OutOfMemory => SocketError::OutOfMemory,
            ContextError::Destroyed => SocketError::NoContext,
            ContextError::NotFound => SocketError::DataNotFound,
        }
    }
}
