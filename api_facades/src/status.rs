//! Status Codes
//!
//! Integer results returned by the facades. `SUCCESS` is zero, OS error
//! codes are passed through unchanged, and the facade's own conditions live
//! above `START_ERROR` so they never collide with an errno value.

use std::ffi::CStr;
use std::io;

use adapters_socket::SocketError;

/// Facade result code
pub type Status = i32;

/// Operation succeeded
pub const SUCCESS: Status = 0;

/// First code reserved for facade-specific conditions
pub const START_ERROR: Status = 20000;

/// No context was supplied, or it has been destroyed
pub const ENOCONT: Status = START_ERROR + 2;

/// No socket was supplied, or its descriptor is closed
pub const ENOSOCKET: Status = START_ERROR + 8;

/// No user data under the requested key
pub const ENOTFOUND: Status = START_ERROR + 12;

/// Resolver error codes are reported as `START_EAIERR + |code|`
pub const START_EAIERR: Status = START_ERROR + 50000;

/// Context allocation budget exhausted
pub const ENOMEM: Status = libc::ENOMEM;

/// Transient name resolution failure
pub const EAGAIN: Status = libc::EAGAIN;

/// Status code for a socket error
pub fn status_of(err: &SocketError) -> Status {
    match err {
        SocketError::OutOfMemory => ENOMEM,
        SocketError::NotASocket => ENOSOCKET,
        SocketError::NoContext => ENOCONT,
        SocketError::TemporaryResolutionFailure => EAGAIN,
        SocketError::Resolution { code, .. } => START_EAIERR + code.abs(),
        SocketError::DataNotFound => ENOTFOUND,
        SocketError::Os(code) => *code,
    }
}

/// Collapse a unit result into a status code
pub fn status_result(result: Result<(), SocketError>) -> Status {
    match result {
        Ok(()) => SUCCESS,
        Err(err) => status_of(&err),
    }
}

/// Whether `status` came from the name resolver
pub fn is_resolver_status(status: Status) -> bool {
    status == EAGAIN || status >= START_EAIERR
}

/// Human-readable text for a status code
pub fn status_message(status: Status) -> String {
    match status {
        SUCCESS => "success".to_string(),
        ENOCONT => SocketError::NoContext.to_string(),
        ENOSOCKET => SocketError::NotASocket.to_string(),
        ENOTFOUND => SocketError::DataNotFound.to_string(),
        s if s >= START_EAIERR => {
            let magnitude = s - START_EAIERR;
            // glibc uses negative EAI_* values, the BSDs positive ones.
            let code = if libc::EAI_NONAME < 0 { -magnitude } else { magnitude };
            // SAFETY: gai_strerror returns a static NUL-terminated string for any code.
            unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
                .to_string_lossy()
                .into_owned()
        }
        s if s >= START_ERROR => format!("unknown status {s}"),
        s => io::Error::from_raw_os_error(s).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_of_each_error() {
        assert_eq!(status_of(&SocketError::OutOfMemory), libc::ENOMEM);
        assert_eq!(status_of(&SocketError::NotASocket), ENOSOCKET);
        assert_eq!(status_of(&SocketError::NoContext), ENOCONT);
        assert_eq!(status_of(&SocketError::TemporaryResolutionFailure), libc::EAGAIN);
        assert_eq!(status_of(&SocketError::DataNotFound), ENOTFOUND);
        assert_eq!(status_of(&SocketError::Os(libc::EADDRINUSE)), libc::EADDRINUSE);
        assert_eq!(
            status_of(&SocketError::Resolution {
                code: libc::EAI_NONAME,
                message: String::new(),
            }),
            START_EAIERR + libc::EAI_NONAME.abs()
        );
    }

    #[test]
    fn test_facade_codes_do_not_collide_with_errno() {
        for code in [ENOCONT, ENOSOCKET, ENOTFOUND, START_EAIERR] {
            assert!(code >= START_ERROR);
        }
        assert!(libc::EADDRINUSE < START_ERROR);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(status_message(SUCCESS), "success");
        assert_eq!(status_message(ENOSOCKET), "not a socket");
        assert_eq!(status_message(ENOCONT), "no context");
        assert_eq!(
            status_message(libc::ECONNREFUSED),
            io::Error::from_raw_os_error(libc::ECONNREFUSED).to_string()
        );
        assert!(!status_message(START_EAIERR + libc::EAI_NONAME.abs()).is_empty());
        assert_eq!(status_message(START_ERROR + 1), "unknown status 20001");
    }

    #[test]
    fn test_status_result() {
        assert_eq!(status_result(Ok(())), SUCCESS);
        assert_eq!(status_result(Err(SocketError::NotASocket)), ENOSOCKET);
        assert!(is_resolver_status(EAGAIN));
        assert!(is_resolver_status(START_EAIERR + 2));
        assert!(!is_resolver_status(ENOSOCKET));
    }
}
