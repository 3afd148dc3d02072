//! Socket Facades
//!
//! Status-code entry points over `adapters_socket`. Each facade accepts the
//! handle and the context as `Option`s so a missing argument is reported as
//! a status (`ENOSOCKET`, `ENOCONT`) rather than being impossible to
//! express, and new handles are returned through `&mut Option<Socket>`
//! out-parameters.
//!
//! ## Examples
//!
//! ```rust
//! use api_facades::{bind, close_socket, create_tcp_socket, listen, SUCCESS};
//! use entities_context::Context;
//!
//! let ctx = Context::new();
//! let mut sock = None;
//! assert_eq!(create_tcp_socket(&mut sock, Some(&ctx)), SUCCESS);
//! assert_eq!(bind(sock.as_ref()), SUCCESS);
//! assert_eq!(listen(sock.as_ref(), 5), SUCCESS);
//! assert_eq!(close_socket(sock.as_ref()), SUCCESS);
//! ```

use std::io;
use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use adapters_socket::{ShutdownHow, Socket};
use entities_context::{CleanupFn, Context, UserData};

use super::status::{status_of, status_result, Status, ENOCONT, ENOSOCKET, SUCCESS};

/// Create a TCP socket owned by `cont`
///
/// # Returns
///
/// `SUCCESS` with `*new` set, `ENOCONT` if `cont` is `None`, or the
/// creation error.
pub fn create_tcp_socket(new: &mut Option<Socket>, cont: Option<&Context>) -> Status {
    let Some(cont) = cont else {
        return ENOCONT;
    };
    match Socket::create(cont) {
        Ok(socket) => {
            *new = Some(socket);
            SUCCESS
        }
        Err(err) => status_of(&err),
    }
}

/// Disable reads, writes or both on a socket without closing it
pub fn shutdown(thesocket: Option<&Socket>, how: ShutdownHow) -> Status {
    match thesocket {
        Some(socket) => status_result(socket.shutdown(how)),
        None => ENOSOCKET,
    }
}

/// Close a socket and detach it from its context
pub fn close_socket(thesocket: Option<&Socket>) -> Status {
    match thesocket {
        Some(socket) => status_result(socket.close()),
        None => ENOSOCKET,
    }
}

/// Bind a socket to its local address record
pub fn bind(sock: Option<&Socket>) -> Status {
    match sock {
        Some(socket) => status_result(socket.bind()),
        None => ENOSOCKET,
    }
}

/// Listen on a bound socket
pub fn listen(sock: Option<&Socket>, backlog: i32) -> Status {
    match sock {
        Some(socket) => status_result(socket.listen(backlog)),
        None => ENOSOCKET,
    }
}

/// Accept a connection into a new socket owned by `connection_context`
pub fn accept(
    new: &mut Option<Socket>,
    sock: Option<&Socket>,
    connection_context: Option<&Context>,
) -> Status {
    let Some(sock) = sock else {
        return ENOSOCKET;
    };
    let Some(connection_context) = connection_context else {
        return ENOCONT;
    };
    match sock.accept(connection_context) {
        Ok(conn) => {
            *new = Some(conn);
            SUCCESS
        }
        Err(err) => status_of(&err),
    }
}

/// Connect a socket, resolving `hostname` first when one is given
pub fn connect(sock: Option<&Socket>, hostname: Option<&str>) -> Status {
    match sock {
        Some(socket) => status_result(socket.connect(hostname)),
        None => ENOSOCKET,
    }
}

/// Fetch user data attached to a socket's context
///
/// `*data` is cleared when no socket is given.
pub fn get_socketdata(data: &mut Option<UserData>, key: &str, sock: Option<&Socket>) -> Status {
    let Some(sock) = sock else {
        *data = None;
        return ENOSOCKET;
    };
    match sock.data(key) {
        Ok(value) => {
            *data = Some(value);
            SUCCESS
        }
        Err(err) => status_of(&err),
    }
}

/// Attach user data to a socket's context
pub fn set_socketdata(
    sock: Option<&Socket>,
    data: UserData,
    key: &str,
    cleanup: Option<CleanupFn>,
) -> Status {
    match sock {
        Some(socket) => status_result(socket.set_data(key, data, cleanup)),
        None => ENOSOCKET,
    }
}

/// Read the OS descriptor of a socket
///
/// The socket keeps ownership; `*thesock` is -1 if it is closed.
pub fn get_os_sock(thesock: &mut RawFd, sock: Option<&Socket>) -> Status {
    match sock {
        Some(socket) => {
            *thesock = socket.export();
            SUCCESS
        }
        None => ENOSOCKET,
    }
}

/// Wrap an OS descriptor in a socket
///
/// With `*sock == None` a new socket owned by `cont` is created around
/// `thesock`. The descriptor is checked with `getsockname(2)` first; if that
/// fails its error is returned and the descriptor stays with the caller.
///
/// With `*sock == Some(_)` the existing socket's descriptor is replaced
/// (see `Socket::import_into`); the new descriptor is owned by that socket's
/// own context.
///
/// # Safety
///
/// `thesock` must be an open descriptor that nothing else will close: on
/// `SUCCESS`, and on every failure after that check, ownership has passed
/// to the socket layer.
pub unsafe fn put_os_sock(sock: &mut Option<Socket>, thesock: RawFd, cont: Option<&Context>) -> Status {
    let Some(cont) = cont else {
        return ENOCONT;
    };
    if thesock < 0 {
        return libc::EBADF;
    }

    if let Some(existing) = sock.as_ref() {
        return status_result(existing.import_into(OwnedFd::from_raw_fd(thesock)));
    }

    let mut storage: libc::sockaddr_storage = mem::zeroed();
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    if libc::getsockname(
        thesock,
        &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
        &mut len,
    ) < 0
    {
        return io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EBADF);
    }

    match Socket::import(OwnedFd::from_raw_fd(thesock), cont) {
        Ok(socket) => {
            *sock = Some(socket);
            SUCCESS
        }
        Err(err) => status_of(&err),
    }
}
