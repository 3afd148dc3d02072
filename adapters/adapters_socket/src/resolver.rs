//! Name Resolution
//!
//! Hostname lookup used by `Socket::connect`. The system resolver wraps
//! `getaddrinfo(3)` so that a transient `EAI_AGAIN` can be told apart from
//! permanent failures.

use std::ffi::{CStr, CString};
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ptr;

use tracing::trace;

use super::address::AddressFamily;
use super::error::SocketError;

/// Hostname to address lookup
#[cfg_attr(test, mockall::automock)]
pub trait Resolver {
    /// Resolve `hostname` to the addresses of `family`, in resolver order
    ///
    /// # Errors
    ///
    /// * `SocketError::TemporaryResolutionFailure` - transient failure
    /// * `SocketError::Resolution` - any other resolver failure, including
    ///   a name with no addresses of the requested family
    fn resolve(&self, hostname: &str, family: AddressFamily) -> Result<Vec<IpAddr>, SocketError>;
}

/// Resolver backed by the system's `getaddrinfo`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, hostname: &str, family: AddressFamily) -> Result<Vec<IpAddr>, SocketError> {
        let host = CString::new(hostname).map_err(|_| SocketError::Resolution {
            code: libc::EAI_NONAME,
            message: "hostname contains a NUL byte".to_string(),
        })?;

        // SAFETY: addrinfo is plain data; all-zero is the documented "no hints" value.
        let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
        hints.ai_family = family.raw();
        hints.ai_socktype = libc::SOCK_STREAM;

        let mut list: *mut libc::addrinfo = ptr::null_mut();
        // SAFETY: `host` is NUL-terminated and outlives the call; `list` is
        // only read after a zero return.
        let rc = unsafe { libc::getaddrinfo(host.as_ptr(), ptr::null(), &hints, &mut list) };
        if rc != 0 {
            trace!(hostname, rc, "getaddrinfo failed");
            return Err(match rc {
                libc::EAI_AGAIN => SocketError::TemporaryResolutionFailure,
                libc::EAI_SYSTEM => std::io::Error::last_os_error().into(),
                code => SocketError::Resolution {
                    code,
                    message: gai_message(code),
                },
            });
        }

        let mut addrs = Vec::new();
        let mut cursor = list;
        while !cursor.is_null() {
            // SAFETY: cursor walks the list getaddrinfo returned, which stays
            // valid until freeaddrinfo below.
            let info = unsafe { &*cursor };
            if let Some(ip) = unsafe { ip_of(info) } {
                if !addrs.contains(&ip) {
                    addrs.push(ip);
                }
            }
            cursor = info.ai_next;
        }
        // SAFETY: list came from a successful getaddrinfo and is freed once.
        unsafe { libc::freeaddrinfo(list) };

        if addrs.is_empty() {
            return Err(SocketError::Resolution {
                code: libc::EAI_NONAME,
                message: gai_message(libc::EAI_NONAME),
            });
        }
        trace!(hostname, count = addrs.len(), "hostname resolved");
        Ok(addrs)
    }
}

/// IP address carried by one `addrinfo` entry.
///
/// # Safety
///
/// `info.ai_addr` must be null or point to a socket address matching
/// `info.ai_family`.
unsafe fn ip_of(info: &libc::addrinfo) -> Option<IpAddr> {
    if info.ai_addr.is_null() {
        return None;
    }
    match info.ai_family {
        libc::AF_INET => {
            let sin = &*(info.ai_addr as *const libc::sockaddr_in);
            Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))))
        }
        libc::AF_INET6 => {
            let sin6 = &*(info.ai_addr as *const libc::sockaddr_in6);
            Some(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)))
        }
        _ => None,
    }
}

fn gai_message(code: i32) -> String {
    // SAFETY: gai_strerror returns a pointer to a static NUL-terminated string.
    unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
        .to_string_lossy()
        .into_owned()
}
