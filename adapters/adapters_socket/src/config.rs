//! Socket Configuration
//!
//! Settings applied when a handle is created or imported.

use super::address::AddressFamily;

/// Timeout value meaning "blocking, no timeout"
pub const NO_TIMEOUT: i64 = -1;

/// Socket configuration
///
/// # Examples
///
/// ```rust
/// use adapters_socket::{AddressFamily, SocketConfig};
///
/// let config = SocketConfig::default()
///     .with_family(AddressFamily::Ipv6)
///     .with_nonblocking(true);
/// assert_eq!(config.timeout, adapters_socket::NO_TIMEOUT);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Address family of new sockets and their address records
    pub family: AddressFamily,
    /// Read/write timeout in microseconds handed to the I/O layer.
    /// `NO_TIMEOUT` means blocking.
    pub timeout: i64,
    /// Put the descriptor in non-blocking mode at creation
    pub nonblocking: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            family: AddressFamily::Ipv4,
            timeout: NO_TIMEOUT,
            nonblocking: false,
        }
    }
}

impl SocketConfig {
    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }
}
