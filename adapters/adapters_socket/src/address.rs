//! Address Module
//!
//! Address family and endpoint records kept by every socket handle.

use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, SockAddr};

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl From<AddressFamily> for Domain {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        }
    }
}

impl AddressFamily {
    /// Family of an IP address
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Wildcard address of this family
    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// Byte length of the OS address structure for this family
    pub fn record_len(self) -> u32 {
        match self {
            AddressFamily::Ipv4 => mem::size_of::<libc::sockaddr_in>() as u32,
            AddressFamily::Ipv6 => mem::size_of::<libc::sockaddr_in6>() as u32,
        }
    }

    pub(crate) fn raw(self) -> libc::c_int {
        match self {
            AddressFamily::Ipv4 => libc::AF_INET,
            AddressFamily::Ipv6 => libc::AF_INET6,
        }
    }
}

/// One endpoint of a connection: family, IP and port
///
/// The family always agrees with the IP address it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRecord {
    ip: IpAddr,
    port: u16,
}

impl AddressRecord {
    /// Create a record for `ip` and `port`
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Wildcard address with port 0 in the given family
    pub fn unspecified(family: AddressFamily) -> Self {
        Self::new(family.unspecified(), 0)
    }

    /// Convert an OS address, if it is an IP endpoint
    pub fn from_sock_addr(addr: &SockAddr) -> Option<Self> {
        addr.as_socket().map(Self::from)
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.ip)
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn set_ip(&mut self, ip: IpAddr) {
        self.ip = ip;
    }

    pub(crate) fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub(crate) fn to_sock_addr(&self) -> SockAddr {
        SockAddr::from(self.to_socket_addr())
    }
}

impl From<SocketAddr> for AddressRecord {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspecified_record() {
        let record = AddressRecord::unspecified(AddressFamily::Ipv4);
        assert_eq!(record.family(), AddressFamily::Ipv4);
        assert_eq!(record.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(record.port(), 0);

        let record = AddressRecord::unspecified(AddressFamily::Ipv6);
        assert_eq!(record.family(), AddressFamily::Ipv6);
    }

    #[test]
    fn test_record_len_matches_os_structures() {
        assert_eq!(AddressFamily::Ipv4.record_len(), 16);
        assert_eq!(AddressFamily::Ipv6.record_len(), 28);
    }

    #[test]
    fn test_family_follows_ip() {
        let mut record = AddressRecord::unspecified(AddressFamily::Ipv4);
        record.set_ip(IpAddr::V6(Ipv6Addr::LOCALHOST));
        record.set_port(8080);
        assert_eq!(record.family(), AddressFamily::Ipv6);
        assert_eq!(record.to_socket_addr().port(), 8080);
    }

    #[test]
    fn test_sock_addr_conversion() {
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let record = AddressRecord::from_sock_addr(&SockAddr::from(addr)).unwrap();
        assert_eq!(record.to_socket_addr(), addr);
        assert_eq!(record.to_sock_addr().len(), AddressFamily::Ipv4.record_len());
    }

    #[test]
    fn test_address_family_conversion() {
        assert_eq!(Domain::from(AddressFamily::Ipv4), Domain::IPV4);
        assert_eq!(Domain::from(AddressFamily::Ipv6), Domain::IPV6);
        assert_eq!(AddressFamily::Ipv4.raw(), libc::AF_INET);
    }
}
