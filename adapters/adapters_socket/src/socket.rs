//! Socket Module
//!
//! Context-owned TCP socket handles. A [`Socket`] wraps one OS descriptor
//! together with its local and remote address records. The descriptor is
//! registered with the handle's owning [`Context`] on every allocation path
//! (create, accept, import), so tearing the context down closes it.
//!
//! ## Lifetime rules
//!
//! - A handle holds only a weak reference to its context; it never keeps
//!   the context alive.
//! - `close` unregisters the context cleanup before closing, so a later
//!   teardown cannot close a descriptor number the OS has since reused.
//! - Once the descriptor is closed (explicitly or by teardown) every
//!   operation that needs it fails with `SocketError::NotASocket`.
//! - Operations on one handle are serialized by an internal lock. `accept`
//!   and blocking `connect` release it while they wait, so the context can
//!   be torn down from another thread at any time. Teardown shuts the
//!   descriptor down to wake the waiting call, which then fails with
//!   `SocketError::NotASocket`; the descriptor is closed as that call returns.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use adapters_socket::Socket;
//! use entities_context::Context;
//!
//! let listen_ctx = Context::new();
//! let listener = Socket::create(&listen_ctx)?;
//! listener.set_local_port(8080);
//! listener.bind()?;
//! listener.listen(5)?;
//!
//! let conn_ctx = Context::new();
//! let conn = listener.accept(&conn_ctx)?;
//! println!("peer {}", conn.remote_address().to_socket_addr());
//! conn_ctx.destroy(); // closes `conn`
//! # Ok::<(), adapters_socket::SocketError>(())
//! ```

use std::fmt;
use std::io;
use std::mem;
use std::net::{IpAddr, Shutdown};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use entities_context::{CleanupFn, CleanupKey, Context, UserData, WeakContext};
use socket2::{Protocol, SockRef, Socket as Socket2, Type};
use tracing::{debug, trace, warn};

use super::address::{AddressFamily, AddressRecord};
use super::config::SocketConfig;
use super::error::SocketError;
use super::resolver::{Resolver, SystemResolver};

/// Which directions `shutdown` disables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownHow {
    /// No further reads
    Read,
    /// No further writes
    Write,
    /// No further reads or writes
    ReadWrite,
}

impl From<ShutdownHow> for Shutdown {
    fn from(how: ShutdownHow) -> Self {
        match how {
            ShutdownHow::Read => Shutdown::Read,
            ShutdownHow::Write => Shutdown::Write,
            ShutdownHow::ReadWrite => Shutdown::Both,
        }
    }
}

struct SocketState {
    inner: Option<Arc<Socket2>>,
    local_addr: AddressRecord,
    remote_addr: AddressRecord,
    addr_len: u32,
    timeout: i64,
    connected: bool,
    cleanup: Option<CleanupKey>,
}

/// Bytes accounted against the owning context per handle
const HANDLE_FOOTPRINT: usize =
    mem::size_of::<SocketState>() + 2 * mem::size_of::<AddressRecord>();

impl SocketState {
    fn new(family: AddressFamily, timeout: i64) -> Self {
        Self {
            inner: None,
            local_addr: AddressRecord::unspecified(family),
            remote_addr: AddressRecord::unspecified(family),
            addr_len: family.record_len(),
            timeout,
            connected: false,
            cleanup: None,
        }
    }

    fn descriptor(&self) -> RawFd {
        self.inner.as_ref().map_or(-1, |sock| sock.as_raw_fd())
    }

    fn open(&self) -> Result<&Socket2, SocketError> {
        self.inner.as_deref().ok_or(SocketError::NotASocket)
    }

    /// Reference to the descriptor for a call made without the lock held
    fn shared(&self) -> Result<Arc<Socket2>, SocketError> {
        self.inner.clone().ok_or(SocketError::NotASocket)
    }

    /// Whether `sock` is still the descriptor this handle owns
    fn holds(&self, sock: &Arc<Socket2>) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, sock))
    }

    fn adopt(&mut self, sock: Socket2) {
        self.inner = Some(Arc::new(sock));
    }

    /// Close the descriptor, reporting the result of `close(2)`.
    ///
    /// On failure the descriptor stays in place so the close can be retried.
    /// While another thread is blocked on the descriptor it is only shut
    /// down here; the blocked call closes it when it returns.
    fn release(&mut self) -> io::Result<()> {
        let Some(sock) = self.inner.take() else {
            return Ok(());
        };
        let sock = match Arc::try_unwrap(sock) {
            Ok(sock) => sock,
            Err(in_use) => {
                if let Err(err) = in_use.shutdown(Shutdown::Both) {
                    trace!(fd = in_use.as_raw_fd(), error = %err, "shutdown of busy descriptor failed");
                }
                debug!(fd = in_use.as_raw_fd(), "busy descriptor shut down");
                return Ok(());
            }
        };
        let fd = sock.into_raw_fd();
        // SAFETY: fd was owned by `sock` and ownership was just released.
        if unsafe { libc::close(fd) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        // SAFETY: close failed, so fd is still ours to own.
        self.adopt(unsafe { Socket2::from_raw_fd(fd) });
        Err(err)
    }

    fn refresh_local(&mut self) -> Result<AddressRecord, SocketError> {
        let addr = self.open()?.local_addr()?;
        self.addr_len = addr.len();
        if let Some(record) = AddressRecord::from_sock_addr(&addr) {
            self.local_addr = record;
        }
        Ok(self.local_addr)
    }
}

type SharedState = Arc<Mutex<SocketState>>;

fn lock_state(state: &SharedState) -> MutexGuard<'_, SocketState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cleanup run by the owning context at teardown.
fn socket_cleanup(state: &SharedState) -> io::Result<()> {
    let mut state = lock_state(state);
    state.cleanup = None;
    let fd = state.descriptor();
    state.release()?;
    if fd >= 0 {
        debug!(fd, "descriptor released by context teardown");
    }
    Ok(())
}

/// Context-owned TCP socket handle
pub struct Socket {
    state: SharedState,
    context: WeakContext,
    family: AddressFamily,
}

impl Socket {
    fn allocate(ctx: &Context, family: AddressFamily, timeout: i64) -> Result<Self, SocketError> {
        ctx.alloc(HANDLE_FOOTPRINT)?;
        Ok(Self {
            state: Arc::new(Mutex::new(SocketState::new(family, timeout))),
            context: ctx.downgrade(),
            family,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SocketState> {
        lock_state(&self.state)
    }

    /// Error for a blocking call made without the lock held
    ///
    /// `NotASocket` if the descriptor was closed while the call was waiting.
    fn blocking_error(&self, sock: &Arc<Socket2>, err: io::Error) -> SocketError {
        if self.lock().holds(sock) {
            err.into()
        } else {
            SocketError::NotASocket
        }
    }

    fn register(&self, ctx: &Context, state: &mut SocketState) -> Result<(), SocketError> {
        let shared = Arc::clone(&self.state);
        let key = ctx.register_cleanup(move || socket_cleanup(&shared))?;
        state.cleanup = Some(key);
        Ok(())
    }

    /// Create a TCP socket owned by `ctx`
    ///
    /// Uses the default configuration: IPv4, blocking, no timeout.
    ///
    /// # Errors
    ///
    /// * `SocketError::OutOfMemory` - `ctx` cannot account for the handle
    /// * `SocketError::NoContext` - `ctx` was destroyed
    /// * `SocketError::Os` - `socket(2)` failed
    pub fn create(ctx: &Context) -> Result<Self, SocketError> {
        Self::create_with_config(ctx, &SocketConfig::default())
    }

    /// Create a TCP socket owned by `ctx` with custom configuration
    pub fn create_with_config(ctx: &Context, config: &SocketConfig) -> Result<Self, SocketError> {
        let socket = Self::allocate(ctx, config.family, config.timeout)?;
        let raw = Socket2::new(config.family.into(), Type::STREAM, Some(Protocol::TCP))?;
        if config.nonblocking {
            raw.set_nonblocking(true)?;
        }

        let mut state = socket.lock();
        let fd = raw.as_raw_fd();
        state.adopt(raw);
        socket.register(ctx, &mut state)?;
        drop(state);

        debug!(fd, context = ctx.id(), family = ?config.family, "socket created");
        Ok(socket)
    }

    /// Bind the descriptor to the local address record
    ///
    /// This is where a port already in use is reported, typically as
    /// `SocketError::Os(EADDRINUSE)`.
    pub fn bind(&self) -> Result<(), SocketError> {
        let mut state = self.lock();
        let addr = state.local_addr.to_sock_addr();
        state.open()?.bind(&addr)?;
        state.addr_len = addr.len();
        debug!(fd = state.descriptor(), addr = %state.local_addr.to_socket_addr(), "socket bound");
        Ok(())
    }

    /// Mark the bound socket passive with room for `backlog` pending connections
    ///
    /// `backlog` is passed to `listen(2)` unchanged.
    pub fn listen(&self, backlog: i32) -> Result<(), SocketError> {
        let state = self.lock();
        state.open()?.listen(backlog)?;
        debug!(fd = state.descriptor(), backlog, "socket listening");
        Ok(())
    }

    /// Accept a pending connection into a new handle owned by `ctx`
    ///
    /// `ctx` is normally a different context from the listener's, so each
    /// connection can be torn down on its own. Blocks until a connection
    /// arrives unless the listener is non-blocking.
    ///
    /// The peer address comes from `accept(2)`; the local address is queried
    /// separately. If that query fails the new descriptor is closed and the
    /// error returned, so no half-initialized handle reaches the caller.
    pub fn accept(&self, ctx: &Context) -> Result<Self, SocketError> {
        let conn = Self::allocate(ctx, self.family, SocketConfig::default().timeout)?;

        let listener = self.lock().shared()?;
        let (raw, peer) = listener
            .accept()
            .map_err(|err| self.blocking_error(&listener, err))?;
        drop(listener);

        let mut state = conn.lock();
        state.addr_len = peer.len();
        if let Some(record) = AddressRecord::from_sock_addr(&peer) {
            state.remote_addr = record;
        }
        state.adopt(raw);
        if let Err(err) = state.refresh_local() {
            drop(state.inner.take());
            return Err(err);
        }
        state.connected = true;
        conn.register(ctx, &mut state)?;

        debug!(
            fd = state.descriptor(),
            peer = %state.remote_addr.to_socket_addr(),
            context = ctx.id(),
            "connection accepted"
        );
        drop(state);
        Ok(conn)
    }

    /// Connect to the remote address
    ///
    /// With a `hostname`, it is resolved through the system resolver and the
    /// first address of the socket's family replaces the remote IP; the
    /// remote port is left as set by `set_remote_port`. With `None` the
    /// remote address record is used as is.
    ///
    /// A non-blocking connect that is still in progress counts as success.
    pub fn connect(&self, hostname: Option<&str>) -> Result<(), SocketError> {
        self.connect_with(&SystemResolver, hostname)
    }

    /// `connect` with a caller-supplied resolver
    ///
    /// A resolution failure leaves the remote address record untouched.
    pub fn connect_with<R>(&self, resolver: &R, hostname: Option<&str>) -> Result<(), SocketError>
    where
        R: Resolver + ?Sized,
    {
        let sock = self.lock().shared()?;

        let resolved = match hostname {
            Some(host) => Some(
                resolver
                    .resolve(host, self.family)?
                    .into_iter()
                    .find(|ip| AddressFamily::of(ip) == self.family)
                    .ok_or_else(|| SocketError::Resolution {
                        code: libc::EAI_NONAME,
                        message: format!("no {:?} address for {host}", self.family),
                    })?,
            ),
            None => None,
        };

        let target = {
            let mut state = self.lock();
            if let Some(ip) = resolved {
                state.remote_addr.set_ip(ip);
                state.addr_len = self.family.record_len();
            }
            state.remote_addr.to_sock_addr()
        };

        match sock.connect(&target) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {
                trace!(fd = sock.as_raw_fd(), "connect in progress");
            }
            Err(err) => return Err(self.blocking_error(&sock, err)),
        }

        let mut state = self.lock();
        if !state.holds(&sock) {
            return Err(SocketError::NotASocket);
        }
        drop(sock);
        if let Err(err) = state.refresh_local() {
            trace!(fd = state.descriptor(), error = %err, "local address query after connect failed");
        }
        state.connected = true;

        debug!(
            fd = state.descriptor(),
            remote = %state.remote_addr.to_socket_addr(),
            "socket connected"
        );
        Ok(())
    }

    /// Disable reads, writes or both without releasing the descriptor
    pub fn shutdown(&self, how: ShutdownHow) -> Result<(), SocketError> {
        let state = self.lock();
        state.open()?.shutdown(how.into())?;
        debug!(fd = state.descriptor(), how = ?how, "socket shut down");
        Ok(())
    }

    /// Close the descriptor
    ///
    /// The context cleanup is unregistered first, so tearing the context
    /// down later cannot close a reused descriptor number. If `close(2)`
    /// fails the descriptor stays open, the cleanup is registered again and
    /// the call may be retried.
    ///
    /// # Errors
    ///
    /// * `SocketError::NotASocket` - the descriptor is already closed
    /// * `SocketError::Os` - `close(2)` failed
    pub fn close(&self) -> Result<(), SocketError> {
        // Declared before the guard so it is dropped after it: dropping the
        // last reference tears the context down, which takes this lock.
        let ctx = self.context.upgrade();
        let mut state = self.lock();
        let fd = state.descriptor();
        if fd < 0 {
            return Err(SocketError::NotASocket);
        }

        if let (Some(ctx), Some(key)) = (&ctx, state.cleanup.take()) {
            ctx.kill_cleanup(key);
        }

        match state.release() {
            Ok(()) => {
                debug!(fd, "socket closed");
                Ok(())
            }
            Err(err) => {
                if let Some(ctx) = &ctx {
                    if let Err(reg) = self.register(ctx, &mut state) {
                        warn!(fd, error = %reg, "could not hand descriptor back to its context");
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Wrap an open descriptor in a new handle owned by `ctx`
    ///
    /// The descriptor is consumed: on failure it is closed along with the
    /// partially built handle. The local address is read from the
    /// descriptor; its family overrides the default configuration.
    pub fn import(fd: OwnedFd, ctx: &Context) -> Result<Self, SocketError> {
        Self::import_with_config(fd, ctx, &SocketConfig::default())
    }

    /// `import` with custom configuration
    pub fn import_with_config(
        fd: OwnedFd,
        ctx: &Context,
        config: &SocketConfig,
    ) -> Result<Self, SocketError> {
        let local = SockRef::from(&fd).local_addr()?;
        let record = AddressRecord::from_sock_addr(&local);
        let family = record.map_or(config.family, |r| r.family());

        let socket = Self::allocate(ctx, family, config.timeout)?;
        let mut state = socket.lock();
        if let Some(record) = record {
            state.local_addr = record;
        }
        state.addr_len = local.len();
        state.adopt(Socket2::from(fd));
        socket.register(ctx, &mut state)?;

        debug!(fd = state.descriptor(), context = ctx.id(), "descriptor imported");
        drop(state);
        Ok(socket)
    }

    /// Replace this handle's descriptor with `fd`
    ///
    /// The new descriptor becomes owned by this handle's context exactly like
    /// one from `create`. A descriptor the handle still holds is closed
    /// first. No address query is made.
    ///
    /// `fd` is consumed. On error it is closed and the handle is left as it
    /// was: still holding its previous descriptor, if any, and still
    /// registered with its context.
    ///
    /// # Errors
    ///
    /// * `SocketError::NoContext` - the owning context is gone or destroyed
    /// * `SocketError::Os` - closing the previous descriptor failed
    pub fn import_into(&self, fd: OwnedFd) -> Result<(), SocketError> {
        let ctx = self.owning_context()?;
        let mut state = self.lock();
        if state.cleanup.is_none() {
            self.register(&ctx, &mut state)?;
        }
        let previous = state.descriptor();
        state.release()?;
        state.adopt(Socket2::from(fd));
        debug!(fd = state.descriptor(), previous, "descriptor replaced");
        Ok(())
    }

    /// Raw OS descriptor, or -1 once closed
    ///
    /// Ownership stays with the handle.
    pub fn export(&self) -> RawFd {
        self.lock().descriptor()
    }

    pub fn is_open(&self) -> bool {
        self.lock().inner.is_some()
    }

    /// Query the OS for the local address and store it
    pub fn refresh_local_address(&self) -> Result<AddressRecord, SocketError> {
        self.lock().refresh_local()
    }

    pub fn local_address(&self) -> AddressRecord {
        self.lock().local_addr
    }

    pub fn remote_address(&self) -> AddressRecord {
        self.lock().remote_addr
    }

    /// Byte length of the most recently learned address
    pub fn address_length(&self) -> u32 {
        self.lock().addr_len
    }

    pub fn set_local_port(&self, port: u16) {
        self.lock().local_addr.set_port(port);
    }

    /// Set the local IP used by `bind`
    ///
    /// Fails with `Os(EAFNOSUPPORT)` if `ip` is not of the socket's family.
    pub fn set_local_ip(&self, ip: IpAddr) -> Result<(), SocketError> {
        self.check_family(&ip)?;
        self.lock().local_addr.set_ip(ip);
        Ok(())
    }

    pub fn set_remote_port(&self, port: u16) {
        self.lock().remote_addr.set_port(port);
    }

    /// Set the remote IP used by `connect(None)`
    pub fn set_remote_ip(&self, ip: IpAddr) -> Result<(), SocketError> {
        self.check_family(&ip)?;
        self.lock().remote_addr.set_ip(ip);
        Ok(())
    }

    fn check_family(&self, ip: &IpAddr) -> Result<(), SocketError> {
        if AddressFamily::of(ip) == self.family {
            Ok(())
        } else {
            Err(SocketError::Os(libc::EAFNOSUPPORT))
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Whether `connect` or `accept` has completed on this handle
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Advisory I/O timeout in microseconds; `NO_TIMEOUT` means blocking
    pub fn timeout(&self) -> i64 {
        self.lock().timeout
    }

    pub fn set_timeout(&self, timeout: i64) {
        self.lock().timeout = timeout;
    }

    /// Owning context, if it still exists
    pub fn context(&self) -> Option<Context> {
        self.context.upgrade()
    }

    fn owning_context(&self) -> Result<Context, SocketError> {
        self.context
            .upgrade()
            .filter(|ctx| !ctx.is_destroyed())
            .ok_or(SocketError::NoContext)
    }

    /// Attach user data to this socket's context
    pub fn set_data(
        &self,
        key: &str,
        value: UserData,
        cleanup: Option<CleanupFn>,
    ) -> Result<(), SocketError> {
        self.owning_context()?.set_userdata(key, value, cleanup)?;
        Ok(())
    }

    /// Fetch user data attached to this socket's context
    pub fn data(&self, key: &str) -> Result<UserData, SocketError> {
        Ok(self.owning_context()?.userdata(key)?)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Socket")
            .field("descriptor", &state.descriptor())
            .field("local", &state.local_addr.to_socket_addr())
            .field("remote", &state.remote_addr.to_socket_addr())
            .field("connected", &state.connected)
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NO_TIMEOUT;
    use crate::resolver::MockResolver;
    use entities_context::ContextConfig;
    use std::io::Read;
    use std::net::{Ipv4Addr, TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn listening(ctx: &Context) -> Socket {
        let socket = Socket::create(ctx).unwrap();
        socket.set_local_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        socket.bind().unwrap();
        socket.listen(5).unwrap();
        socket.refresh_local_address().unwrap();
        socket
    }

    #[test]
    fn test_create_initializes_handle() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();

        assert!(socket.export() >= 0);
        assert!(socket.is_open());
        assert_eq!(socket.local_address().family(), AddressFamily::Ipv4);
        assert_eq!(socket.remote_address().family(), AddressFamily::Ipv4);
        assert_eq!(socket.address_length(), AddressFamily::Ipv4.record_len());
        assert_eq!(socket.timeout(), NO_TIMEOUT);
        assert!(!socket.is_connected());
        assert_eq!(ctx.cleanup_count(), 1);
        assert_eq!(ctx.allocated(), HANDLE_FOOTPRINT);
        assert_eq!(socket.context().map(|c| c.id()), Some(ctx.id()));
    }

    #[test]
    fn test_create_ipv6() {
        let ctx = Context::new();
        let config = SocketConfig::default().with_family(AddressFamily::Ipv6);
        let socket = Socket::create_with_config(&ctx, &config).unwrap();
        assert_eq!(socket.family(), AddressFamily::Ipv6);
        assert_eq!(socket.local_address().family(), AddressFamily::Ipv6);
    }

    #[test]
    fn test_create_out_of_memory() {
        let ctx = Context::with_config(ContextConfig {
            max_bytes: Some(HANDLE_FOOTPRINT - 1),
        });
        assert_eq!(Socket::create(&ctx).unwrap_err(), SocketError::OutOfMemory);
        assert_eq!(ctx.cleanup_count(), 0);
    }

    #[test]
    fn test_create_on_destroyed_context() {
        let ctx = Context::new();
        ctx.destroy();
        assert_eq!(Socket::create(&ctx).unwrap_err(), SocketError::NoContext);
    }

    #[test]
    fn test_bind_reports_address_in_use() {
        let ctx = Context::new();
        let first = listening(&ctx);
        let port = first.local_address().port();
        assert!(port > 0);

        let second = Socket::create(&ctx).unwrap();
        second.set_local_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        second.set_local_port(port);
        assert_eq!(second.bind().unwrap_err(), SocketError::Os(libc::EADDRINUSE));
    }

    #[test]
    fn test_set_ip_rejects_other_family() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();
        let v6 = IpAddr::V6(std::net::Ipv6Addr::LOCALHOST);
        assert_eq!(socket.set_local_ip(v6), Err(SocketError::Os(libc::EAFNOSUPPORT)));
        assert_eq!(socket.set_remote_ip(v6), Err(SocketError::Os(libc::EAFNOSUPPORT)));
    }

    #[test]
    fn test_close_twice_is_not_a_socket() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();

        assert_eq!(socket.close(), Ok(()));
        assert_eq!(socket.export(), -1);
        assert_eq!(ctx.cleanup_count(), 0);
        assert_eq!(socket.close(), Err(SocketError::NotASocket));
        assert_eq!(socket.listen(1), Err(SocketError::NotASocket));
        assert_eq!(socket.shutdown(ShutdownHow::Read), Err(SocketError::NotASocket));
    }

    #[test]
    fn test_teardown_after_close_spares_reused_descriptor() {
        let old_ctx = Context::new();
        let old = Socket::create(&old_ctx).unwrap();
        old.close().unwrap();

        let ctx = Context::new();
        let fresh = Socket::create(&ctx).unwrap();
        old_ctx.destroy();

        assert!(fresh.is_open());
        assert!(fresh.refresh_local_address().is_ok());
    }

    #[test]
    fn test_context_teardown_closes_descriptor() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();
        ctx.destroy();

        assert_eq!(socket.export(), -1);
        assert!(!socket.is_open());
        assert_eq!(socket.bind(), Err(SocketError::NotASocket));
        assert_eq!(socket.close(), Err(SocketError::NotASocket));
    }

    #[test]
    fn test_dropping_context_closes_descriptor() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();
        drop(ctx);

        assert_eq!(socket.export(), -1);
        assert!(socket.context().is_none());
    }

    #[test]
    fn test_connect_uses_resolver_result() {
        let server_ctx = Context::new();
        let server = listening(&server_ctx);

        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .withf(|host, family| host == "db.internal" && *family == AddressFamily::Ipv4)
            .times(1)
            .returning(|_, _| Ok(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]));

        let ctx = Context::new();
        let client = Socket::create(&ctx).unwrap();
        client.set_remote_port(server.local_address().port());
        client.connect_with(&resolver, Some("db.internal")).unwrap();

        assert!(client.is_connected());
        assert_eq!(client.remote_address().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(client.remote_address().port(), server.local_address().port());
        assert!(client.local_address().port() > 0);
    }

    #[test]
    fn test_connect_resolution_failure_keeps_remote_address() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_, _| Err(SocketError::TemporaryResolutionFailure));

        let ctx = Context::new();
        let client = Socket::create(&ctx).unwrap();
        client.set_remote_port(9);
        let before = client.remote_address();

        let err = client.connect_with(&resolver, Some("flaky.example")).unwrap_err();
        assert_eq!(err, SocketError::TemporaryResolutionFailure);
        assert_eq!(client.remote_address(), before);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_skips_other_family_results() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .returning(|_, _| Ok(vec![IpAddr::V6(std::net::Ipv6Addr::LOCALHOST)]));

        let ctx = Context::new();
        let client = Socket::create(&ctx).unwrap();
        let err = client.connect_with(&resolver, Some("v6only.example")).unwrap_err();
        assert!(err.is_resolution_error());
        assert_eq!(client.remote_address().family(), AddressFamily::Ipv4);
    }

    #[test]
    fn test_connect_on_closed_socket_skips_resolution() {
        let mut resolver = MockResolver::new();
        resolver.expect_resolve().never();

        let ctx = Context::new();
        let client = Socket::create(&ctx).unwrap();
        client.close().unwrap();

        assert_eq!(
            client.connect_with(&resolver, Some("db.internal")),
            Err(SocketError::NotASocket)
        );
    }

    #[test]
    fn test_connect_refused_is_os_error() {
        let vacant = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = vacant.local_addr().unwrap().port();
        drop(vacant);

        let ctx = Context::new();
        let client = Socket::create(&ctx).unwrap();
        client.set_remote_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        client.set_remote_port(port);

        assert_eq!(client.connect(None), Err(SocketError::Os(libc::ECONNREFUSED)));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_nonblocking_connect_in_progress_is_success() {
        let server_ctx = Context::new();
        let server = listening(&server_ctx);

        let ctx = Context::new();
        let config = SocketConfig::default().with_nonblocking(true);
        let client = Socket::create_with_config(&ctx, &config).unwrap();
        client.set_remote_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        client.set_remote_port(server.local_address().port());

        assert_eq!(client.connect(None), Ok(()));
        assert!(client.is_connected());
    }

    #[test]
    fn test_accept_fills_both_addresses() {
        let listen_ctx = Context::new();
        let listener = listening(&listen_ctx);
        let addr = listener.local_address().to_socket_addr();

        let peer = TcpStream::connect(addr).unwrap();
        let conn_ctx = Context::new();
        let conn = listener.accept(&conn_ctx).unwrap();

        assert_eq!(conn.remote_address().to_socket_addr(), peer.local_addr().unwrap());
        assert_eq!(conn.local_address().to_socket_addr(), addr);
        assert!(conn.is_connected());
        assert_eq!(conn.timeout(), NO_TIMEOUT);
        assert_eq!(conn_ctx.cleanup_count(), 1);
        assert_eq!(listen_ctx.cleanup_count(), 1);
    }

    #[test]
    fn test_accept_context_teardown_closes_connection_only() {
        let listen_ctx = Context::new();
        let listener = listening(&listen_ctx);
        let addr = listener.local_address().to_socket_addr();

        let mut peer = TcpStream::connect(addr).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let conn_ctx = Context::new();
        let conn = listener.accept(&conn_ctx).unwrap();

        conn_ctx.destroy();
        assert_eq!(conn.export(), -1);
        assert!(listener.is_open());

        let mut buf = [0u8; 8];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_shutdown_write_keeps_descriptor() {
        let listen_ctx = Context::new();
        let listener = listening(&listen_ctx);
        let addr = listener.local_address().to_socket_addr();

        let mut peer = TcpStream::connect(addr).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let conn_ctx = Context::new();
        let conn = listener.accept(&conn_ctx).unwrap();

        let fd = conn.export();
        conn.shutdown(ShutdownHow::Write).unwrap();
        assert_eq!(conn.export(), fd);

        let mut buf = [0u8; 8];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_import_reads_local_address_and_registers_cleanup() {
        let std_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();

        let ctx = Context::new();
        let socket = Socket::import(OwnedFd::from(std_listener), &ctx).unwrap();

        assert_eq!(socket.local_address().to_socket_addr(), addr);
        assert_eq!(socket.timeout(), NO_TIMEOUT);
        assert_eq!(ctx.cleanup_count(), 1);

        ctx.destroy();
        assert_eq!(socket.export(), -1);
    }

    #[test]
    fn test_import_non_socket_fails() {
        let file = tempfile::tempfile().unwrap();
        let ctx = Context::new();
        let err = Socket::import(OwnedFd::from(file), &ctx).unwrap_err();
        assert_eq!(err, SocketError::Os(libc::ENOTSOCK));
        assert_eq!(ctx.cleanup_count(), 0);
    }

    #[test]
    fn test_import_into_closed_handle_reregisters() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();
        socket.close().unwrap();
        assert_eq!(ctx.cleanup_count(), 0);

        let std_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let fd = std_listener.as_raw_fd();
        socket.import_into(OwnedFd::from(std_listener)).unwrap();

        assert_eq!(socket.export(), fd);
        assert_eq!(ctx.cleanup_count(), 1);
        ctx.destroy();
        assert_eq!(socket.export(), -1);
    }

    #[test]
    fn test_import_into_replaces_open_descriptor() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();

        let std_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let fd = std_listener.as_raw_fd();
        socket.import_into(OwnedFd::from(std_listener)).unwrap();

        assert_eq!(socket.export(), fd);
        assert_eq!(ctx.cleanup_count(), 1);
    }

    #[test]
    fn test_import_into_destroyed_context_leaves_handle_unchanged() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();
        ctx.destroy();

        let std_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        assert_eq!(
            socket.import_into(OwnedFd::from(std_listener)),
            Err(SocketError::NoContext)
        );
        assert_eq!(socket.export(), -1);
        assert_eq!(ctx.cleanup_count(), 0);
    }

    #[test]
    fn test_close_while_context_dropped_on_another_thread() {
        for _ in 0..50 {
            let ctx = Context::new();
            let socket = Socket::create(&ctx).unwrap();

            let dropper = thread::spawn(move || drop(ctx));
            let result = socket.close();
            dropper.join().unwrap();

            assert!(matches!(result, Ok(()) | Err(SocketError::NotASocket)));
            assert_eq!(socket.export(), -1);
        }
    }

    #[test]
    fn test_socket_data_lives_in_context() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();

        assert_eq!(socket.data("peer").unwrap_err(), SocketError::DataNotFound);
        socket.set_data("peer", Arc::new(String::from("edge-1")), None).unwrap();

        let value = socket.data("peer").unwrap();
        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("edge-1"));
        assert!(ctx.userdata("peer").is_ok());

        ctx.destroy();
        assert_eq!(socket.data("peer").unwrap_err(), SocketError::NoContext);
    }

    #[test]
    fn test_timeout_is_stored_only() {
        let ctx = Context::new();
        let socket = Socket::create(&ctx).unwrap();
        socket.set_timeout(250_000);
        assert_eq!(socket.timeout(), 250_000);
    }

    #[test]
    fn test_shutdown_how_conversion() {
        assert_eq!(Shutdown::from(ShutdownHow::Read), Shutdown::Read);
        assert_eq!(Shutdown::from(ShutdownHow::Write), Shutdown::Write);
        assert_eq!(Shutdown::from(ShutdownHow::ReadWrite), Shutdown::Both);
    }
}
