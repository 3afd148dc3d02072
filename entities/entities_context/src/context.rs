//! Context Module
//!
//! Hierarchical resource-lifetime scopes. A context accounts for the bytes
//! allocated against it, keeps an ordered registry of cleanup callbacks and
//! a string-keyed user-data bag. When the context is cleared, destroyed or
//! dropped for the last time, its subcontexts are torn down first, then
//! every registered cleanup runs exactly once in reverse registration order.
//!
//! ## Examples
//!
//! ```rust
//! use entities_context::Context;
//!
//! let ctx = Context::new();
//! let key = ctx.register_cleanup(|| Ok(())).unwrap();
//! assert!(ctx.has_cleanup(key));
//! ctx.destroy();
//! assert!(ctx.is_destroyed());
//! ```

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tracing::{debug, trace, warn};

/// Cleanup callback registered against a context
pub type CleanupFn = Box<dyn FnOnce() -> io::Result<()> + Send + 'static>;

/// Value stored in a context's user-data bag
pub type UserData = Arc<dyn Any + Send + Sync>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one cleanup registration.
///
/// Keys increase monotonically within a context, so key order is
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CleanupKey(u64);

impl CleanupKey {
    /// Numeric value of the key
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Context operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// Allocation budget exhausted
    #[error("context allocation budget exhausted")]
    OutOfMemory,
    /// The context was torn down with `destroy`
    #[error("context has been destroyed")]
    Destroyed,
    /// No user data under the requested key
    #[error("no user data stored under the requested key")]
    NotFound,
}

/// Context configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextConfig {
    /// Maximum number of bytes that may be allocated from the context
    /// between teardowns. `None` means unlimited.
    pub max_bytes: Option<usize>,
}

struct UserDataEntry {
    value: UserData,
    cleanup: Option<CleanupFn>,
}

#[derive(Default)]
struct ContextState {
    allocated: usize,
    next_key: u64,
    cleanups: BTreeMap<CleanupKey, CleanupFn>,
    userdata: HashMap<String, UserDataEntry>,
    children: Vec<Context>,
    destroyed: bool,
}

struct ContextInner {
    id: u64,
    config: ContextConfig,
    parent: Weak<ContextInner>,
    state: Mutex<ContextState>,
}

impl ContextInner {
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.destroyed {
            return;
        }
        trace!(context = self.id, "last context handle dropped");
        take_teardown(state, true).run(self.id);
    }
}

/// Everything a teardown has to release, detached from the context lock so
/// cleanups can run without it held.
struct Teardown {
    children: Vec<Context>,
    cleanups: BTreeMap<CleanupKey, CleanupFn>,
    userdata: HashMap<String, UserDataEntry>,
}

fn take_teardown(state: &mut ContextState, destroy: bool) -> Teardown {
    state.allocated = 0;
    if destroy {
        state.destroyed = true;
    }
    Teardown {
        children: mem::take(&mut state.children),
        cleanups: mem::take(&mut state.cleanups),
        userdata: mem::take(&mut state.userdata),
    }
}

impl Teardown {
    fn run(self, context: u64) {
        for child in self.children {
            child.destroy_detached();
        }

        for (key, cleanup) in self.cleanups.into_iter().rev() {
            if let Err(err) = cleanup() {
                warn!(context, key = key.0, error = %err, "cleanup failed during context teardown");
            }
        }

        for (name, entry) in self.userdata {
            if let Some(cleanup) = entry.cleanup {
                if let Err(err) = cleanup() {
                    warn!(context, key = %name, error = %err, "user data cleanup failed");
                }
            }
        }
    }
}

/// Resource-lifetime scope
///
/// Cloning a `Context` yields another handle to the same scope. The scope is
/// torn down by [`Context::destroy`], or when the last handle is dropped.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Non-owning reference to a [`Context`]
///
/// Resources hold one of these so they never extend the lifetime of the
/// scope that owns them.
#[derive(Clone, Default)]
pub struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    /// Upgrade to a full handle if the scope still exists
    pub fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(|inner| Context { inner })
    }
}

impl fmt::Debug for WeakContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.upgrade() {
            Some(inner) => write!(f, "WeakContext({})", inner.id),
            None => f.write_str("WeakContext(<dropped>)"),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a root context with no allocation budget
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create a root context with custom configuration
    pub fn with_config(config: ContextConfig) -> Self {
        Self::build(config, Weak::new())
    }

    fn build(config: ContextConfig, parent: Weak<ContextInner>) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        trace!(context = id, "context created");
        Self {
            inner: Arc::new(ContextInner {
                id,
                config,
                parent,
                state: Mutex::new(ContextState::default()),
            }),
        }
    }

    /// Create a subcontext owned by this context
    ///
    /// The subcontext inherits this context's configuration and is torn
    /// down before this context's own cleanups run.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Destroyed` if this context was destroyed.
    pub fn create_subcontext(&self) -> Result<Context, ContextError> {
        let mut state = self.inner.lock();
        if state.destroyed {
            return Err(ContextError::Destroyed);
        }
        let child = Self::build(self.inner.config.clone(), Arc::downgrade(&self.inner));
        state.children.push(child.clone());
        Ok(child)
    }

    /// Unique identifier of this context
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Parent context, if this is a live subcontext
    pub fn parent(&self) -> Option<Context> {
        self.inner.parent.upgrade().map(|inner| Context { inner })
    }

    /// Non-owning reference to this context
    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether `destroy` has run on this context
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// Bytes accounted since the last teardown
    pub fn allocated(&self) -> usize {
        self.inner.lock().allocated
    }

    /// Account `size` bytes against this context
    ///
    /// # Errors
    ///
    /// * `ContextError::OutOfMemory` - the configured budget would be exceeded
    /// * `ContextError::Destroyed` - the context was destroyed
    pub fn alloc(&self, size: usize) -> Result<(), ContextError> {
        let mut state = self.inner.lock();
        if state.destroyed {
            return Err(ContextError::Destroyed);
        }
        let total = state
            .allocated
            .checked_add(size)
            .ok_or(ContextError::OutOfMemory)?;
        if let Some(max) = self.inner.config.max_bytes {
            if total > max {
                return Err(ContextError::OutOfMemory);
            }
        }
        state.allocated = total;
        Ok(())
    }

    /// Register a cleanup to run when this context is torn down
    ///
    /// # Returns
    ///
    /// * `Ok(CleanupKey)` - Key to pass to `kill_cleanup`
    /// * `Err(ContextError::Destroyed)` - The context was destroyed
    pub fn register_cleanup<F>(&self, cleanup: F) -> Result<CleanupKey, ContextError>
    where
        F: FnOnce() -> io::Result<()> + Send + 'static,
    {
        let mut state = self.inner.lock();
        if state.destroyed {
            return Err(ContextError::Destroyed);
        }
        let key = CleanupKey(state.next_key);
        state.next_key += 1;
        state.cleanups.insert(key, Box::new(cleanup));
        trace!(context = self.inner.id, key = key.0, "cleanup registered");
        Ok(key)
    }

    /// Unregister a cleanup without running it
    ///
    /// Returns `true` if a registration was removed.
    pub fn kill_cleanup(&self, key: CleanupKey) -> bool {
        let removed = self.inner.lock().cleanups.remove(&key);
        trace!(context = self.inner.id, key = key.0, removed = removed.is_some(), "cleanup killed");
        removed.is_some()
    }

    /// Whether `key` is currently registered
    pub fn has_cleanup(&self, key: CleanupKey) -> bool {
        self.inner.lock().cleanups.contains_key(&key)
    }

    /// Number of pending cleanup registrations
    pub fn cleanup_count(&self) -> usize {
        self.inner.lock().cleanups.len()
    }

    /// Store user data under `key`
    ///
    /// A value already stored under `key` is replaced and its cleanup, if
    /// any, runs immediately.
    pub fn set_userdata(
        &self,
        key: &str,
        value: UserData,
        cleanup: Option<CleanupFn>,
    ) -> Result<(), ContextError> {
        let previous = {
            let mut state = self.inner.lock();
            if state.destroyed {
                return Err(ContextError::Destroyed);
            }
            state
                .userdata
                .insert(key.to_string(), UserDataEntry { value, cleanup })
        };

        if let Some(cleanup) = previous.and_then(|entry| entry.cleanup) {
            if let Err(err) = cleanup() {
                warn!(context = self.inner.id, key, error = %err, "replaced user data cleanup failed");
            }
        }
        Ok(())
    }

    /// Fetch user data stored under `key`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::NotFound` if nothing is stored under `key`.
    pub fn userdata(&self, key: &str) -> Result<UserData, ContextError> {
        self.inner
            .lock()
            .userdata
            .get(key)
            .map(|entry| Arc::clone(&entry.value))
            .ok_or(ContextError::NotFound)
    }

    /// Tear down subcontexts, run cleanups and drop user data
    ///
    /// The context itself stays usable afterwards.
    pub fn clear(&self) {
        let teardown = {
            let mut state = self.inner.lock();
            if state.destroyed {
                return;
            }
            take_teardown(&mut state, false)
        };
        debug!(context = self.inner.id, "clearing context");
        teardown.run(self.inner.id);
    }

    /// Tear this context down for good and detach it from its parent
    ///
    /// Calling `destroy` more than once is harmless.
    pub fn destroy(&self) {
        self.destroy_detached();
        if let Some(parent) = self.inner.parent.upgrade() {
            parent
                .lock()
                .children
                .retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
        }
    }

    fn destroy_detached(&self) {
        let teardown = {
            let mut state = self.inner.lock();
            if state.destroyed {
                return;
            }
            take_teardown(&mut state, true)
        };
        debug!(context = self.inner.id, "destroying context");
        teardown.run(self.inner.id);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("parent", &self.inner.parent.upgrade().map(|p| p.id))
            .field("config", &self.inner.config)
            .finish()
    }
}
