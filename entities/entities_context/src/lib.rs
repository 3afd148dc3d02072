//! Entities Layer: Resource-Lifetime Contexts
//!
//! Provides the scope mechanism that every OS resource in the workspace is
//! tied to. A [`Context`] owns allocation accounting, an ordered list of
//! cleanup callbacks and a small user-data bag. Tearing a context down runs
//! each registered cleanup exactly once.
//!
//! ## Overview
//!
//! - **Hierarchy**: subcontexts are owned by their parent and torn down first
//! - **Cleanups**: one callback per resource, keyed by [`CleanupKey`]
//! - **User data**: string-keyed values with optional cleanup
//!
//! ## See Also
//!
//! - [`adapters_socket`](../adapters_socket/index.html): sockets whose
//!   descriptors are released by context teardown

pub mod context;

pub use context::{
    CleanupFn, CleanupKey, Context, ContextConfig, ContextError, UserData, WeakContext,
};
