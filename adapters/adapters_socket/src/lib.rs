//! Adapters Layer: Socket Handle Management
//!
//! Provides TCP stream sockets whose OS descriptors are owned by a resource
//! context from `entities_context`. Every way of obtaining a socket (fresh
//! creation, accepting a connection, importing a foreign descriptor)
//! registers a cleanup with the owning context, so the descriptor is closed
//! when the context is torn down even if the caller never closes it.
//!
//! ## Overview
//!
//! The `adapters_socket` crate provides:
//! - **Socket handles**: create, bind, listen, accept, connect, shutdown, close
//! - **Descriptor interchange**: import and export of raw OS descriptors
//! - **Address records**: local and remote endpoints of each handle
//! - **Name resolution**: a `Resolver` seam backed by `getaddrinfo(3)`
//!
//! Byte-level I/O and readiness polling are layered on top of these handles
//! elsewhere; this crate only manages descriptor lifecycle and addressing.
//!
//! ## Architecture
//!
//! This crate is part of the adapters layer in the CLEAN architecture implementation.
//! It depends on:
//! - `entities_context`: For resource-lifetime scopes and cleanup registration
//!
//! ## See Also
//!
//! - [`entities_context`](../entities_context/index.html): Context scopes
//! - [`api_facades`](../api_facades/index.html): Status-code facade over this crate

pub mod address;
pub mod config;
pub mod error;
pub mod resolver;
pub mod socket;

pub use address::{AddressFamily, AddressRecord};
pub use config::{SocketConfig, NO_TIMEOUT};
pub use error::SocketError;
pub use resolver::{Resolver, SystemResolver};
pub use socket::{ShutdownHow, Socket};
