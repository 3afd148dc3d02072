//! API Facades Layer
//!
//! Provides the status-code socket API. Every facade takes nullable handle
//! and context arguments (`Option`), fills out-parameters, and returns a
//! [`Status`](status::Status): `SUCCESS`, an OS error code verbatim, or one
//! of the facade's own codes (`ENOSOCKET`, `ENOCONT`, ...).
//!
//! All facades call the Rust implementation in `adapters_socket`; no state
//! lives here.

pub mod socket_facades;
pub mod status;

// Re-export main facade types
pub use socket_facades::*;
pub use status::*;
