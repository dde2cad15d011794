//! HTTP and WebSocket server for the quiz arena.
//!
//! The binary in `main.rs` wires these modules together; they live in a
//! library so integration tests can build the router without a socket.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
