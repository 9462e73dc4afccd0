//! Mediamesh Relay - store-and-forward fact relay
//!
//! Dumb relay node for catalog facts: keeps the latest fact per key in each
//! namespace and serves them to long-polling clients. It applies no merge
//! policy of its own; clients reconcile.

pub mod handlers;
pub mod server;

// Re-export main types
pub use server::{RelayError, RelayState, relay_router, run_relay};
