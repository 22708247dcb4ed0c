//! feox-lite: a minimal Redis-compatible front end for FeOxDB
//!
//! Clients speak the Redis request framing over TCP and may issue `get`,
//! `set` and `incr`; each request becomes a point lookup, a write, or a
//! read-modify-write against an embedded FeOx store.
//!
//! # Architecture
//!
//! - One thread runs a mio event loop that owns every socket and the store
//! - Each connection keeps a fixed-capacity receive buffer and handles at
//!   most one request per receive
//! - Replies are queued and drained on write readiness
//! - `incr` works on the stored ASCII digits, so counters never overflow

/// Configuration management for the server
pub mod config;

/// Error types and result aliases
pub mod error;

/// Receive buffering
pub mod io;

/// Network layer for connection management
pub mod network;

/// Request framing, commands and replies
pub mod protocol;

/// Core server implementation
pub mod server;

/// Storage adapter over the embedded engine
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use server::Server;
pub use storage::{FeoxStorage, MemoryStorage, Storage};
