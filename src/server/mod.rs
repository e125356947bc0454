//! Server Module
//!
//! TCP front end: the listener, per-connection sessions and the command
//! handlers that sit between the protocol and the cache.

pub mod connection;
pub mod handlers;
pub mod listener;

pub use connection::Connection;
pub use handlers::{handle_command, AppState, ServerMetrics};
pub use listener::Server;
