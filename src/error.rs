//! Error types for the cache server
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache server.
///
/// Every variant maps onto exactly one wire reply (see `protocol::Response`).
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed request line or frame
    #[error("{0}")]
    Parse(String),

    /// Command name not recognised
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Well-formed request with invalid arguments (bad key, bad delta)
    #[error("{0}")]
    Client(String),

    /// Key absent or expired
    #[error("key not found")]
    KeyNotFound,

    /// Key already present (add)
    #[error("key exists")]
    KeyExists,

    /// CAS token does not match the stored version
    #[error("version mismatch")]
    VersionMismatch,

    /// Stored value is not an unsigned decimal integer
    #[error("cannot increment or decrement non-numeric value")]
    NotANumber,

    /// Internal fault (object too large, out of memory, corrupted shard)
    #[error("{0}")]
    Server(String),

    /// Connection-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// == Result Type Alias ==
/// Convenience Result type for the cache server.
pub type Result<T> = std::result::Result<T, CacheError>;
