//! Response definitions
//!
//! Structured replies, one variant per wire response.

use bytes::Bytes;

use crate::error::CacheError;

/// One hit in a `get`/`gets` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueItem {
    pub key: Bytes,
    pub flags: u32,
    pub data: Bytes,
    pub cas: u64,
}

/// A reply to send to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Touched,
    Ok,
    /// Retrieval result; `with_cas` selects the `gets` format
    Values { items: Vec<ValueItem>, with_cas: bool },
    /// New value after incr/decr
    Number(u64),
    Stats(Vec<(String, String)>),
    Version(String),
    /// Unknown command
    Error,
    ClientError(String),
    ServerError(String),
}

impl From<CacheError> for Response {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::UnknownCommand(_) => Response::Error,
            CacheError::Parse(msg) | CacheError::Client(msg) => Response::ClientError(msg),
            CacheError::KeyNotFound => Response::NotFound,
            CacheError::KeyExists => Response::NotStored,
            CacheError::VersionMismatch => Response::Exists,
            err @ CacheError::NotANumber => Response::ClientError(err.to_string()),
            CacheError::Server(msg) => Response::ServerError(msg),
            CacheError::Io(e) => Response::ServerError(e.to_string()),
        }
    }
}
