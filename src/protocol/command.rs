//! Command definitions
//!
//! Typed requests produced by the codec, one variant per protocol command.

use bytes::Bytes;

/// Arguments shared by every storage command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequest {
    pub key: Bytes,
    pub flags: u32,
    /// Expiration in memcached convention (0 = never, < 0 = already expired,
    /// > 30 days = absolute Unix time)
    pub exptime: i64,
    pub data: Bytes,
    pub noreply: bool,
}

/// A parsed client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `get <key>*`
    Get { keys: Vec<Bytes> },
    /// `gets <key>*`, like get but also returns CAS tokens
    Gets { keys: Vec<Bytes> },
    Set(StorageRequest),
    Add(StorageRequest),
    Replace(StorageRequest),
    Append(StorageRequest),
    Prepend(StorageRequest),
    /// `cas <key> <flags> <exptime> <bytes> <cas unique> [noreply]`
    Cas {
        request: StorageRequest,
        cas_unique: u64,
    },
    Delete { key: Bytes, noreply: bool },
    Incr { key: Bytes, delta: u64, noreply: bool },
    Decr { key: Bytes, delta: u64, noreply: bool },
    Touch { key: Bytes, exptime: i64, noreply: bool },
    /// `flush_all [delay] [noreply]`
    FlushAll { delay: u32, noreply: bool },
    Stats,
    Version,
    /// Close the connection without a reply
    Quit,
}

impl Command {
    /// Protocol name of the command, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Gets { .. } => "gets",
            Command::Set(_) => "set",
            Command::Add(_) => "add",
            Command::Replace(_) => "replace",
            Command::Append(_) => "append",
            Command::Prepend(_) => "prepend",
            Command::Cas { .. } => "cas",
            Command::Delete { .. } => "delete",
            Command::Incr { .. } => "incr",
            Command::Decr { .. } => "decr",
            Command::Touch { .. } => "touch",
            Command::FlushAll { .. } => "flush_all",
            Command::Stats => "stats",
            Command::Version => "version",
            Command::Quit => "quit",
        }
    }

    /// Whether the client asked for the reply to be suppressed
    pub fn noreply(&self) -> bool {
        match self {
            Command::Set(req)
            | Command::Add(req)
            | Command::Replace(req)
            | Command::Append(req)
            | Command::Prepend(req)
            | Command::Cas { request: req, .. } => req.noreply,
            Command::Delete { noreply, .. }
            | Command::Incr { noreply, .. }
            | Command::Decr { noreply, .. }
            | Command::Touch { noreply, .. }
            | Command::FlushAll { noreply, .. } => *noreply,
            Command::Get { .. }
            | Command::Gets { .. }
            | Command::Stats
            | Command::Version
            | Command::Quit => false,
        }
    }
}
