//! Protocol Module
//!
//! The memcached text protocol: typed commands and replies, plus the codec
//! converting between them and bytes. Knows nothing about storage.
//!
//! ### Commands
//! - Storage: `set`, `add`, `replace`, `append`, `prepend`, `cas`
//! - Retrieval: `get`, `gets`
//! - Other: `delete`, `incr`, `decr`, `touch`, `flush_all`, `stats`,
//!   `version`, `quit`

mod codec;
mod command;
mod response;

pub use codec::{encode_response, encode_to_vec, parse_request, ParseOutcome, MAX_LINE_LENGTH};
pub use command::{Command, StorageRequest};
pub use response::{Response, ValueItem};
