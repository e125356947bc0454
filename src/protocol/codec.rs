//! Protocol codec
//!
//! Parsing and encoding for the memcached text protocol.
//!
//! ## Wire Format
//!
//! ### Request
//! ```text
//! <command> <key> [<flags> <exptime> <bytes> [<cas unique>]] [noreply]\r\n
//! [<data block of exactly <bytes> bytes>\r\n]
//! ```
//!
//! ### Retrieval reply
//! ```text
//! VALUE <key> <flags> <bytes> [<cas unique>]\r\n
//! <data block>\r\n
//! ...
//! END\r\n
//! ```

use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use super::{Command, Response, StorageRequest};
use crate::cache::validate_key;
use crate::error::{CacheError, Result};

const CRLF: &[u8] = b"\r\n";

/// Longest unterminated command line tolerated before the stream is abandoned
pub const MAX_LINE_LENGTH: usize = 2048;

/// Outcome of one [`parse_request`] call
#[derive(Debug)]
pub enum ParseOutcome {
    /// A full request; `consumed` bytes belong to it
    Complete { command: Command, consumed: usize },
    /// A full but invalid request; reply with `error` and skip `consumed` bytes
    Rejected { error: CacheError, consumed: usize },
    /// The buffer holds only part of a request
    NeedMoreData,
}

// == Request Parsing ==

/// Parses the first request in `buf`.
///
/// Nothing is consumed until a full frame (command line plus any declared data
/// block and its terminator) is buffered. An `Err` means the stream cannot be
/// resynchronised: the caller should reply with it and close the connection.
pub fn parse_request(buf: &[u8], max_item_size: usize) -> Result<ParseOutcome> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_LINE_LENGTH {
            return Err(CacheError::Client("line too long".to_string()));
        }
        return Ok(ParseOutcome::NeedMoreData);
    };

    let line_len = newline + 1;
    let line = buf[..newline].strip_suffix(b"\r").unwrap_or(&buf[..newline]);
    let tokens: Vec<&[u8]> = line
        .split(|&b| b == b' ')
        .filter(|t| !t.is_empty())
        .collect();

    let Some((&name, args)) = tokens.split_first() else {
        return Ok(rejected(CacheError::UnknownCommand(String::new()), line_len));
    };

    match name {
        b"set" | b"add" | b"replace" | b"append" | b"prepend" | b"cas" => {
            parse_storage(name, args, buf, line_len, max_item_size)
        }
        b"get" | b"gets" => Ok(parse_retrieval(name == b"gets", args, line_len)),
        b"delete" => Ok(parse_delete(args, line_len)),
        b"incr" | b"decr" => Ok(parse_arith(name == b"incr", args, line_len)),
        b"touch" => Ok(parse_touch(args, line_len)),
        b"flush_all" => Ok(parse_flush_all(args, line_len)),
        b"stats" | b"version" | b"quit" if !args.is_empty() => {
            Ok(rejected(bad_format(), line_len))
        }
        b"stats" => Ok(complete(Command::Stats, line_len)),
        b"version" => Ok(complete(Command::Version, line_len)),
        b"quit" => Ok(complete(Command::Quit, line_len)),
        other => Ok(rejected(
            CacheError::UnknownCommand(String::from_utf8_lossy(other).into_owned()),
            line_len,
        )),
    }
}

fn complete(command: Command, consumed: usize) -> ParseOutcome {
    ParseOutcome::Complete { command, consumed }
}

fn rejected(error: CacheError, consumed: usize) -> ParseOutcome {
    ParseOutcome::Rejected { error, consumed }
}

fn bad_format() -> CacheError {
    CacheError::Parse("bad command line format".to_string())
}

fn number<T: FromStr>(token: &[u8]) -> Option<T> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

/// Splits a trailing `noreply` token off the argument list.
fn split_noreply<'a, 'b>(args: &'a [&'b [u8]]) -> (&'a [&'b [u8]], bool) {
    match args.split_last() {
        Some((&last, rest)) if last == b"noreply" => (rest, true),
        _ => (args, false),
    }
}

/// `<cmd> <key> <flags> <exptime> <bytes> [<cas unique>] [noreply]` + data block
fn parse_storage(
    name: &[u8],
    args: &[&[u8]],
    buf: &[u8],
    line_len: usize,
    max_item_size: usize,
) -> Result<ParseOutcome> {
    let is_cas = name == b"cas";
    let (args, noreply) = split_noreply(args);
    let expected_args = if is_cas { 5 } else { 4 };
    if args.len() != expected_args {
        return Ok(rejected(bad_format(), line_len));
    }

    let parsed = (
        number::<u32>(args[1]),
        number::<i64>(args[2]),
        number::<usize>(args[3]),
    );
    let (Some(flags), Some(exptime), Some(length)) = parsed else {
        return Ok(rejected(bad_format(), line_len));
    };
    let cas_unique = if is_cas {
        match number::<u64>(args[4]) {
            Some(token) => token,
            None => return Ok(rejected(bad_format(), line_len)),
        }
    } else {
        0
    };

    if length > max_item_size {
        return Err(CacheError::Server("object too large for cache".to_string()));
    }

    let frame_len = line_len + length + CRLF.len();
    if buf.len() < frame_len {
        return Ok(ParseOutcome::NeedMoreData);
    }
    if &buf[line_len + length..frame_len] != CRLF {
        return Ok(rejected(
            CacheError::Client("bad data chunk".to_string()),
            frame_len,
        ));
    }
    if let Err(e) = validate_key(args[0]) {
        return Ok(rejected(e, frame_len));
    }

    let request = StorageRequest {
        key: Bytes::copy_from_slice(args[0]),
        flags,
        exptime,
        data: Bytes::copy_from_slice(&buf[line_len..line_len + length]),
        noreply,
    };
    let command = match name {
        b"set" => Command::Set(request),
        b"add" => Command::Add(request),
        b"replace" => Command::Replace(request),
        b"append" => Command::Append(request),
        b"prepend" => Command::Prepend(request),
        _ => Command::Cas {
            request,
            cas_unique,
        },
    };
    Ok(complete(command, frame_len))
}

/// `get|gets <key>*`
fn parse_retrieval(with_cas: bool, args: &[&[u8]], line_len: usize) -> ParseOutcome {
    if args.is_empty() {
        return rejected(CacheError::UnknownCommand("get".to_string()), line_len);
    }
    let mut keys = Vec::with_capacity(args.len());
    for key in args {
        if let Err(e) = validate_key(key) {
            return rejected(e, line_len);
        }
        keys.push(Bytes::copy_from_slice(key));
    }
    let command = if with_cas {
        Command::Gets { keys }
    } else {
        Command::Get { keys }
    };
    complete(command, line_len)
}

/// `delete <key> [0] [noreply]`
fn parse_delete(args: &[&[u8]], line_len: usize) -> ParseOutcome {
    let (args, noreply) = split_noreply(args);
    let key = match args {
        [key] => key,
        // Legacy clients send a zero hold time
        [key, time] if *time == b"0" => key,
        [_, _] => {
            return rejected(
                CacheError::Client(
                    "bad command line format.  Usage: delete <key> [noreply]".to_string(),
                ),
                line_len,
            )
        }
        _ => return rejected(bad_format(), line_len),
    };
    if let Err(e) = validate_key(key) {
        return rejected(e, line_len);
    }
    complete(
        Command::Delete {
            key: Bytes::copy_from_slice(key),
            noreply,
        },
        line_len,
    )
}

/// `incr|decr <key> <delta> [noreply]`
fn parse_arith(increment: bool, args: &[&[u8]], line_len: usize) -> ParseOutcome {
    let (args, noreply) = split_noreply(args);
    let [key, delta] = args else {
        return rejected(bad_format(), line_len);
    };
    if let Err(e) = validate_key(key) {
        return rejected(e, line_len);
    }
    let Some(delta) = number::<u64>(delta) else {
        return rejected(
            CacheError::Client("invalid numeric delta argument".to_string()),
            line_len,
        );
    };
    let key = Bytes::copy_from_slice(key);
    let command = if increment {
        Command::Incr {
            key,
            delta,
            noreply,
        }
    } else {
        Command::Decr {
            key,
            delta,
            noreply,
        }
    };
    complete(command, line_len)
}

/// `touch <key> <exptime> [noreply]`
fn parse_touch(args: &[&[u8]], line_len: usize) -> ParseOutcome {
    let (args, noreply) = split_noreply(args);
    let [key, exptime] = args else {
        return rejected(bad_format(), line_len);
    };
    if let Err(e) = validate_key(key) {
        return rejected(e, line_len);
    }
    let Some(exptime) = number::<i64>(exptime) else {
        return rejected(
            CacheError::Client("invalid exptime argument".to_string()),
            line_len,
        );
    };
    complete(
        Command::Touch {
            key: Bytes::copy_from_slice(key),
            exptime,
            noreply,
        },
        line_len,
    )
}

/// `flush_all [delay] [noreply]`
fn parse_flush_all(args: &[&[u8]], line_len: usize) -> ParseOutcome {
    let (args, noreply) = split_noreply(args);
    let delay = match args {
        [] => 0,
        [delay] => match number::<u32>(delay) {
            Some(delay) => delay,
            None => return rejected(bad_format(), line_len),
        },
        _ => return rejected(bad_format(), line_len),
    };
    complete(Command::FlushAll { delay, noreply }, line_len)
}

// == Response Encoding ==

/// Appends the wire form of `response` to `out`.
pub fn encode_response(response: &Response, out: &mut BytesMut) {
    match response {
        Response::Stored => out.put_slice(b"STORED\r\n"),
        Response::NotStored => out.put_slice(b"NOT_STORED\r\n"),
        Response::Exists => out.put_slice(b"EXISTS\r\n"),
        Response::NotFound => out.put_slice(b"NOT_FOUND\r\n"),
        Response::Deleted => out.put_slice(b"DELETED\r\n"),
        Response::Touched => out.put_slice(b"TOUCHED\r\n"),
        Response::Ok => out.put_slice(b"OK\r\n"),
        Response::Error => out.put_slice(b"ERROR\r\n"),
        Response::Values { items, with_cas } => {
            for item in items {
                out.put_slice(b"VALUE ");
                out.put_slice(&item.key);
                let header = if *with_cas {
                    format!(" {} {} {}\r\n", item.flags, item.data.len(), item.cas)
                } else {
                    format!(" {} {}\r\n", item.flags, item.data.len())
                };
                out.put_slice(header.as_bytes());
                out.put_slice(&item.data);
                out.put_slice(CRLF);
            }
            out.put_slice(b"END\r\n");
        }
        Response::Number(n) => {
            out.put_slice(n.to_string().as_bytes());
            out.put_slice(CRLF);
        }
        Response::Stats(stats) => {
            for (name, value) in stats {
                out.put_slice(format!("STAT {} {}\r\n", name, value).as_bytes());
            }
            out.put_slice(b"END\r\n");
        }
        Response::Version(version) => {
            out.put_slice(format!("VERSION {}\r\n", version).as_bytes());
        }
        Response::ClientError(msg) => {
            out.put_slice(format!("CLIENT_ERROR {}\r\n", msg).as_bytes());
        }
        Response::ServerError(msg) => {
            out.put_slice(format!("SERVER_ERROR {}\r\n", msg).as_bytes());
        }
    }
}

/// Convenience wrapper returning the encoded bytes.
pub fn encode_to_vec(response: &Response) -> Vec<u8> {
    let mut out = BytesMut::new();
    encode_response(response, &mut out);
    out.to_vec()
}

// == Unit Tests ==
