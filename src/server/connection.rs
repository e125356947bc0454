//! Connection Handler
//!
//! Drives one client: reads bytes, parses every complete request already
//! buffered, executes them in arrival order and flushes the batch of replies
//! with a single write.

use std::io::ErrorKind;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::{encode_response, parse_request, Command, ParseOutcome, Response};
use crate::server::handlers::{handle_command, AppState};

const READ_BUFFER_CAPACITY: usize = 4096;

/// What the read loop does after draining the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Outcome of waiting for more input
enum ReadOutcome {
    Data,
    Eof,
    IdleTimeout,
    Shutdown,
}

// == Connection ==
/// A single client session over any byte stream.
pub struct Connection<S> {
    stream: S,
    peer: String,
    state: AppState,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        state: AppState,
        idle_timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            state,
            read_buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            write_buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            idle_timeout,
            shutdown,
        }
    }

    /// Runs the session until the client leaves, `quit`s, idles out, sends an
    /// unrecoverable frame, or the server shuts down.
    ///
    /// A peer reset is treated as an ordinary close.
    pub async fn handle(&mut self) -> Result<()> {
        match self.run().await {
            Err(crate::error::CacheError::Io(e))
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof
                ) =>
            {
                debug!(peer = %self.peer, "Peer reset connection");
                Ok(())
            }
            other => other,
        }
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            let flow = self.process_buffered();
            self.flush_replies().await?;
            if flow == Flow::Close {
                return Ok(());
            }

            let shutdown = self.shutdown.clone();
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => ReadOutcome::Shutdown,
                outcome = self.read_more() => outcome?,
            };

            match outcome {
                ReadOutcome::Data => {}
                ReadOutcome::Eof => {
                    if !self.read_buffer.is_empty() {
                        debug!(
                            peer = %self.peer,
                            pending = self.read_buffer.len(),
                            "Client closed mid-request"
                        );
                    }
                    return Ok(());
                }
                ReadOutcome::IdleTimeout => {
                    info!(peer = %self.peer, "Closing idle connection");
                    return Ok(());
                }
                ReadOutcome::Shutdown => {
                    debug!(peer = %self.peer, "Closing connection for shutdown");
                    return Ok(());
                }
            }
        }
    }

    /// Executes every complete request in the read buffer, appending replies
    /// to the write buffer in the same order.
    fn process_buffered(&mut self) -> Flow {
        loop {
            match parse_request(&self.read_buffer, self.state.max_item_size) {
                Ok(ParseOutcome::Complete { command, consumed }) => {
                    self.read_buffer.advance(consumed);
                    if matches!(command, Command::Quit) {
                        debug!(peer = %self.peer, "Client quit");
                        return Flow::Close;
                    }
                    debug!(peer = %self.peer, command = command.name(), "Executing");
                    if let Some(response) = handle_command(&self.state, command) {
                        encode_response(&response, &mut self.write_buffer);
                    }
                }
                Ok(ParseOutcome::Rejected { error, consumed }) => {
                    self.read_buffer.advance(consumed);
                    debug!(peer = %self.peer, %error, "Rejected request");
                    encode_response(&Response::from(error), &mut self.write_buffer);
                }
                Ok(ParseOutcome::NeedMoreData) => return Flow::Continue,
                Err(error) => {
                    warn!(peer = %self.peer, %error, "Unrecoverable request, closing connection");
                    encode_response(&Response::from(error), &mut self.write_buffer);
                    self.read_buffer.clear();
                    return Flow::Close;
                }
            }
        }
    }

    async fn flush_replies(&mut self) -> Result<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;
        self.write_buffer.clear();
        Ok(())
    }

    async fn read_more(&mut self) -> Result<ReadOutcome> {
        let read = self.stream.read_buf(&mut self.read_buffer);
        let n = match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result?,
                Err(_) => return Ok(ReadOutcome::IdleTimeout),
            },
            None => read.await?,
        };

        Ok(if n == 0 {
            ReadOutcome::Eof
        } else {
            ReadOutcome::Data
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cache::{ShardedCache, StoreLimits};
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    fn test_state() -> AppState {
        AppState::new(Arc::new(ShardedCache::new(2, StoreLimits::default())), 1024)
    }

    async fn run_mock(state: AppState, mock: tokio_test::io::Mock) {
        let mut conn = Connection::new(mock, "test", state, None, CancellationToken::new());
        conn.handle().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let mock = Builder::new()
            .read(b"set x 0 0 6\r\n0.1234\r\n")
            .write(b"STORED\r\n")
            .read(b"get x\r\n")
            .write(b"VALUE x 0 6\r\n0.1234\r\nEND\r\n")
            .build();
        run_mock(test_state(), mock).await;
    }

    #[tokio::test]
    async fn test_pipelined_replies_keep_order() {
        let mock = Builder::new()
            .read(b"set a 0 0 1\r\n1\r\nget a\r\ndelete a\r\nget a\r\n")
            .write(b"STORED\r\nVALUE a 0 1\r\n1\r\nEND\r\nDELETED\r\nEND\r\n")
            .build();
        run_mock(test_state(), mock).await;
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = Builder::new()
            .read(b"set k 0 0 5\r\nhe")
            .read(b"llo\r\n")
            .write(b"STORED\r\n")
            .build();
        let state = test_state();
        run_mock(state.clone(), mock).await;

        let entry = state.cache.get(b"k").unwrap().unwrap();
        assert_eq!(&entry.value[..], b"hello");
    }

    #[tokio::test]
    async fn test_noreply_sends_nothing() {
        let mock = Builder::new()
            .read(b"set k 0 0 1 noreply\r\nv\r\nget k\r\n")
            .write(b"VALUE k 0 1\r\nv\r\nEND\r\n")
            .build();
        run_mock(test_state(), mock).await;
    }

    #[tokio::test]
    async fn test_error_does_not_close() {
        let mock = Builder::new()
            .read(b"bogus\r\nversion\r\n")
            .write(format!("ERROR\r\nVERSION {}\r\n", crate::VERSION).as_bytes())
            .build();
        run_mock(test_state(), mock).await;
    }

    #[tokio::test]
    async fn test_quit_closes_without_reply() {
        // Nothing after quit is executed
        let mock = Builder::new().read(b"quit\r\nset k 0 0 1\r\nv\r\n").build();
        let state = test_state();
        run_mock(state.clone(), mock).await;
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_item_closes_connection() {
        let mock = Builder::new()
            .read(b"set k 0 0 4096\r\n")
            .write(b"SERVER_ERROR object too large for cache\r\n")
            .build();
        run_mock(test_state(), mock).await;
    }

    #[tokio::test]
    async fn test_extreme_exptime_is_stored() {
        let mock = Builder::new()
            .read(b"set k 0 99999999999999999 1\r\nv\r\nget k\r\n")
            .write(b"STORED\r\nVALUE k 0 1\r\nv\r\nEND\r\n")
            .read(b"touch k 9223372036854775807\r\nget k\r\n")
            .write(b"TOUCHED\r\nVALUE k 0 1\r\nv\r\nEND\r\n")
            .build();
        run_mock(test_state(), mock).await;
    }

    #[tokio::test]
    async fn test_idle_timeout_closes() {
        let (_client, server) = duplex(1024);
        let mut conn = Connection::new(
            server,
            "idle",
            test_state(),
            Some(Duration::from_millis(50)),
            CancellationToken::new(),
        );

        let result = tokio::time::timeout(Duration::from_secs(2), conn.handle()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_shutdown_closes_waiting_connection() {
        let (_client, server) = duplex(1024);
        let token = CancellationToken::new();
        let mut conn = Connection::new(server, "shutdown", test_state(), None, token.clone());

        let handle = tokio::spawn(async move { conn.handle().await });
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
