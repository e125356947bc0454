//! Mini Memcache CLI Client
//!
//! Interactive line client: type a command, see the raw server reply.
//!
//! Storage commands are entered without the byte count; the value is asked
//! for on the next prompt and its length filled in:
//! `set <key> [flags [exptime]]`, `cas <key> <unique> [flags [exptime]]`.

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Mini Memcache CLI
#[derive(Parser, Debug)]
#[command(name = "mini_memcache-cli")]
#[command(about = "Interactive client for the Mini Memcache server")]
struct Args {
    /// Server address
    #[arg(default_value = "127.0.0.1:11211")]
    server: String,
}

const STORAGE_COMMANDS: [&str; 6] = ["set", "add", "replace", "append", "prepend", "cas"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut server = BufReader::new(read_half);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    println!("Connected to {}. Type `exit` to quit.", args.server);

    loop {
        prompt("Query: ").await?;
        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&keyword) = tokens.first() else {
            continue;
        };

        if keyword == "exit" {
            println!("Exiting program...");
            break;
        }

        let request = if STORAGE_COMMANDS.contains(&keyword) {
            prompt("Value to send: ").await?;
            let value = stdin.next_line().await?.unwrap_or_default();
            match storage_request(&tokens, &value) {
                Ok(request) => request,
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            }
        } else {
            format!("{}\r\n", tokens.join(" "))
        };

        send(&mut write_half, request.as_bytes()).await?;

        if keyword == "quit" {
            break;
        }
        if tokens.last() == Some(&"noreply") {
            continue;
        }

        let reply = read_reply(&mut server, keyword).await?;
        print!("{reply}");
    }

    println!("Connection closed.");
    Ok(())
}

async fn prompt(text: &str) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, request: &[u8]) -> anyhow::Result<()> {
    writer.write_all(request).await?;
    writer.flush().await?;
    Ok(())
}

/// Builds a full storage frame from `cmd key [unique] [flags [exptime]] [noreply]`.
fn storage_request(tokens: &[&str], value: &str) -> anyhow::Result<String> {
    let mut args: Vec<&str> = tokens.to_vec();
    let noreply = args.last() == Some(&"noreply");
    if noreply {
        args.pop();
    }

    let keyword = args[0];
    let Some(key) = args.get(1) else {
        bail!("usage: {keyword} <key> [flags [exptime]]");
    };

    let (unique, rest) = if keyword == "cas" {
        match args.get(2) {
            Some(unique) => (Some(*unique), &args[3..]),
            None => bail!("usage: cas <key> <unique> [flags [exptime]]"),
        }
    } else {
        (None, &args[2..])
    };
    let flags = rest.first().copied().unwrap_or("0");
    let exptime = rest.get(1).copied().unwrap_or("0");

    let mut header = format!("{keyword} {key} {flags} {exptime} {}", value.len());
    if let Some(unique) = unique {
        header.push(' ');
        header.push_str(unique);
    }
    if noreply {
        header.push_str(" noreply");
    }
    Ok(format!("{header}\r\n{value}\r\n"))
}

/// Reads one complete reply, including any `VALUE` data blocks.
async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R, keyword: &str) -> anyhow::Result<String> {
    let multi_line = matches!(keyword, "get" | "gets" | "stats");
    let mut reply = String::new();

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            bail!("server closed the connection");
        }
        reply.push_str(&line);

        let trimmed = line.trim_end();
        if trimmed == "ERROR"
            || trimmed.starts_with("CLIENT_ERROR")
            || trimmed.starts_with("SERVER_ERROR")
            || !multi_line
            || trimmed == "END"
        {
            return Ok(reply);
        }

        if let Some(header) = trimmed.strip_prefix("VALUE ") {
            let len: usize = header
                .split(' ')
                .nth(2)
                .and_then(|n| n.parse().ok())
                .context("malformed VALUE line")?;
            let mut block = vec![0u8; len + 2];
            reader.read_exact(&mut block).await?;
            reply.push_str(&String::from_utf8_lossy(&block));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_storage_request_fills_length() {
        let request = storage_request(&["set", "x"], "0.1234").unwrap();
        assert_eq!(request, "set x 0 0 6\r\n0.1234\r\n");

        let request = storage_request(&["cas", "x", "7", "3", "60", "noreply"], "ab").unwrap();
        assert_eq!(request, "cas x 3 60 2 7 noreply\r\nab\r\n");

        assert!(storage_request(&["cas", "x"], "ab").is_err());
    }

    #[tokio::test]
    async fn test_read_reply_with_value_block() {
        // Data containing "END" must not end the reply early
        let mock = Builder::new()
            .read(b"VALUE k 0 5\r\nEND\r\n\r\nEND\r\n")
            .build();
        let mut reader = BufReader::new(mock);

        let reply = read_reply(&mut reader, "get").await.unwrap();
        assert_eq!(reply, "VALUE k 0 5\r\nEND\r\n\r\nEND\r\n");
    }

    #[tokio::test]
    async fn test_read_reply_single_line() {
        let mock = Builder::new().read(b"STORED\r\n").build();
        let mut reader = BufReader::new(mock);
        assert_eq!(read_reply(&mut reader, "set").await.unwrap(), "STORED\r\n");
    }
}
