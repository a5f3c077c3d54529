//! Line protocol spoken by clients and peers.
//!
//! Every request and every response is a single `\n`-terminated line, so a
//! reader never has to guess where one message ends. Requests are whitespace
//! separated tokens with a case-insensitive command name:
//!
//! ```text
//! GET <key>
//! SET <key> <value>
//! DELETE <key>          (alias: DEL)
//! PROPAGATE <request>   (sent node-to-node, never forwarded again)
//! ```
//!
//! Responses are `OK`, the stored value, [`ABSENT_MARKER`] for a missing key, or
//! `ERROR <message>`.

use std::fmt;
use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Prefix a node puts in front of mutations it forwards to its peer.
pub const PROPAGATE_MARKER: &str = "PROPAGATE";

/// Response body for a GET on a key that is not stored.
pub const ABSENT_MARKER: &str = "None";

/// Longest request or response line accepted, excluding the line ending.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Operations against the key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    Delete { key: String },
}

impl Command {
    /// SET and DELETE change state and are forwarded to the peer; GET is local.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Command::Set { .. } | Command::Delete { .. })
    }

    pub fn key(&self) -> &str {
        match self {
            Command::Get { key } | Command::Set { key, .. } | Command::Delete { key } => key,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Get { key } => write!(f, "GET {key}"),
            Command::Set { key, value } => write!(f, "SET {key} {value}"),
            Command::Delete { key } => write!(f, "DELETE {key}"),
        }
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A regular client. Mutations are applied and then forwarded to the peer.
    Client,
    /// A neighbouring node forwarding one of its mutations. Applied, never re-forwarded.
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub origin: Origin,
    pub command: Command,
}

impl Request {
    /// Parses one request line.
    ///
    /// Missing or surplus arguments are rejected rather than defaulted, so a
    /// client never silently stores an empty value.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let origin = if parts[0].eq_ignore_ascii_case(PROPAGATE_MARKER) {
            parts.remove(0);
            if parts.is_empty() {
                return Err(ProtocolError::MissingPropagatedCommand);
            }
            Origin::Peer
        } else {
            Origin::Client
        };

        let name = parts[0].to_ascii_uppercase();
        let command = match (name.as_str(), parts.len()) {
            ("GET", 2) => Command::Get {
                key: parts[1].to_string(),
            },
            ("SET", 3) => Command::Set {
                key: parts[1].to_string(),
                value: parts[2].to_string(),
            },
            ("DELETE" | "DEL", 2) => Command::Delete {
                key: parts[1].to_string(),
            },
            ("GET", _) => {
                return Err(ProtocolError::WrongArity {
                    usage: "GET requires exactly one argument: GET <key>",
                })
            }
            ("SET", _) => {
                return Err(ProtocolError::WrongArity {
                    usage: "SET requires exactly two arguments: SET <key> <value>",
                })
            }
            ("DELETE" | "DEL", _) => {
                return Err(ProtocolError::WrongArity {
                    usage: "DELETE requires exactly one argument: DELETE <key>",
                })
            }
            _ => return Err(ProtocolError::UnknownCommand(parts[0].to_string())),
        };

        Ok(Self { origin, command })
    }

    /// Whether applying this request should trigger a propagation attempt.
    pub fn should_propagate(&self) -> bool {
        self.origin == Origin::Client && self.command.is_mutation()
    }
}

/// Request lines the node cannot act on. Reported inline; the connection stays open.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,
    #[error("PROPAGATE must be followed by a command")]
    MissingPropagatedCommand,
    #[error("invalid command '{0}'")]
    UnknownCommand(String),
    #[error("{usage}")]
    WrongArity { usage: &'static str },
    #[error("line too long (limit {limit} bytes)")]
    LineTooLong { limit: usize },
}

impl ProtocolError {
    /// Recovers a protocol error carried inside an `io::Error` from [`read_line`].
    pub fn from_io(err: &io::Error) -> Option<&ProtocolError> {
        err.get_ref()?.downcast_ref()
    }
}

/// One reply line per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Value(String),
    NotFound,
    Error(String),
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::Error(err.to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => f.write_str("OK"),
            Response::Value(value) => f.write_str(value),
            Response::NotFound => f.write_str(ABSENT_MARKER),
            Response::Error(message) => write!(f, "ERROR {message}"),
        }
    }
}

/// Reads the next non-blank line, without its line ending.
///
/// Returns `Ok(None)` once the other side has closed the stream. Bytes that are not
/// valid UTF-8 are replaced rather than failing the connection.
///
/// A line longer than [`MAX_LINE_BYTES`] is skipped up to its terminator and reported
/// as an `InvalidData` error wrapping [`ProtocolError::LineTooLong`]; the reader is
/// then positioned at the next line and can keep being used.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the longest allowed line plus its `\r\n`.
    let window = MAX_LINE_BYTES as u64 + 2;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes = (&mut *reader)
            .take(window)
            .read_until(b'\n', &mut buf)
            .await?;
        if bytes == 0 {
            return Ok(None);
        }

        if !buf.ends_with(b"\n") && buf.len() as u64 == window {
            skip_past_newline(reader).await?;
            return Err(line_too_long());
        }

        let mut end = buf.len();
        while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        if end > MAX_LINE_BYTES {
            return Err(line_too_long());
        }

        let line = String::from_utf8_lossy(&buf[..end]);
        if line.trim().is_empty() {
            continue;
        }

        return Ok(Some(line.into_owned()));
    }
}

fn line_too_long() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        ProtocolError::LineTooLong {
            limit: MAX_LINE_BYTES,
        },
    )
}

async fn skip_past_newline<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&byte| byte == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Writes `line` followed by `\n` and flushes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
