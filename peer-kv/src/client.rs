//! Client side of the line protocol.
//!
//! [`Client`] keeps one connection open and pairs every request with the
//! response line that follows it. [`run`] wraps it in a small stdin REPL.

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{read_line, write_line},
};

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + std::fmt::Display,
    {
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Sends one raw request line and waits for its response line.
    pub async fn request(&mut self, line: &str) -> Result<String> {
        write_line(&mut self.writer, line)
            .await
            .context("failed to send request")?;
        read_line(&mut self.reader)
            .await
            .context("failed to read response")?
            .ok_or_else(|| anyhow!("server closed the connection"))
    }

    pub async fn get(&mut self, key: &str) -> Result<String> {
        self.request(&format!("GET {key}")).await
    }

    pub async fn set(&mut self, key: &str, value: &str) -> Result<String> {
        self.request(&format!("SET {key} {value}")).await
    }

    pub async fn delete(&mut self, key: &str) -> Result<String> {
        self.request(&format!("DELETE {key}")).await
    }

    pub async fn close(mut self) {
        if let Err(error) = self.writer.shutdown().await {
            warn!(?error, "failed to shutdown client writer cleanly");
        }
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut client = Client::connect(args.server.as_str()).await?;
    info!("connected to {}", args.server);

    let mut stdin = BufReader::new(io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &mut client).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}

const HELP_TEXT: &str = "\
commands:
  SET <key> <value>   store a value
  GET <key>           print a value, or None
  DELETE <key>        remove a key (DEL also works)
  help                show this list
  exit                leave the client (quit also works)";

/// What one line typed at the prompt asks the REPL to do.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Blank,
    Help,
    Quit,
    Request(&'a str),
}

impl<'a> Input<'a> {
    fn classify(line: &'a str) -> Self {
        let text = line.trim();
        if text.is_empty() {
            Input::Blank
        } else if text.eq_ignore_ascii_case("help") {
            Input::Help
        } else if text.eq_ignore_ascii_case("quit") || text.eq_ignore_ascii_case("exit") {
            Input::Quit
        } else {
            Input::Request(text)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: std::io::Result<usize>,
    input: &str,
    client: &mut Client,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    match Input::classify(input) {
        Input::Blank => Ok(true),
        Input::Quit => Ok(false),
        Input::Help => {
            write_stdout(HELP_TEXT).await?;
            Ok(true)
        }
        Input::Request(text) => {
            let response = client.request(text).await?;
            write_stdout(&response).await?;
            Ok(true)
        }
    }
}

async fn write_stdout(line: &str) -> std::io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
