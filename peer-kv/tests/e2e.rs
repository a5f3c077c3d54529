use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use peer_kv::client::Client;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdout, Command},
    time::{sleep, timeout},
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn two_node_binaries_replicate() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("peer_kv");

    // Start B standalone first to learn its port, then A pointing at B.
    let (mut node_b, mut b_stdout) = spawn_node(&binary, None).await?;
    let addr_b = read_listen_addr(&mut b_stdout).await?;
    let b_logs = tokio::spawn(drain_stdout(b_stdout));

    let (mut node_a, mut a_stdout) = spawn_node(&binary, Some(&addr_b)).await?;
    let addr_a = read_listen_addr(&mut a_stdout).await?;
    let a_logs = tokio::spawn(drain_stdout(a_stdout));

    let mut client_a = Client::connect(addr_a.as_str()).await?;
    assert_eq!(client_a.set("foo", "bar").await?, "OK");

    let mut client_b = Client::connect(addr_b.as_str()).await?;
    let mut value = String::new();
    for _ in 0..50 {
        value = client_b.get("foo").await?;
        if value == "bar" {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(value, "bar");

    // B has no peer, so its writes stay local.
    assert_eq!(client_b.set("only_b", "1").await?, "OK");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(client_a.get("only_b").await?, "None");

    client_a.close().await;
    client_b.close().await;

    for child in [&mut node_a, &mut node_b] {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
    let _ = a_logs.await;
    let _ = b_logs.await;

    Ok(())
}

#[tokio::test]
async fn client_subcommand_round_trip() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("peer_kv");

    let (mut node, mut node_stdout) = spawn_node(&binary, None).await?;
    let addr = read_listen_addr(&mut node_stdout).await?;
    let node_logs = tokio::spawn(drain_stdout(node_stdout));

    let mut cmd = Command::new(&binary);
    cmd.arg("client")
        .arg("--server")
        .arg(&addr)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    let mut client = cmd.spawn().context("failed to spawn client")?;
    let mut stdin = client.stdin.take().context("client stdin missing")?;
    let mut stdout = BufReader::new(client.stdout.take().context("client stdout missing")?);

    stdin.write_all(b"SET greeting hello\n").await?;
    assert_eq!(read_line_expect(&mut stdout, "set reply").await?, "OK");
    stdin.write_all(b"get greeting\n").await?;
    assert_eq!(read_line_expect(&mut stdout, "get reply").await?, "hello");
    stdin.write_all(b"FROB x\n").await?;
    assert_eq!(
        read_line_expect(&mut stdout, "error reply").await?,
        "ERROR invalid command 'FROB'"
    );
    stdin.write_all(b"quit\n").await?;
    stdin.flush().await?;

    let status = timeout(READ_TIMEOUT, client.wait()).await??;
    assert!(status.success(), "client exited with {status}");

    let _ = node.kill().await;
    let _ = node.wait().await;
    let _ = node_logs.await;
    Ok(())
}

async fn spawn_node(binary: &Path, peer: Option<&str>) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("serve").arg("--listen").arg("127.0.0.1:0");
    if let Some(peer) = peer {
        cmd.arg("--peer").arg(peer);
    }
    cmd.env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn node")?;
    let stdout = child
        .stdout
        .take()
        .context("node stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_listen_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line_expect(reader, "waiting for listen banner").await?;
    let addr = line
        .split_whitespace()
        .last()
        .context("unexpected node banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("node banner missing socket: {line}"));
    }
    Ok(addr.to_string())
}

async fn read_line_expect<R>(reader: &mut R, description: &str) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result.with_context(|| format!("{description}: failed to read line"))?,
        Err(_) => return Err(anyhow!("{description}: timed out waiting for line")),
    };
    if bytes == 0 {
        return Err(anyhow!("{description}: stream closed"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
