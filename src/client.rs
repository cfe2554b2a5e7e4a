//! One-shot client: every call opens a connection, sends one request and
//! reads the matching response.

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::codec::{read_response, write_request, Lookup, Request, Response};
use crate::protocol::MAX_BLOB_SIZE;

pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect {}", addr))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Send `request` and decode the response shape that belongs to it.
pub async fn exchange(addr: &str, request: &Request) -> Result<Response> {
    if matches!(request, Request::Exit) {
        bail!("EXIT has no response; use client::exit");
    }
    let mut stream = connect(addr).await?;
    write_request(&mut stream, request, MAX_BLOB_SIZE)
        .await
        .context("send request")?;
    let response = read_response(&mut stream, request.action(), MAX_BLOB_SIZE)
        .await
        .context("read response")?;
    Ok(response)
}

pub async fn put(addr: &str, server_filename: &str, content: Vec<u8>) -> Result<Response> {
    exchange(
        addr,
        &Request::Put {
            filename: server_filename.to_string(),
            content,
        },
    )
    .await
}

pub async fn get(addr: &str, lookup: Lookup, identifier: &str) -> Result<Response> {
    exchange(
        addr,
        &Request::Get {
            lookup,
            identifier: identifier.to_string(),
        },
    )
    .await
}

pub async fn delete(addr: &str, lookup: Lookup, identifier: &str) -> Result<Response> {
    exchange(
        addr,
        &Request::Delete {
            lookup,
            identifier: identifier.to_string(),
        },
    )
    .await
}

/// Ask the server to shut down. The server closes without answering.
pub async fn exit(addr: &str) -> Result<()> {
    let mut stream = connect(addr).await?;
    write_request(&mut stream, &Request::Exit, MAX_BLOB_SIZE)
        .await
        .context("send EXIT")?;
    stream.shutdown().await.ok();
    Ok(())
}
