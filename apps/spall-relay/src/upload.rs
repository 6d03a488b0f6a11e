use std::path::Path;

use anyhow::{Context, Result};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{debug, info};

/// Reads `path` fully and writes it to the ingest endpoint at `addr` as one
/// unframed payload. Returns the number of bytes sent.
///
/// The relay takes a single bounded read per connection, so anything beyond
/// that bound (or split across fragments) is not ingested.
pub async fn send_trace(addr: &str, path: &Path) -> Result<usize> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read trace file {}", path.display()))?;

    debug!(addr, bytes = data.len(), "connecting to ingest endpoint");
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    stream
        .write_all(&data)
        .await
        .context("failed to send all bytes")?;
    stream.shutdown().await.context("failed to close ingest stream")?;

    info!(addr, bytes = data.len(), file = %path.display(), "trace sent");
    Ok(data.len())
}
