use std::{io, net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use crate::{admission::AdmissionPermit, buffer::TraceBuffer, service::RelayService};

/// Upper bound on the single read performed per ingest connection.
pub const MAX_INGEST_READ: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to bind ingest listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("ingest accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("trace read failed: {0}")]
    Read(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub bytes_read: usize,
    pub fill_cursor: usize,
}

/// Performs the one bounded read allowed per connection and appends whatever
/// arrived. Bytes beyond `max_bytes`, or delivered after the first chunk, are
/// never read. On error the staging area is discarded and the buffer is left
/// untouched.
pub async fn read_trace<R>(
    reader: &mut R,
    buffer: &TraceBuffer,
    max_bytes: usize,
) -> Result<IngestOutcome, IngestError>
where
    R: AsyncRead + Unpin,
{
    let mut staging = vec![0u8; max_bytes];
    let bytes_read = reader.read(&mut staging).await.map_err(IngestError::Read)?;
    let fill_cursor = buffer.append(&staging[..bytes_read]);
    Ok(IngestOutcome {
        bytes_read,
        fill_cursor,
    })
}

/// Raw TCP listener that feeds the trace buffer, one admitted session at a time.
pub struct IngestListener {
    listener: TcpListener,
}

impl IngestListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, IngestError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| IngestError::Bind { addr, source })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Returns only when accepting fails.
    pub async fn run(self, service: Arc<RelayService>) -> Result<(), IngestError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "listening for profile events");
        }

        loop {
            let (stream, peer) = self.listener.accept().await.map_err(|err| {
                warn!(error = %err, "ingest accept failed");
                IngestError::Accept(err)
            })?;

            let Some(permit) = service.gate().try_acquire() else {
                debug!(%peer, "ingest session already active; closing connection");
                service.on_ingest_rejected();
                drop(stream);
                continue;
            };

            service.on_ingest_accepted();
            let service = Arc::clone(&service);
            tokio::spawn(handle_session(stream, peer, permit, service));
        }
    }
}

async fn handle_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    permit: AdmissionPermit,
    service: Arc<RelayService>,
) {
    info!(%peer, "trace stream started");

    match read_trace(&mut stream, service.buffer(), service.max_ingest_bytes()).await {
        Ok(outcome) => {
            info!(
                %peer,
                bytes = outcome.bytes_read,
                fill_cursor = outcome.fill_cursor,
                "trace chunk ingested"
            );
            service.on_ingest_appended(outcome.bytes_read, outcome.fill_cursor);
        }
        Err(err) => {
            warn!(%peer, error = %err, "trace stream aborted");
            service.on_ingest_failed();
        }
    }

    drop(stream);
    permit.release();
    debug!(%peer, "trace stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::io::ReadBuf;

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "peer reset",
            )))
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn single_read_appends_payload() {
        let buffer = TraceBuffer::new();
        let mut reader: &[u8] = b"0123456789";

        let outcome = read_trace(&mut reader, &buffer, MAX_INGEST_READ).await.unwrap();
        assert_eq!(outcome.bytes_read, 10);
        assert_eq!(outcome.fill_cursor, 10);
        assert_eq!(buffer.delta_from(0).unwrap().bytes, b"0123456789");
    }

    #[test_timeout::tokio_timeout_test]
    async fn oversized_payload_is_truncated_to_bound() {
        let buffer = TraceBuffer::new();
        let payload = vec![7u8; 64];
        let mut reader: &[u8] = &payload;

        let outcome = read_trace(&mut reader, &buffer, 16).await.unwrap();
        assert_eq!(outcome.bytes_read, 16);
        assert_eq!(buffer.fill_cursor(), 16);
        assert_eq!(reader.len(), 48, "remainder must stay unread");
    }

    #[test_timeout::tokio_timeout_test]
    async fn only_first_fragment_is_read() {
        let buffer = TraceBuffer::new();
        let mut reader = tokio::io::AsyncReadExt::chain(&b"first"[..], &b"second"[..]);

        let outcome = read_trace(&mut reader, &buffer, MAX_INGEST_READ).await.unwrap();
        assert_eq!(outcome.bytes_read, 5);
        assert_eq!(buffer.delta_from(0).unwrap().bytes, b"first");
    }

    #[test_timeout::tokio_timeout_test]
    async fn empty_stream_appends_nothing() {
        let buffer = TraceBuffer::new();
        buffer.append(b"abc");
        let mut reader: &[u8] = b"";

        let outcome = read_trace(&mut reader, &buffer, MAX_INGEST_READ).await.unwrap();
        assert_eq!(outcome.bytes_read, 0);
        assert_eq!(outcome.fill_cursor, 3);
    }

    #[test_timeout::tokio_timeout_test]
    async fn read_error_leaves_buffer_untouched() {
        let buffer = TraceBuffer::new();
        buffer.append(b"kept");

        let err = read_trace(&mut FailingReader, &buffer, MAX_INGEST_READ)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Read(_)));
        assert_eq!(buffer.fill_cursor(), 4);
    }
}
