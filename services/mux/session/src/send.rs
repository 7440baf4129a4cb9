//! Send task: drains the send queue onto the connection.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::request::SendRequest;
use crate::session::Shared;
use crate::transport::BoxedConnection;
use crate::SessionError;

/// Run until shutdown or cancellation, or until a write fails.
///
/// A failed request gets the error in its completion slot before the task
/// returns it.
pub(crate) async fn send_loop(
    shared: Arc<Shared>,
    mut conn: WriteHalf<BoxedConnection>,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    let mut queue = shared.send_rx.lock().await;
    let write_timeout = shared.config.connection_write_timeout;

    loop {
        let mut req = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return Ok(()),
            _ = cancel.cancelled() => return Ok(()),
            req = queue.recv() => match req {
                Some(req) => req,
                None => return Ok(()),
            },
        };

        match write_request(&mut conn, &mut req, write_timeout).await {
            Ok(written) => {
                trace!("Wrote {} bytes", written);
                shared.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                shared.stats.bytes_out.fetch_add(written, Ordering::Relaxed);
                req.complete(Ok(()));
            }
            Err(e) => {
                req.complete(Err(e.clone()));
                return Err(e);
            }
        }
    }
}

async fn write_request<W>(
    conn: &mut W,
    req: &mut SendRequest,
    write_timeout: Duration,
) -> Result<u64, SessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    if let Some(header) = req.header.take() {
        // write_all loops over short writes
        bounded(write_timeout, conn.write_all(&header))
            .await
            .map_err(|e| {
                error!("Failed to write header: {}", e);
                SessionError::write(e)
            })?;
        written += header.len() as u64;
    }

    if let Some(mut body) = req.body.take() {
        written += bounded(write_timeout, tokio::io::copy(&mut body, conn))
            .await
            .map_err(|e| {
                error!("Failed to write body: {}", e);
                SessionError::write(e)
            })?;
    }

    bounded(write_timeout, conn.flush()).await.map_err(|e| {
        error!("Failed to flush connection: {}", e);
        SessionError::write(e)
    })?;

    Ok(written)
}

async fn bounded<T, F>(limit: Duration, fut: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded")),
    }
}
