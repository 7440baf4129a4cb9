//! Shared helpers for session integration tests.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use mux_session::{Session, SessionConfig, SessionState};
use mux_wire::{Flags, FrameType, Header, HEADER_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

/// Counts ERROR-level events
struct ErrorCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Error log counter for the current thread
pub struct ErrorLog {
    count: Arc<AtomicUsize>,
    _guard: DefaultGuard,
}

impl ErrorLog {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Capture error events emitted on this thread (tests use the
/// current-thread runtime, so spawned session tasks are included)
pub fn capture_errors() -> ErrorLog {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = Registry::default().with(ErrorCounter(count.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    ErrorLog {
        count,
        _guard: guard,
    }
}

/// Config with keepalive off and short timeouts
pub fn quiet_config() -> SessionConfig {
    SessionConfig {
        enable_keepalive: false,
        recovery_window: Duration::from_secs(5),
        ping_timeout: Duration::from_secs(2),
        connection_write_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Wait until the supervisor publishes `want`
pub async fn wait_for_state(session: &Session, want: SessionState) {
    let mut states = session.watch_state();
    tokio::time::timeout(Duration::from_secs(60), states.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {want:?}, at {:?}", session.state()))
        .expect("state channel closed");
}

/// Read one header from the peer side
pub async fn read_frame(peer: &mut DuplexStream) -> io::Result<Header> {
    let mut raw = [0u8; HEADER_SIZE];
    peer.read_exact(&mut raw).await?;
    Ok(Header::decode(&raw))
}

/// Write one raw header from the peer side
pub async fn write_raw(peer: &mut DuplexStream, raw: [u8; HEADER_SIZE]) {
    peer.write_all(&raw).await.unwrap();
}

/// Peer that answers pings and forwards data bodies
pub fn spawn_peer(mut peer: DuplexStream) -> (JoinHandle<()>, tokio::sync::mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Ok(header) = read_frame(&mut peer).await {
            match header.frame_type() {
                Ok(FrameType::Ping) if header.flags().contains(Flags::SYN) => {
                    let reply = Header::ping(Flags::ACK, header.length()).to_bytes();
                    if peer.write_all(&reply).await.is_err() {
                        return;
                    }
                }
                Ok(FrameType::Data) => {
                    let mut body = vec![0u8; header.length() as usize];
                    if peer.read_exact(&mut body).await.is_err() {
                        return;
                    }
                    let _ = tx.send(Bytes::from(body));
                }
                _ => {}
            }
        }
    });
    (handle, rx)
}

/// Connection whose reads and writes follow a script
pub struct ScriptedConn {
    read_error: Option<io::ErrorKind>,
    write_error: bool,
}

impl ScriptedConn {
    /// Reads never complete, writes fail
    pub fn broken_writes() -> Self {
        Self {
            read_error: None,
            write_error: true,
        }
    }

    /// Reads fail with `kind`, writes fail
    pub fn broken(kind: io::ErrorKind) -> Self {
        Self {
            read_error: Some(kind),
            write_error: true,
        }
    }
}

impl AsyncRead for ScriptedConn {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.read_error {
            Some(kind) => Poll::Ready(Err(io::Error::new(kind, "scripted read failure"))),
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for ScriptedConn {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.write_error {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "scripted write failure",
            )))
        } else {
            Poll::Ready(Ok(buf.len()))
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
