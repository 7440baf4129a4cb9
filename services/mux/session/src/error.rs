//! Session error types.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by frame handlers
pub type HandlerFault = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Session errors
///
/// Cloneable so a single write failure can be delivered to the request that
/// triggered it and also become the send task's outcome.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Configuration rejected by [`crate::SessionConfig::validate`]
    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    /// Peer sent an unsupported protocol version
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),

    /// Peer sent a message type outside the supported range
    #[error("invalid msg type: {0}")]
    InvalidMsgType(u8),

    /// Reading from the connection failed
    #[error("failed to read header: {0}")]
    Read(#[source] Arc<io::Error>),

    /// Writing a header or body to the connection failed
    #[error("failed to write frame: {0}")]
    Write(#[source] Arc<io::Error>),

    /// A frame handler failed
    #[error("frame handler failed: {0}")]
    Handler(#[source] HandlerFault),

    /// Keepalive probe failed for a reason other than shutdown
    #[error("keepalive timeout")]
    KeepAliveTimeout,

    /// A ping got no answer in time
    #[error("i/o deadline reached")]
    Timeout,

    /// Session is shut down (or died)
    #[error("session shutdown")]
    SessionShutdown,

    /// Remote end sent a GoAway
    #[error("remote end is not accepting connections")]
    RemoteGoAway,

    /// Recovery window elapsed without a replacement connection
    #[error("recovery window elapsed without a replacement connection")]
    RecoveryExhausted,

    /// Replacement channel closed, no further connections will arrive
    #[error("session closed")]
    SessionClosed,
}

impl SessionError {
    /// Wrap an arbitrary handler failure
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SessionError::Handler(Arc::new(err))
    }

    /// Wrap a read-side I/O error
    pub fn read(err: io::Error) -> Self {
        SessionError::Read(Arc::new(err))
    }

    /// Wrap a write-side I/O error
    pub fn write(err: io::Error) -> Self {
        SessionError::Write(Arc::new(err))
    }
}

/// Whether a read error is an ordinary disconnect rather than a fault.
///
/// Resets and closed connections end a generation silently. A clean EOF
/// never reaches this check; EOF in the middle of a header does, and is a fault.
pub fn is_expected_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    ) || err.to_string().contains("closed")
}
