//! Frame dispatch table.
//!
//! Maps every message type in the contiguous `Data..=GoAway` range to a
//! handler. The receive loop validates the type before dispatching, so the
//! table itself never sees an out-of-range value.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use mux_wire::{FrameType, Header};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::SessionError;

/// Reader positioned just after a frame header
pub type FrameBody<'a> = dyn AsyncRead + Send + Unpin + 'a;

/// Handler for one message type
///
/// Data handlers must consume exactly `header.length()` bytes from `body`,
/// otherwise the next header read is misaligned.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Process one decoded header
    async fn handle(&self, header: &Header, body: &mut FrameBody<'_>) -> Result<(), SessionError>;
}

/// Read a data frame body into memory
pub async fn read_body(header: &Header, body: &mut FrameBody<'_>) -> Result<Bytes, SessionError> {
    let mut buf = BytesMut::zeroed(header.length() as usize);
    body.read_exact(&mut buf).await.map_err(SessionError::read)?;
    Ok(buf.freeze())
}

/// Default handler: drains data bodies and ignores everything else
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

#[async_trait]
impl FrameHandler for DiscardHandler {
    async fn handle(&self, header: &Header, body: &mut FrameBody<'_>) -> Result<(), SessionError> {
        if header.frame_type() == Ok(FrameType::Data) && header.length() > 0 {
            let want = u64::from(header.length());
            let got = tokio::io::copy(&mut (&mut *body).take(want), &mut tokio::io::sink())
                .await
                .map_err(SessionError::read)?;
            if got < want {
                return Err(SessionError::read(std::io::ErrorKind::UnexpectedEof.into()));
            }
            trace!("Discarded {} body bytes on stream {}", got, header.stream_id());
        }
        Ok(())
    }
}

/// Caller-supplied handlers, keyed by message type
///
/// Unset Ping and GoAway slots fall back to the session's own control
/// handlers; any other unset slot falls back to [`DiscardHandler`].
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: [Option<Arc<dyn FrameHandler>>; 4],
}

impl DispatchTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler for `typ`, replacing any previous one
    pub fn with_handler(mut self, typ: FrameType, handler: Arc<dyn FrameHandler>) -> Self {
        self.handlers[typ.index()] = Some(handler);
        self
    }

    /// Whether a handler was installed for `typ`
    pub fn has_handler(&self, typ: FrameType) -> bool {
        self.handlers[typ.index()].is_some()
    }

    pub(crate) fn resolve(
        self,
        ping: Arc<dyn FrameHandler>,
        go_away: Arc<dyn FrameHandler>,
    ) -> Dispatcher {
        let [data, window_update, ping_slot, go_away_slot] = self.handlers;
        let discard = || Arc::new(DiscardHandler) as Arc<dyn FrameHandler>;
        Dispatcher {
            handlers: [
                data.unwrap_or_else(discard),
                window_update.unwrap_or_else(discard),
                ping_slot.unwrap_or(ping),
                go_away_slot.unwrap_or(go_away),
            ],
        }
    }
}

/// Fully populated table, fixed for the lifetime of a session
pub(crate) struct Dispatcher {
    handlers: [Arc<dyn FrameHandler>; 4],
}

impl Dispatcher {
    pub(crate) async fn dispatch(
        &self,
        typ: FrameType,
        header: &Header,
        body: &mut FrameBody<'_>,
    ) -> Result<(), SessionError> {
        self.handlers[typ.index()].handle(header, body).await
    }
}
