//! Built-in handlers for session-level control frames.
//!
//! Ping requests are answered through the send queue and ping answers wake
//! the matching [`Session::ping`](crate::Session::ping) call. GoAway frames
//! are recorded; an abnormal GoAway ends the generation.

use std::sync::Arc;

use async_trait::async_trait;
use mux_wire::{Flags, GoAwayCode, Header};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info};

use crate::dispatch::{FrameBody, FrameHandler};
use crate::request::SendRequest;
use crate::session::Shared;
use crate::SessionError;

/// Answers ping requests and completes outstanding pings
pub(crate) struct PingHandler {
    shared: Arc<Shared>,
}

impl PingHandler {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl FrameHandler for PingHandler {
    async fn handle(&self, header: &Header, _body: &mut FrameBody<'_>) -> Result<(), SessionError> {
        let opaque = header.length();
        let flags = header.flags();

        if flags.contains(Flags::SYN) {
            // The receive loop never waits on the send queue
            let reply = SendRequest::from_header(Header::ping(Flags::ACK, opaque));
            return match self.shared.send_tx.try_send(reply) {
                Ok(()) => {
                    debug!("Answered ping {}", opaque);
                    Ok(())
                }
                Err(TrySendError::Full(reply)) => {
                    debug!("Send queue full, deferring ping reply {}", opaque);
                    tokio::spawn(deferred_reply(self.shared.clone(), reply, opaque));
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(SessionError::SessionShutdown),
            };
        }

        if flags.contains(Flags::ACK) {
            match self.shared.pings.remove(&opaque) {
                Some((_, waiter)) => {
                    let _ = waiter.send(());
                }
                None => debug!("Ping answer {} has no waiter", opaque),
            }
        }
        Ok(())
    }
}

/// Queue a ping reply once the send queue has room, unless the session shuts down first
async fn deferred_reply(shared: Arc<Shared>, reply: SendRequest, opaque: u32) {
    tokio::select! {
        biased;
        _ = shared.shutdown.cancelled() => {
            debug!("Session shut down before ping reply {} was queued", opaque);
        }
        sent = shared.send_tx.send(reply) => {
            if sent.is_err() {
                debug!("Send queue closed, dropping ping reply {}", opaque);
            }
        }
    }
}

/// Records the peer's GoAway
pub(crate) struct GoAwayHandler {
    shared: Arc<Shared>,
}

impl GoAwayHandler {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl FrameHandler for GoAwayHandler {
    async fn handle(&self, header: &Header, _body: &mut FrameBody<'_>) -> Result<(), SessionError> {
        let code = GoAwayCode::from_raw(header.length());
        *self
            .shared
            .remote_go_away
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(code);

        match code {
            GoAwayCode::Normal => {
                info!("Remote end sent go away");
                Ok(())
            }
            GoAwayCode::ProtocolError => {
                error!("Received protocol error go away");
                Err(SessionError::RemoteGoAway)
            }
            GoAwayCode::InternalError => {
                error!("Received internal error go away");
                Err(SessionError::RemoteGoAway)
            }
        }
    }
}
