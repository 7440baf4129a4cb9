//! Keepalive task: periodic pings over the session.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{Session, SessionError};

/// Ping every `keepalive_interval` until shutdown or cancellation.
///
/// A ping that fails because the session is shutting down is not a keepalive
/// failure; anything else becomes [`SessionError::KeepAliveTimeout`].
pub(crate) async fn keepalive_loop(
    session: Session,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    let interval = session.config().keepalive_interval;
    let shutdown = session.shared.shutdown.clone();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {}
        }

        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            probe = session.ping() => probe,
        };

        match probe {
            Ok(rtt) => debug!("Keepalive ping answered in {:?}", rtt),
            Err(SessionError::SessionShutdown) => return Ok(()),
            Err(e) => {
                error!("Keepalive failed: {}", e);
                return Err(SessionError::KeepAliveTimeout);
            }
        }
    }
}
