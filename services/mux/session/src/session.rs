//! Session handle and shared state.
//!
//! A [`Session`] is a cheap, cloneable handle used by callers and by the
//! session's own tasks. The [`Supervisor`] returned alongside it owns the
//! underlying connection and drives the generations of worker tasks.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use mux_wire::{Flags, GoAwayCode, Header};
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::control::{GoAwayHandler, PingHandler};
use crate::request::{Completion, SendRequest};
use crate::supervisor::Supervisor;
use crate::transport::{BoxedConnection, Connection};
use crate::{DispatchTable, SessionConfig, SessionError};

/// Supervisor lifecycle as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; the supervisor has not started a generation yet
    Starting,
    /// A generation of tasks is running
    Running {
        /// 1-based generation number
        generation: u64,
    },
    /// The last generation failed; waiting for a replacement connection
    AwaitingReplacement {
        /// Generation that just ended
        generation: u64,
    },
    /// Terminal; no further generations start
    Dead,
}

/// Statistics for a session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Generations started so far
    pub generations: u64,
    /// Frame headers received and dispatched
    pub frames_received: u64,
    /// Send requests written successfully
    pub frames_sent: u64,
    /// Header and body bytes written
    pub bytes_out: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) generations: AtomicU64,
    pub(crate) frames_received: AtomicU64,
    pub(crate) frames_sent: AtomicU64,
    pub(crate) bytes_out: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            generations: self.generations.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the handle, the supervisor and the tasks
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    /// Permanent shutdown indicator; generation scopes are its children
    pub(crate) shutdown: CancellationToken,
    pub(crate) send_tx: mpsc::Sender<SendRequest>,
    /// Held by the running send task for its whole lifetime
    pub(crate) send_rx: Mutex<mpsc::Receiver<SendRequest>>,
    /// `None` once replacements are closed
    pub(crate) replace_tx: Mutex<Option<mpsc::Sender<BoxedConnection>>>,
    pub(crate) pings: DashMap<u32, oneshot::Sender<()>>,
    ping_id: AtomicU32,
    pub(crate) remote_go_away: std::sync::RwLock<Option<GoAwayCode>>,
    meta: RwLock<Bytes>,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) stats: StatCounters,
}

/// Handle to a multiplexed session
#[derive(Clone)]
pub struct Session {
    pub(crate) shared: Arc<Shared>,
}

impl Session {
    /// Create a session over `conn`.
    ///
    /// Nothing runs until [`Supervisor::run`] is awaited.
    pub fn new<C: Connection>(
        conn: C,
        config: SessionConfig,
        dispatch: DispatchTable,
    ) -> Result<(Session, Supervisor), SessionError> {
        config.validate()?;

        let (send_tx, send_rx) = mpsc::channel(config.send_queue_depth);
        let (replace_tx, replace_rx) = mpsc::channel(config.replace_queue_depth);
        let (state, _) = watch::channel(SessionState::Starting);

        let shared = Arc::new(Shared {
            config,
            shutdown: CancellationToken::new(),
            send_tx,
            send_rx: Mutex::new(send_rx),
            replace_tx: Mutex::new(Some(replace_tx)),
            pings: DashMap::new(),
            ping_id: AtomicU32::new(0),
            remote_go_away: std::sync::RwLock::new(None),
            meta: RwLock::new(Bytes::new()),
            state,
            stats: StatCounters::default(),
        });

        let dispatcher = dispatch.resolve(
            Arc::new(PingHandler::new(shared.clone())),
            Arc::new(GoAwayHandler::new(shared.clone())),
        );

        let session = Session { shared };
        let supervisor = Supervisor::new(session.clone(), dispatcher, Box::new(conn), replace_rx);
        Ok((session, supervisor))
    }

    /// Create a session and run its supervisor on the current runtime
    pub fn spawn<C: Connection>(
        conn: C,
        config: SessionConfig,
        dispatch: DispatchTable,
    ) -> Result<(Session, tokio::task::JoinHandle<crate::Termination>), SessionError> {
        let (session, supervisor) = Self::new(conn, config, dispatch)?;
        Ok((session, tokio::spawn(supervisor.run())))
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Raise the shutdown indicator. Safe to call any number of times.
    pub fn close(&self) {
        if !self.shared.shutdown.is_cancelled() {
            info!("Closing session");
        }
        self.shared.shutdown.cancel();
    }

    /// Whether shutdown has been raised (by [`close`](Self::close) or by death)
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Resolves once the session is shut down
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await
    }

    /// Current supervisor state
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to supervisor state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Counters snapshot
    pub fn stats(&self) -> SessionStats {
        self.shared.stats.snapshot()
    }

    /// Code of the last GoAway the peer sent, if any
    pub fn remote_go_away(&self) -> Option<GoAwayCode> {
        *self
            .shared
            .remote_go_away
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a request for the send task and return its completion slot.
    ///
    /// Requests queued while the supervisor awaits a replacement are written
    /// by the next generation.
    pub async fn send(&self, mut req: SendRequest) -> Result<Completion, SessionError> {
        let done = req.subscribe();
        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => Err(SessionError::SessionShutdown),
            sent = self.shared.send_tx.send(req) => {
                sent.map_err(|_| SessionError::SessionShutdown)?;
                Ok(done)
            }
        }
    }

    /// Queue a request and wait until it is written
    pub async fn send_and_wait(&self, req: SendRequest) -> Result<(), SessionError> {
        let done = self.send(req).await?;
        tokio::select! {
            biased;
            result = done => result.unwrap_or(Err(SessionError::SessionShutdown)),
            _ = self.shared.shutdown.cancelled() => Err(SessionError::SessionShutdown),
        }
    }

    /// Round-trip a ping and return the measured RTT
    pub async fn ping(&self) -> Result<Duration, SessionError> {
        if self.is_closed() {
            return Err(SessionError::SessionShutdown);
        }

        let id = self.shared.ping_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pings.insert(id, tx);
        let _waiter = PendingPing {
            pings: &self.shared.pings,
            id,
        };

        let start = Instant::now();
        let probe = async {
            self.send(SendRequest::from_header(Header::ping(Flags::SYN, id)))
                .await?;
            rx.await.map_err(|_| SessionError::SessionShutdown)
        };

        let result = tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => Err(SessionError::SessionShutdown),
            answered = tokio::time::timeout(self.shared.config.ping_timeout, probe) => {
                match answered {
                    Ok(Ok(())) => Ok(start.elapsed()),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SessionError::Timeout),
                }
            }
        };

        result
    }

    /// Tell the peer this side will not accept new streams
    pub async fn go_away(&self, code: GoAwayCode) -> Result<Completion, SessionError> {
        self.send(SendRequest::from_header(Header::go_away(code))).await
    }

    /// Offer a replacement connection for the next recovery attempt.
    ///
    /// Waits only for room in the replacement buffer and gives up as soon as
    /// the session shuts down. After death the connection is dropped.
    pub async fn replace_conn<C: Connection>(&self, conn: C) {
        if self.is_closed() {
            debug!("Session is dead, dropping replacement connection");
            return;
        }

        let tx = self.shared.replace_tx.lock().await.clone();
        let Some(tx) = tx else {
            debug!("Replacements closed, dropping replacement connection");
            return;
        };

        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => {
                debug!("Session shut down before replacement was accepted");
            }
            sent = tx.send(Box::new(conn)) => {
                if sent.is_err() {
                    debug!("Supervisor gone, dropping replacement connection");
                }
            }
        }
    }

    /// Close the replacement channel; a pending recovery wait ends at once
    pub async fn close_replacements(&self) {
        if self.shared.replace_tx.lock().await.take().is_some() {
            debug!("Replacement channel closed");
        }
    }

    /// Replace the metadata blob
    pub async fn save_meta(&self, meta: impl Into<Bytes>) {
        *self.shared.meta.write().await = meta.into();
    }

    /// Current metadata blob (empty if never saved)
    pub async fn load_meta(&self) -> Bytes {
        self.shared.meta.read().await.clone()
    }
}

/// Removes a ping waiter however `ping()` ends, including when dropped
struct PendingPing<'a> {
    pings: &'a DashMap<u32, oneshot::Sender<()>>,
    id: u32,
}

impl Drop for PendingPing<'_> {
    fn drop(&mut self) {
        self.pings.remove(&self.id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
