//! Supervisor: runs generations of worker tasks and recovers from
//! transport failures.
//!
//! Each generation binds a receive task, a send task and (optionally) a
//! keepalive task to one connection and one cancellation scope. The first
//! task to exit decides the outcome: an expected exit ends the session, an
//! unexpected one starts the recovery window. Either way the rest of the
//! generation is cancelled and joined before anything else happens.
//!
//! ```text
//!   RUNNING ──expected exit──────────────────────────────▶ DEAD
//!      │                                                   ▲
//!   unexpected exit                                        │
//!      ▼                                                   │
//!   AWAITING_REPLACEMENT ──shutdown / closed / window──────┘
//!      │
//!   replacement
//!      ▼
//!   RUNNING (next generation)
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::keepalive::keepalive_loop;
use crate::recv::recv_loop;
use crate::send::send_loop;
use crate::session::{SessionState, Shared};
use crate::transport::BoxedConnection;
use crate::{Session, SessionError};

/// Why the supervisor returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Shutdown was raised, either before or during a recovery wait
    Shutdown,
    /// A task exited cleanly (peer closed the connection) without shutdown
    Disconnected,
    /// No replacement connection arrived within the recovery window
    RecoveryExhausted,
    /// The replacement channel was closed while waiting
    ReplacementsClosed,
}

impl Termination {
    /// Error that later operations on the dead session correspond to, if any
    pub fn error(self) -> Option<SessionError> {
        match self {
            Termination::RecoveryExhausted => Some(SessionError::RecoveryExhausted),
            Termination::ReplacementsClosed => Some(SessionError::SessionClosed),
            Termination::Shutdown | Termination::Disconnected => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Recv,
    Send,
    Keepalive,
}

#[derive(Debug)]
struct TaskExit {
    task: TaskKind,
    expected: bool,
}

/// Drives a session; see the module docs
pub struct Supervisor {
    session: Session,
    dispatcher: Arc<Dispatcher>,
    conn: BoxedConnection,
    replace_rx: mpsc::Receiver<BoxedConnection>,
}

impl Supervisor {
    pub(crate) fn new(
        session: Session,
        dispatcher: Dispatcher,
        conn: BoxedConnection,
        replace_rx: mpsc::Receiver<BoxedConnection>,
    ) -> Self {
        Self {
            session,
            dispatcher: Arc::new(dispatcher),
            conn,
            replace_rx,
        }
    }

    /// Run generations until the session dies.
    ///
    /// On return shutdown has been raised, so every later operation on the
    /// session fails with [`SessionError::SessionShutdown`].
    pub async fn run(self) -> Termination {
        let Supervisor {
            session,
            dispatcher,
            mut conn,
            mut replace_rx,
        } = self;
        let shared = &session.shared;
        let mut generation = 0u64;

        let termination = loop {
            if shared.shutdown.is_cancelled() {
                break Termination::Shutdown;
            }

            generation += 1;
            shared.stats.generations.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            shared.state.send_replace(SessionState::Running { generation });
            info!("Starting generation {}", generation);

            let expected = run_generation(&session, &dispatcher, generation, conn).await;

            if shared.shutdown.is_cancelled() {
                break Termination::Shutdown;
            }
            if expected {
                break Termination::Disconnected;
            }

            shared
                .state
                .send_replace(SessionState::AwaitingReplacement { generation });
            warn!(
                "Generation {} failed, waiting up to {:?} for a replacement connection",
                generation, shared.config.recovery_window
            );

            conn = match await_replacement(shared, &mut replace_rx).await {
                Ok(replacement) => {
                    info!("Adopting replacement connection");
                    replacement
                }
                Err(termination) => break termination,
            };
        };

        shared.shutdown.cancel();
        replace_rx.close();
        while replace_rx.try_recv().is_ok() {}
        fail_queued(shared).await;
        shared.pings.clear();
        shared.state.send_replace(SessionState::Dead);
        info!(
            "Session dead after {} generation(s): {:?}",
            generation, termination
        );
        termination
    }
}

/// Run one generation to completion and classify how it ended
async fn run_generation(
    session: &Session,
    dispatcher: &Arc<Dispatcher>,
    generation: u64,
    conn: BoxedConnection,
) -> bool {
    let shared = &session.shared;
    let cancel = shared.shutdown.child_token();
    let (exit_tx, mut exit_rx) = mpsc::channel(3);
    let (reader, writer) = tokio::io::split(conn);

    let mut tasks = JoinSet::new();
    tasks.spawn(report(
        TaskKind::Recv,
        exit_tx.clone(),
        recv_loop(shared.clone(), dispatcher.clone(), reader, cancel.clone()),
    ));
    tasks.spawn(report(
        TaskKind::Send,
        exit_tx.clone(),
        send_loop(shared.clone(), writer, cancel.clone()),
    ));
    if shared.config.enable_keepalive {
        tasks.spawn(report(
            TaskKind::Keepalive,
            exit_tx.clone(),
            keepalive_loop(session.clone(), cancel.clone()),
        ));
    }
    drop(exit_tx);

    let first = tokio::select! {
        biased;
        exit = exit_rx.recv() => exit,
        joined = tasks.join_next() => report_after_join(joined, &mut exit_rx),
    };

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Generation {} task failed: {}", generation, e);
        }
    }
    // Later reports die with the channel

    match first {
        Some(exit) => {
            debug!(
                "Generation {} ended by {:?} task (expected: {})",
                generation, exit.task, exit.expected
            );
            exit.expected
        }
        None => {
            error!("Generation {} ended without an exit report", generation);
            false
        }
    }
}

/// A task can report and finish between the two polls above, so a clean
/// join still looks for its report. Only a panicked task has none.
fn report_after_join(
    joined: Option<Result<(), JoinError>>,
    exit_rx: &mut mpsc::Receiver<TaskExit>,
) -> Option<TaskExit> {
    match joined {
        Some(Ok(())) => exit_rx.try_recv().ok(),
        _ => None,
    }
}

/// Close the send queue and fail every request still in it
async fn fail_queued(shared: &Shared) {
    let mut queue = shared.send_rx.lock().await;
    queue.close();
    let mut failed = 0usize;
    while let Ok(mut req) = queue.try_recv() {
        req.complete(Err(SessionError::SessionShutdown));
        failed += 1;
    }
    if failed > 0 {
        debug!("Failed {} queued request(s) at shutdown", failed);
    }
}

async fn report<F>(task: TaskKind, exit_tx: mpsc::Sender<TaskExit>, fut: F)
where
    F: Future<Output = Result<(), SessionError>>,
{
    let expected = fut.await.is_ok();
    // capacity covers every task of the generation
    let _ = exit_tx.try_send(TaskExit { task, expected });
}

/// Race the recovery window against a replacement, shutdown, and closure.
/// Shutdown wins ties, including against a replacement received in the
/// same instant.
async fn await_replacement(
    shared: &Shared,
    replace_rx: &mut mpsc::Receiver<BoxedConnection>,
) -> Result<BoxedConnection, Termination> {
    let window = tokio::time::sleep(shared.config.recovery_window);

    tokio::select! {
        biased;
        _ = shared.shutdown.cancelled() => Err(Termination::Shutdown),
        replacement = replace_rx.recv() => match replacement {
            Some(_) if shared.shutdown.is_cancelled() => {
                debug!("Dropping replacement connection, session is shutting down");
                Err(Termination::Shutdown)
            }
            Some(conn) => Ok(conn),
            None => Err(Termination::ReplacementsClosed),
        },
        _ = window => Err(Termination::RecoveryExhausted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_errors() {
        assert!(Termination::Shutdown.error().is_none());
        assert!(Termination::Disconnected.error().is_none());
        assert!(matches!(
            Termination::RecoveryExhausted.error(),
            Some(SessionError::RecoveryExhausted)
        ));
        assert!(matches!(
            Termination::ReplacementsClosed.error(),
            Some(SessionError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_report_classifies_outcome() {
        let (tx, mut rx) = mpsc::channel(3);
        report(TaskKind::Recv, tx.clone(), async { Ok(()) }).await;
        report(TaskKind::Send, tx, async { Err(SessionError::Timeout) }).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.task, TaskKind::Recv);
        assert!(first.expected);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.task, TaskKind::Send);
        assert!(!second.expected);
    }

    #[tokio::test]
    async fn test_clean_join_uses_pending_report() {
        let (tx, mut rx) = mpsc::channel(3);
        report(TaskKind::Recv, tx, async { Ok(()) }).await;

        let exit = report_after_join(Some(Ok(())), &mut rx).unwrap();
        assert_eq!(exit.task, TaskKind::Recv);
        assert!(exit.expected);
    }

    #[tokio::test]
    async fn test_panicked_join_has_no_report() {
        let (tx, mut rx) = mpsc::channel::<TaskExit>(3);
        let panicked = tokio::spawn(async { panic!("task blew up") })
            .await
            .unwrap_err();
        assert!(report_after_join(Some(Err(panicked)), &mut rx).is_none());
        drop(tx);
    }
}
