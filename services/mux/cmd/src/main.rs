//! Mux node binary.
//!
//! Runs one recoverable session over TCP. In listen mode the first accepted
//! connection starts the session and later ones are handed in as
//! replacements; in connect mode the node redials its peer whenever the
//! session is waiting for a replacement.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use mux_session::{
    connect_tcp, listen_tcp, read_body, DispatchTable, FrameBody, FrameHandler, Session,
    SessionError, SessionState, Termination,
};
use mux_wire::{FrameType, Header};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::MuxConfig;
use logging::RedbLogFormatter;

/// Recoverable stream-multiplexing session node
#[derive(Parser, Debug)]
#[command(name = "redb-mux", version, about = "Recoverable stream-multiplexing session node")]
struct Args {
    /// Listen address, e.g. 0.0.0.0:9400
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Dial this peer instead of listening
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Keepalive interval, e.g. 10s
    #[arg(long)]
    keepalive_interval: Option<humantime::Duration>,

    /// How long to wait for a replacement connection, e.g. 20s
    #[arg(long)]
    recovery_window: Option<humantime::Duration>,

    /// Disable keepalive probes
    #[arg(long)]
    no_keepalive: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

impl Args {
    /// Command-line flags win over file and environment settings
    fn apply(&self, config: &mut MuxConfig) {
        if let Some(addr) = self.listen {
            config.listen_addr = addr;
        }
        if let Some(addr) = self.connect {
            config.connect_addr = Some(addr);
        }
        if let Some(interval) = self.keepalive_interval {
            config.session.keepalive_interval = interval.into();
        }
        if let Some(window) = self.recovery_window {
            config.session.recovery_window = window.into();
        }
        if self.no_keepalive {
            config.session.enable_keepalive = false;
        }
    }
}

/// Logs inbound data frames
struct LogData;

#[async_trait]
impl FrameHandler for LogData {
    async fn handle(&self, header: &Header, body: &mut FrameBody<'_>) -> Result<(), SessionError> {
        let payload = read_body(header, body).await?;
        info!(
            "Stream {}: {} bytes ({:?})",
            header.stream_id(),
            payload.len(),
            header.flags()
        );
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("redb_mux={}", args.log_level).parse()?)
        .add_directive(format!("mux_session={}", args.log_level).parse()?)
        .add_directive(format!("mux_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(RedbLogFormatter::new("mux"))
        .init();

    info!("Starting reDB Mux Service v{}", env!("CARGO_PKG_VERSION"));

    let mut config = MuxConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    config
        .session
        .validate()
        .context("invalid session configuration")?;

    let dispatch = DispatchTable::new().with_handler(FrameType::Data, Arc::new(LogData));

    let (session, driver, feeder) = match config.connect_addr {
        Some(peer) => {
            let stream = connect_tcp(peer)
                .await
                .with_context(|| format!("failed to connect to {}", peer))?;
            component_info!("dialer", "Connected to {}", peer);
            let (session, driver) = Session::spawn(stream, config.session.clone(), dispatch)?;
            let feeder = tokio::spawn(redial(session.clone(), peer, config.redial_interval));
            (session, driver, feeder)
        }
        None => {
            let listener = listen_tcp(config.listen_addr)
                .await
                .with_context(|| format!("failed to listen on {}", config.listen_addr))?;
            component_info!("listener", "Listening on {}", config.listen_addr);
            let (stream, remote) = listener.accept().await.context("accept failed")?;
            stream.set_nodelay(true)?;
            component_info!("listener", "Accepted session connection from {}", remote);
            let (session, driver) = Session::spawn(stream, config.session.clone(), dispatch)?;
            let feeder = tokio::spawn(accept_replacements(session.clone(), listener));
            (session, driver, feeder)
        }
    };

    let termination = wait_for_exit(&session, driver).await?;
    feeder.abort();

    match termination.error() {
        Some(e) => {
            warn!("Session ended: {}", e);
            Err(e.into())
        }
        None => {
            info!("Session ended: {:?}", termination);
            Ok(())
        }
    }
}

/// Close on Ctrl-C, then wait for the supervisor
async fn wait_for_exit(
    session: &Session,
    mut driver: JoinHandle<Termination>,
) -> anyhow::Result<Termination> {
    tokio::select! {
        result = &mut driver => return result.context("supervisor task failed"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Received interrupt, closing session");
            session.close();
        }
    }
    driver.await.context("supervisor task failed")
}

/// Hand every later inbound connection to the session as a replacement
async fn accept_replacements(session: Session, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = session.closed() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", remote, e);
                }
                if !matches!(session.state(), SessionState::AwaitingReplacement { .. }) {
                    component_warn!(
                        "listener",
                        "Connection from {} arrived while the session is healthy; queueing it",
                        remote
                    );
                } else {
                    component_info!("listener", "Replacement connection from {}", remote);
                }
                session.replace_conn(stream).await;
            }
            Err(e) => {
                component_warn!("listener", "Accept failed: {}", e);
            }
        }
    }
}

/// Redial `peer` whenever the session waits for a replacement
async fn redial(session: Session, peer: SocketAddr, interval: Duration) {
    let mut states = session.watch_state();
    loop {
        let awaiting = states
            .wait_for(|s| {
                matches!(s, SessionState::AwaitingReplacement { .. } | SessionState::Dead)
            })
            .await
            .map(|s| *s);
        let generation = match awaiting {
            Ok(SessionState::AwaitingReplacement { generation }) => generation,
            _ => return,
        };

        loop {
            match connect_tcp(peer).await {
                Ok(stream) => {
                    component_info!(
                        "dialer",
                        "Reconnected to {} after generation {}",
                        peer,
                        generation
                    );
                    session.replace_conn(stream).await;
                    break;
                }
                Err(e) => {
                    component_warn!("dialer", "Redial to {} failed: {}", peer, e);
                    tokio::select! {
                        _ = session.closed() => return,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }

        // Let the supervisor leave the awaiting state before checking again
        if states
            .wait_for(|s| !matches!(s, SessionState::AwaitingReplacement { .. }))
            .await
            .is_err()
        {
            return;
        }
    }
}
