//! Supervised recv/send/keepalive loops and connection recovery for mux sessions.
//!
//! A [`Session`] turns one byte-stream connection into a generation of three
//! cooperating tasks: a receive loop that reads and dispatches frame headers,
//! a send loop that drains the outbound queue, and an optional keepalive
//! prober. The [`Supervisor`] watches each generation; when the transport
//! dies it waits a bounded time for a replacement connection and resumes the
//! same logical session on it.
//!
//! ## Features
//!
//! - **Generations**: first-exit-wins classification, cancel-and-join teardown
//! - **Recovery**: bounded wait for a connection handed in via [`Session::replace_conn`]
//! - **Keepalive**: PING/ACK round trips with RTT measurement
//! - **Dispatch**: pluggable per-type [`FrameHandler`]s
//! - **Metadata**: opaque blob that survives connection swaps
//!
//! ## Example
//!
//! ```rust,no_run
//! use mux_session::{connect_tcp, DispatchTable, Session, SessionConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SessionConfig {
//!     keepalive_interval: Duration::from_secs(10),
//!     recovery_window: Duration::from_secs(20),
//!     ..Default::default()
//! };
//!
//! let addr = "127.0.0.1:9000".parse()?;
//! let stream = connect_tcp(addr).await?;
//! let (session, supervisor) = Session::new(stream, config, DispatchTable::new())?;
//! let driver = tokio::spawn(supervisor.run());
//!
//! // Later, after reconnecting
//! session.replace_conn(connect_tcp(addr).await?).await;
//!
//! session.close();
//! println!("session ended: {:?}", driver.await?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod control;
pub mod dispatch;
pub mod error;
mod keepalive;
mod recv;
pub mod request;
mod send;
pub mod session;
pub mod supervisor;
pub mod transport;

// Re-export main types
pub use config::SessionConfig;
pub use dispatch::{read_body, DiscardHandler, DispatchTable, FrameBody, FrameHandler};
pub use error::{is_expected_disconnect, HandlerFault, SessionError};
pub use request::{BodyReader, Completion, SendRequest};
pub use session::{Session, SessionState, SessionStats};
pub use supervisor::{Supervisor, Termination};
pub use transport::{boxed, connect_tcp, listen_tcp, BoxedConnection, Connection};
