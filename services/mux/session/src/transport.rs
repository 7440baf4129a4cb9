//! Underlying connections for mux sessions.
//!
//! A session runs over any bidirectional byte stream. Plain TCP helpers are
//! provided for the binary and for tests; TLS or in-memory streams can be
//! boxed the same way.

use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Byte stream a session can run over
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased connection owned by the supervisor
pub type BoxedConnection = Box<dyn Connection>;

/// Box a connection for handing to a session
pub fn boxed<C: Connection>(conn: C) -> BoxedConnection {
    Box::new(conn)
}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address with Nagle disabled
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!("Connected to {}", addr);
    Ok(stream)
}
