//! Receive task: reads frame headers and dispatches them.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use mux_wire::{FrameType, Header, HEADER_SIZE, PROTO_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::dispatch::Dispatcher;
use crate::error::is_expected_disconnect;
use crate::session::Shared;
use crate::transport::BoxedConnection;
use crate::SessionError;

/// Read one header. `Ok(None)` means the peer closed the stream cleanly
/// before sending any byte of it.
pub(crate) async fn read_header<R>(reader: &mut R) -> io::Result<Option<Header>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = [0u8; HEADER_SIZE];
    let n = reader.read(&mut raw).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut raw[n..]).await?;
    Ok(Some(Header::decode(&raw)))
}

/// Run until cancelled, cleanly disconnected, or failed.
///
/// A header read in progress is abandoned when the generation is cancelled;
/// a handler that is already running is always allowed to finish.
pub(crate) async fn recv_loop(
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher>,
    conn: ReadHalf<BoxedConnection>,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    let mut reader = BufReader::new(conn);

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = read_header(&mut reader) => read,
        };

        let header = match read {
            Ok(Some(header)) => header,
            Ok(None) => {
                debug!("Connection closed by peer");
                return Ok(());
            }
            Err(e) if is_expected_disconnect(&e) => {
                debug!("Connection dropped: {}", e);
                return Ok(());
            }
            Err(e) => {
                error!("Failed to read header: {}", e);
                return Err(SessionError::read(e));
            }
        };

        if header.version() != PROTO_VERSION {
            error!("Invalid protocol version: {}", header.version());
            return Err(SessionError::InvalidVersion(header.version()));
        }

        let typ = match FrameType::try_from(header.msg_type()) {
            Ok(typ) => typ,
            Err(_) => {
                error!("Invalid message type: {}", header.msg_type());
                return Err(SessionError::InvalidMsgType(header.msg_type()));
            }
        };

        trace!(
            "Received {:?} (stream {}, flags {:?}, length {})",
            typ,
            header.stream_id(),
            header.flags(),
            header.length()
        );
        shared.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = dispatcher.dispatch(typ, &header, &mut reader).await {
            error!("Failed to handle {:?} frame: {}", typ, e);
            return Err(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_wire::Flags;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_header_clean_eof() {
        let mut input: &[u8] = &[];
        assert!(read_header(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_header_partial_is_error() {
        let mut input: &[u8] = &[0, 2, 0];
        let err = read_header(&mut input).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(!is_expected_disconnect(&err));
    }

    #[tokio::test]
    async fn test_read_header_split_across_reads() {
        let raw = Header::ping(Flags::SYN, 5).to_bytes();
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move { read_header(&mut rx).await });

        tx.write_all(&raw[..4]).await.unwrap();
        tokio::task::yield_now().await;
        tx.write_all(&raw[4..]).await.unwrap();

        let header = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(header, Header::ping(Flags::SYN, 5));
    }
}
