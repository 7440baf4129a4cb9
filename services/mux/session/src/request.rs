//! Outbound send requests.

use bytes::Bytes;
use mux_wire::Header;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;

use crate::SessionError;

/// Body streamed onto the connection after a header
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Receiver side of a request's completion slot
pub type Completion = oneshot::Receiver<Result<(), SessionError>>;

/// One outbound frame queued for the send task
#[derive(Default)]
pub struct SendRequest {
    pub(crate) header: Option<Bytes>,
    pub(crate) body: Option<BodyReader>,
    done: Option<oneshot::Sender<Result<(), SessionError>>>,
}

impl SendRequest {
    /// Empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Request carrying only an encoded header
    pub fn from_header(header: Header) -> Self {
        Self::new().with_header(header)
    }

    /// Set the header
    pub fn with_header(mut self, header: Header) -> Self {
        self.header = Some(Bytes::copy_from_slice(&header.to_bytes()));
        self
    }

    /// Set pre-encoded header bytes
    pub fn with_header_bytes(mut self, header: Bytes) -> Self {
        self.header = Some(header);
        self
    }

    /// Set the body stream
    pub fn with_body<R>(mut self, body: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.body = Some(Box::new(body));
        self
    }

    /// Attach a fresh completion slot and return its receiver
    pub(crate) fn subscribe(&mut self) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.done = Some(tx);
        rx
    }

    /// Report the outcome. Never blocks; dropped if nobody is waiting.
    pub(crate) fn complete(&mut self, result: Result<(), SessionError>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
    }
}

impl std::fmt::Debug for SendRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendRequest")
            .field("header_len", &self.header.as_ref().map(Bytes::len))
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
