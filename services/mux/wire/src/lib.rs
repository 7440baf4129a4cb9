//! Frame header codec for the mux session protocol.
//!
//! Every frame exchanged over a session starts with a fixed 12-byte header.
//! Data frames carry `length` bytes of body after the header; every other
//! frame type uses `length` as an inline value and has no body.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8  version          | protocol version (0)       |
//! +----------------------+----------------------------+
//! | u8  type             | Data/WindowUpdate/Ping/... |
//! +----------------------+----------------------------+
//! | u16 flags            | SYN/ACK/FIN/RST            |
//! +----------------------+----------------------------+
//! | u32 stream_id        | 0 for session frames       |
//! +----------------------+----------------------------+
//! | u32 length           | body length or inline value|
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod header;

// Re-export main types
pub use error::WireError;
pub use header::{Flags, FrameType, GoAwayCode, Header, HEADER_SIZE, PROTO_VERSION};
