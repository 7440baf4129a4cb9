//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes for a full header
    #[error("incomplete header: {0} bytes")]
    Incomplete(usize),

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Message type outside the supported range
    #[error("unknown type {0}")]
    Type(u8),

    /// Unknown flag bits set
    #[error("unknown flags {0:#06x}")]
    Flags(u16),
}
