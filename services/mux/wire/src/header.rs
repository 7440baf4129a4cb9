//! Fixed-size frame header.
//!
//! Decoding never validates: the receive loop checks the version and the
//! message type separately so that each failure can be reported on its own.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::WireError;

/// Wire protocol version
pub const PROTO_VERSION: u8 = 0;

/// Header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Message types, contiguous from `Data` to `GoAway`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Stream data, followed by `length` bytes of body
    Data = 0x00,
    /// Stream receive window update
    WindowUpdate = 0x01,
    /// Session liveness probe and its acknowledgement
    Ping = 0x02,
    /// Session termination notice
    GoAway = 0x03,
}

impl FrameType {
    /// Lowest supported type value
    pub const MIN: u8 = FrameType::Data as u8;
    /// Highest supported type value
    pub const MAX: u8 = FrameType::GoAway as u8;

    /// All frame types in wire order
    pub const ALL: [FrameType; 4] = [
        FrameType::Data,
        FrameType::WindowUpdate,
        FrameType::Ping,
        FrameType::GoAway,
    ];

    /// Position of this type in a dispatch table
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameType::Data),
            0x01 => Ok(FrameType::WindowUpdate),
            0x02 => Ok(FrameType::Ping),
            0x03 => Ok(FrameType::GoAway),
            _ => Err(WireError::Type(value)),
        }
    }
}

bitflags! {
    /// Frame flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u16 {
        /// Start of a new stream, or a ping request
        const SYN = 1 << 0;
        /// Acknowledges a stream open, or answers a ping
        const ACK = 1 << 1;
        /// Half-close of a stream
        const FIN = 1 << 2;
        /// Immediate stream reset
        const RST = 1 << 3;
    }
}

/// Reason codes carried in the length field of a GoAway frame
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoAwayCode {
    /// Normal termination
    Normal = 0,
    /// Peer violated the protocol
    ProtocolError = 1,
    /// Internal failure on the sender
    InternalError = 2,
}

impl GoAwayCode {
    /// Map a raw code, keeping unknown values as internal errors
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => GoAwayCode::Normal,
            1 => GoAwayCode::ProtocolError,
            _ => GoAwayCode::InternalError,
        }
    }
}

/// Decoded frame header (12 bytes, big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    version: u8,
    msg_type: u8,
    flags: u16,
    stream_id: u32,
    length: u32,
}

impl Header {
    /// Create a header for the current protocol version
    pub fn new(typ: FrameType, flags: Flags, stream_id: u32, length: u32) -> Self {
        Self {
            version: PROTO_VERSION,
            msg_type: typ as u8,
            flags: flags.bits(),
            stream_id,
            length,
        }
    }

    /// Ping request or reply carrying an opaque value
    pub fn ping(flags: Flags, opaque: u32) -> Self {
        Self::new(FrameType::Ping, flags, 0, opaque)
    }

    /// Session go-away notice
    pub fn go_away(code: GoAwayCode) -> Self {
        Self::new(FrameType::GoAway, Flags::empty(), 0, code as u32)
    }

    /// Window update granting `delta` more bytes on a stream
    pub fn window_update(flags: Flags, stream_id: u32, delta: u32) -> Self {
        Self::new(FrameType::WindowUpdate, flags, stream_id, delta)
    }

    /// Data frame header for a body of `len` bytes
    pub fn data(flags: Flags, stream_id: u32, len: u32) -> Self {
        Self::new(FrameType::Data, flags, stream_id, len)
    }

    /// Raw protocol version field
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw message type field
    pub fn msg_type(&self) -> u8 {
        self.msg_type
    }

    /// Flags, dropping unknown bits
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags)
    }

    /// Stream identifier (0 for session-level frames)
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Body length for data frames, inline value otherwise
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Typed message type
    pub fn frame_type(&self) -> Result<FrameType, WireError> {
        FrameType::try_from(self.msg_type)
    }

    /// Check version, type and flags
    pub fn validate(&self) -> Result<(), WireError> {
        if self.version != PROTO_VERSION {
            return Err(WireError::Version(self.version));
        }
        self.frame_type()?;
        if Flags::from_bits(self.flags).is_none() {
            return Err(WireError::Flags(self.flags));
        }
        Ok(())
    }

    /// Decode a header from exactly [`HEADER_SIZE`] bytes without validating it
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &raw[..];
        Self {
            version: buf.get_u8(),
            msg_type: buf.get_u8(),
            flags: buf.get_u16(),
            stream_id: buf.get_u32(),
            length: buf.get_u32(),
        }
    }

    /// Decode from the front of a slice
    pub fn decode_slice(raw: &[u8]) -> Result<Self, WireError> {
        let fixed: &[u8; HEADER_SIZE] = raw
            .get(..HEADER_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or(WireError::Incomplete(raw.len()))?;
        Ok(Self::decode(fixed))
    }

    /// Encode into a fixed buffer
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type);
        buf.put_u16(self.flags);
        buf.put_u32(self.stream_id);
        buf.put_u32(self.length);
        out
    }

    /// Append the encoded header to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x00).unwrap(), FrameType::Data);
        assert_eq!(FrameType::try_from(0x03).unwrap(), FrameType::GoAway);
        assert_eq!(FrameType::try_from(0x04), Err(WireError::Type(4)));
        assert_eq!(FrameType::MIN, 0);
        assert_eq!(FrameType::MAX, 3);
    }

    #[test]
    fn test_header_layout() {
        let header = Header::new(FrameType::WindowUpdate, Flags::SYN | Flags::ACK, 7, 0x0102_0304);
        let raw = header.to_bytes();
        assert_eq!(raw, [0, 1, 0, 3, 0, 0, 0, 7, 1, 2, 3, 4]);
        assert_eq!(Header::decode(&raw), header);
    }

    #[test]
    fn test_version_and_type_checked_independently() {
        let mut raw = Header::ping(Flags::SYN, 9).to_bytes();
        raw[0] = 1;
        let header = Header::decode(&raw);
        assert_eq!(header.validate(), Err(WireError::Version(1)));
        assert_eq!(header.frame_type(), Ok(FrameType::Ping));

        let mut raw = Header::ping(Flags::SYN, 9).to_bytes();
        raw[1] = 0x10;
        let header = Header::decode(&raw);
        assert_eq!(header.version(), PROTO_VERSION);
        assert_eq!(header.validate(), Err(WireError::Type(0x10)));
    }

    #[test]
    fn test_unknown_flags() {
        let mut raw = Header::go_away(GoAwayCode::Normal).to_bytes();
        raw[3] = 0x80;
        let header = Header::decode(&raw);
        assert_eq!(header.validate(), Err(WireError::Flags(0x80)));
        assert!(header.flags().is_empty());
    }

    #[test]
    fn test_decode_slice_short() {
        assert_eq!(Header::decode_slice(&[0u8; 5]), Err(WireError::Incomplete(5)));
    }

    #[test]
    fn test_go_away_code() {
        let header = Header::go_away(GoAwayCode::ProtocolError);
        assert_eq!(GoAwayCode::from_raw(header.length()), GoAwayCode::ProtocolError);
        assert_eq!(GoAwayCode::from_raw(77), GoAwayCode::InternalError);
    }
}
