use mqtt_core::VarintError;
use thiserror::Error;

/// Failures writing a packet into a caller-provided buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("buffer too short to hold the encoded packet")]
    BufferTooShort,
    #[error("invalid remaining length: {0}")]
    Varint(#[from] VarintError),
    #[error("string longer than the 16-bit length prefix allows")]
    StringTooLong,
}

/// Failures parsing a packet out of the bytes Framing handed to the dispatcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet is truncated")]
    Truncated,
    #[error("malformed remaining length: {0}")]
    Varint(#[from] VarintError),
    #[error("unknown control packet type {0}")]
    UnknownPacketType(u8),
    #[error("packet body is not valid UTF-8 where a string was expected")]
    InvalidUtf8,
    #[error("packet kind does not match what the caller expected to decode")]
    UnexpectedKind,
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}
