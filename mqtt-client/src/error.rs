use mqtt_packet::{DecodeError, EncodeError};
use thiserror::Error;

/// Error taxonomy for the client engine (§7). Variants are deliberately
/// matchable: `ReconnectTimeout` is routine and retried by the worker, the
/// rest are not.
#[derive(Debug, Error)]
pub enum Error {
    #[error("client is not connected")]
    NotConnected,
    #[error("session has entered clean-session shutdown")]
    CleanSession,

    #[error("declared packet length exceeds the read buffer")]
    BufferTooShort,
    #[error("no bytes available to read before the deadline")]
    NothingToRead,
    #[error("failed to write to the transport")]
    SendFailed,

    #[error("an ack table entry for this (kind, packet id) already exists")]
    AckDuplicate,
    #[error("ack table is full")]
    AckTooMany,

    #[error("failed to serialize outbound packet: {0}")]
    Serialize(#[from] EncodeError),
    #[error("failed to decode inbound packet: {0}")]
    Deserialize(#[from] DecodeError),

    #[error("reconnect attempt failed, caller should retry")]
    ReconnectTimeout,
    #[error("resubscribe after reconnect failed: {0}")]
    ResubscribeFailed(String),
    #[error("connect rejected by broker: {0}")]
    ConnectFailed(mqtt_core::ConnectReturnCode),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("topic filter is not well-formed: {0:?}")]
    InvalidTopicFilter(String),

    #[error("out of memory")]
    OutOfMemory,
    #[error("required argument was null/empty")]
    NullArgument,
}

pub type Result<T> = std::result::Result<T, Error>;
