use thiserror::Error;

/// Errors from parsing or serializing KNXnet/IP wire structures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("buffer too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("header size field {0:#04x} is not 0x06")]
    BadHeaderSize(u8),
    #[error("total_length {total} exceeds buffer length {buffer}")]
    LengthMismatch { total: usize, buffer: usize },
    #[error("service_type field is zero")]
    ZeroServiceType,
    #[error("unrecognized service type {0:#06x}")]
    UnknownServiceType(u16),
    #[error("request/ack body size field {0:#04x} is not 0x04")]
    BadBodySize(u8),
    #[error("unknown host protocol code {0:#04x}")]
    UnknownHostProtocol(u8),
}

/// Errors surfaced by the per-channel data-endpoint handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("protocol version {0:#04x} is not supported")]
    VersionMismatch(u8),
    #[error("channel id {expected} does not match packet channel id {got}")]
    ChannelIdMismatch { expected: u8, got: u8 },
    #[error("sequence {got} outside acceptance window (expected {expected})")]
    SequenceRejected { expected: u8, got: u8 },
    #[error("cEMI message code {0:#04x} is not valid for this channel's role")]
    FrameTypeMismatch(u8),
    #[error("no acknowledgment received within the retry budget")]
    Timeout,
    #[error("channel is closed")]
    Closed,
    #[error("frame decode error: {0}")]
    Frame(#[from] FrameError),
}

/// Errors surfaced by the secure session store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0:#06x} is not known to this store")]
    UnknownSession(u16),
    #[error("session authentication failed")]
    AuthenticationFailed,
    #[error("session {0:#06x} has expired")]
    Expired(u16),
    #[error("session id space exhausted")]
    IdSpaceExhausted,
    #[error("cryptographic failure: {0}")]
    Crypto(String),
    #[error("frame decode error: {0}")]
    Frame(#[from] FrameError),
}
