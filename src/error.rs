//! Per-layer error types. Each layer gets its own `thiserror`-derived enum
//! rather than one crate-wide catch-all, mirroring the error banding
//! described for this library: local-recoverable codec errors never
//! propagate as far as a transactional client error.

use thiserror::Error;

/// Errors produced while decoding or encoding a wire frame.
///
/// These are local-recoverable: a caller logs and discards the bytes, the
/// Interface keeps running.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("crc mismatch")]
    CrcMismatch,
    #[error("unsupported function code: {0:#04x}")]
    UnsupportedFunction(u8),
    #[error("invalid frame contents")]
    InvalidFrame,
    #[error("tcp protocol id {0} is not 0")]
    InvalidProtocolId(u16),
    #[error("tcp mbap length {declared} disagrees with pdu length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors produced by an [`crate::interface::Interface`] worker.
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("a transmission is already in flight")]
    Busy,
    #[error("interface is not ready")]
    NotReady,
    #[error("too many receive callbacks registered")]
    TooManyCallbacks,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type InterfaceResult<T> = Result<T, InterfaceError>;

/// The outcome of a Client transaction. Modbus exceptions are carried as
/// `Ok` with a non-zero `exception_code` on the returned frame, never as an
/// `Err` variant here: only failures of the library/transport itself are
/// represented by this type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no response data is available yet")]
    NoData,
    #[error("received an invalid frame")]
    InvalidFrame,
    #[error("a request is already in flight")]
    Busy,
    #[error("failed to transmit the request")]
    TxFailed,
    #[error("the request timed out")]
    Timeout,
    #[error("received a response that does not match the pending request")]
    InvalidResponse,
    #[error("the client has not been initialized")]
    NotInitialized,
    #[error("client initialization failed")]
    InitFailed,
    #[error(transparent)]
    Interface(#[from] InterfaceError),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned while configuring a Server's word table.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("word range overlaps an existing entry")]
    WordOverlap,
    #[error("word store is at capacity")]
    WordOverflow,
    #[error("word register count {0} is out of range")]
    InvalidWordSize(u16),
    #[error("direct pointer words must have exactly one register")]
    DirectPointerMultiWord,
    #[error("missing handler for a required read or write capability")]
    MissingHandler,
    #[error(transparent)]
    Interface(#[from] InterfaceError),
}

pub type ServerResult<T> = Result<T, ServerError>;
