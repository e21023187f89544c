use std::{error::Error as StdError, fmt, io};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Unknown,
    NotOpen,
    AlreadyOpen,
    TimedOut,
    EndOfFile,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "unknown",
            Self::NotOpen => "not open",
            Self::AlreadyOpen => "already open",
            Self::TimedOut => "timed out",
            Self::EndOfFile => "end of file",
        };
        f.write_str(label)
    }
}

/// Failure raised by a listener, raw stream or transport.
///
/// Every transport error reaching the session loop is treated as the peer
/// having gone away, whatever its kind.
#[derive(Debug, Error)]
#[error("transport {kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn end_of_file(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::EndOfFile, message)
    }

    pub fn not_open(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotOpen, message)
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportErrorKind::EndOfFile,
            io::ErrorKind::TimedOut => TransportErrorKind::TimedOut,
            io::ErrorKind::NotConnected => TransportErrorKind::NotOpen,
            io::ErrorKind::AddrInUse => TransportErrorKind::AlreadyOpen,
            _ => TransportErrorKind::Unknown,
        };
        Self::new(kind, err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("bad protocol version: {0:#010x}")]
    BadVersion(u32),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("negative size: {0}")]
    NegativeSize(i32),
    #[error("size {size} exceeds limit {limit}")]
    SizeLimit { size: usize, limit: usize },
    #[error("unknown field type: {0}")]
    UnknownType(u8),
}

/// Outcome of a single `Processor::process` call that did not succeed.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("application error: {0}")]
    Application(#[source] Box<dyn StdError + Send + Sync>),
    #[error("processor panicked: {0}")]
    Panicked(String),
}

impl ProcessError {
    pub fn application(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Application(err.into())
    }

    /// Whether the error means the connection is exhausted rather than broken.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(ProtocolError::Transport(_))
        )
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to listen: {0}")]
    Listen(#[source] TransportError),
    #[error("server cancelled")]
    Cancelled,
}
