//! Error types for the upload server.
//!
//! Errors are split by scope:
//! - `FrameError`, `StoreError` and `TransferError` end the current session only.
//! - `ServerError` stops the lifecycle controller.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Header decoding and encoding errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Buffer is shorter than the header its length prefixes describe.
    #[error("malformed header: need {needed} bytes, have {available}")]
    MalformedHeader { needed: usize, available: usize },

    /// A text field is not valid UTF-8.
    #[error("invalid UTF-8 in {field} field")]
    Encoding {
        field: &'static str,
        #[source]
        source: std::str::Utf8Error,
    },

    /// Declared payload plus digest does not fit in memory on this target.
    #[error("frame body of {file_size} + {hash_length} bytes is too large")]
    BodyTooLarge { file_size: u32, hash_length: u8 },

    /// A text field does not fit its length prefix.
    #[error("{field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// File persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("refusing to store file under name {0:?}")]
    InvalidName(String),

    #[error("failed to write '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors that abort a single transfer session.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Peer closed the connection in the middle of a frame.
    #[error("connection closed after {received} of {expected} bytes")]
    ConnectionClosed { received: usize, expected: usize },

    /// A read timed out in the middle of a frame.
    #[error("transfer timed out after {received} of {expected} bytes")]
    TransferTimeout { received: usize, expected: usize },

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Map a failed read into the session taxonomy.
    pub(crate) fn from_read(err: io::Error, received: usize, expected: usize) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                TransferError::TransferTimeout { received, expected }
            }
            io::ErrorKind::UnexpectedEof => TransferError::ConnectionClosed { received, expected },
            _ => TransferError::Io(err),
        }
    }
}

/// Upload client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("file is {len} bytes, frames carry at most {max}")]
    TooLarge { len: usize, max: usize },

    #[error("failed to read reply: {0}")]
    Reply(#[from] TransferError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors that stop the lifecycle controller.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to poll listener: {0}")]
    Poll(#[source] io::Error),

    #[error("server is not listening")]
    NotListening,

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
