//! Error types for tabletkv

use crate::common::types::ServerId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Stable numeric status codes carried on the wire.
pub mod status {
    pub const OK: u32 = 0;
    pub const RETRY: u32 = 1;
    pub const NO_SUCH_SERVER: u32 = 2;
    pub const TABLE_DOES_NOT_EXIST: u32 = 3;
    pub const UNIMPLEMENTED_REQUEST: u32 = 4;
    pub const TRANSPORT_FAILURE: u32 = 5;
    pub const FATAL: u32 = 6;
    pub const INTERNAL: u32 = 7;
}

#[derive(Error, Debug)]
pub enum Error {
    /// A precondition is not yet met; the caller should back off and retry.
    #[error("retry: precondition not yet met")]
    Retry,

    #[error("no such server: {0}")]
    NoSuchServer(ServerId),

    #[error("table does not exist: {0}")]
    TableDoesNotExist(String),

    #[error("unimplemented request type {0}")]
    UnimplementedRequest(u32),

    /// An outbound RPC to a cluster member failed after retries. Consumed
    /// internally and converted to a membership event, never surfaced to
    /// clients.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// An authoritative-state invariant no longer holds. The coordinator
    /// must not continue serving from a corrupted map.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Non-OK status received from a remote server.
    #[error("remote error: status {0}")]
    Remote(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this worth retrying from the caller's side?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Retry | Error::TransportFailure(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// Status code used when propagating this error to a client.
    pub fn status_code(&self) -> u32 {
        match self {
            Error::Retry => status::RETRY,
            Error::NoSuchServer(_) => status::NO_SUCH_SERVER,
            Error::TableDoesNotExist(_) => status::TABLE_DOES_NOT_EXIST,
            Error::UnimplementedRequest(_) => status::UNIMPLEMENTED_REQUEST,
            Error::TransportFailure(_) => status::TRANSPORT_FAILURE,
            Error::Fatal(_) => status::FATAL,
            Error::Remote(code) => *code,
            _ => status::INTERNAL,
        }
    }

    /// Reconstruct an error from a non-OK wire status.
    pub fn from_status(code: u32) -> Self {
        debug_assert_ne!(code, status::OK);
        match code {
            status::RETRY => Error::Retry,
            _ => Error::Remote(code),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
