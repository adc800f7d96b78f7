// Copyright 2020 Joyent, Inc.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Well-known values of the `ErrorCode` envelope field.
pub mod codes {
    /// No handler is registered for the requested facade and method.
    pub const NOT_IMPLEMENTED: &str = "not implemented";
    /// The request parameters could not be decoded.
    pub const BAD_REQUEST: &str = "bad request";
    /// The handler panicked or produced a response that could not be
    /// encoded.
    pub const INTERNAL: &str = "internal error";
}

/// An application-level failure, carried in the `Error` and `ErrorCode`
/// envelope fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RequestError {
    pub message: String,
    pub code: String,
}

impl RequestError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        RequestError {
            message: message.into(),
            code: code.into(),
        }
    }

    /// An error without a code.
    pub fn message(message: impl Into<String>) -> Self {
        RequestError::new(message, "")
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        RequestError::new(message, codes::NOT_IMPLEMENTED)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        RequestError::new(message, codes::BAD_REQUEST)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        RequestError::new(message, codes::INTERNAL)
    }
}

/// Errors produced by the codec and the call multiplexer.
///
/// The type is `Clone` so that a single connection failure can resolve every
/// outstanding call with the same value.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The transport failed to send or receive a message.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<io::Error>),

    /// An outgoing envelope could not be serialized.
    #[error("cannot encode message: {0}")]
    Encode(#[source] Arc<serde_json::Error>),

    /// An incoming envelope or body could not be deserialized.
    #[error("cannot decode message: {0}")]
    Decode(#[source] Arc<serde_json::Error>),

    /// The remote handler reported a failure.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The connection failed while the call was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] Arc<io::Error>),

    /// The connection was closed deliberately.
    #[error("connection is shut down")]
    Shutdown,

    /// A reply referenced a request id with no outstanding call.
    #[error("reply for unknown request id {0}")]
    UnknownRequestId(u64),
}

impl Error {
    pub fn transport(err: io::Error) -> Error {
        Error::Transport(Arc::new(err))
    }

    pub fn encode(err: serde_json::Error) -> Error {
        Error::Encode(Arc::new(err))
    }

    pub fn decode(err: serde_json::Error) -> Error {
        Error::Decode(Arc::new(err))
    }

    /// Converts the error that ended a read loop into the error delivered to
    /// every call still outstanding.
    pub fn connection_lost(cause: Error) -> Error {
        match cause {
            Error::Transport(err) | Error::ConnectionLost(err) => {
                Error::ConnectionLost(err)
            }
            other => Error::ConnectionLost(Arc::new(io::Error::new(
                io::ErrorKind::InvalidData,
                other.to_string(),
            ))),
        }
    }

    /// The application error code, for errors reported by the remote
    /// handler.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Request(err) if !err.code.is_empty() => Some(err.code.as_str()),
            _ => None,
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::ConnectionLost(_))
    }
}
