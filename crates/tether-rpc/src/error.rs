//! Framing errors and their mapping onto remote call failures.

use std::io;

use tether_core::RemoteError;
use thiserror::Error;

use crate::jsonrpc::JsonRpcError;

/// Failures of the Content-Length framing layer.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Reading or writing the pipe failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A header block had no Content-Length.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// The Content-Length value was not a number.
    #[error("invalid header format")]
    InvalidHeader,
}

impl From<FrameError> for RemoteError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Io(source) => Self::from(source),
            FrameError::MissingContentLength | FrameError::InvalidHeader => Self::Codec {
                message: error.to_string(),
            },
        }
    }
}

/// Converts a JSON-RPC error object into a rejected call.
#[must_use]
pub fn rejected(error: JsonRpcError) -> RemoteError {
    RemoteError::Rejected {
        code: error.code,
        message: error.message,
    }
}
