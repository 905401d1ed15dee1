use std::{io, net::SocketAddr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the underlying byte stream.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode frame")]
    Encode(#[source] serde_json::Error),
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    #[error("connection is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A single frame that could not be decoded. The stream stays usable.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame exceeds {limit} bytes")]
    TooLong { limit: usize },
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Rejections reported back to the offending client inside an answer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolViolation {
    #[error("need login")]
    NeedLogin,
    #[error("already logged in")]
    AlreadyLoggedIn,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("name must not be empty")]
    MissingName,
    #[error("password must not be empty")]
    MissingPassword,
    #[error("unrecognized ctrl")]
    UnrecognizedCtrl,
    #[error("malformed frame")]
    MalformedFrame,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("shutdown did not finish within {timeout:?}; {remaining} handler(s) still running")]
    ShutdownTimeout { timeout: Duration, remaining: usize },
}
