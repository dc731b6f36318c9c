use std::fmt;

use thiserror::Error;

/// Completion codes reported to loader clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetError {
    Ok,
    /// Generic failure
    Failed,
    /// The request was cancelled
    Aborted,
    InvalidUrl,
    ConnectionRefused,
    TimedOut,
    NameNotResolved,
    /// Any other transport code, passed through untouched
    Other(i32),
}

impl NetError {
    pub fn code(self) -> i32 {
        match self {
            NetError::Ok => 0,
            NetError::Failed => -2,
            NetError::Aborted => -3,
            NetError::TimedOut => -7,
            NetError::ConnectionRefused => -102,
            NetError::NameNotResolved => -105,
            NetError::InvalidUrl => -300,
            NetError::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => NetError::Ok,
            -2 => NetError::Failed,
            -3 => NetError::Aborted,
            -7 => NetError::TimedOut,
            -102 => NetError::ConnectionRefused,
            -105 => NetError::NameNotResolved,
            -300 => NetError::InvalidUrl,
            other => NetError::Other(other),
        }
    }

    pub fn is_ok(self) -> bool {
        self == NetError::Ok
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetError::Ok => "OK",
            NetError::Failed => "ERR_FAILED",
            NetError::Aborted => "ERR_ABORTED",
            NetError::InvalidUrl => "ERR_INVALID_URL",
            NetError::ConnectionRefused => "ERR_CONNECTION_REFUSED",
            NetError::TimedOut => "ERR_TIMED_OUT",
            NetError::NameNotResolved => "ERR_NAME_NOT_RESOLVED",
            NetError::Other(_) => "ERR_OTHER",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// NetworkError represents all possible errors that can occur within the interception layer
#[derive(Error, Debug)]
pub enum NetworkError {
    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    /// Methods outside the supported set
    #[error("Unsupported HTTP method: {0}")]
    InvalidMethod(String),

    /// The upstream factory has disconnected
    #[error("Upstream factory unavailable")]
    UpstreamUnavailable,

    /// The caller's client pipe is gone
    #[error("Loader client disconnected")]
    ClientDisconnected,

    /// Transport level failure reported through a completion code
    #[error("Transport error: {0}")]
    TransportError(NetError),

    /// Shields policy errors
    #[error("Shields error: {0}")]
    ShieldsError(#[from] bulwark_shields::ShieldsError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl NetworkError {
    /// The completion code a caller sees when this error ends a request
    pub fn net_error(&self) -> NetError {
        match self {
            NetworkError::UrlError(_) => NetError::InvalidUrl,
            NetworkError::ClientDisconnected => NetError::Aborted,
            NetworkError::TransportError(code) => *code,
            NetworkError::InvalidMethod(_)
            | NetworkError::UpstreamUnavailable
            | NetworkError::ShieldsError(_)
            | NetworkError::SerializationError(_) => NetError::Failed,
        }
    }
}
