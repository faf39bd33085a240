//! Error types for the measurement engine.

use thiserror::Error;

use crate::speedtest::TestKind;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine.
///
/// Precondition failures (`ModuleUnavailable`, `AlreadyRunning`,
/// `UnsupportedPlatform`, `InvalidConfig`) are returned synchronously from
/// [`Engine::start`](crate::Engine::start). Everything else only ever reaches
/// callers through the `onErrorTest` event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("measurement engine is not available")]
    ModuleUnavailable,

    #[error("a {kind} test is already running")]
    AlreadyRunning { kind: TestKind },

    #[error("unsupported: {0}")]
    UnsupportedPlatform(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("test cancelled by caller")]
    CancelledByCaller,
}

impl Error {
    /// Stable code carried in the `onErrorTest` payload.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ModuleUnavailable => "MODULE_UNAVAILABLE",
            Error::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Error::UnsupportedPlatform(_) => "UNSUPPORTED_PLATFORM",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Network(_) => "NETWORK_ERROR",
            Error::CancelledByCaller => "CANCELLED",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::CancelledByCaller)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(NetworkError::from(err))
    }
}

/// Transport-level failures of a transfer or probe.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("{url} responded with HTTP {status}")]
    Status { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out")]
    Timeout,

    #[error("endpoint closed the connection before sending any data")]
    EmptyResponse,

    #[error("all {attempts} probes failed (last: {last})")]
    AllProbesFailed { attempts: u32, last: String },

    #[error("only {succeeded} of {attempts} probes succeeded")]
    InsufficientProbes { succeeded: u32, attempts: u32 },
}

impl NetworkError {
    /// HTTP status, when the failure was a non-success response.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return NetworkError::Timeout;
        }
        if let Some(status) = err.status() {
            return NetworkError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        NetworkError::Transport(error_chain(&err))
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            NetworkError::Timeout
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

// reqwest hides the useful part (DNS, refused, reset) in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }
    msg
}
