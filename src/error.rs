use std::time::Duration;

/// The three failure families the panel API can produce. The connectivity
/// tracker only cares that a fetch failed; this exists for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    NetworkUnreachable,
    HttpError,
    ProtocolError,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("invalid response: {0}")]
    Protocol(String),

    #[error("missing API credential")]
    MissingCredential,
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::NetworkUnreachable(_) | FetchError::Timeout(_) => {
                FailureKind::NetworkUnreachable
            }
            FetchError::Http { .. } | FetchError::MissingCredential => FailureKind::HttpError,
            FetchError::Protocol(_) => FailureKind::ProtocolError,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::NetworkUnreachable(format!("timed out: {}", err));
        }
        if err.is_decode() {
            return FetchError::Protocol(err.to_string());
        }
        if let Some(status) = err.status() {
            return FetchError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        FetchError::NetworkUnreachable(err.to_string())
    }
}

/// Failure of a user command (bot control, points mutation, search).
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The server refused the command; carries its `error` text verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error("invalid command: {0}")]
    Invalid(String),

    #[error("{0} is already being refreshed")]
    Busy(&'static str),

    #[error("controller stopped")]
    Stopped,

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("controller stopped; create a new one to resume polling")]
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("invalid push URL: {0}")]
    InvalidUrl(String),

    #[error("push connect failed: {0}")]
    Connect(String),

    #[error("push handshake failed: {0}")]
    Handshake(String),
}
