//! Error taxonomy for calls against the admin API.
//!
//! Every failure of a user action ends up as one of these variants and is
//! shown through the notification center. Nothing is retried automatically.

use thiserror::Error;

const GENERIC_NETWORK_MESSAGE: &str = "Could not reach the server. Check your connection and try again.";
const TIMEOUT_MESSAGE: &str = "The server did not answer in time. Please try again.";
const UNAUTHORIZED_MESSAGE: &str = "Your session has expired or you lack permission. Please sign in again.";
const MALFORMED_MESSAGE: &str = "The server sent an unexpected response.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Rejected locally, the request never left the client
    #[error("{0}")]
    Validation(String),

    #[error("network error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    /// 401 or 403 from the server
    #[error("not authorized (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Business failure reported by the server (`success: false` or an error body)
    #[error("{message}")]
    Server { status: Option<u16>, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn server(message: impl Into<String>) -> Self {
        ApiError::Server {
            status: None,
            message: message.into(),
        }
    }

    /// Text suitable for a toast. Server messages are passed through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Validation(message) => message.clone(),
            ApiError::Transport(_) => GENERIC_NETWORK_MESSAGE.to_string(),
            ApiError::Timeout => TIMEOUT_MESSAGE.to_string(),
            ApiError::Unauthorized { .. } => UNAUTHORIZED_MESSAGE.to_string(),
            ApiError::Server { message, .. } => message.clone(),
            ApiError::Malformed(_) => MALFORMED_MESSAGE.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Malformed(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
