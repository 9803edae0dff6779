use httpclient::{InMemoryError, InMemoryResponseExt, ProtocolError, StatusCode};
use thiserror::Error;

use crate::refresh::RefreshError;

/// Terminal authentication outcome, attached to the 401 response handed back by
/// [`AdminAuth`](crate::AdminAuth) so callers can tell it apart from an ordinary 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// The request was replayed with a fresh token and still got 401.
    SessionExpired,
    /// The refresh attempt itself failed.
    RefreshFailed(RefreshError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed with status {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request rejected: {message}")]
    Rejected { message: String },
    #[error("session expired, please log in again")]
    SessionExpired,
    #[error("token refresh failed: {0}")]
    RefreshFailed(RefreshError),
    #[error("no refresh cookie present")]
    NoTokenAvailable,
}

impl ApiError {
    /// True for outcomes that mean the user has to log in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::SessionExpired | ApiError::RefreshFailed(_) | ApiError::NoTokenAvailable
        ) || matches!(self, ApiError::Http { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::SessionExpired => ApiError::SessionExpired,
            AuthFailure::RefreshFailed(e) => ApiError::RefreshFailed(e),
        }
    }
}

impl From<InMemoryError> for ApiError {
    fn from(err: InMemoryError) -> Self {
        match err {
            httpclient::Error::Protocol(e) => ApiError::Transport(e),
            httpclient::Error::HttpError(res) => {
                if let Some(failure) = res.extensions().get::<AuthFailure>() {
                    return failure.clone().into();
                }
                let status = res.status();
                let body = res.text().unwrap_or_default();
                ApiError::Http { status, body }
            }
        }
    }
}
