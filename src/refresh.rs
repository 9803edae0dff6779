use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use httpclient::{Client, InMemoryResponse, InMemoryResponseExt, InMemoryResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cookies::RefreshCapability;
use crate::credentials::CredentialStore;

pub const DEFAULT_REFRESH_PATH: &str = "/auth/admin/refresh";
pub const DEFAULT_SESSION_PATH: &str = "/auth/admin/session";
pub const DEFAULT_REFRESH_COOKIE: &str = "admin_refresh_token";
pub const DEFAULT_REFRESH_HEADER: &str = "x-token-refresh-needed";
pub const DEFAULT_STORAGE_KEY: &str = "admin_token";

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// POSTed with an empty JSON body; the refresh cookie rides along.
    pub refresh_path: String,
    /// Probed at startup when no access token is held.
    pub session_path: String,
    /// Name of the HTTP-only cookie holding the refresh token.
    pub cookie_name: String,
    /// Response header asking for a proactive refresh.
    pub refresh_header: String,
    /// Storage key of the access token.
    pub storage_key: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            session_path: DEFAULT_SESSION_PATH.to_string(),
            cookie_name: DEFAULT_REFRESH_COOKIE.to_string(),
            refresh_header: DEFAULT_REFRESH_HEADER.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

/// `{ success, data, message }`, the shape of every admin API response.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenData {
    pub access_token: String,
}

/// Outcome of one refresh attempt, shared by everyone who waited on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResult {
    pub success: bool,
    pub access_token: Option<String>,
}

impl RefreshResult {
    pub fn refreshed(access_token: impl Into<String>) -> Self {
        Self {
            success: true,
            access_token: Some(access_token.into()),
        }
    }

    /// The new token, if this attempt produced one.
    pub fn token(&self) -> Option<&str> {
        if self.success {
            self.access_token.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("no refresh cookie present")]
    NoTokenAvailable,
    #[error("refresh rejected with status {status}")]
    Rejected { status: u16 },
    #[error("refresh reported success: false")]
    Unsuccessful,
    #[error("refresh transport failure: {0}")]
    Transport(String),
    #[error("malformed refresh response: {0}")]
    Malformed(String),
    #[error("refresh attempt panicked")]
    Panicked,
}

/// Something that can mint a new access token.
#[async_trait]
pub trait Refresher: Send + Sync + Debug {
    async fn perform_refresh(&self) -> Result<RefreshResult, RefreshError>;
}

/// Calls the refresh endpoint and stores the token it returns.
#[derive(Debug, Clone)]
pub struct RefreshExecutor {
    client: Client,
    config: RefreshConfig,
    capability: Arc<dyn RefreshCapability>,
    credentials: Arc<CredentialStore>,
}

impl RefreshExecutor {
    /// `client` must not carry [`AdminAuth`](crate::AdminAuth), or a failing refresh
    /// would try to refresh itself.
    pub fn new(
        client: Client,
        config: RefreshConfig,
        capability: Arc<dyn RefreshCapability>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            client,
            config,
            capability,
            credentials,
        }
    }
}

#[async_trait]
impl Refresher for RefreshExecutor {
    async fn perform_refresh(&self) -> Result<RefreshResult, RefreshError> {
        if !self.capability.has_refresh_capability() {
            debug!("no refresh cookie, skipping refresh call");
            return Err(RefreshError::NoTokenAvailable);
        }
        let res = self.client
            .post(&self.config.refresh_path)
            .set_json(serde_json::json!({}))
            .await;
        let token = read_token(res)?;
        self.credentials.set_access_token(&token);
        info!("access token refreshed");
        Ok(RefreshResult::refreshed(token))
    }
}

/// Pull the access token out of a refresh or session response.
pub(crate) fn read_token(res: InMemoryResult<InMemoryResponse>) -> Result<String, RefreshError> {
    let res = match res {
        Ok(res) => res,
        Err(httpclient::Error::HttpError(res)) => {
            return Err(RefreshError::Rejected { status: res.status().as_u16() });
        }
        Err(httpclient::Error::Protocol(e)) => return Err(RefreshError::Transport(e.to_string())),
    };
    let envelope: Envelope<TokenData> = res.json()
        .map_err(|e| RefreshError::Malformed(e.to_string()))?;
    match envelope {
        Envelope { success: false, .. } => Err(RefreshError::Unsuccessful),
        Envelope { data: None, .. } => Err(RefreshError::Malformed("missing data".to_string())),
        Envelope { data: Some(data), .. } if data.access_token.is_empty() => {
            Err(RefreshError::Malformed("empty access token".to_string()))
        }
        Envelope { data: Some(data), .. } => Ok(data.access_token),
    }
}
