use std::sync::Arc;

use httpclient::{Client, InMemoryResponse, InMemoryResponseExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::cookies::{CookieJar, RefreshCapability};
use crate::coordinator::{RefreshCoordinator, RefreshSnapshot};
use crate::credentials::CredentialStore;
use crate::error::ApiError;
use crate::refresh::{Envelope, TokenData};

pub const LOGIN_PATH: &str = "/auth/admin/login";
pub const LOGOUT_PATH: &str = "/auth/admin/logout";
pub const VERIFY_PATH: &str = "/auth/admin/verify";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticated,
    Anonymous,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    access_token: String,
    admin: Option<Value>,
}

/// An admin's session against the backend. Every call goes through
/// [`AdminAuth`](crate::AdminAuth), so an expired access token is refreshed and the
/// call replayed without the caller noticing.
#[derive(Debug)]
pub struct AdminSession {
    /// Carries `AdminAuth`; used for everything that needs a bearer token.
    pub(crate) api: Client,
    /// Cookie-only client for login, session probing and refreshing.
    pub(crate) session: Client,
    pub(crate) credentials: Arc<CredentialStore>,
    pub(crate) coordinator: Arc<RefreshCoordinator>,
    pub(crate) capability: Arc<dyn RefreshCapability>,
    pub(crate) jar: CookieJar,
    pub(crate) config: ClientConfig,
}

fn unwrap_envelope<T: DeserializeOwned>(res: InMemoryResponse) -> Result<T, ApiError> {
    let envelope: Envelope<T> = res.json()?;
    if !envelope.success {
        return Err(ApiError::Rejected {
            message: envelope.message.unwrap_or_else(|| "request was not successful".to_string()),
        });
    }
    match envelope.data {
        Some(data) => Ok(data),
        None => Ok(serde_json::from_value(Value::Null)?),
    }
}

impl AdminSession {
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.jar
    }

    pub fn refresh_state(&self) -> RefreshSnapshot {
        self.coordinator.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.has_access_token()
    }

    /// The authorized client, for calls the helpers below don't cover.
    pub fn api_client(&self) -> &Client {
        &self.api
    }

    /// Log in with email and password. The server sets the refresh cookie; the access
    /// token is stored. Returns the admin profile if the server sent one.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<Value>, ApiError> {
        let res = self.session
            .post(LOGIN_PATH)
            .json(LoginRequest { email, password })
            .await?;
        let data: LoginData = unwrap_envelope(res)?;
        self.credentials.set_access_token(&data.access_token);
        info!("admin logged in");
        Ok(data.admin)
    }

    /// Log out on the server and forget the access token. The token is cleared even
    /// if the server call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let res = self.api
            .post(LOGOUT_PATH)
            .set_json(serde_json::json!({}))
            .await;
        self.credentials.clear_access_token();
        info!("admin logged out");
        res.map(|_| ()).map_err(ApiError::from)
    }

    /// Re-establish a session from the refresh cookie alone. Makes no network call
    /// when the cookie is missing.
    pub async fn probe_session(&self) -> Result<(), ApiError> {
        if !self.capability.has_refresh_capability() {
            return Err(ApiError::NoTokenAvailable);
        }
        let res = self.session.get(&self.config.refresh.session_path).await?;
        let data: TokenData = unwrap_envelope(res)?;
        self.credentials.set_access_token(&data.access_token);
        debug!("session restored from refresh cookie");
        Ok(())
    }

    /// Check the held access token with the server, refreshing it if needed.
    pub async fn verify(&self) -> Result<Value, ApiError> {
        self.get_json(VERIFY_PATH).await
    }

    /// Startup: verify the token if one is held, otherwise probe for a session.
    /// Authentication failures mean "not logged in"; anything else is an error.
    pub async fn restore(&self) -> Result<SessionStatus, ApiError> {
        let outcome = if self.credentials.has_access_token() {
            debug!("access token present, verifying");
            self.verify().await.map(|_| ())
        } else {
            debug!("no access token, probing session");
            self.probe_session().await
        };
        match outcome {
            Ok(()) => Ok(SessionStatus::Authenticated),
            Err(e) if e.is_auth_failure() => {
                debug!("no session to restore: {e}");
                Ok(SessionStatus::Anonymous)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let res = self.api.get(path).await?;
        unwrap_envelope(res)
    }

    pub async fn get_json_with_query<T: DeserializeOwned, Q: Serialize>(
        &self,
        path: &str,
        query: Q,
    ) -> Result<T, ApiError> {
        let res = self.api.get(path).set_query(query).await?;
        unwrap_envelope(res)
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: B) -> Result<T, ApiError> {
        let res = self.api.post(path).set_json(body).await?;
        unwrap_envelope(res)
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: B) -> Result<T, ApiError> {
        let res = self.api.put(path).set_json(body).await?;
        unwrap_envelope(res)
    }

    /// Empty bodies count as success.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let res = self.api.delete(path).await?;
        let body = res.into_body();
        if body.is_empty() {
            return Ok(());
        }
        let envelope: Envelope<Value> = body.json()?;
        if envelope.success {
            Ok(())
        } else {
            Err(ApiError::Rejected {
                message: envelope.message.unwrap_or_else(|| "delete was not successful".to_string()),
            })
        }
    }
}
