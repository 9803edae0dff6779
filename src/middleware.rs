use std::sync::Arc;

use async_trait::async_trait;
use httpclient::header::{HeaderValue, AUTHORIZATION};
use httpclient::{InMemoryRequest, Middleware, Next, ProtocolResult, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::coordinator::RefreshCoordinator;
use crate::credentials::CredentialStore;
use crate::error::AuthFailure;
use crate::notify::{login_redirect_target, Notifier};
use crate::refresh::RefreshError;

/// Authorizes every request with the stored access token and recovers from an
/// expired token by refreshing once and replaying the request.
#[derive(Debug)]
pub struct AdminAuth {
    credentials: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    notifier: Arc<dyn Notifier>,
    refresh_header: String,
    login_path: String,
    base_path: String,
}

/// Per-call bookkeeping threaded through the retry path.
#[derive(Debug)]
struct CallContext {
    request: InMemoryRequest,
    retried: bool,
}

impl CallContext {
    fn new(request: InMemoryRequest) -> Self {
        Self { request, retried: false }
    }

    /// The request path relative to the API base, e.g. `/orders` for
    /// `https://shop.test/api/orders` with base path `/api`.
    fn return_path(&self, base_path: &str) -> &str {
        let path = self.request.uri().path();
        match path.strip_prefix(base_path) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }
}

fn authorize(request: &mut InMemoryRequest, token: &str) {
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(value) => {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Err(e) => warn!("access token is not a valid header value: {e}"),
    }
}

impl AdminAuth {
    pub fn new(
        credentials: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        notifier: Arc<dyn Notifier>,
        refresh_header: impl Into<String>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            coordinator,
            notifier,
            refresh_header: refresh_header.into(),
            login_path: login_path.into(),
            base_path: String::new(),
        }
    }

    /// Path prefix of the API base URL, stripped from the return path handed to
    /// the login redirect.
    pub fn base_path(mut self, base_path: &str) -> Self {
        self.base_path = base_path.trim_end_matches('/').to_string();
        self
    }

    fn redirect_target(&self, ctx: &CallContext) -> String {
        login_redirect_target(&self.login_path, ctx.return_path(&self.base_path))
    }

    /// Attach the current token, if any. A missing token is not an error here;
    /// the server answers 401 if it needs one.
    fn authorize(&self, request: &mut InMemoryRequest) {
        if let Some(token) = self.credentials.get_access_token() {
            authorize(request, &token);
        }
    }

    fn wants_refresh(&self, res: &Response) -> bool {
        res.headers()
            .get(self.refresh_header.as_str())
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    fn observe(&self, res: &Response) {
        if self.wants_refresh(res) {
            self.coordinator.refresh_in_background(Arc::clone(&self.notifier));
        }
    }

    fn expire_session(&self, ctx: &CallContext, mut res: Response) -> Response {
        info!(path = ctx.return_path(&self.base_path), "replayed request still unauthorized, session expired");
        self.credentials.clear_access_token();
        let target = self.redirect_target(ctx);
        self.notifier.show_session_expired_with_redirect(&target);
        res.extensions_mut().insert(AuthFailure::SessionExpired);
        res
    }

    fn refresh_failed(&self, ctx: &CallContext, mut res: Response, err: RefreshError) -> Response {
        info!(path = ctx.return_path(&self.base_path), "token refresh failed: {err}");
        self.credentials.clear_access_token();
        let target = self.redirect_target(ctx);
        self.notifier.show_refresh_error_with_redirect(&target);
        res.extensions_mut().insert(AuthFailure::RefreshFailed(err));
        res
    }
}

#[async_trait]
impl Middleware for AdminAuth {
    async fn handle(&self, mut request: InMemoryRequest, next: Next<'_>) -> ProtocolResult<Response> {
        self.authorize(&mut request);
        let mut ctx = CallContext::new(request);
        loop {
            let res = next.run(ctx.request.clone()).await?;
            self.observe(&res);
            if res.status() != StatusCode::UNAUTHORIZED {
                return Ok(res);
            }
            if ctx.retried {
                return Ok(self.expire_session(&ctx, res));
            }
            ctx.retried = true;
            let refreshed = self.coordinator.refresh().await.and_then(|result| {
                result.token()
                    .map(str::to_string)
                    .ok_or_else(|| RefreshError::Malformed("refresh produced no token".to_string()))
            });
            match refreshed {
                Ok(token) => {
                    debug!(path = ctx.return_path(&self.base_path), "replaying request with refreshed token");
                    // the token from this exact refresh, not whatever is stored by now
                    authorize(&mut ctx.request, &token);
                }
                Err(err) => return Ok(self.refresh_failed(&ctx, res, err)),
            }
        }
    }
}
