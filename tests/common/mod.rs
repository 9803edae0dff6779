#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use admin_session::{AdminSession, ClientConfig, CookieJar, MemoryStorage, Notifier, TokenStorage};
use async_trait::async_trait;
use httpclient::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use httpclient::{
    InMemoryBody, InMemoryRequest, InMemoryResponse, InMemoryResponseExt, Middleware, Next, ProtocolResult,
    Response, StatusCode,
};
use serde_json::{json, Value};

pub const BASE_URL: &str = "http://backend.test/api";
const BASE_PATH: &str = "/api";
pub const REFRESH_COOKIE: &str = "admin_refresh_token";
pub const PASSWORD: &str = "secret";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
    pub body: Option<Value>,
}

impl Seen {
    fn is_auth_endpoint(&self) -> bool {
        matches!(
            self.path.as_str(),
            "/auth/admin/refresh" | "/auth/admin/login" | "/auth/admin/session" | "/auth/admin/logout"
        )
    }

    fn has_refresh_cookie(&self) -> bool {
        self.cookie
            .as_deref()
            .is_some_and(|c| c.split("; ").any(|pair| pair.starts_with(&format!("{REFRESH_COOKIE}="))))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Hold {
    #[default]
    None,
    UntilUnauthorized(usize),
    UntilReleased,
}

#[derive(Debug, Default)]
struct BackendState {
    valid_token: Option<String>,
    next_token: Option<String>,
    reject_all: bool,
    hint_next: bool,
    hold: Hold,
    seen: Vec<Seen>,
}

/// Scripted admin backend, installed as the innermost middleware so no request
/// leaves the process.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
    refresh_calls: Arc<AtomicUsize>,
    unauthorized: Arc<AtomicUsize>,
}

fn respond(status: StatusCode, body: Value, headers: &[(&str, &str)]) -> Response {
    let mut map = HeaderMap::new();
    map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in headers {
        map.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    let res = <InMemoryResponse as InMemoryResponseExt>::new(status, map, InMemoryBody::Json(body));
    let (parts, body) = res.into_parts();
    Response::from_parts(parts, body.into())
}

fn empty(status: StatusCode) -> Response {
    let res = <InMemoryResponse as InMemoryResponseExt>::new(status, HeaderMap::new(), InMemoryBody::Empty);
    let (parts, body) = res.into_parts();
    Response::from_parts(parts, body.into())
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The access token API routes accept.
    pub fn accepting(self, token: &str) -> Self {
        self.lock().valid_token = Some(token.to_string());
        self
    }

    /// The token refresh and session probing hand out. Without one, refresh is refused.
    pub fn minting(self, token: &str) -> Self {
        self.lock().next_token = Some(token.to_string());
        self
    }

    /// Answer 401 to every API route, whatever the token.
    pub fn rejecting_everything(self) -> Self {
        self.lock().reject_all = true;
        self
    }

    /// Put the refresh hint header on the next successful API response.
    pub fn hint_next_response(self) -> Self {
        self.lock().hint_next = true;
        self
    }

    /// Keep refresh calls waiting until this many API calls have been refused.
    pub fn hold_refresh_until_unauthorized(self, count: usize) -> Self {
        self.lock().hold = Hold::UntilUnauthorized(count);
        self
    }

    /// Keep refresh calls waiting until [`release_refresh`](Self::release_refresh).
    pub fn hold_refresh(self) -> Self {
        self.lock().hold = Hold::UntilReleased;
        self
    }

    pub fn release_refresh(&self) {
        self.lock().hold = Hold::None;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.lock().seen.clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Seen> {
        self.requests().into_iter().filter(|s| s.path == path).collect()
    }

    pub fn api_requests(&self) -> Vec<Seen> {
        self.requests().into_iter().filter(|s| !s.is_auth_endpoint()).collect()
    }

    async fn wait_for_release(&self) {
        for _ in 0..500 {
            let hold = self.lock().hold;
            let released = match hold {
                Hold::None => true,
                Hold::UntilUnauthorized(count) => self.unauthorized.load(Ordering::SeqCst) >= count,
                Hold::UntilReleased => false,
            };
            if released {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("refresh was held for too long");
    }

    fn mint(&self, seen: &Seen) -> Option<String> {
        if !seen.has_refresh_cookie() {
            return None;
        }
        let mut state = self.lock();
        let token = state.next_token.clone()?;
        state.valid_token = Some(token.clone());
        Some(token)
    }

    async fn refresh(&self, seen: &Seen) -> Response {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_for_release().await;
        match self.mint(seen) {
            Some(token) => respond(StatusCode::OK, json!({"success": true, "data": {"accessToken": token}}), &[]),
            None => respond(StatusCode::UNAUTHORIZED, json!({"success": false, "message": "invalid refresh token"}), &[]),
        }
    }

    fn session(&self, seen: &Seen) -> Response {
        match self.mint(seen) {
            Some(token) => respond(StatusCode::OK, json!({"success": true, "data": {"accessToken": token}}), &[]),
            None => respond(StatusCode::UNAUTHORIZED, json!({"success": false, "message": "no session"}), &[]),
        }
    }

    fn login(&self, seen: &Seen) -> Response {
        let password = seen.body.as_ref().and_then(|b| b["password"].as_str());
        if password != Some(PASSWORD) {
            return respond(StatusCode::UNAUTHORIZED, json!({"success": false, "message": "invalid credentials"}), &[]);
        }
        self.lock().valid_token = Some("login-token".to_string());
        respond(
            StatusCode::OK,
            json!({"success": true, "data": {"accessToken": "login-token", "admin": {"email": seen.body.as_ref().map(|b| b["email"].clone())}}}),
            &[("set-cookie", "admin_refresh_token=rt-1; Path=/; HttpOnly; SameSite=Strict")],
        )
    }

    fn logout(&self) -> Response {
        self.lock().valid_token = None;
        respond(
            StatusCode::OK,
            json!({"success": true}),
            &[("set-cookie", "admin_refresh_token=; Path=/; Max-Age=0")],
        )
    }

    fn api(&self, seen: &Seen) -> Response {
        let mut state = self.lock();
        let expected = state.valid_token.as_ref().map(|t| format!("Bearer {t}"));
        if state.reject_all || expected.is_none() || seen.authorization != expected {
            drop(state);
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
            return respond(StatusCode::UNAUTHORIZED, json!({"success": false, "message": "unauthorized"}), &[]);
        }
        if seen.method == "DELETE" {
            return empty(StatusCode::NO_CONTENT);
        }
        if seen.path == "/rejected" {
            return respond(StatusCode::OK, json!({"success": false, "message": "out of stock"}), &[]);
        }
        let hint = std::mem::take(&mut state.hint_next);
        let headers: &[(&str, &str)] = if hint { &[("x-token-refresh-needed", "true")] } else { &[] };
        respond(
            StatusCode::OK,
            json!({"success": true, "data": {
                "path": seen.path,
                "method": seen.method,
                "query": seen.query,
                "body": seen.body,
            }}),
            headers,
        )
    }
}

#[async_trait]
impl Middleware for FakeBackend {
    async fn handle(&self, request: InMemoryRequest, _next: Next<'_>) -> ProtocolResult<Response> {
        let path = request.uri().path();
        let seen = Seen {
            method: request.method().as_str().to_string(),
            path: path.strip_prefix(BASE_PATH).unwrap_or(path).to_string(),
            query: request.uri().query().map(str::to_string),
            authorization: request.header("authorization").map(str::to_string),
            cookie: request.header("cookie").map(str::to_string),
            body: match request.body() {
                InMemoryBody::Json(v) => Some(v.clone()),
                _ => None,
            },
        };
        self.lock().seen.push(seen.clone());
        let res = match seen.path.as_str() {
            "/auth/admin/refresh" => self.refresh(&seen).await,
            "/auth/admin/session" => self.session(&seen),
            "/auth/admin/login" => self.login(&seen),
            "/auth/admin/logout" => self.logout(),
            _ => self.api(&seen),
        };
        Ok(res)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    RefreshSuccess,
    SessionExpired(String),
    RefreshError(String),
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    fn push(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

impl Notifier for RecordingNotifier {
    fn show_refresh_success(&self) {
        self.push(Notice::RefreshSuccess);
    }

    fn show_session_expired_with_redirect(&self, path: &str) {
        self.push(Notice::SessionExpired(path.to_string()));
    }

    fn show_refresh_error_with_redirect(&self, path: &str) {
        self.push(Notice::RefreshError(path.to_string()));
    }
}

/// A session wired to `backend`, optionally holding an access token and the refresh cookie.
pub fn session(backend: &FakeBackend, token: Option<&str>, refresh_cookie: bool) -> (AdminSession, Arc<RecordingNotifier>) {
    session_with_storage(backend, Arc::new(MemoryStorage::new()), token, refresh_cookie)
}

pub fn session_with_storage(
    backend: &FakeBackend,
    storage: Arc<dyn TokenStorage>,
    token: Option<&str>,
    refresh_cookie: bool,
) -> (AdminSession, Arc<RecordingNotifier>) {
    init_tracing();
    if let Some(token) = token {
        storage.store("admin_token", token);
    }
    let jar = CookieJar::new();
    if refresh_cookie {
        jar.insert(REFRESH_COOKIE, "rt-1");
    }
    let notifier = Arc::new(RecordingNotifier::default());
    let session = AdminSession::builder(ClientConfig::new(BASE_URL))
        .storage(storage)
        .notifier(notifier.clone())
        .cookie_jar(jar)
        .transport(backend.clone())
        .build();
    (session, notifier)
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
