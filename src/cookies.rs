use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cookie::time::OffsetDateTime;
use cookie::Cookie;
use httpclient::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use httpclient::{InMemoryRequest, Middleware, Next, ProtocolResult, Response};
use tracing::{debug, warn};

/// Answers whether the transport currently holds a credential that can mint new
/// access tokens. The credential itself is never exposed.
pub trait RefreshCapability: Send + Sync + Debug {
    fn has_refresh_capability(&self) -> bool;
}

/// Cookie store shared by every client of one session. Cookies set by the server
/// are sent back on later requests, the way a browser does with credentials included.
///
/// Only cookie names are ever logged.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Arc<Mutex<BTreeMap<String, String>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn insert(&self, name: &str, value: &str) {
        self.lock().insert(name.to_string(), value.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn header_value(&self) -> Option<String> {
        let cookies = self.lock();
        if cookies.is_empty() {
            return None;
        }
        let pairs = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>();
        Some(pairs.join("; "))
    }

    fn attach(&self, request: &mut InMemoryRequest) {
        let Some(jar) = self.header_value() else { return };
        let value = match request.headers().get(COOKIE).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}; {jar}"),
            None => jar,
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                request.headers_mut().insert(COOKIE, value);
            }
            Err(e) => warn!("dropping cookie header: {e}"),
        }
    }

    /// Apply every `Set-Cookie` header of a response.
    pub fn absorb(&self, headers: &HeaderMap) {
        let now = OffsetDateTime::now_utc();
        for value in headers.get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            // values are kept byte for byte and sent back as received
            let cookie = match Cookie::parse(value.to_string()) {
                Ok(cookie) => cookie,
                Err(e) => {
                    debug!("ignoring malformed set-cookie header: {e}");
                    continue;
                }
            };
            let expired = cookie.value().is_empty()
                || cookie.max_age().is_some_and(|age| age.is_zero() || age.is_negative())
                || cookie.expires_datetime().is_some_and(|at| at <= now);
            if expired {
                debug!(name = cookie.name(), "cookie cleared by server");
                self.remove(cookie.name());
            } else {
                debug!(name = cookie.name(), "cookie stored");
                self.insert(cookie.name(), cookie.value());
            }
        }
    }
}

#[async_trait]
impl Middleware for CookieJar {
    async fn handle(&self, mut request: InMemoryRequest, next: Next<'_>) -> ProtocolResult<Response> {
        self.attach(&mut request);
        let res = next.run(request).await?;
        self.absorb(res.headers());
        Ok(res)
    }
}

/// The refresh capability of a session: a named cookie in its jar.
#[derive(Debug, Clone)]
pub struct RefreshCookie {
    jar: CookieJar,
    name: String,
}

impl RefreshCookie {
    pub fn new(jar: CookieJar, name: impl Into<String>) -> Self {
        Self { jar, name: name.into() }
    }
}

impl RefreshCapability for RefreshCookie {
    fn has_refresh_capability(&self) -> bool {
        self.jar.contains(&self.name)
    }
}
