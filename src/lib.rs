//! There are two key structs in this crate: `AdminSession` and `AdminAuth`.
//! AdminSession logs the admin in and out and runs domain calls, and AdminAuth
//! is the middleware that authorizes those calls and refreshes expired tokens.
//!
//! The refresh token never leaves the cookie jar. When a call comes back 401, one
//! refresh is made on behalf of every call that failed meanwhile, and each of them is
//! replayed once with the new token.

use std::sync::Arc;

use async_trait::async_trait;
use httpclient::{Client, InMemoryRequest, Middleware, Next, ProtocolResult, Response};

pub use config::ClientConfig;
pub use cookies::{CookieJar, RefreshCapability, RefreshCookie};
pub use coordinator::{RefreshCoordinator, RefreshSnapshot};
pub use credentials::{CredentialStore, FileStorage, MemoryStorage, TokenStorage};
pub use error::{ApiError, AuthFailure};
pub use middleware::AdminAuth;
pub use notify::{login_redirect_target, LoginRedirect, Notifier, TracingNotifier};
pub use refresh::{RefreshConfig, RefreshError, RefreshExecutor, RefreshResult, Refresher};
pub use session::{AdminSession, SessionStatus, LOGIN_PATH, LOGOUT_PATH, VERIFY_PATH};
pub use timeout::Timeout;

mod config;
mod cookies;
mod coordinator;
mod credentials;
mod error;
mod middleware;
mod notify;
mod refresh;
mod session;
mod timeout;

/// Assembles an [`AdminSession`]: one cookie jar and one credential store shared by
/// an authorized API client and a cookie-only session client.
pub struct AdminSessionBuilder {
    config: ClientConfig,
    storage: Option<Arc<dyn TokenStorage>>,
    notifier: Option<Arc<dyn Notifier>>,
    jar: CookieJar,
    transport: Vec<Arc<dyn Middleware>>,
}

impl AdminSessionBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            storage: None,
            notifier: None,
            jar: CookieJar::new(),
            transport: Vec::new(),
        }
    }

    /// Where the access token lives. Defaults to [`MemoryStorage`].
    pub fn storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Defaults to [`TracingNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Start from an existing jar, e.g. to keep cookies across sessions.
    pub fn cookie_jar(mut self, jar: CookieJar) -> Self {
        self.jar = jar;
        self
    }

    /// Append middleware closest to the network on both clients, e.g. a recorder.
    pub fn transport<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.transport.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> AdminSession {
        let AdminSessionBuilder { config, storage, notifier, jar, transport } = self;
        let storage = storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let notifier = notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let credentials = Arc::new(CredentialStore::new(storage, config.refresh.storage_key.clone()));
        let capability: Arc<dyn RefreshCapability> =
            Arc::new(RefreshCookie::new(jar.clone(), config.refresh.cookie_name.clone()));
        let timeout = Timeout::new(config.timeout);

        let session = with_transport(
            Client::new()
                .base_url(&config.base_url)
                .with_middleware(timeout)
                .with_middleware(jar.clone()),
            &transport,
        );
        let executor = RefreshExecutor::new(
            session.clone(),
            config.refresh.clone(),
            Arc::clone(&capability),
            Arc::clone(&credentials),
        );
        let coordinator = Arc::new(RefreshCoordinator::new(Arc::new(executor)));
        let auth = AdminAuth::new(
            Arc::clone(&credentials),
            Arc::clone(&coordinator),
            notifier,
            config.refresh.refresh_header.clone(),
            config.login_path.clone(),
        )
        .base_path(&config.base_path());
        let api = with_transport(
            Client::new()
                .base_url(&config.base_url)
                .with_middleware(auth)
                .with_middleware(timeout)
                .with_middleware(jar.clone()),
            &transport,
        );

        AdminSession {
            api,
            session,
            credentials,
            coordinator,
            capability,
            jar,
            config,
        }
    }
}

impl AdminSession {
    pub fn builder(config: ClientConfig) -> AdminSessionBuilder {
        AdminSessionBuilder::new(config)
    }

    /// A session configured from the environment, see [`ClientConfig::from_env`].
    pub fn from_env() -> AdminSession {
        AdminSessionBuilder::new(ClientConfig::from_env()).build()
    }
}

fn with_transport(client: Client, transport: &[Arc<dyn Middleware>]) -> Client {
    transport
        .iter()
        .fold(client, |client, middleware| client.with_middleware(SharedMiddleware(Arc::clone(middleware))))
}

/// Lets one middleware instance sit in several clients.
#[derive(Debug, Clone)]
struct SharedMiddleware(Arc<dyn Middleware>);

#[async_trait]
impl Middleware for SharedMiddleware {
    async fn handle(&self, request: InMemoryRequest, next: Next<'_>) -> ProtocolResult<Response> {
        self.0.handle(request, next).await
    }
}
