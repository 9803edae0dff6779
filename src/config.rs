use std::env;
use std::time::Duration;

use httpclient::Uri;

use crate::refresh::RefreshConfig;
use crate::timeout::DEFAULT_TIMEOUT;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_LOGIN_PATH: &str = "/admin/login";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Prefix for every relative path, e.g. `https://shop.example.com/api`.
    pub base_url: String,
    /// Applies to each network call separately, replays and refreshes included.
    pub timeout: Duration,
    /// Route the user is sent to once the session cannot be recovered.
    pub login_path: String,
    pub refresh: RefreshConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh: RefreshConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Defaults, overridden by `ADMIN_API_BASE_URL`, `ADMIN_API_TIMEOUT_SECS` and
    /// `ADMIN_LOGIN_PATH`. A `.env` file is loaded first if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("ADMIN_API_BASE_URL") {
            if !v.trim().is_empty() {
                self.base_url = v.trim().trim_end_matches('/').to_string();
            }
        }
        if let Ok(v) = env::var("ADMIN_API_TIMEOUT_SECS") {
            self.timeout = v.trim().parse().map(Duration::from_secs).unwrap_or(self.timeout);
        }
        if let Ok(v) = env::var("ADMIN_LOGIN_PATH") {
            if !v.trim().is_empty() {
                self.login_path = v.trim().to_string();
            }
        }
        self
    }

    /// Path component of `base_url`, without a trailing slash; empty for a bare host.
    pub fn base_path(&self) -> String {
        match self.base_url.parse::<Uri>() {
            Ok(uri) => uri.path().trim_end_matches('/').to_string(),
            Err(_) => String::new(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn login_path(mut self, login_path: &str) -> Self {
        self.login_path = login_path.to_string();
        self
    }

    pub fn refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }
}
