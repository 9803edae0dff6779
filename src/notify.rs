use std::fmt::Debug;

use serde::Serialize;
use tracing::{info, warn};

/// User-facing outcome reporting. Implementations are presentation only and must not fail.
pub trait Notifier: Send + Sync + Debug {
    /// A background refresh went through. Nothing visible is expected.
    fn show_refresh_success(&self);
    /// The session is gone; show a message and navigate to `path`.
    fn show_session_expired_with_redirect(&self, path: &str);
    /// Refreshing failed; show a message and navigate to `path`.
    fn show_refresh_error_with_redirect(&self, path: &str);
}

/// Reports through `tracing`. Suitable for headless tools and services.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_refresh_success(&self) {
        tracing::debug!("access token refreshed");
    }

    fn show_session_expired_with_redirect(&self, path: &str) {
        info!(redirect = path, "session expired, please log in again");
    }

    fn show_refresh_error_with_redirect(&self, path: &str) {
        warn!(redirect = path, "could not refresh the session, please log in again");
    }
}

/// Query appended to the login route so the user lands back where they were.
#[derive(Debug, Serialize)]
pub struct LoginRedirect<'a> {
    pub redirect: &'a str,
}

/// Build `login_path?redirect=<return_to>`.
pub fn login_redirect_target(login_path: &str, return_to: &str) -> String {
    if return_to.is_empty() || return_to == login_path {
        return login_path.to_string();
    }
    match serde_qs::to_string(&LoginRedirect { redirect: return_to }) {
        Ok(query) => format!("{login_path}?{query}"),
        Err(e) => {
            warn!("failed to encode login redirect: {e}");
            login_path.to_string()
        }
    }
}
