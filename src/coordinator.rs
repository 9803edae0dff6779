use std::fmt::{Debug, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use crate::notify::Notifier;
use crate::refresh::{RefreshError, RefreshResult, Refresher};

type SharedRefresh = Shared<BoxFuture<'static, Result<RefreshResult, RefreshError>>>;

#[derive(Default)]
struct RefreshState {
    is_refreshing: bool,
    refresh_future: Option<SharedRefresh>,
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub is_refreshing: bool,
    pub has_pending: bool,
}

impl RefreshSnapshot {
    pub fn is_idle(&self) -> bool {
        !self.is_refreshing && !self.has_pending
    }
}

/// Single-flight refresh: at most one refresh is in flight, and everyone who asks
/// while it runs gets its result.
pub struct RefreshCoordinator {
    refresher: Arc<dyn Refresher>,
    state: Mutex<RefreshState>,
}

impl Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresher", &self.refresher)
            .field("state", &self.state())
            .finish()
    }
}

/// Resets the coordinator to idle when the attempt it belongs to ends, however it ends.
struct RefreshGuard {
    coordinator: Arc<RefreshCoordinator>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        let mut state = self.coordinator.lock();
        state.is_refreshing = false;
        state.refresh_future = None;
        trace!("refresh state reset");
    }
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn Refresher>) -> Self {
        Self {
            refresher,
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn state(&self) -> RefreshSnapshot {
        let state = self.lock();
        RefreshSnapshot {
            is_refreshing: state.is_refreshing,
            has_pending: state.refresh_future.is_some(),
        }
    }

    /// Wait for a refresh, starting one if none is running.
    pub async fn refresh(self: &Arc<Self>) -> Result<RefreshResult, RefreshError> {
        self.join_or_start().await
    }

    /// Kick off a refresh in the background if none is running. Never blocks and
    /// never reports failure beyond a log line.
    pub fn refresh_in_background(self: &Arc<Self>, notifier: Arc<dyn Notifier>) {
        let refresh = {
            let mut state = self.lock();
            if state.is_refreshing {
                trace!("refresh already in flight, ignoring refresh hint");
                return;
            }
            debug!("starting background token refresh");
            self.begin(&mut state)
        };
        tokio::spawn(async move {
            match refresh.await {
                Ok(_) => notifier.show_refresh_success(),
                Err(e) => debug!("background token refresh failed: {e}"),
            }
        });
    }

    fn join_or_start(self: &Arc<Self>) -> SharedRefresh {
        let mut state = self.lock();
        if let Some(refresh) = &state.refresh_future {
            debug!("joining in-flight token refresh");
            return refresh.clone();
        }
        debug!("starting token refresh");
        self.begin(&mut state)
    }

    /// Create the shared attempt and record it. The attempt is driven by its own
    /// task, so it completes even if every waiter goes away.
    fn begin(self: &Arc<Self>, state: &mut RefreshState) -> SharedRefresh {
        let refresher = Arc::clone(&self.refresher);
        let guard = RefreshGuard { coordinator: Arc::clone(self) };
        let refresh = async move {
            let _guard = guard;
            // a panic would poison the shared future for every waiter
            AssertUnwindSafe(refresher.perform_refresh())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    warn!("token refresher panicked");
                    Err(RefreshError::Panicked)
                })
        }
        .boxed()
        .shared();
        state.is_refreshing = true;
        state.refresh_future = Some(refresh.clone());
        tokio::spawn(refresh.clone());
        refresh
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
