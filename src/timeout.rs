use std::io;
use std::time::Duration;

use async_trait::async_trait;
use httpclient::{InMemoryRequest, Middleware, Next, ProtocolError, ProtocolResult, Response};
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound every network call, body included. Expiry is a plain I/O error, never an
/// authentication failure, and is not retried.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl Middleware for Timeout {
    async fn handle(&self, request: InMemoryRequest, next: Next<'_>) -> ProtocolResult<Response> {
        let url = request.uri().to_string();
        let call = async move {
            let res = next.run(request).await?;
            let (parts, body) = res.into_parts();
            let body = body.into_memory().await?;
            Ok::<_, ProtocolError>(Response::from_parts(parts, body.into()))
        };
        match tokio::time::timeout(self.duration, call).await {
            Ok(res) => res,
            Err(_) => {
                debug!(%url, timeout = ?self.duration, "request timed out");
                Err(ProtocolError::IoError(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("request to {url} timed out after {:?}", self.duration),
                )))
            }
        }
    }
}
