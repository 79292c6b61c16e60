//! Backend health probing

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// One health probe attempt.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// HTTP `GET` probe; healthy iff the status is 2xx.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("amem-container-manager/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url, "Health probe failed: {}", e);
                false
            }
        }
    }
}

/// Poll until healthy or `timeout` elapses.
///
/// Backoff starts at 100 ms and doubles up to 2 s; the last sleep is
/// shortened so the deadline is never overshot.
pub async fn wait_until_healthy(probe: &dyn HealthProbe, url: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut backoff = INITIAL_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if probe.probe(url).await {
            debug!(url, attempts, "Backend healthy");
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            debug!(url, attempts, "Health wait timed out");
            return false;
        }
        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
