//! Best-effort readiness wait for freshly started session containers.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Bounded retry policy for the readiness probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessPolicy {
    /// Maximum number of probe attempts.
    pub attempts: u32,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Pause between failed attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            timeout_ms: 500,
            backoff_ms: 200,
        }
    }
}

/// Waits until a session container answers on its service port.
#[async_trait]
pub trait SessionReadiness: Send + Sync {
    /// Returns `Err` once the policy is exhausted without a response.
    async fn wait_until_ready(
        &self,
        host: &str,
        port: u16,
        policy: &ReadinessPolicy,
    ) -> Result<()>;
}

/// Probes `http://<host>:<port>/`; any HTTP response counts as reachable.
#[derive(Debug, Default)]
pub struct HttpSessionReadiness;

#[async_trait]
impl SessionReadiness for HttpSessionReadiness {
    async fn wait_until_ready(
        &self,
        host: &str,
        port: u16,
        policy: &ReadinessPolicy,
    ) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(policy.timeout_ms))
            .build()
            .context("building readiness HTTP client")?;

        let url = format!("http://{}:{}/", host, port);
        let backoff = Duration::from_millis(policy.backoff_ms);

        for attempt in 1..=policy.attempts {
            match client.get(&url).send().await {
                Ok(_) => {
                    debug!("{} reachable after {} attempt(s)", url, attempt);
                    return Ok(());
                }
                Err(e) => trace!("readiness attempt {} for {} failed: {}", attempt, url, e),
            }
            tokio::time::sleep(backoff).await;
        }

        anyhow::bail!("{} not reachable after {} attempts", url, policy.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhausted_policy_reports_error() {
        // Nothing listens on port 1 of the loopback interface.
        let policy = ReadinessPolicy {
            attempts: 2,
            timeout_ms: 100,
            backoff_ms: 1,
        };
        let result = HttpSessionReadiness
            .wait_until_ready("127.0.0.1", 1, &policy)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reachable_listener_is_ready() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let app = axum::Router::new().route("/", axum::routing::get(|| async { "up" }));
            axum::serve(listener, app).await.ok();
        });

        let result = HttpSessionReadiness
            .wait_until_ready("127.0.0.1", port, &ReadinessPolicy::default())
            .await;
        assert!(result.is_ok());
    }
}
