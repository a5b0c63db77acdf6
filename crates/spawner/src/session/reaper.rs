//! Inactivity reaper.
//!
//! Once per tick every activity entry older than the inactivity threshold is
//! dropped from the table and its container is stopped and removed. The loop
//! keeps no state of its own between ticks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::activity::ActivityTable;
use super::service::SessionService;

/// Reaper timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Sessions idle for longer than this are reaped.
    pub inactivity: Duration,
    /// Grace period given to `stop` before the container is killed.
    pub stop_grace_seconds: u32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            inactivity: Duration::from_secs(900),
            stop_grace_seconds: 10,
        }
    }
}

/// Result of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Names evicted from the activity table.
    pub evicted: Vec<String>,
    /// Evicted names whose teardown failed (container possibly orphaned).
    pub failed: Vec<String>,
}

pub struct Reaper {
    sessions: Arc<SessionService>,
    activity: Arc<ActivityTable>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(
        sessions: Arc<SessionService>,
        activity: Arc<ActivityTable>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            sessions,
            activity,
            config,
        }
    }

    /// Run a single pass as of `now`.
    ///
    /// Entries are removed before teardown, so a failed teardown is never
    /// retried; the container is left behind and logged instead.
    pub async fn tick(&self, now: DateTime<Utc>) -> ReapReport {
        let threshold = chrono::Duration::from_std(self.config.inactivity)
            .unwrap_or(chrono::Duration::MAX);
        let expired = self.activity.evict_expired(now, threshold).await;

        let mut report = ReapReport::default();
        for (name, last_seen) in expired {
            info!(
                "Reaping {} (idle {}s, last seen {})",
                name,
                (now - last_seen).num_seconds(),
                last_seen.to_rfc3339()
            );
            if let Err(e) = self
                .sessions
                .teardown(&name, self.config.stop_grace_seconds)
                .await
            {
                warn!("Failed to tear down {}; container may be orphaned: {}", name, e);
                report.failed.push(name.clone());
            }
            report.evicted.push(name);
        }

        report
    }

    /// Tear down every tracked session, regardless of age.
    pub async fn sweep_all(&self) -> ReapReport {
        let mut report = ReapReport::default();
        for name in self.activity.drain().await {
            if let Err(e) = self
                .sessions
                .teardown(&name, self.config.stop_grace_seconds)
                .await
            {
                warn!("Failed to tear down {}: {}", name, e);
                report.failed.push(name.clone());
            }
            report.evicted.push(name);
        }
        report
    }

    /// Start the periodic loop. It exits when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        info!(
            "Starting reaper (check every {}s, inactivity {}s)",
            self.config.interval.as_secs(),
            self.config.inactivity.as_secs()
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let report = self.tick(Utc::now()).await;
                        if !report.evicted.is_empty() {
                            info!(
                                "Reaped {} idle session(s), {} teardown failure(s)",
                                report.evicted.len(),
                                report.failed.len()
                            );
                        }
                    }
                }
            }

            info!("Reaper stopped");
        })
    }
}
