//! Last-activity table shared by the forward-auth handler and the reaper.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

/// Container name -> time of the most recent authenticated request.
///
/// The map is never handed out; every operation takes the lock for its own
/// duration only, and nothing awaits the container runtime while holding it.
#[derive(Debug, Default)]
pub struct ActivityTable {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ActivityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `name` with `at`, replacing any previous timestamp.
    pub async fn record(&self, name: &str, at: DateTime<Utc>) {
        self.entries.lock().await.insert(name.to_string(), at);
    }

    /// Stamp `name` with the current time and return it.
    pub async fn touch(&self, name: &str) -> DateTime<Utc> {
        let now = Utc::now();
        self.record(name, now).await;
        now
    }

    /// Insert `name` only if it is not tracked yet.
    pub async fn seed(&self, name: &str, at: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(name) {
            return false;
        }
        entries.insert(name.to_string(), at);
        true
    }

    /// Remove and return every entry idle for strictly longer than `threshold`.
    pub async fn evict_expired(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Vec<(String, DateTime<Utc>)> {
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, last_seen)| now - **last_seen > threshold)
            .map(|(name, _)| name.clone())
            .collect();

        let mut evicted: Vec<(String, DateTime<Utc>)> = expired
            .into_iter()
            .filter_map(|name| entries.remove(&name).map(|ts| (name, ts)))
            .collect();
        evicted.sort_by(|a, b| a.1.cmp(&b.1));
        evicted
    }

    /// Remove and return every entry.
    pub async fn drain(&self) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        let mut names: Vec<String> = entries.drain().map(|(name, _)| name).collect();
        names.sort();
        names
    }

    pub async fn last_seen(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().await.get(name).copied()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
