//! Application state shared across handlers.

use std::sync::Arc;

use crate::session::{ActivityTable, SessionService};

#[derive(Clone)]
pub struct AppState {
    /// Session provisioning.
    pub sessions: Arc<SessionService>,
    /// Last-activity table, also read by the reaper.
    pub activity: Arc<ActivityTable>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionService>, activity: Arc<ActivityTable>) -> Self {
        Self { sessions, activity }
    }
}
