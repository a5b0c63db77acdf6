//! Session lifecycle: provisioning, activity tracking and reaping.

mod activity;
mod credentials;
mod readiness;
mod reaper;
mod service;

pub use activity::ActivityTable;
pub use credentials::{derive_password, session_password};
pub use readiness::{HttpSessionReadiness, ReadinessPolicy, SessionReadiness};
pub use reaper::{ReapReport, Reaper, ReaperConfig};
pub use service::{
    DEFAULT_CONTAINER_PORT, DEFAULT_IMAGE, Readiness, SessionError, SessionService,
    SessionServiceConfig,
};
