//! Session service - guarantees a running, routable container per session.
//!
//! `ensure_ready` is the create-or-resume path used by the spawn handler;
//! `teardown` is the stop-and-remove path used by the reaper. Both run under
//! a per-container gate so a session is never created and reaped at once.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::container::{ContainerConfig, ContainerError, ContainerRuntimeApi};
use crate::identity::{DEFAULT_CONTAINER_PREFIX, SessionId};
use crate::routing::{MANAGED_LABEL, RouteSpec, RoutingConfig};

use super::activity::ActivityTable;
use super::credentials::session_password;
use super::readiness::{HttpSessionReadiness, ReadinessPolicy, SessionReadiness};

/// Default browser image.
pub const DEFAULT_IMAGE: &str = "jlesage/firefox:latest";

/// Port the browser image serves its web UI on.
pub const DEFAULT_CONTAINER_PORT: u16 = 5800;

/// Errors surfaced by the session service.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The container runtime was unreachable or rejected a call.
    #[error("container runtime error for {name}: {source}")]
    Runtime {
        name: String,
        #[source]
        source: ContainerError,
    },
}

impl SessionError {
    fn runtime(name: &str, source: ContainerError) -> Self {
        Self::Runtime {
            name: name.to_string(),
            source,
        }
    }
}

/// Outcome of [`SessionService::ensure_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The container answered the readiness probe.
    Ready,
    /// The probe budget ran out; the container may still be starting.
    Warming,
}

/// What `ensure_ready` had to do to get the container running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provision {
    AlreadyRunning,
    Started,
    Created,
}

/// Session service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionServiceConfig {
    /// Browser image for new session containers.
    pub image: String,
    /// Port the image serves on; target of routing and readiness probes.
    pub container_port: u16,
    /// Prefix of canonical container names.
    pub container_prefix: String,
    /// Public base URL the browser opens under its own prefix.
    pub public_base_url: String,
    pub display_width: u32,
    pub display_height: u32,
    pub routing: RoutingConfig,
    pub readiness: ReadinessPolicy,
    /// Secret used to derive per-session web UI passwords.
    pub credential_secret: Option<String>,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            container_port: DEFAULT_CONTAINER_PORT,
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
            public_base_url: "http://127.0.0.1".to_string(),
            display_width: 1920,
            display_height: 1080,
            routing: RoutingConfig::default(),
            readiness: ReadinessPolicy::default(),
            credential_secret: None,
        }
    }
}

/// Service for managing session containers.
pub struct SessionService {
    runtime: Arc<dyn ContainerRuntimeApi>,
    readiness: Arc<dyn SessionReadiness>,
    config: SessionServiceConfig,
    /// Per-container-name gates, created lazily and dropped when idle.
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionService {
    pub fn new(runtime: Arc<dyn ContainerRuntimeApi>, config: SessionServiceConfig) -> Self {
        Self::with_readiness(runtime, Arc::new(HttpSessionReadiness), config)
    }

    pub fn with_readiness(
        runtime: Arc<dyn ContainerRuntimeApi>,
        readiness: Arc<dyn SessionReadiness>,
        config: SessionServiceConfig,
    ) -> Self {
        Self {
            runtime,
            readiness,
            config,
            gates: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SessionServiceConfig {
        &self.config
    }

    /// Canonical container name for a session.
    pub fn container_name(&self, session: &SessionId) -> String {
        session.container_name(&self.config.container_prefix)
    }

    /// Make sure a running, routable container exists for `session`, then
    /// wait (best effort) until it answers.
    ///
    /// Runtime failures are returned; an exhausted readiness probe is not.
    pub async fn ensure_ready(&self, session: &SessionId) -> Result<Readiness, SessionError> {
        let name = self.container_name(session);

        let provision = self
            .with_gate(&name, self.lookup_or_create(session, &name))
            .await?;

        if provision == Provision::AlreadyRunning {
            debug!("Session {} already running as {}", session, name);
        }

        match self
            .readiness
            .wait_until_ready(&name, self.config.container_port, &self.config.readiness)
            .await
        {
            Ok(()) => Ok(Readiness::Ready),
            Err(e) => {
                warn!("Session {} not ready yet: {:#}", session, e);
                Ok(Readiness::Warming)
            }
        }
    }

    async fn lookup_or_create(
        &self,
        session: &SessionId,
        name: &str,
    ) -> Result<Provision, SessionError> {
        let state = self
            .runtime
            .container_state(name)
            .await
            .map_err(|e| SessionError::runtime(name, e))?;

        match state {
            Some(state) if state.is_running() => Ok(Provision::AlreadyRunning),
            Some(state) => {
                info!("Starting {} container {} for session {}", state, name, session);
                self.runtime
                    .start_container(name)
                    .await
                    .map_err(|e| SessionError::runtime(name, e))?;
                Ok(Provision::Started)
            }
            None => {
                let config = self.container_config(session);
                let id = self
                    .runtime
                    .create_container(&config)
                    .await
                    .map_err(|e| SessionError::runtime(name, e))?;
                info!(
                    "Created container {} ({}) for session {} at {}",
                    name,
                    id,
                    session,
                    session.path_prefix()
                );
                Ok(Provision::Created)
            }
        }
    }

    /// Full container definition for a new session: image, network, routing
    /// labels and environment.
    pub fn container_config(&self, session: &SessionId) -> ContainerConfig {
        let route =
            RouteSpec::for_session(session, &self.config.routing, self.config.container_port);
        let open_url = format!(
            "{}{}/",
            self.config.public_base_url.trim_end_matches('/'),
            session.path_prefix()
        );
        let password = session_password(self.config.credential_secret.as_deref(), session);

        ContainerConfig::new(&self.config.image)
            .name(self.container_name(session))
            .network(&self.config.routing.network)
            .labels(route.labels())
            .env("FF_OPEN_URL", open_url)
            .env("WEB_AUTHENTICATION", "1")
            .env("WEB_AUTHENTICATION_USERNAME", session.as_str())
            .env("WEB_AUTHENTICATION_PASSWORD", password)
            .env("SECURE_CONNECTION", "1")
            .env("DISPLAY_WIDTH", self.config.display_width.to_string())
            .env("DISPLAY_HEIGHT", self.config.display_height.to_string())
    }

    /// Stop (with a grace period) and remove a session container.
    ///
    /// A container that is already gone counts as success. If the stop fails
    /// for another reason the removal is forced.
    pub async fn teardown(&self, name: &str, grace_seconds: u32) -> Result<(), SessionError> {
        self.with_gate(name, async {
            let force = match self.runtime.stop_container(name, Some(grace_seconds)).await {
                Ok(()) => false,
                Err(ContainerError::ContainerNotFound(_)) => {
                    debug!("Container {} already gone", name);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to stop container {}: {}; forcing removal", name, e);
                    true
                }
            };

            match self.runtime.remove_container(name, force).await {
                Ok(()) | Err(ContainerError::ContainerNotFound(_)) => Ok(()),
                Err(e) => Err(SessionError::runtime(name, e)),
            }
        })
        .await
    }

    /// Track containers left over from a previous controller run.
    ///
    /// Their idle clock starts now, so they are reaped like any other
    /// session if nobody uses them. Returns the number of newly tracked names.
    pub async fn adopt_existing(&self, activity: &ActivityTable) -> Result<usize, SessionError> {
        let names = self
            .runtime
            .list_container_names(MANAGED_LABEL, "true")
            .await
            .map_err(|e| SessionError::runtime(MANAGED_LABEL, e))?;

        let now = chrono::Utc::now();
        let mut adopted = 0;
        for name in names {
            if !name.starts_with(&self.config.container_prefix) {
                continue;
            }
            if activity.seed(&name, now).await {
                debug!("Adopted existing session container {}", name);
                adopted += 1;
            }
        }

        if adopted > 0 {
            info!("Adopted {} existing session container(s)", adopted);
        }
        Ok(adopted)
    }

    /// Run `fut` while holding the gate for `name`.
    async fn with_gate<T>(&self, name: &str, fut: impl Future<Output = T>) -> T {
        let gate = self.gates.entry(name.to_string()).or_default().clone();
        let result = {
            let _guard = gate.lock().await;
            fut.await
        };
        drop(gate);
        self.gates
            .remove_if(name, |_, gate| Arc::strong_count(gate) == 1);
        result
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.len()
    }
}
