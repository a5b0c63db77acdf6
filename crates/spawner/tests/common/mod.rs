//! Test utilities and common setup.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use spawner::api::{self, AppState};
use spawner::container::{
    ContainerConfig, ContainerError, ContainerResult, ContainerRuntimeApi, ContainerState,
};
use spawner::session::{
    ActivityTable, ReadinessPolicy, SessionReadiness, SessionService, SessionServiceConfig,
};

/// In-memory container runtime keyed by container name.
#[derive(Default)]
pub struct FakeRuntime {
    pub containers: StdMutex<HashMap<String, ContainerState>>,
    pub creates: AtomicUsize,
    /// Make every runtime call fail as if the daemon were unreachable.
    pub unreachable: AtomicBool,
}

impl FakeRuntime {
    fn check(&self, command: &str) -> ContainerResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: "cannot connect to the container runtime".to_string(),
            });
        }
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.containers.lock().unwrap().contains_key(name)
    }
}

#[async_trait]
impl ContainerRuntimeApi for FakeRuntime {
    async fn container_state(&self, name: &str) -> ContainerResult<Option<ContainerState>> {
        self.check("inspect")?;
        Ok(self.containers.lock().unwrap().get(name).copied())
    }

    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        self.check("run")?;
        let name = config.name.clone().unwrap_or_default();
        self.containers
            .lock()
            .unwrap()
            .insert(name, ContainerState::Running);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok("fake-id".to_string())
    }

    async fn start_container(&self, name: &str) -> ContainerResult<()> {
        self.check("start")?;
        self.containers
            .lock()
            .unwrap()
            .insert(name.to_string(), ContainerState::Running);
        Ok(())
    }

    async fn stop_container(
        &self,
        name: &str,
        _timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        self.check("stop")?;
        match self.containers.lock().unwrap().get_mut(name) {
            Some(state) => {
                *state = ContainerState::Exited;
                Ok(())
            }
            None => Err(ContainerError::ContainerNotFound(name.to_string())),
        }
    }

    async fn remove_container(&self, name: &str, _force: bool) -> ContainerResult<()> {
        self.check("rm")?;
        self.containers
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ContainerError::ContainerNotFound(name.to_string()))
    }

    async fn list_container_names(
        &self,
        _label: &str,
        _value: &str,
    ) -> ContainerResult<Vec<String>> {
        self.check("ps")?;
        Ok(self.containers.lock().unwrap().keys().cloned().collect())
    }
}

/// Readiness probe that reports every session reachable immediately.
pub struct NoopReadiness;

#[async_trait]
impl SessionReadiness for NoopReadiness {
    async fn wait_until_ready(
        &self,
        _host: &str,
        _port: u16,
        _policy: &ReadinessPolicy,
    ) -> Result<()> {
        Ok(())
    }
}

/// Readiness probe that never succeeds, as if the browser were still booting.
pub struct NeverReady;

#[async_trait]
impl SessionReadiness for NeverReady {
    async fn wait_until_ready(
        &self,
        host: &str,
        port: u16,
        _policy: &ReadinessPolicy,
    ) -> Result<()> {
        anyhow::bail!("{host}:{port} did not answer")
    }
}

pub struct TestApp {
    pub router: Router,
    pub runtime: Arc<FakeRuntime>,
    pub activity: Arc<ActivityTable>,
}

/// Create a test application backed by the fake runtime.
pub fn test_app() -> TestApp {
    test_app_with_readiness(Arc::new(NoopReadiness))
}

pub fn test_app_with_readiness(readiness: Arc<dyn SessionReadiness>) -> TestApp {
    let runtime = Arc::new(FakeRuntime::default());
    let sessions = Arc::new(SessionService::with_readiness(
        runtime.clone(),
        readiness,
        SessionServiceConfig::default(),
    ));
    let activity = Arc::new(ActivityTable::new());
    let router = api::create_router(AppState::new(sessions, activity.clone()));

    TestApp {
        router,
        runtime,
        activity,
    }
}
