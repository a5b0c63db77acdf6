//! Container runtime management module.
//!
//! Provides an async interface to manage containers via Docker or Podman CLI.
//! The runtime is auto-detected or can be configured explicitly.

mod container;
mod error;

pub use container::{ContainerConfig, ContainerState, validate_container_name};
pub use error::{ContainerError, ContainerResult};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::process::{Output, Stdio};
use tokio::process::Command;

use container::validate_network_name;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Docker,
    #[default]
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_binary())
    }
}

/// Container runtime abstraction for testability.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Look up a container's state by name. `Ok(None)` means it does not exist.
    async fn container_state(&self, name: &str) -> ContainerResult<Option<ContainerState>>;

    /// Create and start a container, returning its ID.
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String>;

    async fn start_container(&self, name: &str) -> ContainerResult<()>;

    async fn stop_container(
        &self,
        name: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()>;

    async fn remove_container(&self, name: &str, force: bool) -> ContainerResult<()>;

    /// Names of all containers (running or not) carrying `label=value`.
    async fn list_container_names(
        &self,
        label: &str,
        value: &str,
    ) -> ContainerResult<Vec<String>>;
}

/// Container runtime client backed by the Docker or Podman CLI.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    binary: String,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a new container runtime with auto-detection.
    ///
    /// Prefers Podman, falls back to Docker.
    pub fn new() -> Self {
        let runtime_type = if Self::is_binary_available("podman") {
            RuntimeType::Podman
        } else if Self::is_binary_available("docker") {
            RuntimeType::Docker
        } else {
            // Fall back to podman, will fail at runtime
            RuntimeType::Podman
        };
        Self::with_type(runtime_type)
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    /// Create a container runtime with a custom binary path.
    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Check if the container runtime is available and working.
    pub async fn health_check(&self) -> ContainerResult<String> {
        let output = self.run("version", &["version"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a runtime subcommand, mapping spawn failures and non-zero exits.
    async fn run<S: AsRef<std::ffi::OsStr>>(
        &self,
        command: &str,
        args: &[S],
    ) -> ContainerResult<Output> {
        let output = self.output(command, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(command_error(command, stderr));
        }

        Ok(output)
    }

    /// Like [`Self::run`] but leaves exit-status handling to the caller.
    async fn output<S: AsRef<std::ffi::OsStr>>(
        &self,
        command: &str,
        args: &[S],
    ) -> ContainerResult<Output> {
        debug!("{} {}", self.binary, command);
        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(ContainerError::from)
    }
}

/// Map a failed command to an error, recognising "no such container".
fn command_error(command: &str, stderr: String) -> ContainerError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") || lower.contains("no container with name") {
        ContainerError::ContainerNotFound(stderr)
    } else {
        ContainerError::CommandFailed {
            command: command.to_string(),
            message: stderr,
        }
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    async fn container_state(&self, name: &str) -> ContainerResult<Option<ContainerState>> {
        validate_container_name(name)?;

        let output = self
            .output(
                "inspect",
                &["inspect", "--type", "container", "--format", "{{.State.Status}}", name],
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return match command_error("inspect", stderr) {
                ContainerError::ContainerNotFound(_) => Ok(None),
                err => Err(err),
            };
        }

        let status = String::from_utf8_lossy(&output.stdout)
            .trim()
            .trim_matches('"')
            .to_string();
        if status.is_empty() {
            return Ok(None);
        }

        Ok(status.parse().ok())
    }

    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        let args = config.run_args()?;
        let output = self.run("run", &args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start_container(&self, name: &str) -> ContainerResult<()> {
        validate_container_name(name)?;
        self.run("start", &["start", name]).await?;
        Ok(())
    }

    async fn stop_container(
        &self,
        name: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        validate_container_name(name)?;

        let mut args: Vec<String> = vec!["stop".to_string()];
        if let Some(t) = timeout_seconds {
            args.push("-t".to_string());
            args.push(t.to_string());
        }
        args.push(name.to_string());

        self.run("stop", &args).await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> ContainerResult<()> {
        validate_container_name(name)?;

        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(name);

        self.run("rm", &args).await?;
        Ok(())
    }

    async fn list_container_names(
        &self,
        label: &str,
        value: &str,
    ) -> ContainerResult<Vec<String>> {
        // Label keys and values share the network-name alphabet here.
        validate_network_name(label)?;
        validate_network_name(value)?;

        let filter = format!("label={}={}", label, value);
        let output = self
            .run(
                "ps",
                &["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"],
            )
            .await?;

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
