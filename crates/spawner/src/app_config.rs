//! Application configuration.
//!
//! Layering, lowest to highest: built-in defaults, the TOML config file,
//! `SPAWNER__SECTION__KEY` environment variables, then CLI flags (applied by
//! the binary).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::container::{RuntimeType, validate_container_name};
use crate::identity::DEFAULT_CONTAINER_PREFIX;
use crate::routing::RoutingConfig;
use crate::session::{
    DEFAULT_CONTAINER_PORT, DEFAULT_IMAGE, ReadinessPolicy, ReaperConfig, SessionServiceConfig,
};

pub const APP_NAME: &str = "spawner";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub container: ContainerRuntimeConfig,
    pub routing: RoutingConfig,
    pub sessions: SessionsConfig,
    pub readiness: ReadinessPolicy,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when no verbosity flag is given.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Listen address; `host` must be an IPv4 or IPv6 literal.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .trim_matches(|c| c == '[' || c == ']')
            .parse()
            .with_context(|| format!("server.host {:?} is not an IP address", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Container runtime and session image settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerRuntimeConfig {
    /// `docker` or `podman`; auto-detected when unset.
    pub runtime: Option<RuntimeType>,
    /// Explicit path to the runtime binary.
    pub binary: Option<String>,
    pub image: String,
    /// Port the image serves its web UI on.
    pub port: u16,
    /// Prefix for canonical container names.
    pub name_prefix: String,
    pub display_width: u32,
    pub display_height: u32,
    /// Grace period for `stop` before the runtime kills the container.
    pub stop_grace_seconds: u32,
}

impl Default for ContainerRuntimeConfig {
    fn default() -> Self {
        Self {
            runtime: None,
            binary: None,
            image: DEFAULT_IMAGE.to_string(),
            port: DEFAULT_CONTAINER_PORT,
            name_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
            display_width: 1920,
            display_height: 1080,
            stop_grace_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionsConfig {
    /// Public URL the browser opens, suffixed with `/u/<id>/`.
    pub public_base_url: String,
    /// Idle time after which a session is reaped.
    pub inactivity_seconds: u64,
    /// Reaper tick interval.
    pub reap_interval_seconds: u64,
    /// Track containers left from a previous run at startup.
    pub adopt_on_startup: bool,
    /// Tear down all tracked sessions when the server exits.
    pub stop_on_shutdown: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://127.0.0.1".to_string(),
            inactivity_seconds: 900,
            reap_interval_seconds: 30,
            adopt_on_startup: true,
            stop_on_shutdown: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Secret for deriving per-session web UI passwords. Random when unset.
    pub secret: Option<String>,
}

impl AppConfig {
    /// Load configuration from `path` (optional) and the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`AppConfig::load`], reading environment overrides from `env`
    /// instead of the process environment when given.
    pub fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self> {
        let built = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(&env_prefix())
                    .separator("__")
                    .source(env),
            )
            .build()
            .with_context(|| format!("loading config from {}", path.display()))?;

        built
            .try_deserialize()
            .with_context(|| format!("parsing config from {}", path.display()))
    }

    /// Reject settings that would only fail later, at the first request.
    pub fn validate(&self) -> Result<()> {
        if self.sessions.inactivity_seconds == 0 {
            bail!("sessions.inactivity_seconds must be greater than zero");
        }
        if self.sessions.reap_interval_seconds == 0 {
            bail!("sessions.reap_interval_seconds must be greater than zero");
        }
        if self.readiness.attempts == 0 {
            bail!("readiness.attempts must be at least 1");
        }
        let base = &self.sessions.public_base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            bail!("sessions.public_base_url must start with http:// or https://, got {base}");
        }
        self.server.socket_addr()?;
        if self.routing.auth_middleware.trim().is_empty() {
            bail!("routing.auth_middleware cannot be empty");
        }
        validate_container_name(&format!("{}x", self.container.name_prefix))
            .context("container.name_prefix is not a valid container name prefix")?;
        crate::container::ContainerConfig::new(&self.container.image)
            .network(&self.routing.network)
            .validate()
            .context("invalid container.image or routing.network")?;
        Ok(())
    }

    pub fn session_service_config(&self) -> SessionServiceConfig {
        SessionServiceConfig {
            image: self.container.image.clone(),
            container_port: self.container.port,
            container_prefix: self.container.name_prefix.clone(),
            public_base_url: self.sessions.public_base_url.clone(),
            display_width: self.container.display_width,
            display_height: self.container.display_height,
            routing: self.routing.clone(),
            readiness: self.readiness.clone(),
            credential_secret: self.credentials.secret.clone(),
        }
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            interval: Duration::from_secs(self.sessions.reap_interval_seconds),
            inactivity: Duration::from_secs(self.sessions.inactivity_seconds),
            stop_grace_seconds: self.container.stop_grace_seconds,
        }
    }
}

/// Environment variable prefix derived from the app name (`SPAWNER`).
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.sessions.inactivity_seconds, 900);
        assert_eq!(config.sessions.reap_interval_seconds, 30);
        assert_eq!(config.routing.auth_middleware, "forward-auth@file");
        assert_eq!(config.routing.network, "edge");
        assert_eq!(config.container.image, "jlesage/firefox:latest");
        assert_eq!(config.container.port, 5800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            AppConfig::load_with_env(&dir.path().join("missing.toml"), Some(HashMap::new()))
                .unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn file_and_env_layers_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[sessions]
inactivity_seconds = 600
public_base_url = "https://browsers.example.com"

[routing]
auth_middleware = "oidc@docker"
"#,
        )
        .unwrap();

        let env = HashMap::from([(
            "SPAWNER__ROUTING__NETWORK".to_string(),
            "proxy".to_string(),
        )]);
        let config = AppConfig::load_with_env(&path, Some(env)).unwrap();

        assert_eq!(config.sessions.inactivity_seconds, 600);
        assert_eq!(
            config.sessions.public_base_url,
            "https://browsers.example.com"
        );
        assert_eq!(config.routing.auth_middleware, "oidc@docker");
        assert_eq!(config.routing.network, "proxy");
        assert_eq!(config.sessions.reap_interval_seconds, 30);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml::to_string_pretty(&AppConfig::default()).unwrap()).unwrap();

        let loaded = AppConfig::load_with_env(&path, Some(HashMap::new())).unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let mut config = AppConfig::default();
        config.sessions.inactivity_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sessions.public_base_url = "browsers.example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.container.name_prefix = "-bad".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.routing.network = "edge;rm".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn socket_addr_accepts_ipv4_and_ipv6_hosts() {
        let mut server = ServerConfig::default();
        assert_eq!(
            server.socket_addr().unwrap(),
            "0.0.0.0:8000".parse::<SocketAddr>().unwrap()
        );

        server.host = "::".to_string();
        server.port = 9000;
        assert_eq!(
            server.socket_addr().unwrap(),
            "[::]:9000".parse::<SocketAddr>().unwrap()
        );

        server.host = "[::1]".to_string();
        assert_eq!(
            server.socket_addr().unwrap(),
            "[::1]:9000".parse::<SocketAddr>().unwrap()
        );

        server.host = "localhost".to_string();
        assert!(server.socket_addr().is_err());
    }

    #[test]
    fn maps_into_service_and_reaper_config() {
        let mut config = AppConfig::default();
        config.credentials.secret = Some("s".to_string());
        config.sessions.inactivity_seconds = 60;

        let service = config.session_service_config();
        assert_eq!(service.credential_secret.as_deref(), Some("s"));
        assert_eq!(service.container_prefix, "browser_");

        let reaper = config.reaper_config();
        assert_eq!(reaper.inactivity, Duration::from_secs(60));
        assert_eq!(reaper.interval, Duration::from_secs(30));
        assert_eq!(reaper.stop_grace_seconds, 10);
    }
}
