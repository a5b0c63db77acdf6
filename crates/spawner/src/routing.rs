//! Declarative edge routing for session containers.
//!
//! The edge router (Traefik) discovers routes from container labels. A
//! [`RouteSpec`] captures the routing scheme for one session and renders it
//! into labels, so the label format lives in exactly one place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::SessionId;

/// Label marking containers created by this controller.
pub const MANAGED_LABEL: &str = "spawner.managed";

/// Label carrying the session identifier a container belongs to.
pub const SESSION_LABEL: &str = "spawner.session";

/// Edge routing configuration shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Traefik entrypoint the per-session routers attach to.
    pub entrypoint: String,
    /// Forward-auth middleware composed in front of every session route.
    pub auth_middleware: String,
    /// Network the edge router uses to reach session containers.
    pub network: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            entrypoint: "web".to_string(),
            auth_middleware: "forward-auth@file".to_string(),
            network: "edge".to_string(),
        }
    }
}

/// Routing bundle for a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    /// Identifier the route belongs to.
    pub session: SessionId,
    /// Router/service/middleware key; safe as a single label path segment.
    pub key: String,
    /// Path prefix matched by the router (`/u/<id>`).
    pub path_prefix: String,
    pub entrypoint: String,
    /// Middleware chain, applied in order. The prefix-strip middleware is last.
    pub middlewares: Vec<String>,
    /// Port the load balancer forwards to inside the container.
    pub target_port: u16,
    pub network: String,
}

impl RouteSpec {
    pub fn for_session(session: &SessionId, config: &RoutingConfig, target_port: u16) -> Self {
        let key = route_key(session);
        let middlewares = vec![config.auth_middleware.clone(), strip_middleware_name(&key)];
        Self {
            session: session.clone(),
            path_prefix: session.path_prefix(),
            key,
            entrypoint: config.entrypoint.clone(),
            middlewares,
            target_port,
            network: config.network.clone(),
        }
    }

    /// Render the route as container labels.
    ///
    /// The router rule and its prefix-strip middleware are always emitted
    /// together; both vanish with the container.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let router = format!("traefik.http.routers.{}", self.key);
        let strip = strip_middleware_name(&self.key);

        let mut labels = BTreeMap::new();
        labels.insert("traefik.enable".to_string(), "true".to_string());
        labels.insert("traefik.docker.network".to_string(), self.network.clone());
        labels.insert(
            format!("{router}.rule"),
            format!("PathPrefix(`{}`)", self.path_prefix),
        );
        labels.insert(format!("{router}.entrypoints"), self.entrypoint.clone());
        labels.insert(format!("{router}.middlewares"), self.middlewares.join(","));
        labels.insert(format!("{router}.service"), self.key.clone());
        labels.insert(
            format!("traefik.http.middlewares.{strip}.stripprefix.prefixes"),
            self.path_prefix.clone(),
        );
        labels.insert(
            format!("traefik.http.services.{}.loadbalancer.server.port", self.key),
            self.target_port.to_string(),
        );
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(SESSION_LABEL.to_string(), self.session.as_str().to_string());
        labels
    }
}

/// Derive a Traefik object key for a session.
///
/// Traefik splits label keys on `.`, so dots in the identifier are replaced.
/// The hash suffix keeps ids that differ only by `.` vs `_` apart.
pub fn route_key(session: &SessionId) -> String {
    let digest = Sha256::digest(session.as_str().as_bytes());
    format!(
        "browser-{}-{}",
        session.as_str().replace('.', "_"),
        &hex::encode(digest)[..8]
    )
}

fn strip_middleware_name(key: &str) -> String {
    format!("strip-{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice_route() -> RouteSpec {
        let id = SessionId::parse("alice").unwrap();
        RouteSpec::for_session(&id, &RoutingConfig::default(), 5800)
    }

    #[test]
    fn route_prefix_is_exactly_the_session_path() {
        let route = alice_route();
        assert_eq!(route.path_prefix, "/u/alice");
        assert_eq!(route.target_port, 5800);
    }

    #[test]
    fn labels_pair_router_rule_with_strip_middleware() {
        let route = alice_route();
        let labels = route.labels();
        let key = &route.key;

        assert_eq!(labels.get("traefik.enable"), Some(&"true".to_string()));
        assert_eq!(
            labels.get(&format!("traefik.http.routers.{key}.rule")),
            Some(&"PathPrefix(`/u/alice`)".to_string())
        );
        assert_eq!(
            labels.get(&format!("traefik.http.routers.{key}.entrypoints")),
            Some(&"web".to_string())
        );
        assert_eq!(
            labels.get(&format!("traefik.http.routers.{key}.middlewares")),
            Some(&format!("forward-auth@file,strip-{key}"))
        );
        assert_eq!(
            labels.get(&format!(
                "traefik.http.middlewares.strip-{key}.stripprefix.prefixes"
            )),
            Some(&"/u/alice".to_string())
        );
        assert_eq!(
            labels.get(&format!(
                "traefik.http.services.{key}.loadbalancer.server.port"
            )),
            Some(&"5800".to_string())
        );
        assert_eq!(labels.get(SESSION_LABEL), Some(&"alice".to_string()));
        assert_eq!(labels.get(MANAGED_LABEL), Some(&"true".to_string()));
    }

    #[test]
    fn custom_middleware_and_network_flow_into_labels() {
        let id = SessionId::parse("bob").unwrap();
        let config = RoutingConfig {
            entrypoint: "websecure".to_string(),
            auth_middleware: "oidc@docker".to_string(),
            network: "proxy".to_string(),
        };
        let route = RouteSpec::for_session(&id, &config, 8080);
        let labels = route.labels();

        assert_eq!(route.middlewares[0], "oidc@docker");
        assert_eq!(
            labels.get("traefik.docker.network"),
            Some(&"proxy".to_string())
        );
        assert_eq!(
            labels.get(&format!("traefik.http.routers.{}.entrypoints", route.key)),
            Some(&"websecure".to_string())
        );
    }

    #[test]
    fn route_keys_never_contain_dots_and_stay_distinct() {
        let dotted = SessionId::parse("a.b").unwrap();
        let underscored = SessionId::parse("a_b").unwrap();
        let k1 = route_key(&dotted);
        let k2 = route_key(&underscored);

        assert!(!k1.contains('.'));
        assert!(k1.starts_with("browser-a_b-"));
        assert_ne!(k1, k2);
        assert_eq!(k1, route_key(&dotted));
    }
}
