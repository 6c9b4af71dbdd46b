//! Per-service deploy configuration.
//!
//! A service is either built from a local source context or runs a
//! pre-built image reference; the presence of `image` decides which.

use heck::ToKebabCase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub name: String,

    /// Pre-built image reference. Mutually exclusive with `context`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Local source directory synced to the host and built there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Build file path, relative to the context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build stage passed as `--target`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub routing: RoutingConfig,

    /// Volume name -> mount path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Extra hostnames redirected to `domain`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default = "default_tls")]
    pub tls: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            domain: None,
            path: None,
            aliases: Vec::new(),
            tls: default_tls(),
        }
    }
}

fn default_tls() -> bool {
    true
}

impl RoutingConfig {
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }

    /// Configured sub-path, or `None` when empty or `/`.
    pub fn sub_path(&self) -> Option<&str> {
        self.path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "/")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub command: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retries() -> u32 {
    3
}

impl HealthCheck {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServiceConfig {
    pub fn is_prebuilt(&self) -> bool {
        self.image.as_deref().is_some_and(|i| !i.trim().is_empty())
    }

    pub fn has_routing(&self) -> bool {
        self.routing.domain().is_some()
    }

    pub fn has_health_check(&self) -> bool {
        self.health_check
            .as_ref()
            .is_some_and(|h| !h.command.trim().is_empty())
    }

    pub fn has_dependencies(&self) -> bool {
        !self.depends_on.is_empty()
    }

    /// Name of the locally built image, `{project}-{service}` in kebab case.
    pub fn image_name(&self, project: &str) -> String {
        format!("{}-{}", project, self.name).to_kebab_case()
    }

    /// Full image reference for a given version. Pre-built services ignore the version.
    pub fn image_ref(&self, project: &str, version: u32) -> String {
        match self.image.as_deref() {
            Some(image) if self.is_prebuilt() => image.trim().to_string(),
            _ => format!("{}:{}", self.image_name(project), version),
        }
    }

    pub fn canary_name(&self) -> String {
        format!("{}-canary", self.name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "services[].name",
                None,
                "service name cannot be empty",
            ));
        }

        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::config_invalid_value(
                format!("services.{}.name", self.name),
                Some(self.name.clone()),
                "service names may only contain letters, digits, '-' and '_'",
            ));
        }

        let has_context = self.context.as_deref().is_some_and(|c| !c.trim().is_empty());
        match (self.is_prebuilt(), has_context) {
            (true, true) => Err(Error::config_invalid_value(
                format!("services.{}.image", self.name),
                self.image.clone(),
                "image and context are mutually exclusive",
            )),
            (false, false) => Err(Error::config_invalid_value(
                format!("services.{}.context", self.name),
                None,
                "service needs either a pre-built image or a build context",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(name: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            context: Some("./api".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn image_reference_carries_version_for_built_services() {
        let svc = built("api");
        assert!(!svc.is_prebuilt());
        assert_eq!(svc.image_ref("myapp", 4), "myapp-api:4");
    }

    #[test]
    fn image_name_is_kebab_case() {
        let svc = built("worker_jobs");
        assert_eq!(svc.image_name("MyApp"), "my-app-worker-jobs");
    }

    #[test]
    fn prebuilt_reference_is_literal() {
        let svc = ServiceConfig {
            name: "cache".to_string(),
            image: Some("redis:7-alpine".to_string()),
            ..Default::default()
        };
        assert!(svc.is_prebuilt());
        assert_eq!(svc.image_ref("myapp", 9), "redis:7-alpine");
    }

    #[test]
    fn root_path_is_no_path() {
        let mut routing = RoutingConfig {
            domain: Some("example.com".to_string()),
            path: Some("/".to_string()),
            ..Default::default()
        };
        assert_eq!(routing.sub_path(), None);
        routing.path = Some(String::new());
        assert_eq!(routing.sub_path(), None);
        routing.path = Some("/api".to_string());
        assert_eq!(routing.sub_path(), Some("/api"));
    }

    #[test]
    fn validate_rejects_image_and_context_together() {
        let mut svc = built("api");
        svc.image = Some("nginx:1".to_string());
        assert!(svc.validate().is_err());
    }

    #[test]
    fn validate_requires_a_source() {
        let svc = ServiceConfig {
            name: "api".to_string(),
            ..Default::default()
        };
        assert!(svc.validate().is_err());
        assert!(built("api").validate().is_ok());
    }

    #[test]
    fn routing_defaults_to_tls() {
        let svc: ServiceConfig =
            serde_json::from_str(r#"{"name":"web","image":"nginx","routing":{"domain":"a.io"}}"#)
                .unwrap();
        assert!(svc.routing.tls);
        assert!(svc.has_routing());
        assert!(!svc.has_health_check());
    }
}
