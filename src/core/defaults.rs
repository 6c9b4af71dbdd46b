use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::paths;

/// Root configuration structure for berth.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BerthConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via berth.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default = "default_timeouts")]
    pub timeouts: TimeoutsConfig,

    #[serde(default = "default_networks")]
    pub networks: NetworksConfig,

    #[serde(default = "default_cert_resolver")]
    pub cert_resolver: String,

    #[serde(default = "default_health")]
    pub health: HealthDefaults,

    /// Overrides the lock directory (defaults to the config dir's `locks/`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_dir: Option<String>,

    #[serde(default = "default_ssh")]
    pub ssh: SshDefaults,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeouts: default_timeouts(),
            networks: default_networks(),
            cert_resolver: default_cert_resolver(),
            health: default_health(),
            lock_dir: None,
            ssh: default_ssh(),
        }
    }
}

/// Deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutsConfig {
    pub lock_secs: u64,
    pub command_secs: u64,
    pub sync_secs: u64,
    pub build_secs: u64,
    pub pull_secs: u64,
    pub start_secs: u64,
}

impl TimeoutsConfig {
    pub fn lock(&self) -> Duration {
        Duration::from_secs(self.lock_secs)
    }
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }
    pub fn sync(&self) -> Duration {
        Duration::from_secs(self.sync_secs)
    }
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }
    pub fn pull(&self) -> Duration {
        Duration::from_secs(self.pull_secs)
    }
    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworksConfig {
    /// Shared network the reverse proxy lives on.
    pub ingress: String,
    /// Suffix of the per-stack private network, `{project}-{suffix}`.
    pub private_suffix: String,
}

impl NetworksConfig {
    pub fn private_network(&self, project: &str) -> String {
        format!("{}-{}", project, self.private_suffix)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDefaults {
    /// Deadline used when a service declares no health check.
    pub default_deadline_secs: u64,
    /// Margin added on top of `retries * interval`.
    pub margin_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshDefaults {
    pub connect_timeout_secs: u64,
    pub server_alive_interval_secs: u64,
}

fn default_timeouts() -> TimeoutsConfig {
    TimeoutsConfig {
        lock_secs: 600,
        command_secs: 60,
        sync_secs: 600,
        build_secs: 1800,
        pull_secs: 600,
        start_secs: 300,
    }
}

fn default_networks() -> NetworksConfig {
    NetworksConfig {
        ingress: "berth-ingress".to_string(),
        private_suffix: "internal".to_string(),
    }
}

fn default_cert_resolver() -> String {
    "letsencrypt".to_string()
}

fn default_health() -> HealthDefaults {
    HealthDefaults {
        default_deadline_secs: 60,
        margin_secs: 10,
        poll_interval_ms: 2000,
    }
}

fn default_ssh() -> SshDefaults {
    SshDefaults {
        connect_timeout_secs: 10,
        server_alive_interval_secs: 15,
    }
}

/// Load defaults from berth.json, falling back to built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full berth.json config, falling back to defaults on any error.
pub fn load_config() -> BerthConfig {
    match load_config_from_file() {
        Ok(Some(config)) => config,
        Ok(None) => BerthConfig::default(),
        Err(err) => {
            log_status!("config", "Ignoring berth.json: {}", err.message);
            BerthConfig::default()
        }
    }
}

fn load_config_from_file() -> crate::Result<Option<BerthConfig>> {
    let path = paths::berth_json()?;

    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    let config: BerthConfig = serde_json::from_str(&content)
        .map_err(|e| crate::Error::config_invalid_json(path.display().to_string(), e))?;

    Ok(Some(config))
}

/// Built-in defaults, ignoring berth.json.
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: BerthConfig = serde_json::from_str(
            r#"{"defaults": {"certResolver": "internal-ca", "networks": {"ingress": "edge", "privateSuffix": "net"}}}"#,
        )
        .unwrap();
        assert_eq!(config.defaults.cert_resolver, "internal-ca");
        assert_eq!(config.defaults.networks.private_network("shop"), "shop-net");
        assert_eq!(config.defaults.timeouts.lock(), Duration::from_secs(600));
        assert_eq!(config.defaults.health.default_deadline_secs, 60);
    }

    #[test]
    fn builtin_network_names() {
        let defaults = builtin_defaults();
        assert_eq!(defaults.networks.ingress, "berth-ingress");
        assert_eq!(defaults.networks.private_network("myapp"), "myapp-internal");
    }
}
