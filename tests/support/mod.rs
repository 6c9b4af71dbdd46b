//! A host double for orchestration tests.
//!
//! `docker ...` commands are interpreted against in-memory state; every other
//! command (file reads, writes, renames) runs through `sh -c` for real, so
//! stack directories should live under a temp dir.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use berth::defaults::{builtin_defaults, HealthDefaults};
use berth::deploy::{DeploySettings, Deployer};
use berth::project::Project;
use berth::service::{RoutingConfig, ServiceConfig};
use berth::{CommandOutput, RemoteExecutor, Result, SourceSync};

#[derive(Debug, Default)]
pub struct HostState {
    /// Every command in the order it was received.
    pub log: Vec<String>,
    pub running: BTreeSet<String>,
    pub networks: BTreeSet<String>,
    /// Containers that report `unhealthy` once started.
    pub unhealthy: BTreeSet<String>,
    /// When set, `compose config` rejects every descriptor.
    pub reject_descriptors: bool,
    /// `(compose service, image)` per `up`, in order.
    pub started: Vec<(String, String)>,
    pub pulled: Vec<String>,
    pub built: Vec<String>,
    pub synced: Vec<PathBuf>,
    /// How long each `docker build` takes.
    pub build_delay: Duration,
    /// Builds in progress right now, and the most seen at once.
    pub building: usize,
    pub max_building: usize,
    /// `(start, end)` of every finished build.
    pub build_windows: Vec<(Instant, Instant)>,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build_delay(delay: Duration) -> Self {
        let host = Self::default();
        host.state().build_delay = delay;
        host
    }

    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    /// Sleeps for the build delay without holding the state lock, so
    /// overlapping builds are visible in `max_building`.
    fn slow_build(&self) {
        let delay = {
            let mut state = self.state();
            state.building += 1;
            state.max_building = state.max_building.max(state.building);
            state.build_delay
        };
        let start = Instant::now();
        thread::sleep(delay);
        let mut state = self.state();
        state.building -= 1;
        state.build_windows.push((start, Instant::now()));
    }

    fn docker(&self, command: &str) -> CommandOutput {
        let tokens: Vec<String> = command.split_whitespace().map(unquote).collect();
        let mut state = self.state();

        match tokens.get(1).map(String::as_str) {
            Some("compose") if tokens.iter().any(|t| t == "config") => {
                let path = flag_value(&tokens, "-f").unwrap_or_default();
                if state.reject_descriptors {
                    return CommandOutput::failed(15, "services.api.image must be a string\n");
                }
                match std::fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|text| {
                        serde_yml::from_str::<serde_yml::Value>(&text).map_err(|e| e.to_string())
                    }) {
                    Ok(_) => CommandOutput::ok(""),
                    Err(e) => CommandOutput::failed(15, format!("{}\n", e)),
                }
            }
            Some("compose") if tokens.iter().any(|t| t == "up") => {
                let path = flag_value(&tokens, "-f").unwrap_or_default();
                let service = tokens.last().cloned().unwrap_or_default();
                let doc: serde_yml::Value = match std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|text| serde_yml::from_str(&text).ok())
                {
                    Some(doc) => doc,
                    None => return CommandOutput::failed(1, "cannot read compose file\n"),
                };
                let Some(entry) = doc.get("services").and_then(|s| s.get(service.as_str())) else {
                    return CommandOutput::failed(1, format!("no such service: {}\n", service));
                };
                let container = entry
                    .get("container_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let image = entry
                    .get("image")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                state.running.insert(container);
                state.started.push((service, image));
                CommandOutput::ok("")
            }
            Some("ps") => {
                let filter = flag_value(&tokens, "--filter").unwrap_or_default();
                let name = filter
                    .trim_start_matches("name=^")
                    .trim_end_matches('$')
                    .to_string();
                if state.running.contains(&name) {
                    CommandOutput::ok(format!("{}\n", name))
                } else {
                    CommandOutput::ok("")
                }
            }
            Some("inspect") => {
                let container = tokens.last().cloned().unwrap_or_default();
                if !state.running.contains(&container) {
                    CommandOutput::failed(1, format!("Error: No such object: {}\n", container))
                } else if state.unhealthy.contains(&container) {
                    CommandOutput::ok("unhealthy\n")
                } else {
                    CommandOutput::ok("healthy\n")
                }
            }
            Some("pull") => {
                state.pulled.push(tokens.last().cloned().unwrap_or_default());
                CommandOutput::ok("")
            }
            Some("build") => {
                state.built.push(flag_value(&tokens, "-t").unwrap_or_default());
                CommandOutput::ok("")
            }
            Some("rm") => {
                let container = tokens.last().cloned().unwrap_or_default();
                state.running.remove(&container);
                CommandOutput::ok("")
            }
            Some("network") => {
                let name = tokens.last().cloned().unwrap_or_default();
                match tokens.get(2).map(String::as_str) {
                    Some("inspect") if state.networks.contains(&name) => CommandOutput::ok("[]\n"),
                    Some("inspect") => CommandOutput::failed(1, "network not found\n"),
                    _ => {
                        state.networks.insert(name);
                        CommandOutput::ok("")
                    }
                }
            }
            _ => CommandOutput::failed(127, format!("unsupported: {}\n", command)),
        }
    }
}

impl RemoteExecutor for FakeHost {
    fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutput> {
        self.state().log.push(command.to_string());
        if command.starts_with("docker build ") {
            self.slow_build();
        }
        if command.starts_with("docker ") {
            return Ok(self.docker(command));
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| berth::Error::internal_io(e.to_string(), Some("sh -c".to_string())))?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn run_streaming(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        self.run(command, timeout)
    }
}

impl SourceSync for FakeHost {
    fn sync_dir(&self, local_dir: &Path, _remote_dir: &str, _timeout: Duration) -> Result<()> {
        self.state().synced.push(local_dir.to_path_buf());
        Ok(())
    }
}

fn unquote(token: &str) -> String {
    token.trim_matches('\'').to_string()
}

fn flag_value(tokens: &[String], flag: &str) -> Option<String> {
    tokens
        .iter()
        .position(|t| t == flag)
        .and_then(|i| tokens.get(i + 1))
        .cloned()
}

// ============================================================================
// Fixtures
// ============================================================================

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub project: Project,
    pub settings: DeploySettings,
}

impl Fixture {
    pub fn new(services: Vec<ServiceConfig>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let stack = dir.path().join("stack");
        let source = dir.path().join("src");
        let locks = dir.path().join("locks");
        std::fs::create_dir_all(&source).unwrap();

        let project = Project {
            id: "myapp".to_string(),
            server_id: "web1".to_string(),
            stack_path: stack.to_string_lossy().to_string(),
            source_root: Some(source.to_string_lossy().to_string()),
            services,
        };

        let defaults = builtin_defaults();
        let settings = DeploySettings {
            timeouts: defaults.timeouts,
            networks: defaults.networks,
            cert_resolver: defaults.cert_resolver,
            health: HealthDefaults {
                default_deadline_secs: 1,
                margin_secs: 0,
                poll_interval_ms: 10,
            },
            lock_dir: locks,
            lock_timeout: Duration::from_millis(200),
        };

        Self {
            dir,
            project,
            settings,
        }
    }

    pub fn deployer<'a>(&'a self, host: &'a FakeHost) -> Deployer<'a> {
        Deployer::new(host, host, &self.project, "web1", self.settings.clone())
    }

    pub fn stack_dir(&self) -> PathBuf {
        PathBuf::from(&self.project.stack_path)
    }

    pub fn descriptor(&self) -> String {
        std::fs::read_to_string(self.stack_dir().join("docker-compose.yml")).unwrap_or_default()
    }

    pub fn stack_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.stack_dir())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

pub fn built(name: &str) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        context: Some(name.to_string()),
        port: Some(8080),
        routing: RoutingConfig {
            domain: Some(format!("{}.example.com", name)),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn prebuilt(name: &str, image: &str) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        image: Some(image.to_string()),
        ..Default::default()
    }
}
