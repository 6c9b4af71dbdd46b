//! Bringing up a service's dependencies before it is built.
//!
//! Running dependencies are left alone; stopped ones are pulled (when
//! pre-built) and started. Nothing here ever restarts a running container.

use std::time::Duration;

use crate::defaults::TimeoutsConfig;
use crate::error::{Error, Result};
use crate::remote::RemoteExecutor;
use crate::runtime;
use crate::service::ServiceConfig;

/// Whether `container` is currently running.
pub fn is_running(remote: &dyn RemoteExecutor, container: &str, timeout: Duration) -> Result<bool> {
    let output = remote.run_checked(&runtime::docker_running(container), timeout)?;
    Ok(output.stdout.lines().any(|line| line.trim() == container))
}

pub struct DependencyResolver<'a> {
    pub remote: &'a dyn RemoteExecutor,
    pub project: &'a str,
    pub descriptor_path: &'a str,
    /// Configurations used to tell pre-built dependencies apart.
    pub known: &'a [ServiceConfig],
    pub timeouts: &'a TimeoutsConfig,
}

impl DependencyResolver<'_> {
    /// Make sure every dependency of `service` is running, in order.
    /// Returns the dependencies that had to be started.
    pub fn ensure(&self, service: &str, dependencies: &[String]) -> Result<Vec<String>> {
        let mut started = Vec::new();

        for dep in dependencies {
            let container = runtime::container_name(self.project, dep);
            let running = is_running(self.remote, &container, self.timeouts.command())
                .map_err(|e| self.failure(service, dep, "could not query", e))?;

            if running {
                log_status!("deps", "{} is already running", dep);
                continue;
            }

            if let Some(config) = self.known.iter().find(|s| &s.name == dep) {
                if config.is_prebuilt() {
                    let image = config.image_ref(self.project, 0);
                    log_status!("deps", "Pulling {} for {}", image, dep);
                    self.remote
                        .run_streaming_checked(&runtime::docker_pull(&image), self.timeouts.pull())
                        .map_err(|e| self.failure(service, dep, "could not pull", e))?;
                }
            }

            log_status!("deps", "Starting {}", dep);
            let up = runtime::compose_up(self.project, self.descriptor_path, dep, false);
            self.remote
                .run_checked(&up, self.timeouts.start())
                .map_err(|e| self.failure(service, dep, "could not start", e))?;
            started.push(dep.clone());
        }

        Ok(started)
    }

    fn failure(&self, service: &str, dep: &str, action: &str, cause: Error) -> Error {
        let mut err = Error::precondition_failed(
            service,
            format!("{} dependency '{}': {}", action, dep, cause.message),
        );
        err.hints = cause.hints;
        err.retryable = cause.retryable;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::builtin_defaults;
    use crate::remote::CommandOutput;
    use std::sync::Mutex;

    struct Host {
        running: Vec<&'static str>,
        fail_prefix: Option<&'static str>,
        log: Mutex<Vec<String>>,
    }

    impl RemoteExecutor for Host {
        fn run(&self, command: &str, _timeout: Duration) -> Result<CommandOutput> {
            self.log.lock().unwrap().push(command.to_string());
            if self.fail_prefix.is_some_and(|p| command.starts_with(p)) {
                return Ok(CommandOutput::failed(1, "boom"));
            }
            if command.starts_with("docker ps") {
                let hit = self
                    .running
                    .iter()
                    .find(|name| command.contains(&format!("^{}$", name)));
                return Ok(CommandOutput::ok(hit.map(|n| format!("{}\n", n)).unwrap_or_default()));
            }
            Ok(CommandOutput::ok(""))
        }

        fn run_streaming(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
            self.run(command, timeout)
        }
    }

    fn known() -> Vec<ServiceConfig> {
        vec![
            ServiceConfig {
                name: "db".to_string(),
                image: Some("postgres:16".to_string()),
                ..Default::default()
            },
            ServiceConfig {
                name: "cache".to_string(),
                image: Some("redis:7".to_string()),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn only_stopped_dependency_is_pulled_and_started() {
        let host = Host {
            running: vec!["myapp-db"],
            fail_prefix: None,
            log: Mutex::new(Vec::new()),
        };
        let known = known();
        let timeouts = builtin_defaults().timeouts;
        let resolver = DependencyResolver {
            remote: &host,
            project: "myapp",
            descriptor_path: "/srv/myapp/docker-compose.yml",
            known: &known,
            timeouts: &timeouts,
        };

        let started = resolver
            .ensure("api", &["db".to_string(), "cache".to_string()])
            .unwrap();
        assert_eq!(started, vec!["cache".to_string()]);

        let log = host.log.lock().unwrap();
        let pulls: Vec<_> = log.iter().filter(|c| c.starts_with("docker pull")).collect();
        let ups: Vec<_> = log.iter().filter(|c| c.contains(" up -d ")).collect();
        assert_eq!(pulls, vec!["docker pull redis:7"]);
        assert_eq!(ups.len(), 1);
        assert!(ups[0].ends_with("up -d --no-deps cache"));

        let pull_at = log.iter().position(|c| c.starts_with("docker pull")).unwrap();
        let up_at = log.iter().position(|c| c.contains(" up -d ")).unwrap();
        assert!(pull_at < up_at);
    }

    #[test]
    fn start_failure_is_a_precondition_failure() {
        let host = Host {
            running: vec![],
            fail_prefix: Some("docker compose"),
            log: Mutex::new(Vec::new()),
        };
        let known = known();
        let timeouts = builtin_defaults().timeouts;
        let resolver = DependencyResolver {
            remote: &host,
            project: "myapp",
            descriptor_path: "/srv/myapp/docker-compose.yml",
            known: &known,
            timeouts: &timeouts,
        };

        let err = resolver.ensure("api", &["db".to_string()]).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::DeployPreconditionFailed);
        assert!(err.message.contains("'db'"));
    }
}
