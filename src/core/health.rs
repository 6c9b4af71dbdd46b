//! Waiting for a container to report healthy.

use std::thread;
use std::time::{Duration, Instant};

use crate::defaults::HealthDefaults;
use crate::error::{first_line, Result};
use crate::remote::RemoteExecutor;
use crate::runtime;
use crate::service::HealthCheck;

/// How long to wait for a container and how often to look.
#[derive(Debug, Clone, Copy)]
pub struct HealthWait {
    pub deadline: Duration,
    pub poll_interval: Duration,
}

impl HealthWait {
    /// `retries * interval` plus the margin for services with a health check;
    /// the default deadline otherwise.
    pub fn for_service(check: Option<&HealthCheck>, defaults: &HealthDefaults) -> Self {
        let deadline = match check.filter(|c| !c.command.trim().is_empty()) {
            Some(c) => c.interval() * c.retries + Duration::from_secs(defaults.margin_secs),
            None => Duration::from_secs(defaults.default_deadline_secs),
        };
        Self {
            deadline,
            poll_interval: Duration::from_millis(defaults.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    Unhealthy(String),
    TimedOut(Duration),
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy)
    }

    pub fn reason(&self) -> String {
        match self {
            HealthOutcome::Healthy => "healthy".to_string(),
            HealthOutcome::Unhealthy(reason) => reason.clone(),
            HealthOutcome::TimedOut(after) => {
                format!("not healthy after {}s", after.as_secs())
            }
        }
    }
}

enum Observed {
    Ready,
    Failed(String),
    Pending,
}

fn classify(status: &str) -> Observed {
    match status.trim() {
        "healthy" | "running" => Observed::Ready,
        "unhealthy" => Observed::Failed("container reported unhealthy".to_string()),
        s @ ("exited" | "dead") => Observed::Failed(format!("container {}", s)),
        _ => Observed::Pending,
    }
}

/// Poll `container` until it is healthy, fails, or the deadline passes.
/// Transport errors propagate; a container that cannot be inspected yet is
/// treated as still starting.
pub fn wait_healthy(
    remote: &dyn RemoteExecutor,
    container: &str,
    wait: HealthWait,
    command_timeout: Duration,
) -> Result<HealthOutcome> {
    let started = Instant::now();
    let command = runtime::docker_health(container);

    loop {
        let output = remote.run(&command, command_timeout)?;
        if output.success {
            match classify(&output.stdout) {
                Observed::Ready => return Ok(HealthOutcome::Healthy),
                Observed::Failed(reason) => return Ok(HealthOutcome::Unhealthy(reason)),
                Observed::Pending => {}
            }
        } else {
            log_status!(
                "deploy",
                "Waiting for {}: {}",
                container,
                first_line(&output.stderr).unwrap_or("not inspectable yet")
            );
        }

        let elapsed = started.elapsed();
        if elapsed >= wait.deadline {
            return Ok(HealthOutcome::TimedOut(wait.deadline));
        }
        thread::sleep(wait.poll_interval.min(wait.deadline - elapsed));
    }
}
