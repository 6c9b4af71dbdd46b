//! Deploy, restart and rollback of one service in a stack.
//!
//! Every operation holds the stack's deploy lock for its whole duration and
//! reads the descriptor through a store scoped to that run. Remote failures
//! come back wrapped with the stage that produced them.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::defaults::{Defaults, HealthDefaults, NetworksConfig, TimeoutsConfig};
use crate::dependencies::{self, DependencyResolver};
use crate::descriptor::{self, compose, version, DescriptorStore, RenderContext};
use crate::envfile::EnvFiles;
use crate::error::{first_line, Error, ErrorCode, Result};
use crate::health::{self, HealthWait};
use crate::lock::{self, DeployLock};
use crate::paths;
use crate::project::Project;
use crate::remote::{RemoteExecutor, SourceSync};
use crate::runtime;
use crate::service::ServiceConfig;

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Tunables for one orchestration run.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub timeouts: TimeoutsConfig,
    pub networks: NetworksConfig,
    pub cert_resolver: String,
    pub health: HealthDefaults,
    pub lock_dir: PathBuf,
    pub lock_timeout: Duration,
}

impl DeploySettings {
    pub fn from_defaults(defaults: &Defaults) -> Result<Self> {
        let lock_dir = match defaults.lock_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(shellexpand::tilde(dir).to_string()),
            _ => paths::locks()?,
        };
        Ok(Self {
            timeouts: defaults.timeouts.clone(),
            networks: defaults.networks.clone(),
            cert_resolver: defaults.cert_resolver.clone(),
            health: defaults.health.clone(),
            lock_dir,
            lock_timeout: defaults.timeouts.lock(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions<'a> {
    /// Build (or pull) the image and stop; the descriptor is not touched.
    pub build_only: bool,
    /// Full service set. When given, the descriptor is regenerated from it
    /// instead of patching this service's image tag.
    pub known_services: Option<&'a [ServiceConfig]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deploy,
    Restart,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Direct,
    Canary,
    BuildOnly,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub project: String,
    pub service: String,
    pub action: Action,
    pub strategy: Strategy,
    pub previous_version: u32,
    pub version: u32,
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub started_dependencies: Vec<String>,
    pub bootstrapped: bool,
    pub started_at: String,
    pub finished_at: String,
}

/// Removes a remote build directory when dropped. Failures are only logged.
struct RemoteDirCleanup<'a> {
    remote: &'a dyn RemoteExecutor,
    path: String,
    timeout: Duration,
}

impl Drop for RemoteDirCleanup<'_> {
    fn drop(&mut self) {
        match self.remote.run(&runtime::remove_dir(&self.path), self.timeout) {
            Ok(out) if out.success => {}
            Ok(out) => log_status!(
                "build",
                "Could not remove {}: {}",
                self.path,
                first_line(&out.stderr).unwrap_or("unknown error")
            ),
            Err(err) => log_status!("build", "Could not remove {}: {}", self.path, err.message),
        }
    }
}

pub struct Deployer<'a> {
    remote: &'a dyn RemoteExecutor,
    sync: &'a dyn SourceSync,
    project: &'a Project,
    host: String,
    settings: DeploySettings,
}

impl<'a> Deployer<'a> {
    pub fn new(
        remote: &'a dyn RemoteExecutor,
        sync: &'a dyn SourceSync,
        project: &'a Project,
        host: impl Into<String>,
        settings: DeploySettings,
    ) -> Self {
        Self {
            remote,
            sync,
            project,
            host: host.into(),
            settings,
        }
    }

    /// Stack identity the deploy lock is keyed by.
    pub fn lock_identity(&self) -> String {
        format!("{}:{}", self.host, self.project.stack_path.trim_end_matches('/'))
    }

    fn lock(&self) -> Result<DeployLock> {
        let identity = self.lock_identity();
        let held = lock::acquire(&self.settings.lock_dir, &identity, self.settings.lock_timeout)?;
        log_status!("lock", "Acquired {}", identity);
        Ok(held)
    }

    fn store(&self) -> DescriptorStore<'a> {
        DescriptorStore::new(
            self.remote,
            &self.project.stack_path,
            self.settings.timeouts.command(),
        )
    }

    // ------------------------------------------------------------------------
    // Deploy
    // ------------------------------------------------------------------------

    pub fn deploy(&self, service: &str, options: DeployOptions<'_>) -> Result<DeployOutcome> {
        let svc = self.project.service(service)?;
        let started_at = Utc::now().to_rfc3339();
        let _lock = self.lock()?;
        let mut store = self.store();

        // The descriptor names an env file for every service it renders.
        let stack_services = self.stack_services(svc, options.known_services);
        let bootstrapped = self.stage("descriptor", svc, store.read())?.trim().is_empty();
        if bootstrapped || !options.build_only {
            self.stage("env", svc, self.ensure_env_files(&stack_services))?;
        }
        if bootstrapped {
            self.stage("bootstrap", svc, self.bootstrap(&mut store, &stack_services))?;
        }

        let mut started_dependencies = Vec::new();
        if !options.build_only && svc.has_dependencies() {
            let resolver = DependencyResolver {
                remote: self.remote,
                project: &self.project.id,
                descriptor_path: store.path(),
                known: &stack_services,
                timeouts: &self.settings.timeouts,
            };
            started_dependencies = self.stage("dependencies", svc, resolver.ensure(&svc.name, &svc.depends_on))?;
        }

        let image_name = svc.image_name(&self.project.id);
        let previous_version = if svc.is_prebuilt() {
            0
        } else {
            self.stage("descriptor", svc, store.current_version(&image_name))?
        };
        let next_version = if svc.is_prebuilt() { 0 } else { previous_version + 1 };
        let image = svc.image_ref(&self.project.id, next_version);

        if svc.is_prebuilt() {
            log_status!("deploy", "Pulling {}", image);
            self.stage(
                "pull",
                svc,
                self.remote
                    .run_streaming_checked(&runtime::docker_pull(&image), self.settings.timeouts.pull()),
            )?;
        } else {
            self.build(svc, &image)?;
        }

        let outcome = |strategy: Strategy| DeployOutcome {
            project: self.project.id.clone(),
            service: svc.name.clone(),
            action: Action::Deploy,
            strategy,
            previous_version,
            version: next_version,
            image: image.clone(),
            started_dependencies: started_dependencies.clone(),
            bootstrapped,
            started_at: started_at.clone(),
            finished_at: Utc::now().to_rfc3339(),
        };

        if options.build_only {
            log_status!("deploy", "Built {} (descriptor unchanged)", image);
            return Ok(outcome(Strategy::BuildOnly));
        }

        let current = self.stage("descriptor", svc, store.read())?;
        let next = self.next_descriptor(&current, svc, next_version, options.known_services)?;

        let primary = runtime::container_name(&self.project.id, &svc.name);
        let running = self.stage(
            "start",
            svc,
            dependencies::is_running(self.remote, &primary, self.settings.timeouts.command()),
        )?;

        let strategy = if running {
            self.canary_rollout(&mut store, svc, &current, &next, next_version)?;
            Strategy::Canary
        } else {
            self.stage("descriptor", svc, store.write(&next))?;
            self.start_and_wait(svc, store.path())?;
            Strategy::Direct
        };

        log_status!("deploy", "{} is at version {}", svc.name, next_version);
        Ok(outcome(strategy))
    }

    /// Services the descriptor covers: the given set, else the project's,
    /// with `svc` always among them.
    fn stack_services(&self, svc: &ServiceConfig, known: Option<&[ServiceConfig]>) -> Vec<ServiceConfig> {
        let mut services = known.unwrap_or(&self.project.services).to_vec();
        if !services.iter().any(|s| s.name == svc.name) {
            services.push(svc.clone());
        }
        services
    }

    /// Write the initial descriptor and create the networks of a stack that
    /// has no descriptor yet. Env files must already exist.
    fn bootstrap(&self, store: &mut DescriptorStore<'_>, services: &[ServiceConfig]) -> Result<()> {
        log_status!("deploy", "Bootstrapping stack at {}", self.project.stack_path);

        let initial = self.render(services, &HashMap::new())?;
        store.write(&initial)?;

        let private = self.settings.networks.private_network(&self.project.id);
        for network in [self.settings.networks.ingress.as_str(), private.as_str()] {
            self.ensure_network(network)?;
        }
        Ok(())
    }

    fn ensure_env_files(&self, services: &[ServiceConfig]) -> Result<()> {
        let env = self.env_files();
        for s in services {
            env.ensure(&s.name)?;
        }
        Ok(())
    }

    fn ensure_network(&self, name: &str) -> Result<()> {
        let timeout = self.settings.timeouts.command();
        let inspect = self.remote.run(&runtime::network_inspect(name), timeout)?;
        if inspect.success {
            return Ok(());
        }
        log_status!("deploy", "Creating network {}", name);
        self.remote
            .run_checked(&runtime::network_create(name), timeout)?;
        Ok(())
    }

    fn build(&self, svc: &ServiceConfig, tag: &str) -> Result<()> {
        let context = self.project.context_dir(svc).ok_or_else(|| {
            Error::precondition_failed(&svc.name, "service has neither an image nor a build context")
        })?;

        let remote_dir = format!("/tmp/berth-build-{}", Uuid::new_v4().simple());
        let _cleanup = RemoteDirCleanup {
            remote: self.remote,
            path: remote_dir.clone(),
            timeout: self.settings.timeouts.command(),
        };

        log_status!("build", "Syncing {} to {}", context.display(), remote_dir);
        self.stage(
            "sync",
            svc,
            self.sync
                .sync_dir(&context, &remote_dir, self.settings.timeouts.sync()),
        )?;

        log_status!("build", "Building {}", tag);
        let dockerfile = svc.dockerfile.as_deref().unwrap_or(DEFAULT_DOCKERFILE);
        let command = runtime::docker_build(tag, &remote_dir, dockerfile, svc.target.as_deref());
        self.stage(
            "build",
            svc,
            self.remote
                .run_streaming_checked(&command, self.settings.timeouts.build()),
        )?;
        Ok(())
    }

    /// Descriptor text with `svc` at `target_version`.
    fn next_descriptor(
        &self,
        current: &str,
        svc: &ServiceConfig,
        target_version: u32,
        known: Option<&[ServiceConfig]>,
    ) -> Result<String> {
        if let Some(all) = known {
            let mut versions = HashMap::new();
            for s in all.iter().filter(|s| !s.is_prebuilt() && s.name != svc.name) {
                let v = self.stage("descriptor", svc, version::extract(current, &s.image_name(&self.project.id)))?;
                versions.insert(s.name.clone(), v);
            }
            versions.insert(svc.name.clone(), target_version);

            let services = self.stack_services(svc, Some(all));
            return self.stage("descriptor", svc, self.render(&services, &versions));
        }

        let rewritten = if svc.is_prebuilt() {
            compose::set_image(current, &svc.name, &svc.image_ref(&self.project.id, 0))
        } else {
            version::rewrite(current, &svc.image_name(&self.project.id), target_version)
        };

        match self.stage("descriptor", svc, rewritten)? {
            Some(text) => Ok(text),
            None => Err(Error::precondition_failed(
                &svc.name,
                "service is not present in the stack descriptor",
            )
            .with_hint("Run again with --sync-config to regenerate the descriptor from the project file")),
        }
    }

    fn render(&self, services: &[ServiceConfig], versions: &HashMap<String, u32>) -> Result<String> {
        let private = self.settings.networks.private_network(&self.project.id);
        descriptor::render(
            &RenderContext {
                project: &self.project.id,
                ingress_network: &self.settings.networks.ingress,
                private_network: &private,
                cert_resolver: &self.settings.cert_resolver,
            },
            services,
            |s| versions.get(&s.name).copied().unwrap_or(0),
        )
    }

    fn start_and_wait(&self, svc: &ServiceConfig, descriptor_path: &str) -> Result<()> {
        let up = runtime::compose_up(&self.project.id, descriptor_path, &svc.name, true);
        log_status!("deploy", "Starting {}", svc.name);
        self.stage(
            "start",
            svc,
            self.remote
                .run_streaming_checked(&up, self.settings.timeouts.start()),
        )?;

        let container = runtime::container_name(&self.project.id, &svc.name);
        self.wait_healthy(svc, &container)
    }

    fn wait_healthy(&self, svc: &ServiceConfig, container: &str) -> Result<()> {
        let wait = HealthWait::for_service(svc.health_check.as_ref(), &self.settings.health);
        let outcome = self.stage(
            "health",
            svc,
            health::wait_healthy(self.remote, container, wait, self.settings.timeouts.command()),
        )?;
        if outcome.is_healthy() {
            return Ok(());
        }
        Err(Error::health_check_failed(&svc.name, container, outcome.reason()))
    }

    // ------------------------------------------------------------------------
    // Canary
    // ------------------------------------------------------------------------

    fn canary_rollout(
        &self,
        store: &mut DescriptorStore<'_>,
        svc: &ServiceConfig,
        current: &str,
        next: &str,
        next_version: u32,
    ) -> Result<()> {
        let canary = svc.canary_name();
        let canary_container = runtime::container_name(&self.project.id, &canary);
        let variant = self.stage(
            "canary",
            svc,
            compose::canary_variant(current, next, &self.project.id, &svc.name),
        )?;

        log_status!("canary", "Starting {} at version {}", canary, next_version);
        if let Err(err) = store.write(&variant) {
            return Err(Error::stage_failed("canary", &svc.name, err));
        }

        let up = runtime::compose_up(&self.project.id, store.path(), &canary, true);
        if let Err(err) = self
            .remote
            .run_streaming_checked(&up, self.settings.timeouts.start())
        {
            self.abandon_canary(store, &canary_container, current);
            return Err(Error::stage_failed("canary", &svc.name, err));
        }

        let wait = HealthWait::for_service(svc.health_check.as_ref(), &self.settings.health);
        let outcome = match health::wait_healthy(
            self.remote,
            &canary_container,
            wait,
            self.settings.timeouts.command(),
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.abandon_canary(store, &canary_container, current);
                return Err(Error::stage_failed("canary", &svc.name, err));
            }
        };

        if !outcome.is_healthy() {
            log_status!("canary", "{} failed: {}", canary, outcome.reason());
            self.abandon_canary(store, &canary_container, current);
            return Err(Error::canary_unhealthy(&svc.name, next_version, outcome.reason()));
        }

        log_status!("canary", "{} is healthy, promoting", canary);
        let promoted = self
            .stage("descriptor", svc, store.write(next))
            .and_then(|_| self.start_and_wait(svc, store.path()));
        self.remove_container(&canary_container);
        promoted
    }

    /// Remove the canary and put the previous descriptor back. The primary
    /// container is never touched.
    fn abandon_canary(&self, store: &mut DescriptorStore<'_>, container: &str, previous: &str) {
        self.remove_container(container);
        if let Err(err) = store.write(previous) {
            log_status!("canary", "Could not restore previous descriptor: {}", err.message);
        }
    }

    fn remove_container(&self, container: &str) {
        match self
            .remote
            .run(&runtime::docker_remove(container), self.settings.timeouts.command())
        {
            Ok(out) if out.success => {}
            Ok(out) => log_status!(
                "canary",
                "Could not remove {}: {}",
                container,
                first_line(&out.stderr).unwrap_or("unknown error")
            ),
            Err(err) => log_status!("canary", "Could not remove {}: {}", container, err.message),
        }
    }

    // ------------------------------------------------------------------------
    // Restart / Rollback
    // ------------------------------------------------------------------------

    /// Recreate the service at the version the descriptor records.
    pub fn restart(&self, service: &str) -> Result<DeployOutcome> {
        let svc = self.project.service(service)?;
        let started_at = Utc::now().to_rfc3339();
        let _lock = self.lock()?;
        let mut store = self.store();

        let current = self.stage("descriptor", svc, store.read())?;
        if current.trim().is_empty() {
            return Err(Error::precondition_failed(&svc.name, "stack has no descriptor yet")
                .with_hint("Deploy the service first"));
        }
        let version = if svc.is_prebuilt() {
            0
        } else {
            self.stage("descriptor", svc, version::extract(&current, &svc.image_name(&self.project.id)))?
        };

        self.start_and_wait(svc, store.path())?;

        Ok(DeployOutcome {
            project: self.project.id.clone(),
            service: svc.name.clone(),
            action: Action::Restart,
            strategy: Strategy::Direct,
            previous_version: version,
            version,
            image: svc.image_ref(&self.project.id, version),
            started_dependencies: Vec::new(),
            bootstrapped: false,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
        })
    }

    /// Point the service back at `current - 1` and start it. No canary.
    pub fn rollback(&self, service: &str, known: Option<&[ServiceConfig]>) -> Result<DeployOutcome> {
        let svc = self.project.service(service)?;
        if svc.is_prebuilt() {
            return Err(Error::prebuilt_rollback(&svc.name));
        }
        let started_at = Utc::now().to_rfc3339();
        let _lock = self.lock()?;
        let mut store = self.store();

        let image_name = svc.image_name(&self.project.id);
        let current_version = self.stage("descriptor", svc, store.current_version(&image_name))?;
        if current_version <= 1 {
            return Err(Error::no_previous_version(&svc.name, current_version));
        }
        let target = current_version - 1;

        let current = self.stage("descriptor", svc, store.read())?;
        let next = self.next_descriptor(&current, svc, target, known)?;
        log_status!("deploy", "Rolling {} back to version {}", svc.name, target);
        self.stage("descriptor", svc, store.write(&next))?;
        self.start_and_wait(svc, store.path())?;

        Ok(DeployOutcome {
            project: self.project.id.clone(),
            service: svc.name.clone(),
            action: Action::Rollback,
            strategy: Strategy::Direct,
            previous_version: current_version,
            version: target,
            image: svc.image_ref(&self.project.id, target),
            started_dependencies: Vec::new(),
            bootstrapped: false,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
        })
    }

    // ------------------------------------------------------------------------
    // Env files
    // ------------------------------------------------------------------------

    /// Unlocked access to the stack's env files, for reads.
    pub fn env_files(&self) -> EnvFiles<'a> {
        EnvFiles::new(
            self.remote,
            &self.project.stack_path,
            self.settings.timeouts.command(),
        )
    }

    /// Set `key` in the service's env file while holding the deploy lock.
    pub fn set_env(&self, service: &str, key: &str, value: &str) -> Result<()> {
        let svc = self.project.service(service)?;
        let _lock = self.lock()?;
        self.env_files().set(&svc.name, key, value)
    }

    /// Remove `key` from the service's env file while holding the deploy
    /// lock. Returns whether the key was present.
    pub fn unset_env(&self, service: &str, key: &str) -> Result<bool> {
        let svc = self.project.service(service)?;
        let _lock = self.lock()?;
        self.env_files().unset(&svc.name, key)
    }

    /// Attach the stage name to a failure. Errors that already describe the
    /// deploy outcome pass through unchanged.
    fn stage<T>(&self, stage: &str, svc: &ServiceConfig, result: Result<T>) -> Result<T> {
        result.map_err(|err| match err.code {
            ErrorCode::DeployPreconditionFailed
            | ErrorCode::DeployStageFailed
            | ErrorCode::DeployCanaryUnhealthy
            | ErrorCode::DeployHealthCheckFailed
            | ErrorCode::LockTimeout => err,
            _ => Error::stage_failed(stage, &svc.name, err),
        })
    }
}
