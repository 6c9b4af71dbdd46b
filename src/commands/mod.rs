use berth::defaults::{self, Defaults};
use berth::deploy::{DeploySettings, Deployer};
use berth::project::{self, Project};
use berth::server::{self, Server};
use berth::ssh::SshClient;

pub type CmdResult<T> = berth::Result<(T, i32)>;

pub mod deploy;
pub mod env;
pub mod restart;
pub mod rollback;
pub mod version;

/// Everything a command needs to talk to a project's host.
pub(crate) struct StackContext {
    pub project: Project,
    pub server: Server,
    pub defaults: Defaults,
    pub client: SshClient,
}

impl StackContext {
    pub fn load(project_id: &str) -> berth::Result<Self> {
        let project = project::load(project_id)?;
        let server = server::load(&project.server_id)?;
        let defaults = defaults::load_defaults();
        let client = SshClient::from_server(&server, &defaults.ssh)?;
        Ok(Self {
            project,
            server,
            defaults,
            client,
        })
    }

    pub fn deployer(&self) -> berth::Result<Deployer<'_>> {
        let settings = DeploySettings::from_defaults(&self.defaults)?;
        Ok(Deployer::new(
            &self.client,
            &self.client,
            &self.project,
            &self.server.host,
            settings,
        ))
    }
}

macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args))
    };
}

pub(crate) fn run_json(command: crate::Commands) -> (berth::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Deploy(args) => dispatch!(args, deploy),
        crate::Commands::Restart(args) => dispatch!(args, restart),
        crate::Commands::Rollback(args) => dispatch!(args, rollback),
        crate::Commands::Env(args) => dispatch!(args, env),
        crate::Commands::Version(args) => dispatch!(args, version),
    }
}
