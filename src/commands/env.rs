use clap::{Args, Subcommand};
use serde::Serialize;

use berth::deploy::Deployer;

use super::{CmdResult, StackContext};

#[derive(Args)]
pub struct EnvArgs {
    #[command(subcommand)]
    command: EnvCommand,
}

#[derive(Subcommand)]
enum EnvCommand {
    /// Show a service's environment
    List {
        /// Project ID
        project_id: String,
        /// Service name
        service: String,
    },
    /// Set a variable (takes effect on the next deploy or restart)
    Set {
        /// Project ID
        project_id: String,
        /// Service name
        service: String,
        /// Variable name
        key: String,
        /// Value
        value: String,
    },
    /// Remove a variable
    Unset {
        /// Project ID
        project_id: String,
        /// Service name
        service: String,
        /// Variable name
        key: String,
    },
}

#[derive(Serialize)]
pub struct EnvEntry {
    pub key: String,
    pub value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvOutput {
    pub command: String,
    pub project_id: String,
    pub service: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<EnvEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
}

pub fn run(args: EnvArgs) -> CmdResult<EnvOutput> {
    match args.command {
        EnvCommand::List {
            project_id,
            service,
        } => with_env(&project_id, &service, "env.list", |deployer, svc| {
            let entries = deployer
                .env_files()
                .list(svc)?
                .into_iter()
                .map(|(key, value)| EnvEntry { key, value })
                .collect();
            Ok((Some(entries), None, None))
        }),
        EnvCommand::Set {
            project_id,
            service,
            key,
            value,
        } => with_env(&project_id, &service, "env.set", |deployer, svc| {
            deployer.set_env(svc, &key, &value)?;
            Ok((None, Some(key.clone()), Some(true)))
        }),
        EnvCommand::Unset {
            project_id,
            service,
            key,
        } => with_env(&project_id, &service, "env.unset", |deployer, svc| {
            let removed = deployer.unset_env(svc, &key)?;
            Ok((None, Some(key.clone()), Some(removed)))
        }),
    }
}

type EnvResult = (Option<Vec<EnvEntry>>, Option<String>, Option<bool>);

fn with_env<F>(project_id: &str, service: &str, command: &str, f: F) -> CmdResult<EnvOutput>
where
    F: FnOnce(&Deployer<'_>, &str) -> berth::Result<EnvResult>,
{
    let ctx = StackContext::load(project_id)?;
    let svc = ctx.project.service(service)?;
    let deployer = ctx.deployer()?;
    let (entries, key, changed) = f(&deployer, &svc.name)?;

    Ok((
        EnvOutput {
            command: command.to_string(),
            project_id: ctx.project.id.clone(),
            service: svc.name.clone(),
            path: deployer.env_files().path(&svc.name),
            entries,
            key,
            changed,
        },
        0,
    ))
}
