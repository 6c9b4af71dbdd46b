use clap::Args;

use berth::deploy::{DeployOptions, DeployOutcome};

use super::{CmdResult, StackContext};

#[derive(Args)]
pub struct DeployArgs {
    /// Project ID
    pub project_id: String,

    /// Service name
    pub service: String,

    /// Build or pull the image without touching the running stack
    #[arg(long)]
    pub build_only: bool,

    /// Regenerate the stack descriptor from the project file
    #[arg(long)]
    pub sync_config: bool,
}

pub fn run(args: DeployArgs) -> CmdResult<DeployOutcome> {
    let ctx = StackContext::load(&args.project_id)?;
    let deployer = ctx.deployer()?;

    let options = DeployOptions {
        build_only: args.build_only,
        known_services: args.sync_config.then_some(ctx.project.services.as_slice()),
    };
    let outcome = deployer.deploy(&args.service, options)?;
    Ok((outcome, 0))
}
