use clap::Args;

use berth::deploy::DeployOutcome;

use super::{CmdResult, StackContext};

#[derive(Args)]
pub struct RollbackArgs {
    /// Project ID
    pub project_id: String,

    /// Service name
    pub service: String,

    /// Regenerate the stack descriptor from the project file
    #[arg(long)]
    pub sync_config: bool,
}

pub fn run(args: RollbackArgs) -> CmdResult<DeployOutcome> {
    let ctx = StackContext::load(&args.project_id)?;
    let known = args.sync_config.then_some(ctx.project.services.as_slice());
    let outcome = ctx.deployer()?.rollback(&args.service, known)?;
    Ok((outcome, 0))
}
