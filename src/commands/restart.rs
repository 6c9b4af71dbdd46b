use clap::Args;

use berth::deploy::DeployOutcome;

use super::{CmdResult, StackContext};

#[derive(Args)]
pub struct RestartArgs {
    /// Project ID
    pub project_id: String,

    /// Service name
    pub service: String,
}

pub fn run(args: RestartArgs) -> CmdResult<DeployOutcome> {
    let ctx = StackContext::load(&args.project_id)?;
    let outcome = ctx.deployer()?.restart(&args.service)?;
    Ok((outcome, 0))
}
