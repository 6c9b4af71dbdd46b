use clap::Args;
use serde::Serialize;

use berth::descriptor::DescriptorStore;

use super::{CmdResult, StackContext};

#[derive(Args)]
pub struct VersionArgs {
    /// Project ID
    pub project_id: String,

    /// Service name
    pub service: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionOutput {
    pub project_id: String,
    pub service: String,
    pub prebuilt: bool,
    pub version: u32,
    pub image: String,
}

pub fn run(args: VersionArgs) -> CmdResult<VersionOutput> {
    let ctx = StackContext::load(&args.project_id)?;
    let svc = ctx.project.service(&args.service)?;

    let version = if svc.is_prebuilt() {
        0
    } else {
        let mut store = DescriptorStore::new(
            &ctx.client,
            &ctx.project.stack_path,
            ctx.defaults.timeouts.command(),
        );
        store.current_version(&svc.image_name(&ctx.project.id))?
    };

    Ok((
        VersionOutput {
            project_id: ctx.project.id.clone(),
            service: svc.name.clone(),
            prebuilt: svc.is_prebuilt(),
            version,
            image: svc.image_ref(&ctx.project.id, version),
        },
        0,
    ))
}
