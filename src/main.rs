use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{deploy, env, restart, rollback, version};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "berth")]
#[command(version = VERSION)]
#[command(about = "Deploy container stacks to a single host over SSH")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and roll out a new version of a service
    Deploy(deploy::DeployArgs),
    /// Recreate a service at its recorded version
    Restart(restart::RestartArgs),
    /// Move a service back to its previous version
    Rollback(rollback::RollbackArgs),
    /// Manage a service's environment file on the host
    Env(env::EnvArgs),
    /// Show the version a service is recorded at
    Version(version::VersionArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = commands::run_json(cli.command);
    output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    code.clamp(0, 255) as u8
}
