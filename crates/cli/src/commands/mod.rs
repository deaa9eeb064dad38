// CLI subcommand dispatch.

use clap::Subcommand;

pub mod check;
pub mod run;

#[derive(Subcommand)]
pub enum Command {
    /// Run the synchronization daemon in the foreground
    Run(run::RunArgs),
    /// Validate the configuration and identity map
    Check(check::CheckArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Run(args) => run::run(args),
        Command::Check(args) => check::run(args),
    }
}
