// confsync CLI entry point.

use clap::Parser;

mod commands;

#[derive(Parser)]
#[command(name = "confsync", about = "Mirror configuration repositories into git")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run(cli.command)
}
