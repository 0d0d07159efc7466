mod cargo;
mod ci;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development task runner for exec-util")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run CI checks
    Ci(ci::CiArgs),
    /// Run tests
    Test(test::TestArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();
    match args.cmd {
        Command::Ci(args) => ci::run(args),
        Command::Test(args) => test::run(args),
    }
}
