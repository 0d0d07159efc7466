use crate::cargo::{cargo, cargo_checked};
use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use tracing::info;

#[derive(Args)]
pub struct CiArgs {
    #[command(subcommand)]
    cmd: CiCommand,
}

#[derive(Subcommand)]
pub enum CiCommand {
    /// Run all CI checks
    All,
    /// Format check (read-only)
    #[command(name = "fmt-check")]
    FmtCheck,
    /// Clippy lints
    Clippy,
    /// Run unit tests only
    UnitTests,
    /// Run the whole test suite
    Tests,
}

pub fn run(args: CiArgs) -> Result<()> {
    match args.cmd {
        CiCommand::All => run_all(),
        CiCommand::FmtCheck => run_fmt(),
        CiCommand::Clippy => run_clippy(),
        CiCommand::UnitTests => run_tests(&["--lib", "--bins"]),
        CiCommand::Tests => run_tests(&[]),
    }
}

fn run_all() -> Result<()> {
    info!("Checking code formatting");
    run_fmt()?;

    info!("Running clippy lints");
    run_clippy()?;

    info!("Running tests");
    run_tests(&[])?;

    info!("All CI checks passed");
    Ok(())
}

fn run_fmt() -> Result<()> {
    cargo_checked(
        &["fmt", "--all", "--", "--check"],
        "Format check failed. Run 'cargo fmt --all' to fix.",
    )
}

fn run_clippy() -> Result<()> {
    cargo_checked(
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--",
            "-D",
            "warnings",
        ],
        "Clippy check failed",
    )
}

fn run_tests(extra_args: &[&str]) -> Result<()> {
    let mut args = vec!["test", "--workspace"];
    args.extend_from_slice(extra_args);

    let status = cargo(&args, |_| {})?;
    match (status.success(), status.code) {
        (true, _) => Ok(()),
        (false, Some(code)) => bail!("Tests exited with code: {code}"),
        (false, None) => bail!("Tests terminated abnormally"),
    }
}
