use anyhow::{Result, bail};
use exec_util::{Charset, ExitStatus, SyncOptions, run_cmd};
use std::time::Duration;
use tracing::info;

/// Run cargo with `args`, echoing its output
///
/// Every stdout line is passed to `inspect` after it is printed.
pub fn cargo<F>(args: &[&str], mut inspect: F) -> Result<ExitStatus>
where
    F: FnMut(&str) + Send + 'static,
{
    info!("Running: cargo {}", args.join(" "));

    let options = SyncOptions::default().with_process_timeout(Duration::from_secs(3600));
    let process = run_cmd(std::iter::once("cargo").chain(args.iter().copied()), |_| {})?
        .sync_with(&options, |syncer| {
            syncer
                .on_stdout_each_line(Charset::utf_8(), move |line| {
                    println!("{line}");
                    inspect(line);
                })
                .on_stderr_each_line(Charset::utf_8(), |line| eprintln!("{line}"));
        })?;

    match process.exit_status() {
        Some(status) => Ok(status.clone()),
        None => bail!("cargo {} did not finish in time", args.join(" ")),
    }
}

/// Run cargo and fail unless it exits successfully
pub fn cargo_checked(args: &[&str], failure: &str) -> Result<()> {
    let status = cargo(args, |_| {})?;
    if !status.success() {
        bail!("{failure}");
    }
    Ok(())
}
