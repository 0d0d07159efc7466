//! Run a program with its standard streams drained into the log

use anyhow::{Context, Result, bail};
use clap::Parser;
use exec_util::{Charset, Command, SyncOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, info, info_span, warn};

#[derive(Parser, Debug)]
#[command(name = "execsync")]
#[command(about = "Run a program and log its output")]
#[command(version)]
struct Cli {
    /// YAML file with sync options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for the program to exit
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Kill the program when the timeout expires
    #[arg(long)]
    kill_on_timeout: bool,

    /// Working directory of the program
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Extra environment variable, as KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    envs: Vec<(String, String)>,

    /// Line written to the program's stdin
    #[arg(short, long = "input")]
    inputs: Vec<String>,

    /// Send stderr into the stdout stream
    #[arg(long)]
    merge_stderr: bool,

    /// Character encoding of the program's streams
    #[arg(long, default_value = "utf-8")]
    encoding: String,

    /// Level for stdout lines
    #[arg(long, default_value = "info")]
    stdout_level: Level,

    /// Level for stderr lines
    #[arg(long, default_value = "debug")]
    stderr_level: Level,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Program to run, followed by its arguments
    #[arg(last = true, required = true)]
    argv: Vec<String>,
}

impl Cli {
    fn max_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    fn sync_options(&self) -> Result<SyncOptions> {
        let mut options = match &self.config {
            Some(path) => SyncOptions::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => SyncOptions::default(),
        };

        if let Some(secs) = self.timeout {
            let timeout = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid timeout: {secs}"))?;
            options = options.with_process_timeout(timeout);
        }
        if self.kill_on_timeout {
            options = options.with_kill_on_timeout(true);
        }
        Ok(options)
    }

    /// Charset for stdin and both output streams
    fn charset(&self) -> Result<Charset> {
        Charset::for_label(&self.encoding)
            .with_context(|| format!("Unsupported encoding: {}", self.encoding))
    }

    fn command(&self) -> Result<Command> {
        let mut cmd = Command::from_argv(&self.argv)?;
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)))
            .redirect_error_stream(self.merge_stderr);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, _)) if key.is_empty() => bail!("Empty variable name in '{s}'"),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => bail!("Expected KEY=VALUE, got '{s}'"),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let options = cli.sync_options()?;
    let charset = cli.charset()?;
    let command = cli.command()?;

    info!(command = %command, "Starting");
    let span = info_span!("process", program = %cli.argv[0]);
    let inputs = cli.inputs.clone();
    let process = command.spawn()?.sync_with(&options, |syncer| {
        syncer.with_logger_in(charset, span, cli.stdout_level, cli.stderr_level);
        if !inputs.is_empty() {
            syncer.with_inputs_in(charset, inputs);
        }
    })?;

    let Some(status) = process.exit_status() else {
        warn!(pid = process.pid(), "Process still running after timeout");
        return Ok(ExitCode::FAILURE);
    };
    info!(?status, "Process exited");

    let code = status.code.and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
    Ok(ExitCode::from(code))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(cli.max_level())
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
