//! Command type for building and starting processes

use async_process::{Command as AsyncCommand, Stdio};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::Process;
use crate::stream::StreamKind;

/// Where a standard stream of the child is connected
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Redirect {
    /// A pipe to this process, drained by a syncer or read by hand
    #[default]
    Pipe,
    /// Share the stream of the current process
    Inherit,
    /// Connect to the null device
    Discard,
    /// Write output to a file, truncating it first
    To(PathBuf),
    /// Append output to a file, creating it if needed
    AppendTo(PathBuf),
    /// Read input from a file
    From(PathBuf),
}

impl Redirect {
    fn describe(&self) -> String {
        match self {
            Redirect::Pipe => "pipe".to_string(),
            Redirect::Inherit => "inherit".to_string(),
            Redirect::Discard => "discard".to_string(),
            Redirect::To(path) => format!("to {}", path.display()),
            Redirect::AppendTo(path) => format!("append to {}", path.display()),
            Redirect::From(path) => format!("from {}", path.display()),
        }
    }

    fn to_stdio(&self, stream: StreamKind) -> Result<Stdio> {
        match (self, stream.is_output()) {
            (Redirect::Pipe, _) => Ok(Stdio::piped()),
            (Redirect::Inherit, _) => Ok(Stdio::inherit()),
            (Redirect::Discard, _) => Ok(Stdio::null()),
            (Redirect::To(_) | Redirect::AppendTo(_), true) => Ok(self.open_output()?.into()),
            (Redirect::From(path), false) => Ok(File::open(path)
                .map_err(|source| Error::RedirectFile {
                    path: path.clone(),
                    source,
                })?
                .into()),
            _ => Err(Error::InvalidRedirect {
                stream,
                redirect: self.describe(),
            }),
        }
    }

    fn open_output(&self) -> Result<File> {
        let (path, append) = match self {
            Redirect::To(path) => (path, false),
            Redirect::AppendTo(path) => (path, true),
            _ => {
                return Err(Error::InvalidRedirect {
                    stream: StreamKind::Stdout,
                    redirect: self.describe(),
                });
            }
        };
        OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|source| Error::RedirectFile {
                path: path.clone(),
                source,
            })
    }
}

/// A command to be executed
///
/// Every stream is piped unless redirected. Unlike `async_process::Command`,
/// this type is `Clone` and can be started multiple times.
#[derive(Debug, Clone)]
pub struct Command {
    /// The program to execute
    program: OsString,
    /// The arguments to pass to the program
    args: Vec<OsString>,
    /// Environment overrides, `None` removes the variable
    env: HashMap<OsString, Option<OsString>>,
    /// Working directory for the command
    current_dir: Option<PathBuf>,
    /// Whether to clear the environment before setting our vars
    env_clear: bool,
    stdin: Redirect,
    stdout: Redirect,
    stderr: Redirect,
    /// Send stderr wherever stdout goes
    merge_stderr: bool,
}

impl Command {
    /// Create a new command for the given program
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: None,
            env_clear: false,
            stdin: Redirect::Pipe,
            stdout: Redirect::Pipe,
            stderr: Redirect::Pipe,
            merge_stderr: false,
        }
    }

    /// Create a command from a full command line, program first
    pub fn from_argv<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut argv = argv.into_iter();
        let program = argv.next().ok_or(Error::EmptyCommand)?;
        if program.as_ref().is_empty() {
            return Err(Error::EmptyCommand);
        }
        let mut cmd = Self::new(program);
        cmd.args(argv);
        Ok(cmd)
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .insert(key.as_ref().to_owned(), Some(val.as_ref().to_owned()));
        self
    }

    /// Set multiple environment variables
    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, val) in vars {
            self.env(key, val);
        }
        self
    }

    /// Merge a map of variables into the child's environment, replacing existing keys
    pub fn add_more_environment<K, V>(&mut self, vars: &HashMap<K, V>) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs(vars.iter())
    }

    /// Remove a variable from the child's environment
    pub fn env_remove<K: AsRef<OsStr>>(&mut self, key: K) -> &mut Self {
        self.env.insert(key.as_ref().to_owned(), None);
        self
    }

    /// Clear all environment variables (except those explicitly set)
    pub fn env_clear(&mut self) -> &mut Self {
        self.env_clear = true;
        self.env.retain(|_, val| val.is_some());
        self
    }

    /// Set the working directory for the command
    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Connect the child's standard input
    pub fn redirect_input(&mut self, redirect: Redirect) -> &mut Self {
        self.stdin = redirect;
        self
    }

    /// Connect the child's standard output
    pub fn redirect_output(&mut self, redirect: Redirect) -> &mut Self {
        self.stdout = redirect;
        self
    }

    /// Connect the child's standard error
    ///
    /// Ignored while [`redirect_error_stream`](Self::redirect_error_stream) is on.
    pub fn redirect_error(&mut self, redirect: Redirect) -> &mut Self {
        self.stderr = redirect;
        self
    }

    /// Send standard error to the same place as standard output
    ///
    /// With a piped stdout the two streams arrive interleaved through the
    /// stdout handler. That case needs a Unix host.
    pub fn redirect_error_stream(&mut self, merge: bool) -> &mut Self {
        self.merge_stderr = merge;
        self
    }

    /// Get the program name
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// Get the arguments
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Get an environment override, `Some(None)` if the variable is removed
    pub fn get_env<K: AsRef<OsStr>>(&self, key: K) -> Option<Option<&OsStr>> {
        self.env.get(key.as_ref()).map(|val| val.as_deref())
    }

    /// Iterate over all environment overrides
    pub fn get_envs(&self) -> impl Iterator<Item = (&OsStr, Option<&OsStr>)> {
        self.env
            .iter()
            .map(|(key, val)| (key.as_os_str(), val.as_deref()))
    }

    /// Get the current directory
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// How standard input is connected
    pub fn get_redirect_input(&self) -> &Redirect {
        &self.stdin
    }

    /// How standard output is connected
    pub fn get_redirect_output(&self) -> &Redirect {
        &self.stdout
    }

    /// How standard error is connected
    pub fn get_redirect_error(&self) -> &Redirect {
        &self.stderr
    }

    /// Whether standard error is merged into standard output
    pub fn get_redirect_error_stream(&self) -> bool {
        self.merge_stderr
    }

    /// Prepare this command for execution by converting to an `async_process::Command`
    ///
    /// Only program, arguments, environment and working directory are applied;
    /// stream redirection happens in [`spawn`](Self::spawn).
    pub fn prepare(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);

        cmd.args(&self.args);

        if self.env_clear {
            cmd.env_clear();
        }
        for (key, val) in &self.env {
            match val {
                Some(val) => cmd.env(key, val),
                None => cmd.env_remove(key),
            };
        }

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        cmd
    }

    /// Start the process
    pub fn spawn(&self) -> Result<Process> {
        if self.program.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let mut cmd = self.prepare();
        cmd.stdin(self.stdin.to_stdio(StreamKind::Stdin)?);

        let merged = if self.merge_stderr {
            self.connect_merged_output(&mut cmd)?
        } else {
            cmd.stdout(self.stdout.to_stdio(StreamKind::Stdout)?);
            cmd.stderr(self.stderr.to_stdio(StreamKind::Stderr)?);
            None
        };

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CommandNotFound {
                    command: self.program.to_string_lossy().into_owned(),
                }
            } else {
                Error::spawn_failed(format!("{}: {}", self.program.to_string_lossy(), e))
            }
        })?;
        // The command still owns the parent's copies of any merged pipe; they
        // must be closed or the reader never sees end of file.
        drop(cmd);

        debug!(command = %self, pid = child.id(), "spawned process");
        Ok(Process::new(
            child,
            self.program.to_string_lossy().into_owned(),
            merged,
        ))
    }

    fn connect_merged_output(&self, cmd: &mut AsyncCommand) -> Result<Option<File>> {
        match &self.stdout {
            Redirect::Pipe => merged_pipe(cmd).map(Some),
            Redirect::Inherit => {
                cmd.stdout(Stdio::inherit());
                cmd.stderr(std::io::stdout());
                Ok(None)
            }
            Redirect::Discard => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
                Ok(None)
            }
            Redirect::To(_) | Redirect::AppendTo(_) => {
                let file = self.stdout.open_output()?;
                let dup = file.try_clone()?;
                cmd.stdout(file);
                cmd.stderr(dup);
                Ok(None)
            }
            Redirect::From(_) => Err(Error::InvalidRedirect {
                stream: StreamKind::Stdout,
                redirect: self.stdout.describe(),
            }),
        }
    }
}

#[cfg(unix)]
fn merged_pipe(cmd: &mut AsyncCommand) -> Result<File> {
    let (read, write) = nix::unistd::pipe()?;
    // try_clone dups with close-on-exec set, which the raw pipe lacks
    let reader = read.try_clone()?;
    let out = write.try_clone()?;
    let err = write.try_clone()?;
    drop((read, write));

    cmd.stdout(Stdio::from(out));
    cmd.stderr(Stdio::from(err));
    Ok(File::from(reader))
}

#[cfg(not(unix))]
fn merged_pipe(_cmd: &mut AsyncCommand) -> Result<File> {
    Err(Error::unsupported("merging stderr into a piped stdout"))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Builder pattern helper
impl Command {
    /// Create a builder for this command (for chaining)
    pub fn builder<S: AsRef<OsStr>>(program: S) -> CommandBuilder {
        CommandBuilder(Command::new(program))
    }
}

/// Builder wrapper for more ergonomic command construction
pub struct CommandBuilder(Command);

impl CommandBuilder {
    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.0.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.0.args(args);
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.0.env(key, val);
        self
    }

    /// Set the working directory
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.0.current_dir(dir);
        self
    }

    /// Connect standard input
    pub fn stdin(mut self, redirect: Redirect) -> Self {
        self.0.redirect_input(redirect);
        self
    }

    /// Connect standard output
    pub fn stdout(mut self, redirect: Redirect) -> Self {
        self.0.redirect_output(redirect);
        self
    }

    /// Connect standard error
    pub fn stderr(mut self, redirect: Redirect) -> Self {
        self.0.redirect_error(redirect);
        self
    }

    /// Merge standard error into standard output
    pub fn merge_stderr(mut self) -> Self {
        self.0.redirect_error_stream(true);
        self
    }

    /// Build the command
    pub fn build(self) -> Command {
        self.0
    }
}

/// Start a command line, customised by `configure`
///
/// The first element is the program. The returned process is already running.
///
/// ```no_run
/// use exec_util::run_cmd;
///
/// let process = run_cmd(["git", "status"], |cmd| {
///     cmd.current_dir("/tmp");
/// })?;
/// # Ok::<(), exec_util::Error>(())
/// ```
pub fn run_cmd<I, S, F>(command_line: I, configure: F) -> Result<Process>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
    F: FnOnce(&mut Command),
{
    let mut cmd = Command::from_argv(command_line)?;
    configure(&mut cmd);
    cmd.spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_creation() {
        let cmd = Command::new("echo");
        assert_eq!(cmd.get_program(), "echo");
        assert_eq!(cmd.get_args().len(), 0);
        assert_eq!(cmd.get_redirect_output(), &Redirect::Pipe);
        assert!(!cmd.get_redirect_error_stream());
    }

    #[test]
    fn test_command_with_args() {
        let mut cmd = Command::new("ls");
        cmd.arg("-la").arg("/tmp");

        assert_eq!(cmd.get_args().len(), 2);
        assert_eq!(cmd.get_args()[0], "-la");
        assert_eq!(cmd.get_args()[1], "/tmp");
    }

    #[test]
    fn test_from_argv() {
        let cmd = Command::from_argv(["java", "--version"]).unwrap();
        assert_eq!(cmd.get_program(), "java");
        assert_eq!(cmd.get_args(), &[OsString::from("--version")]);

        let empty: [&str; 0] = [];
        assert!(matches!(Command::from_argv(empty), Err(Error::EmptyCommand)));
        assert!(matches!(Command::from_argv([""]), Err(Error::EmptyCommand)));
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::builder("echo")
            .arg("hello")
            .arg("world")
            .env("TEST_VAR", "test_value")
            .current_dir("/tmp")
            .merge_stderr()
            .build();

        assert_eq!(cmd.get_program(), "echo");
        assert_eq!(cmd.get_args().len(), 2);
        assert_eq!(cmd.get_args()[0], "hello");
        assert_eq!(cmd.get_args()[1], "world");
        assert_eq!(
            cmd.get_env("TEST_VAR"),
            Some(Some(OsStr::new("test_value")))
        );
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp")));
        assert!(cmd.get_redirect_error_stream());
    }

    #[test]
    fn test_environment_overrides() {
        let mut extra = HashMap::new();
        extra.insert("A", "1");
        extra.insert("B", "2");

        let mut cmd = Command::new("env");
        cmd.env("A", "0").add_more_environment(&extra).env_remove("HOME");

        assert_eq!(cmd.get_env("A"), Some(Some(OsStr::new("1"))));
        assert_eq!(cmd.get_env("B"), Some(Some(OsStr::new("2"))));
        assert_eq!(cmd.get_env("HOME"), Some(None));
        assert_eq!(cmd.get_envs().count(), 3);

        cmd.env_clear();
        assert_eq!(cmd.get_env("HOME"), None);
        assert_eq!(cmd.get_envs().count(), 2);
    }

    #[test]
    fn test_invalid_redirects() {
        let out = Redirect::To(PathBuf::from("/tmp/out.log"));
        assert!(matches!(
            out.to_stdio(StreamKind::Stdin),
            Err(Error::InvalidRedirect {
                stream: StreamKind::Stdin,
                ..
            })
        ));

        let input = Redirect::From(PathBuf::from("/tmp/in.txt"));
        assert!(matches!(
            input.to_stdio(StreamKind::Stderr),
            Err(Error::InvalidRedirect { .. })
        ));
    }

    #[test]
    fn test_missing_input_file() {
        let input = Redirect::From(PathBuf::from("/definitely/not/here.txt"));
        assert!(matches!(
            input.to_stdio(StreamKind::Stdin),
            Err(Error::RedirectFile { .. })
        ));
    }

    #[test]
    fn test_display_quotes_spaces() {
        let cmd = Command::builder("sh").arg("-c").arg("echo hi").build();
        assert_eq!(cmd.to_string(), r#"sh -c "echo hi""#);
    }

    #[test]
    fn test_command_clone() {
        let cmd1 = Command::builder("test")
            .arg("arg1")
            .env("KEY", "VALUE")
            .build();

        let cmd2 = cmd1.clone();

        assert_eq!(cmd1.get_program(), cmd2.get_program());
        assert_eq!(cmd1.get_args(), cmd2.get_args());
        assert_eq!(cmd1.get_env("KEY"), cmd2.get_env("KEY"));
    }
}
