//! Centralized command execution with a crash-or-continue policy.
//!
//! Every external program the pipeline needs (package manager, mount, bundler,
//! signer) goes through [`Runner::run`]. A command either crashes the build on
//! a non-zero exit (the default) or, with [`Cmd::allow_fail`], is logged and
//! the caller carries on.
//!
//! The [`Executor`] trait is the seam to the operating system, so pipelines can
//! be exercised without root by swapping in a recording executor.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{BuildError, EXIT_SPAWN};

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, or -1 if terminated by signal.
    pub code: i32,
    /// Captured stdout (empty unless capture was requested).
    pub stdout: String,
    /// Captured stderr (empty unless capture was requested).
    pub stderr: String,
}

impl CommandResult {
    /// The `(0, "", "")` result returned when nothing was executed.
    pub fn synthetic() -> Self {
        Self {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// A fully resolved command line as handed to an [`Executor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program followed by its arguments, elevation prefix included.
    pub argv: Vec<String>,
    pub dir: Option<PathBuf>,
    pub capture: bool,
}

impl Invocation {
    /// The program that will actually be spawned.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// True if any argv element equals `word`.
    pub fn has_arg(&self, word: &str) -> bool {
        self.argv.iter().any(|a| a == word)
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Runs invocations against the host.
pub trait Executor {
    fn execute(&self, invocation: &Invocation) -> std::result::Result<CommandResult, BuildError>;
}

/// Spawns real processes.
///
/// Output goes to the terminal unless capture is requested, so long package
/// installs show progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, invocation: &Invocation) -> std::result::Result<CommandResult, BuildError> {
        let program = invocation.program().to_string();
        let mut cmd = Command::new(&program);
        cmd.args(invocation.argv.iter().skip(1));

        if let Some(ref dir) = invocation.dir {
            cmd.current_dir(dir);
        }

        if invocation.capture {
            let output = cmd
                .output()
                .map_err(|source| BuildError::Spawn { program, source })?;
            Ok(CommandResult {
                code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            cmd.stdin(Stdio::inherit());
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
            let status = cmd
                .status()
                .map_err(|source| BuildError::Spawn { program, source })?;
            Ok(CommandResult {
                code: status.code().unwrap_or(-1),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Human readable description used in failure messages.
    description: Option<String>,
    elevated: bool,
    capture: bool,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            description: None,
            elevated: false,
            capture: false,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing the build.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set the description reported when the command fails.
    pub fn description(mut self, msg: impl AsRef<str>) -> Self {
        self.description = Some(msg.as_ref().to_string());
        self
    }

    /// Run through the privilege-escalation wrapper.
    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Capture stdout/stderr instead of streaming them.
    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Program and arguments, without any elevation prefix.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn describe(&self) -> String {
        match &self.description {
            Some(d) if !d.trim().is_empty() => d.clone(),
            _ => self.argv().join(" "),
        }
    }
}

/// Executes commands for the build pipeline.
///
/// Owns the dry-run switch and the elevation/jail wrappers, and is passed by
/// reference to every component that touches the host.
///
/// Once the interrupt flag is raised only `allow_fail` commands still run, so
/// an interrupted build unwinds through its cleanup and nothing else.
pub struct Runner {
    executor: Box<dyn Executor>,
    dry_run: bool,
    elevate: String,
    chroot: String,
    interrupted: Arc<AtomicBool>,
}

impl Runner {
    /// Runner that spawns real processes.
    pub fn new(config: &Config) -> Self {
        Self::with_executor(SystemExecutor, config)
    }

    /// Runner backed by a custom executor.
    pub fn with_executor(executor: impl Executor + 'static, config: &Config) -> Self {
        Self {
            executor: Box::new(executor),
            dry_run: config.dry_run,
            elevate: config.elevate.clone(),
            chroot: config.chroot.clone(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share `flag` with a signal handler that raises it.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// True once SIGINT or SIGTERM has been received.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// True when side effects are simulated.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a command.
    ///
    /// Returns `BuildError::CommandFailed` on a non-zero exit unless the
    /// command was built with `allow_fail`, in which case the failure is only
    /// logged. After an interrupt, commands without `allow_fail` are refused
    /// with `BuildError::Interrupted`.
    pub fn run(&self, cmd: Cmd) -> Result<CommandResult> {
        let description = cmd.describe();
        if self.is_interrupted() && !cmd.allow_fail {
            tracing::warn!("Interrupted, skipping: {}", description);
            return Err(BuildError::Interrupted { description }.into());
        }

        let mut argv = Vec::with_capacity(cmd.args.len() + 2);
        if cmd.elevated && !self.elevate.is_empty() {
            argv.push(self.elevate.clone());
        }
        argv.extend(cmd.argv());

        let invocation = Invocation {
            argv,
            dir: cmd.current_dir.clone(),
            capture: cmd.capture,
        };
        tracing::debug!("Command: {}", invocation.command_line());

        if self.dry_run {
            return Ok(CommandResult::synthetic());
        }

        let result = match self.executor.execute(&invocation) {
            Ok(result) => result,
            Err(BuildError::Spawn { program, source }) if cmd.allow_fail => {
                tracing::error!("{}: failed to execute '{}': {}", description, program, source);
                return Ok(CommandResult {
                    code: EXIT_SPAWN,
                    stdout: String::new(),
                    stderr: source.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        // A child stopped by the same signal reports the interrupt, not its code
        if self.is_interrupted() && !cmd.allow_fail {
            return Err(BuildError::Interrupted { description }.into());
        }

        if !result.success() {
            tracing::error!("{} failed with returncode {}", description, result.code);
            let stderr = result.stderr_trimmed();
            if !stderr.is_empty() {
                tracing::error!("{}", stderr);
            }
            if !cmd.allow_fail {
                return Err(BuildError::CommandFailed {
                    description,
                    code: result.code,
                }
                .into());
            }
        }

        Ok(result)
    }

    /// Run a command inside a jail rooted at `jail_root`.
    ///
    /// The command is wrapped with the configured chroot tool and always
    /// elevated.
    pub fn run_in_jail(&self, cmd: Cmd, jail_root: &Path) -> Result<CommandResult> {
        let mut jailed = Cmd::new(&self.chroot)
            .arg_path(jail_root)
            .args(cmd.argv())
            .elevated();
        jailed.description = cmd.description;
        jailed.allow_fail = cmd.allow_fail;
        jailed.capture = cmd.capture;
        self.run(jailed)
    }
}

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn config() -> Config {
        Config::default()
    }

    #[derive(Clone, Default)]
    struct Spy(Rc<RefCell<Vec<Invocation>>>);

    impl Executor for Spy {
        fn execute(&self, inv: &Invocation) -> std::result::Result<CommandResult, BuildError> {
            self.0.borrow_mut().push(inv.clone());
            Ok(CommandResult::synthetic())
        }
    }

    #[test]
    fn test_run_success() {
        let runner = Runner::new(&config());
        let result = runner.run(Cmd::new("echo").arg("hello").capture()).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_captures_stderr() {
        let runner = Runner::new(&config());
        let result = runner
            .run(
                Cmd::new("ls")
                    .arg("/nonexistent_path_12345")
                    .capture()
                    .allow_fail(),
            )
            .unwrap();

        assert!(!result.success());
        assert!(!result.stderr.is_empty());
    }

    #[test]
    fn test_crash_carries_exit_code() {
        let runner = Runner::new(&config());
        let err = runner
            .run(Cmd::new("sh").args(["-c", "exit 7"]).description("Custom build step"))
            .unwrap_err();

        let build_err = err.downcast_ref::<BuildError>().unwrap();
        assert_eq!(build_err.exit_code(), 7);
        assert!(err.to_string().contains("Custom build step"));
    }

    #[test]
    fn test_allow_fail() {
        let runner = Runner::new(&config());
        let result = runner.run(Cmd::new("false").allow_fail()).unwrap();

        assert!(!result.success());
        assert_eq!(result.code, 1);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let runner = Runner::new(&config());
        let err = runner.run(Cmd::new("nonexistent_program_12345")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Spawn { .. })
        ));

        let result = runner
            .run(Cmd::new("nonexistent_program_12345").allow_fail())
            .unwrap();
        assert_eq!(result.code, EXIT_SPAWN);
    }

    #[test]
    fn test_run_in_directory() {
        let runner = Runner::new(&config());
        let result = runner
            .run(Cmd::new("pwd").dir(Path::new("/tmp")).capture())
            .unwrap();
        assert!(result.stdout_trimmed().contains("tmp"));
    }

    #[test]
    fn test_dry_run_never_executes() {
        let spy = Spy::default();
        let mut config = config();
        config.dry_run = true;
        let runner = Runner::with_executor(spy.clone(), &config);

        let result = runner.run(Cmd::new("false").elevated()).unwrap();
        assert_eq!(result, CommandResult::synthetic());
        assert!(spy.0.borrow().is_empty());
    }

    #[test]
    fn test_elevation_prefix() {
        let spy = Spy::default();
        let runner = Runner::with_executor(spy.clone(), &config());

        runner.run(Cmd::new("mount").arg("-a").elevated()).unwrap();
        runner.run(Cmd::new("ls")).unwrap();

        let calls = spy.0.borrow();
        assert_eq!(calls[0].argv, vec!["sudo", "mount", "-a"]);
        assert_eq!(calls[1].argv, vec!["ls"]);
    }

    #[test]
    fn test_run_in_jail_wraps_and_elevates() {
        let spy = Spy::default();
        let runner = Runner::with_executor(spy.clone(), &config());

        runner
            .run_in_jail(Cmd::new("dracut").arg("--force"), Path::new("/build/bootroot"))
            .unwrap();

        let calls = spy.0.borrow();
        assert_eq!(
            calls[0].argv,
            vec!["sudo", "arch-chroot", "/build/bootroot", "dracut", "--force"]
        );
    }

    #[test]
    fn test_interrupt_only_lets_cleanup_run() {
        let spy = Spy::default();
        let flag = Arc::new(AtomicBool::new(false));
        let runner = Runner::with_executor(spy.clone(), &config()).with_interrupt(flag.clone());

        runner.run(Cmd::new("pacman").arg("-Syu")).unwrap();
        flag.store(true, Ordering::SeqCst);
        assert!(runner.is_interrupted());

        let err = runner
            .run(Cmd::new("pacman").arg("-Scc").description("Clearing cache"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Interrupted { .. })
        ));
        assert_eq!(crate::error::exit_code_of(&err), crate::error::EXIT_INTERRUPTED);

        runner
            .run(Cmd::new("umount").arg("/b/root/proc").allow_fail())
            .unwrap();

        let lines: Vec<String> = spy.0.borrow().iter().map(|c| c.command_line()).collect();
        assert_eq!(lines, vec!["pacman -Syu", "umount /b/root/proc"]);
    }

    #[test]
    fn test_which_exists() {
        // `sh` should exist on any Unix system
        assert!(which("sh").is_some());
        assert!(which("nonexistent_program_12345").is_none());
    }
}
