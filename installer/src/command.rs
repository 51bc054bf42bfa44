//! External command execution.
//!
//! Every subprocess the installer starts goes through [`CommandRunner`], so
//! timeouts and failure tolerance are decided per call site in one place and
//! tests can substitute a scripted runner.

use crate::error::{InstallerError, Result};
use camino::Utf8PathBuf;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Default timeout applied to runtime invocations.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit code, or `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Returns true if the command exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Returns trimmed stderr, or a placeholder when it is empty.
    #[must_use]
    pub fn stderr_message(&self) -> String {
        let trimmed = self.stderr.trim();
        if trimmed.is_empty() {
            "unknown error".to_owned()
        } else {
            trimmed.to_owned()
        }
    }

    fn status_description(&self) -> String {
        self.exit_code.map_or_else(
            || "termination by signal".to_owned(),
            |code| format!("exit code {code}"),
        )
    }
}

/// Per-invocation execution options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Kill the process and fail once this much time has elapsed.
    pub timeout: Option<Duration>,
    /// Return non-zero exits as output rather than as an error.
    pub tolerate_failure: bool,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Working directory for the child.
    pub cwd: Option<Utf8PathBuf>,
}

impl RunOptions {
    /// Options with a timeout that treat non-zero exits as errors.
    #[must_use]
    pub fn strict(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Options with a timeout that hand non-zero exits back to the caller.
    #[must_use]
    pub fn tolerant(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            tolerate_failure: true,
            ..Self::default()
        }
    }

    /// Adds environment overrides for the child.
    #[must_use]
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Sets the child's working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: Utf8PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

/// Abstraction for running external commands.
pub trait CommandRunner {
    /// Runs `program` with `args` and returns its captured output.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::CommandSpawn`] if the process cannot start,
    /// [`InstallerError::CommandTimedOut`] if it exceeds `options.timeout`,
    /// and [`InstallerError::CommandFailed`] for a non-zero exit unless
    /// `options.tolerate_failure` is set.
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> Result<CommandOutput>;
}

/// Executes commands on the host system.
///
/// # Examples
///
/// ```no_run
/// use php_apm_installer::command::{CommandRunner, RunOptions, SystemCommandRunner};
/// use std::time::Duration;
///
/// let runner = SystemCommandRunner;
/// let output = runner.run("php", &["-m"], &RunOptions::strict(Duration::from_secs(30)))?;
/// assert!(output.success());
/// # Ok::<(), php_apm_installer::error::InstallerError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> Result<CommandOutput> {
        log::debug!("running {program} {}", args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &options.cwd {
            cmd.current_dir(dir.as_std_path());
        }

        let mut child = cmd.spawn().map_err(|source| InstallerError::CommandSpawn {
            program: program.to_owned(),
            source,
        })?;

        // Drain both pipes while waiting so verbose output cannot fill the
        // pipe buffer and stall the child.
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let status = wait_for(&mut child, program, options.timeout)?;

        let output = CommandOutput {
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
            exit_code: status.code(),
        };

        check_exit(program, output, options)
    }
}

fn wait_for(child: &mut Child, program: &str, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(limit) = timeout else {
        return Ok(child.wait()?);
    };

    match child.wait_timeout(limit)? {
        Some(status) => Ok(status),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(InstallerError::CommandTimedOut {
                program: program.to_owned(),
                seconds: limit.as_secs(),
            })
        }
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut source| {
        std::thread::spawn(move || {
            let mut buffer = Vec::new();
            if source.read_to_end(&mut buffer).is_err() {
                // Partial output is still useful for diagnostics.
            }
            buffer
        })
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Applies the failure-tolerance policy to a finished command.
///
/// # Errors
///
/// Returns [`InstallerError::CommandFailed`] when the command exited
/// unsuccessfully and failures are not tolerated.
pub fn check_exit(
    program: &str,
    output: CommandOutput,
    options: &RunOptions,
) -> Result<CommandOutput> {
    if output.success() || options.tolerate_failure {
        return Ok(output);
    }

    Err(InstallerError::CommandFailed {
        program: program.to_owned(),
        status: output.status_description(),
        stderr: output.stderr_message(),
    })
}

/// Renders a command line for logging.
#[must_use]
pub fn display_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_owned()
    } else {
        format!("{program} {}", args.join(" "))
    }
}
