//! Shared test utilities for the installer crate.

use crate::command::{CommandOutput, CommandRunner, RunOptions, check_exit, display_command};
use crate::error::{InstallerError, Result};
use crate::extension::Extension;
use crate::ini::has_directive;
use camino::{Utf8Path, Utf8PathBuf};
use std::cell::RefCell;
use std::collections::VecDeque;

/// Creates a successful `CommandOutput` with empty stdout and stderr.
#[must_use]
pub fn success_output() -> CommandOutput {
    output_with_code(0)
}

/// Creates a successful `CommandOutput` carrying `stdout`.
#[must_use]
pub fn output_with_stdout(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_owned(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

/// Creates a `CommandOutput` with the given exit code and no output.
#[must_use]
pub fn output_with_code(code: i32) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: String::new(),
        exit_code: Some(code),
    }
}

/// Creates a failed `CommandOutput` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_owned(),
        exit_code: Some(1),
    }
}

fn mismatch(message: String) -> InstallerError {
    InstallerError::StubMismatch { message }
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The program to execute (e.g., `/usr/bin/php8.3`).
    pub program: String,
    /// The arguments to pass to the program.
    pub args: Vec<String>,
    /// The result to return when this command is invoked.
    pub result: Result<CommandOutput>,
}

/// A stub implementation of `CommandRunner` for testing.
///
/// Replays expected invocations in order. Returned outputs go through the
/// same failure-tolerance check as real commands, so a failing output
/// becomes an error unless the caller asked for tolerance.
#[derive(Debug)]
pub struct StubRunner {
    expected: RefCell<VecDeque<ExpectedCall>>,
}

impl StubRunner {
    /// Creates a new `StubRunner` with the given expected calls.
    #[must_use]
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
        }
    }

    /// Builds an [`ExpectedCall`].
    #[must_use]
    pub fn expect(program: &str, args: &[&str], result: Result<CommandOutput>) -> ExpectedCall {
        ExpectedCall {
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            result,
        }
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        let remaining = self.expected.borrow();
        assert!(
            remaining.is_empty(),
            "expected no further command invocations, {} left: {:?}",
            remaining.len(),
            remaining.front().map(|call| &call.program)
        );
    }
}

impl CommandRunner for StubRunner {
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> Result<CommandOutput> {
        let call = self
            .expected
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| mismatch(format!("unexpected call {}", display_command(program, args))))?;

        if call.program != program || call.args != args {
            return Err(mismatch(format!(
                "expected {} {:?}, got {}",
                call.program,
                call.args,
                display_command(program, args)
            )));
        }

        check_exit(program, call.result?, options)
    }
}

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Program that was run.
    pub program: String,
    /// Arguments it was given.
    pub args: Vec<String>,
    /// Extra environment passed to it.
    pub env: Vec<(String, String)>,
    /// Working directory, if set.
    pub cwd: Option<Utf8PathBuf>,
}

impl RecordedCall {
    /// The command line as a single string.
    #[must_use]
    pub fn command_line(&self) -> String {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        display_command(&self.program, &args)
    }
}

/// A `CommandRunner` backed by a closure that records every call.
pub struct FnRunner<F>
where
    F: Fn(&str, &[&str]) -> Result<CommandOutput>,
{
    respond: F,
    calls: RefCell<Vec<RecordedCall>>,
}

impl<F> FnRunner<F>
where
    F: Fn(&str, &[&str]) -> Result<CommandOutput>,
{
    /// Wraps `respond`.
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Calls made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    /// Command lines of the calls made so far.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(RecordedCall::command_line).collect()
    }
}

impl<F> CommandRunner for FnRunner<F>
where
    F: Fn(&str, &[&str]) -> Result<CommandOutput>,
{
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(RecordedCall {
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            env: options.env.clone(),
            cwd: options.cwd.clone(),
        });
        check_exit(program, (self.respond)(program, args)?, options)
    }
}

/// What a simulated `pickle install` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchBehaviour {
    /// Writes the artefact into the extension directory.
    PlaceArtifact,
    /// Exits successfully but writes nothing.
    SucceedWithoutArtifact,
    /// Exits with status 1.
    Fail,
}

/// A simulated PHP runtime whose state lives on the real filesystem.
#[derive(Debug, Clone)]
pub struct FakeRuntime {
    /// Executable path the runtime answers to.
    pub binary: Utf8PathBuf,
    /// Reported `PHP Version`.
    pub version: String,
    /// Reported `Loaded Configuration File`.
    pub main_config: Option<Utf8PathBuf>,
    /// Reported scan directory; `Some("")` reports an empty value.
    pub scan_dir: Option<Utf8PathBuf>,
    /// Reported `extension_dir`, verbatim.
    pub extension_dir: String,
    /// Behaviour of `pickle install`.
    pub fetch: FetchBehaviour,
    /// Exit code of `php -i`.
    pub info_exit_code: i32,
    /// Modules listed regardless of ini state.
    pub builtin_modules: Vec<String>,
}

impl FakeRuntime {
    /// A runtime with a scan directory and an absolute extension directory.
    #[must_use]
    pub fn new(binary: Utf8PathBuf, scan_dir: Utf8PathBuf, extension_dir: Utf8PathBuf) -> Self {
        Self {
            binary,
            version: "8.3.6".to_owned(),
            main_config: None,
            scan_dir: Some(scan_dir),
            extension_dir: extension_dir.into_string(),
            fetch: FetchBehaviour::PlaceArtifact,
            info_exit_code: 0,
            builtin_modules: ["Core", "date", "json", "pcre", "Phar", "SimpleXML"]
                .iter()
                .map(|m| (*m).to_owned())
                .collect(),
        }
    }

    fn resolved_extension_dir(&self) -> Utf8PathBuf {
        let dir = Utf8Path::new(&self.extension_dir);
        let base = self.binary.parent().unwrap_or_else(|| Utf8Path::new("/"));
        if self.extension_dir.is_empty() {
            base.to_path_buf()
        } else if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            base.join(dir)
        }
    }

    fn ini_files(&self) -> Vec<Utf8PathBuf> {
        let mut files: Vec<Utf8PathBuf> = self.main_config.iter().cloned().collect();
        let entries = self
            .scan_dir
            .as_ref()
            .filter(|scan| !scan.as_str().is_empty())
            .and_then(|scan| scan.read_dir_utf8().ok());
        if let Some(entries) = entries {
            files.extend(
                entries
                    .filter_map(std::result::Result::ok)
                    .map(|entry| entry.into_path())
                    .filter(|path| path.extension() == Some("ini")),
            );
        }
        files
    }

    fn loads(&self, extension: &Extension) -> bool {
        let artefact = self.resolved_extension_dir().join(extension.artifact_filename());
        artefact.is_file()
            && self
                .ini_files()
                .iter()
                .any(|file| has_directive(file, extension))
    }

    fn info_dump(&self) -> String {
        let none = || "(none)".to_owned();
        let main = self.main_config.as_ref().map_or_else(none, ToString::to_string);
        let scan = self.scan_dir.as_ref().map_or_else(none, ToString::to_string);
        format!(
            "phpinfo()\n\
             PHP Version => {version}\n\
             Loaded Configuration File => {main}\n\
             Scan this dir for additional .ini files => {scan}\n\
             PHP API => 20230831\n\
             Debug Build => no\n\
             Thread Safety => disabled\n\
             extension_dir => {ext} => {ext}\n",
            version = self.version,
            ext = self.extension_dir,
        )
    }
}

/// A host with a set of simulated runtimes.
///
/// Answers `php -i`, `php -m` and `php <pickle> install <ext> -n` for each
/// runtime from what is on disk, so a run against it exercises the real
/// ini writing and verification code.
#[derive(Debug)]
pub struct FakeHost {
    runtimes: Vec<FakeRuntime>,
    extension: Extension,
    calls: RefCell<Vec<String>>,
}

impl FakeHost {
    /// Creates a host serving `runtimes`.
    #[must_use]
    pub fn new(runtimes: Vec<FakeRuntime>, extension: Extension) -> Self {
        Self {
            runtimes,
            extension,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Command lines run so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of fetches run against `binary`.
    #[must_use]
    pub fn fetch_count(&self, binary: &Utf8Path) -> usize {
        let prefix = format!("{binary} ");
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with(&prefix) && call.contains(" install "))
            .count()
    }

    fn respond(&self, runtime: &FakeRuntime, args: &[&str]) -> Result<CommandOutput> {
        match args {
            ["-d", "date.timezone=UTC", "-i"] | ["-i"] => Ok(CommandOutput {
                stdout: runtime.info_dump(),
                stderr: String::new(),
                exit_code: Some(runtime.info_exit_code),
            }),
            ["-m"] => {
                let mut modules = vec!["[PHP Modules]".to_owned()];
                modules.extend(runtime.builtin_modules.iter().cloned());
                if runtime.loads(&self.extension) {
                    modules.push(self.extension.name().to_owned());
                }
                modules.push(String::new());
                modules.push("[Zend Modules]".to_owned());
                Ok(output_with_stdout(&modules.join("\n")))
            }
            [_, "install", name, "-n"] if *name == self.extension.name() => match runtime.fetch {
                FetchBehaviour::PlaceArtifact => {
                    let dir = runtime.resolved_extension_dir();
                    std::fs::create_dir_all(&dir)?;
                    std::fs::write(dir.join(self.extension.artifact_filename()), b"\x7fELF")?;
                    Ok(success_output())
                }
                FetchBehaviour::SucceedWithoutArtifact => Ok(success_output()),
                FetchBehaviour::Fail => Ok(failure_output("ERROR: phpize failed")),
            },
            _ => Err(mismatch(format!(
                "unsupported runtime call {}",
                display_command(runtime.binary.as_str(), args)
            ))),
        }
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, program: &str, args: &[&str], options: &RunOptions) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(display_command(program, args));
        let runtime = self
            .runtimes
            .iter()
            .find(|runtime| runtime.binary.as_str() == program)
            .ok_or_else(|| mismatch(format!("no simulated runtime at {program}")))?;
        check_exit(program, self.respond(runtime, args)?, options)
    }
}
