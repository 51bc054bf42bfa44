//! PHP APM installer CLI entrypoint.
//!
//! This binary provisions the OpenTelemetry extension into every PHP runtime
//! on the host and installs the framework instrumentation for the project it
//! is run from.

mod install_flow;

use clap::Parser;
use install_flow::{RunOutcome, Services, run_install, run_uninstall};
use php_apm_installer::cli::{Cli, Command};
use php_apm_installer::command::SystemCommandRunner;
use php_apm_installer::context::{RunContext, RunLog, RunSettings};
use php_apm_installer::error::Result;
use php_apm_installer::extension::Extension;
use php_apm_installer::locator::LocatorConfig;
use php_apm_installer::platform::Platform;
use php_apm_installer::project::WordPressPaths;
use php_apm_installer::telemetry::HttpSink;
use php_apm_installer::tooling::{HttpDownloader, ToolLocator};
use std::io::{IsTerminal, Write};
use std::time::Duration;

fn main() {
    let cli = Cli::parse();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run(cli: &Cli) -> Result<RunOutcome> {
    let stdout = std::io::stdout();
    let color = !cli.common().no_color && stdout.is_terminal();
    let mut ctx = RunContext::new(settings_for(cli), RunLog::new(Box::new(stdout), color));

    let runner = SystemCommandRunner;
    let services = Services {
        runner: &runner,
        downloader: &HttpDownloader,
        sink: &HttpSink,
        tools: ToolLocator::default(),
        locator: LocatorConfig::for_host().with_prefix(cli.common().search_prefix.clone()),
        wordpress: WordPressPaths::host(),
    };

    match &cli.command {
        Command::Install(args) => run_install(&mut ctx, &services, args),
        Command::Uninstall(_) => run_uninstall(&mut ctx, &services),
    }
}

fn settings_for(cli: &Cli) -> RunSettings {
    let platform = Platform::current();
    let common = cli.common();
    let mut settings = RunSettings {
        extension: Extension::opentelemetry(platform),
        platform,
        extra_dirs: common.extra_dirs.clone(),
        search_prefix: common.search_prefix.clone(),
        ..RunSettings::default()
    };
    if let Command::Install(args) = &cli.command {
        settings.command_timeout = Duration::from_secs(args.command_timeout);
    }
    settings
}

fn exit_code_for_run_result(result: Result<RunOutcome>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            1
        }
    }
}

fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort logging; ignore write failures.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use php_apm_installer::error::InstallerError;
    use rstest::rstest;

    #[rstest]
    #[case::success(RunOutcome::Success, 0)]
    #[case::partial(RunOutcome::CompletedWithErrors, 2)]
    fn exit_code_reflects_outcome(#[case] outcome: RunOutcome, #[case] expected: i32) {
        let mut stderr = Vec::new();
        assert_eq!(exit_code_for_run_result(Ok(outcome), &mut stderr), expected);
        assert!(stderr.is_empty());
    }

    #[test]
    fn exit_code_for_run_result_prints_error_and_returns_one() {
        let mut stderr = Vec::new();
        let exit_code =
            exit_code_for_run_result(Err(InstallerError::NoBinariesFound), &mut stderr);
        assert_eq!(exit_code, 1);

        let stderr_text = String::from_utf8(stderr).expect("stderr was not UTF-8");
        assert!(stderr_text.contains("no usable PHP binaries were found"));
    }

    #[test]
    fn settings_follow_install_flags() {
        let cli = Cli::parse_from([
            "php-apm-installer",
            "install",
            "--command-timeout",
            "30",
            "--extra-dir",
            "/opt/php/conf.d",
        ]);
        let settings = settings_for(&cli);
        assert_eq!(settings.command_timeout, Duration::from_secs(30));
        assert_eq!(settings.extra_dirs.len(), 1);
        assert_eq!(settings.extension.name(), "opentelemetry");
    }

    #[test]
    fn uninstall_keeps_default_timeout() {
        let cli = Cli::parse_from(["php-apm-installer", "uninstall"]);
        assert_eq!(
            settings_for(&cli).command_timeout,
            php_apm_installer::command::DEFAULT_COMMAND_TIMEOUT
        );
    }
}
