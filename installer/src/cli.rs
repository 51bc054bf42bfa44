//! CLI argument definitions for the PHP APM installer.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use crate::command::DEFAULT_COMMAND_TIMEOUT;
use crate::telemetry::AGENT_CONFIG_PATH;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Install the OpenTelemetry PHP extension and Middleware APM.
#[derive(Parser, Debug)]
#[command(name = "php-apm-installer")]
#[command(version, about)]
#[command(long_about = concat!(
    "Install the OpenTelemetry PHP extension and Middleware APM.\n\n",
    "The installer discovers every PHP runtime on the host, builds the ",
    "opentelemetry extension for each one with pickle, enables it in each ",
    "runtime's configuration (including the Apache and FPM siblings of a CLI ",
    "scan directory) and verifies that it loads. Runtimes that already load ",
    "the extension are left untouched.\n\n",
    "When run from a Laravel or WordPress project root, the framework's ",
    "instrumentation packages are installed with composer as well.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Install from a Laravel project root:\n",
    "    $ cd /var/www/shop && sudo php-apm-installer install\n\n",
    "  Only provision the extension:\n",
    "    $ sudo php-apm-installer install --skip-dependencies\n\n",
    "  Also write the directive into a custom scan directory:\n",
    "    $ sudo php-apm-installer install --extra-dir /opt/php/conf.d\n\n",
    "  Remove the extension again:\n",
    "    $ sudo php-apm-installer uninstall\n",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Install the extension and framework instrumentation.
    Install(InstallArgs),

    /// Remove the extension from every discovered runtime.
    Uninstall(UninstallArgs),
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Additional directory that receives the extension's ini file (repeatable).
    #[arg(long = "extra-dir", value_name = "DIR")]
    pub extra_dirs: Vec<Utf8PathBuf>,

    /// Sweep the standard binary directories under this root instead of `/`.
    #[arg(long, value_name = "DIR")]
    pub search_prefix: Option<Utf8PathBuf>,

    /// Disable coloured output.
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for the install command.
#[derive(Args, Debug, Clone)]
pub struct InstallArgs {
    /// Shared options.
    #[command(flatten)]
    pub common: CommonArgs,

    /// Project root used for framework detection [default: current directory].
    #[arg(long, value_name = "DIR")]
    pub project_dir: Option<Utf8PathBuf>,

    /// Skip installing framework packages with composer.
    #[arg(long)]
    pub skip_dependencies: bool,

    /// Skip the phpize check, extension warnings and pickle download.
    ///
    /// `pickle.phar` is then expected in the current directory.
    #[arg(long)]
    pub skip_tooling: bool,

    /// Do not report installation progress to the Middleware backend.
    #[arg(long)]
    pub no_telemetry: bool,

    /// Agent configuration holding the API key and target.
    #[arg(long, value_name = "PATH", default_value = AGENT_CONFIG_PATH)]
    pub agent_config: Utf8PathBuf,

    /// Seconds to wait for each PHP runtime invocation.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_COMMAND_TIMEOUT.as_secs())]
    pub command_timeout: u64,
}

/// Arguments for the uninstall command.
#[derive(Args, Debug, Clone, Default)]
pub struct UninstallArgs {
    /// Shared options.
    #[command(flatten)]
    pub common: CommonArgs,
}

impl Default for InstallArgs {
    /// Creates an `InstallArgs` instance matching a bare `install`.
    ///
    /// # Examples
    ///
    /// ```
    /// use php_apm_installer::cli::InstallArgs;
    ///
    /// let args = InstallArgs::default();
    /// assert!(!args.skip_dependencies);
    /// assert!(args.common.extra_dirs.is_empty());
    /// assert_eq!(args.command_timeout, 120);
    /// ```
    fn default() -> Self {
        Self {
            common: CommonArgs::default(),
            project_dir: None,
            skip_dependencies: false,
            skip_tooling: false,
            no_telemetry: false,
            agent_config: Utf8PathBuf::from(AGENT_CONFIG_PATH),
            command_timeout: DEFAULT_COMMAND_TIMEOUT.as_secs(),
        }
    }
}

impl Cli {
    /// Options shared by whichever subcommand was given.
    #[must_use]
    pub fn common(&self) -> &CommonArgs {
        match &self.command {
            Command::Install(args) => &args.common,
            Command::Uninstall(args) => &args.common,
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
