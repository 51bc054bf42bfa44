//! Error types for the PHP APM installer.
//!
//! Two error channels are kept apart. [`InstallerError`] covers fatal and
//! precondition failures that abort the whole run before (or instead of)
//! any further mutation. [`ProvisioningError`] covers failures scoped to a
//! single PHP binary; these are recorded in that binary's result and never
//! stop the remaining binaries from being processed.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that abort an installer run.
#[derive(Debug, Error)]
pub enum InstallerError {
    /// Discovery found no PHP binary that can receive the extension.
    #[error("no usable PHP binaries were found; install PHP or add it to PATH")]
    NoBinariesFound,

    /// A tool required for building the extension is not installed.
    #[error("{tool} is not installed; install the PHP development package (php-dev)")]
    ToolingMissing {
        /// Name of the missing tool.
        tool: &'static str,
    },

    /// The runtime reports neither a scan directory nor a loaded ini file.
    #[error(
        "cannot install into {binary}: there is no scan directory and no configuration file loaded"
    )]
    NoConfigurationTarget {
        /// Binary whose configuration could not be located.
        binary: Utf8PathBuf,
    },

    /// A directory that had to be copied or moved does not exist.
    #[error("source directory does not exist: {path}")]
    SourceDirectoryMissing {
        /// The missing directory.
        path: Utf8PathBuf,
    },

    /// A file could not be downloaded after all retry attempts.
    #[error("failed to download {url} after {attempts} attempts: {reason}")]
    Download {
        /// URL that was requested.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Description of the last failure.
        reason: String,
    },

    /// Framework dependency installation failed.
    #[error("failed to install dependencies with {tool}: {message}")]
    DependencyInstall {
        /// The dependency manager that failed.
        tool: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The framework configuration step could not complete.
    #[error("framework configuration failed: {reason}")]
    FrameworkConfiguration {
        /// Description of the failure.
        reason: String,
    },

    /// The agent configuration is not valid YAML.
    #[error("invalid agent configuration: {0}")]
    AgentConfig(#[from] serde_yaml::Error),

    /// A tracking event could not be delivered.
    #[error("tracking request failed: {reason}")]
    Telemetry {
        /// Description of the failure.
        reason: String,
    },

    /// An external command could not be spawned.
    #[error("failed to run {program}: {source}")]
    CommandSpawn {
        /// Program that failed to start.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An external command exited with a non-zero status.
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        /// Program that failed.
        program: String,
        /// Exit status description.
        status: String,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// An external command did not complete within its timeout.
    #[error("{program} timed out after {seconds} seconds")]
    CommandTimedOut {
        /// Program that timed out.
        program: String,
        /// Timeout that elapsed.
        seconds: u64,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to write output.
    #[error("failed to write output")]
    WriteFailed {
        /// The underlying error that caused the write to fail.
        #[source]
        source: std::io::Error,
    },

    /// Test stub received an unexpected or mismatched command invocation.
    #[cfg(any(test, feature = "test-support"))]
    #[error("stub mismatch: {message}")]
    StubMismatch {
        /// Description of what was expected versus what was received.
        message: String,
    },
}

impl InstallerError {
    /// Returns true when the error came from a command that exceeded its timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CommandTimedOut { .. })
    }
}

/// Result type alias using [`InstallerError`].
pub type Result<T> = std::result::Result<T, InstallerError>;

/// Errors scoped to a single PHP binary.
///
/// These are recorded in the binary's provisioning result. The run carries
/// on with the next binary and reports "completed with some errors" at the
/// end.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The runtime could not be invoked to read its properties.
    #[error("could not introspect runtime: {0}")]
    Introspection(#[source] InstallerError),

    /// The package fetcher failed to place the extension artefact.
    #[error("extension fetch failed: {0}")]
    Fetch(#[source] InstallerError),

    /// Writing or rewriting an ini file failed.
    #[error("failed to update ini file {path}: {source}")]
    IniWrite {
        /// The ini file that could not be written.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The post-install verification did not pass.
    #[error("verification failed: {reason}")]
    Verification {
        /// Which check failed.
        reason: String,
    },

    /// The extension artefact could not be deleted during uninstall.
    #[error("failed to remove extension artefact {path}: {source}")]
    ArtifactRemoval {
        /// Path of the artefact.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
