//! Extension artefact fetching.
//!
//! Building and placing the native artefact is delegated to PECL's
//! `pickle` tool, run by the target binary itself so the artefact lands in
//! that runtime's extension directory.

use crate::command::{CommandRunner, RunOptions, display_command};
use crate::error::Result;
use crate::extension::Extension;
use camino::{Utf8Path, Utf8PathBuf};
use std::time::Duration;

/// Compiling the extension with `phpize` and `make` is slow on small hosts.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Places an extension artefact where a runtime expects it.
#[cfg_attr(test, mockall::automock)]
pub trait PackageFetcher {
    /// Fetches and installs `extension` for `binary`.
    ///
    /// # Errors
    ///
    /// Returns an error if the artefact could not be built or placed.
    fn fetch(&self, extension: &Extension, binary: &Utf8Path) -> Result<()>;
}

/// Runs `<php> pickle.phar install <extension> -n`.
pub struct PickleFetcher<'a> {
    runner: &'a dyn CommandRunner,
    pickle: Utf8PathBuf,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl<'a> PickleFetcher<'a> {
    /// Creates a fetcher using the `pickle.phar` at `pickle`.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, pickle: Utf8PathBuf, timeout: Duration) -> Self {
        Self {
            runner,
            pickle,
            timeout,
            env: Vec::new(),
        }
    }

    /// Environment passed to every pickle invocation.
    #[must_use]
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Arguments passed to the PHP binary.
    #[must_use]
    pub fn args<'b>(&'b self, extension: &'b Extension) -> [&'b str; 4] {
        [self.pickle.as_str(), "install", extension.name(), "-n"]
    }
}

impl PackageFetcher for PickleFetcher<'_> {
    fn fetch(&self, extension: &Extension, binary: &Utf8Path) -> Result<()> {
        let args = self.args(extension);
        log::debug!("{}", display_command(binary.as_str(), &args));
        let options = RunOptions::strict(self.timeout).with_env(self.env.clone());
        self.runner.run(binary.as_str(), &args, &options)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstallerError;
    use crate::platform::Platform;
    use crate::test_utils::{FnRunner, failure_output, success_output};

    #[test]
    fn runs_pickle_through_target_binary() {
        let runner = FnRunner::new(|_, _| Ok(success_output()));
        let fetcher = PickleFetcher::new(
            &runner,
            Utf8PathBuf::from("/tmp/run/pickle.phar"),
            Duration::from_secs(60),
        )
        .with_env(vec![("COMPOSER_ALLOW_SUPERUSER".to_owned(), "1".to_owned())]);

        fetcher
            .fetch(
                &Extension::opentelemetry(Platform::Posix),
                Utf8Path::new("/usr/bin/php8.3"),
            )
            .expect("fetch succeeds");

        assert_eq!(
            runner.command_lines(),
            vec!["/usr/bin/php8.3 /tmp/run/pickle.phar install opentelemetry -n"]
        );
        let calls = runner.calls();
        assert_eq!(calls.first().map(|c| c.env.len()), Some(1));
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let runner = FnRunner::new(|_, _| Ok(failure_output("phpize: not found")));
        let fetcher = PickleFetcher::new(
            &runner,
            Utf8PathBuf::from("pickle.phar"),
            Duration::from_secs(60),
        );

        let err = fetcher
            .fetch(
                &Extension::opentelemetry(Platform::Posix),
                Utf8Path::new("/usr/bin/php"),
            )
            .expect_err("build failure");
        assert!(matches!(err, InstallerError::CommandFailed { .. }));
        assert!(err.to_string().contains("phpize: not found"));
    }
}
