//! Build tooling preconditions.
//!
//! Before any binary is touched the installer needs `phpize` (to compile
//! the extension), `pickle.phar` (to fetch and build it) and, for the
//! framework step, Composer. Missing PHP modules the instrumentation
//! libraries rely on are reported as warnings.

use crate::command::CommandRunner;
use crate::context::RunContext;
use crate::error::{InstallerError, Result};
use crate::introspect::loaded_modules;
use crate::locator::ProvisioningSet;
use camino::{Utf8Path, Utf8PathBuf};
use std::ffi::OsString;
use std::sync::OnceLock;
use std::time::Duration;

/// Release asset of the PECL `pickle` installer.
pub const PICKLE_URL: &str =
    "https://github.com/FriendsOfPHP/pickle/releases/latest/download/pickle.phar";

/// Latest stable Composer PHAR.
pub const COMPOSER_URL: &str = "https://getcomposer.org/download/latest-stable/composer.phar";

/// Modules the OpenTelemetry SDK and its exporters expect to be loaded.
pub const REQUIRED_EXTENSIONS: &[&str] = &[
    "zlib",
    "mbstring",
    "simplexml",
    "json",
    "dom",
    "openssl",
    "Phar",
    "fileinfo",
    "pcre",
    "xmlwriter",
    "gd",
];

/// Attempts made by [`download_with_retries`].
pub const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Pause between download attempts.
pub const RETRY_PAUSE: Duration = Duration::from_secs(2);

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches a URL into a file.
#[cfg_attr(test, mockall::automock)]
pub trait Downloader {
    /// Downloads `url` to `dest`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or the write fails.
    fn download(&self, url: &str, dest: &Utf8Path) -> Result<()>;
}

/// `ureq`-backed downloader.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Utf8Path) -> Result<()> {
        let response = http_agent().get(url).call().map_err(|err| InstallerError::Download {
            url: url.to_owned(),
            attempts: 1,
            reason: err.to_string(),
        })?;
        let mut file = std::fs::File::create(dest)?;
        std::io::copy(&mut response.into_body().as_reader(), &mut file)?;
        Ok(())
    }
}

fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(DOWNLOAD_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Downloads `url` to `dest`, retrying after `pause` on failure.
///
/// # Errors
///
/// Returns [`InstallerError::Download`] once `attempts` have failed.
pub fn download_with_retries(
    ctx: &mut RunContext,
    downloader: &dyn Downloader,
    url: &str,
    dest: &Utf8Path,
    attempts: u32,
    pause: Duration,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match downloader.download(url, dest) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= attempts => {
                return Err(InstallerError::Download {
                    url: url.to_owned(),
                    attempts,
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                log::debug!("download of {url} failed: {err}");
                ctx.log.warn(format!("Download attempt {attempt} failed. Retrying..."));
                std::thread::sleep(pause);
            }
        }
    }
}

/// Marks `path` as executable (`0755`). A no-op on Windows.
///
/// # Errors
///
/// Returns the I/O error if the permissions cannot be changed.
pub fn make_executable(path: &Utf8Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Looks up tools on a `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    search_path: Option<OsString>,
}

impl ToolLocator {
    /// Searches `search_path` instead of the process `PATH`.
    #[must_use]
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    /// Full path of `name`, if found.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Utf8PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().ok()?;
                which::which_in(name, Some(paths), cwd)
            }
            None => which::which(name),
        };
        found.ok().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
    }

    /// Returns true if `name` is on the search path.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Fails unless `tool` is on the search path.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::ToolingMissing`] when it is not.
    pub fn require(&self, tool: &'static str) -> Result<Utf8PathBuf> {
        self.find(tool).ok_or(InstallerError::ToolingMissing { tool })
    }
}

/// How to invoke Composer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposerCommand {
    /// Program to run.
    pub program: String,
    /// Arguments placed before the Composer sub-command.
    pub leading_args: Vec<String>,
}

impl ComposerCommand {
    /// Runs a program directly.
    #[must_use]
    pub fn program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Runs a Composer PHAR through `php`.
    #[must_use]
    pub fn phar(phar: &Utf8Path) -> Self {
        Self {
            program: "php".to_owned(),
            leading_args: vec![phar.to_string()],
        }
    }

    /// Full argument list for `args`.
    #[must_use]
    pub fn args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        self.leading_args
            .iter()
            .map(String::as_str)
            .chain(args.iter().copied())
            .collect()
    }
}

/// Picks the Composer command: `COMPOSER_PATH` if set, then `composer` on
/// `PATH`, otherwise a freshly downloaded `composer.phar` in `workdir`.
///
/// # Errors
///
/// Returns an error if `composer.phar` has to be downloaded and the
/// download fails.
pub fn ensure_composer(
    ctx: &mut RunContext,
    tools: &ToolLocator,
    downloader: &dyn Downloader,
    workdir: &Utf8Path,
) -> Result<ComposerCommand> {
    if let Some(path) = std::env::var("COMPOSER_PATH").ok().filter(|p| !p.is_empty()) {
        return Ok(ComposerCommand::program(path));
    }
    if tools.exists("composer") {
        return Ok(ComposerCommand::program("composer"));
    }

    ctx.log.info("Composer not found. Downloading composer.phar...");
    let phar = workdir.join("composer.phar");
    download_with_retries(ctx, downloader, COMPOSER_URL, &phar, DOWNLOAD_ATTEMPTS, RETRY_PAUSE)?;
    make_executable(&phar)?;
    ctx.log.success("Composer downloaded successfully.");
    Ok(ComposerCommand::phar(&phar))
}

/// Warns about each required module missing from each binary.
pub fn check_required_extensions(
    ctx: &mut RunContext,
    runner: &dyn CommandRunner,
    set: &ProvisioningSet,
) {
    for binary in set.binaries() {
        let path = &binary.canonical_path;
        ctx.log.info(format!("Checking PHP extensions for {path}..."));
        let modules = match loaded_modules(runner, path, ctx.settings.command_timeout) {
            Ok(modules) => modules,
            Err(err) => {
                ctx.log.warn(format!("Could not list modules for {path}: {err}"));
                continue;
            }
        };

        let missing: Vec<&str> = REQUIRED_EXTENSIONS
            .iter()
            .copied()
            .filter(|name| !modules.contains(name))
            .collect();
        for name in &missing {
            ctx.log.warn(format!("{name}: Not installed in {path}"));
        }
        if missing.is_empty() {
            ctx.log.info(format!("All required extensions are installed for {path}"));
        } else {
            ctx.log.warn(
                "Please install the above mentioned extensions first. Continuing without them \
                 might lead to unexpected behavior and errors.",
            );
        }
    }
}

/// Requires `phpize` and downloads `pickle.phar` into `workdir`.
///
/// # Errors
///
/// Returns [`InstallerError::ToolingMissing`] without `phpize`, or
/// [`InstallerError::Download`] if `pickle.phar` cannot be fetched.
pub fn prepare_pickle(
    ctx: &mut RunContext,
    tools: &ToolLocator,
    downloader: &dyn Downloader,
    workdir: &Utf8Path,
) -> Result<Utf8PathBuf> {
    tools.require("phpize")?;

    let pickle = workdir.join("pickle.phar");
    download_with_retries(ctx, downloader, PICKLE_URL, &pickle, DOWNLOAD_ATTEMPTS, RETRY_PAUSE)?;
    make_executable(&pickle)?;
    log::debug!("pickle.phar ready at {pickle}");
    Ok(pickle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunSettings, Severity};
    use crate::locator::ResolvedBinary;
    use crate::test_utils::{FnRunner, output_with_stdout};
    use mockall::Sequence;
    use tempfile::TempDir;

    fn ctx() -> RunContext {
        RunContext::quiet(RunSettings::default())
    }

    fn temp() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, path)
    }

    fn transient() -> InstallerError {
        InstallerError::Download {
            url: PICKLE_URL.to_owned(),
            attempts: 1,
            reason: "connection reset".to_owned(),
        }
    }

    #[test]
    fn retries_until_success() {
        let (_guard, dir) = temp();
        let mut downloader = MockDownloader::new();
        let mut seq = Sequence::new();
        downloader
            .expect_download()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(transient()));
        downloader
            .expect_download()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let mut ctx = ctx();
        download_with_retries(
            &mut ctx,
            &downloader,
            PICKLE_URL,
            &dir.join("pickle.phar"),
            3,
            Duration::ZERO,
        )
        .expect("third attempt succeeds");

        assert!(ctx.log.contains(Severity::Warn, "Download attempt 2 failed"));
    }

    #[test]
    fn gives_up_after_last_attempt() {
        let (_guard, dir) = temp();
        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .times(3)
            .returning(|_, _| Err(transient()));

        let err = download_with_retries(
            &mut ctx(),
            &downloader,
            PICKLE_URL,
            &dir.join("pickle.phar"),
            3,
            Duration::ZERO,
        )
        .expect_err("all attempts fail");

        match err {
            InstallerError::Download { attempts, reason, .. } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_phpize_is_fatal_before_download() {
        let (_guard, dir) = temp();
        let tools = ToolLocator::with_search_path(dir.as_str());
        let mut downloader = MockDownloader::new();
        downloader.expect_download().times(0);

        let err = prepare_pickle(&mut ctx(), &tools, &downloader, &dir).expect_err("no phpize");
        assert!(matches!(err, InstallerError::ToolingMissing { tool: "phpize" }));
    }

    #[cfg(unix)]
    #[test]
    fn pickle_is_downloaded_and_made_executable() {
        use std::os::unix::fs::PermissionsExt;

        let (_guard, dir) = temp();
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).expect("bin dir");
        std::fs::write(bin.join("phpize"), "#!/bin/sh\n").expect("phpize");
        make_executable(&bin.join("phpize")).expect("chmod phpize");
        let tools = ToolLocator::with_search_path(bin.as_str());

        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .withf(|url, _| url == PICKLE_URL)
            .times(1)
            .returning(|_, dest| {
                std::fs::write(dest, b"<?php").map_err(InstallerError::from)
            });

        let pickle = prepare_pickle(&mut ctx(), &tools, &downloader, &dir).expect("prepared");

        assert_eq!(pickle, dir.join("pickle.phar"));
        let mode = std::fs::metadata(&pickle).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn composer_path_variable_wins() {
        let (_guard, dir) = temp();
        let downloader = MockDownloader::new();
        let command = temp_env::with_var("COMPOSER_PATH", Some("/opt/composer/bin/composer"), || {
            ensure_composer(
                &mut ctx(),
                &ToolLocator::with_search_path(dir.as_str()),
                &downloader,
                &dir,
            )
        })
        .expect("composer resolved");

        assert_eq!(command, ComposerCommand::program("/opt/composer/bin/composer"));
    }

    #[test]
    fn composer_phar_is_downloaded_when_missing() {
        let (_guard, dir) = temp();
        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .withf(|url, _| url == COMPOSER_URL)
            .times(1)
            .returning(|_, dest| std::fs::write(dest, b"<?php").map_err(InstallerError::from));

        let mut ctx = ctx();
        let command = temp_env::with_var_unset("COMPOSER_PATH", || {
            ensure_composer(
                &mut ctx,
                &ToolLocator::with_search_path(dir.as_str()),
                &downloader,
                &dir,
            )
        })
        .expect("composer resolved");

        assert_eq!(command.program, "php");
        assert_eq!(command.args(&["install"]), vec![dir.join("composer.phar").as_str(), "install"]);
        assert!(ctx.log.contains(Severity::Success, "Composer downloaded"));
    }

    #[test]
    fn missing_required_modules_are_warnings() {
        let runner = FnRunner::new(|_, _| {
            Ok(output_with_stdout(
                "[PHP Modules]\nCore\nzlib\nmbstring\nSimpleXML\njson\ndom\nopenssl\nPhar\nfileinfo\npcre\n",
            ))
        });
        let set = ProvisioningSet::from_discovered(vec![ResolvedBinary {
            alias: "php".to_owned(),
            canonical_path: Utf8PathBuf::from("/usr/bin/php8.3"),
            has_shebang: false,
        }])
        .expect("set");

        let mut ctx = ctx();
        check_required_extensions(&mut ctx, &runner, &set);

        assert!(ctx.log.contains(Severity::Warn, "xmlwriter: Not installed"));
        assert!(ctx.log.contains(Severity::Warn, "gd: Not installed"));
        assert!(!ctx.log.contains(Severity::Warn, "simplexml"));
        assert_eq!(runner.command_lines(), vec!["/usr/bin/php8.3 -m"]);
    }
}
