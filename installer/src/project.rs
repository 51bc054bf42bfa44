//! Framework detection and dependency installation.
//!
//! The extension alone only loads the OpenTelemetry runtime hooks. Laravel
//! and WordPress applications additionally need the SDK, an exporter and a
//! framework instrumentation package, installed with composer into the
//! application (Laravel) or into a shared directory that Apache prepends to
//! every request (WordPress).

use crate::command::{CommandRunner, RunOptions, display_command};
use crate::context::RunContext;
use crate::environment::{EnvTarget, OtelEnvironment, append_apache_envvars, restart_apache};
use crate::error::{InstallerError, Result};
use crate::ini::OTEL_AUTOLOAD_PATH;
use crate::introspect::RuntimeProperties;
use crate::tooling::ComposerCommand;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use walkdir::WalkDir;

/// Packages every supported framework receives.
pub const COMMON_PACKAGES: &[&str] = &[
    "open-telemetry/sdk:^1.0",
    "open-telemetry/exporter-otlp:^1.0",
    "php-http/guzzle7-adapter:^1.0",
];

/// Laravel instrumentation packages.
pub const LARAVEL_PACKAGES: &[&str] = &[
    "guzzlehttp/guzzle",
    "open-telemetry/api:^1.1",
    "middleware-labs/contrib-auto-laravel",
    "open-telemetry/extension-propagator-b3:^1.1",
    "Middleware/laravel-apm",
];

/// WordPress instrumentation packages.
pub const WORDPRESS_PACKAGES: &[&str] = &["open-telemetry/opentelemetry-auto-wordpress:^0.0.15"];

/// Composer installs can take a while on a cold cache.
pub const COMPOSER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Name of the ini file that prepends the WordPress autoloader.
pub const WORDPRESS_INI: &str = "mw.wordpress.ini";

/// A supported application framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    /// A Laravel application.
    Laravel,
    /// A WordPress site.
    WordPress,
}

impl ProjectType {
    /// Lowercase identifier used in telemetry.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Laravel => "laravel",
            Self::WordPress => "wordpress",
        }
    }

    /// Common packages followed by the framework's own.
    #[must_use]
    pub fn packages(self) -> Vec<&'static str> {
        let specific = match self {
            Self::Laravel => LARAVEL_PACKAGES,
            Self::WordPress => WORDPRESS_PACKAGES,
        };
        COMMON_PACKAGES.iter().chain(specific).copied().collect()
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

fn laravel_constraint(dir: &Utf8Path) -> Option<String> {
    if !dir.join("artisan").exists() {
        return None;
    }
    let manifest = std::fs::read_to_string(dir.join("composer.json")).ok()?;
    let json: serde_json::Value = serde_json::from_str(&manifest).ok()?;
    json.get("require")?
        .get("laravel/framework")?
        .as_str()
        .map(str::to_owned)
}

/// Detects which framework lives in `dir`.
///
/// Laravel needs both `artisan` and a `composer.json` requiring
/// `laravel/framework`. WordPress needs `wp-config.php` or
/// `wp-settings.php`.
#[must_use]
pub fn detect_project(dir: &Utf8Path) -> Option<ProjectType> {
    if laravel_constraint(dir).is_some() {
        return Some(ProjectType::Laravel);
    }
    if dir.join("wp-config.php").exists() || dir.join("wp-settings.php").exists() {
        return Some(ProjectType::WordPress);
    }
    None
}

/// The framework version recorded in the project, or an empty string.
///
/// For Laravel this is the `laravel/framework` constraint from
/// `composer.json`; for WordPress the `$wp_version` assignment in
/// `wp-includes/version.php`.
#[must_use]
pub fn framework_version(project: ProjectType, dir: &Utf8Path) -> String {
    let found = match project {
        ProjectType::Laravel => laravel_constraint(dir),
        ProjectType::WordPress => std::fs::read_to_string(dir.join("wp-includes/version.php"))
            .ok()
            .and_then(|source| wordpress_version(&source)),
    };
    found.unwrap_or_default()
}

fn wordpress_version(source: &str) -> Option<String> {
    source.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("$wp_version")?;
        let value = rest.trim_start().strip_prefix('=')?.trim_start();
        let value = value.strip_prefix('\'')?;
        let end = value.find('\'')?;
        value.get(..end).map(str::to_owned)
    })
}

/// Runs composer inside a project directory.
pub struct Composer<'a> {
    runner: &'a dyn CommandRunner,
    command: ComposerCommand,
    project_dir: Utf8PathBuf,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl<'a> Composer<'a> {
    /// Creates a composer driver for `project_dir`.
    ///
    /// The OTEL defaults and `COMPOSER_ALLOW_SUPERUSER` are resolved from the
    /// process environment and passed to every invocation.
    #[must_use]
    pub fn new(
        runner: &'a dyn CommandRunner,
        command: ComposerCommand,
        project_dir: Utf8PathBuf,
    ) -> Self {
        Self {
            runner,
            command,
            project_dir,
            env: OtelEnvironment::from_process(EnvTarget::Composer).vars().to_vec(),
            timeout: COMPOSER_TIMEOUT,
        }
    }

    /// Replaces the environment passed to composer.
    #[must_use]
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Overrides [`COMPOSER_TIMEOUT`].
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory composer runs in.
    #[must_use]
    pub fn project_dir(&self) -> &Utf8Path {
        &self.project_dir
    }

    /// Runs one composer subcommand.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::DependencyInstall`] when composer cannot
    /// start, times out or exits non-zero.
    pub fn run(&self, ctx: &mut RunContext, args: &[&str]) -> Result<()> {
        let full = self.command.args(args);
        let line = display_command(&self.command.program, &full);
        ctx.log.info(format!("Executing command: {line}"));

        let options = RunOptions::strict(self.timeout)
            .with_env(self.env.clone())
            .with_cwd(self.project_dir.clone());
        self.runner
            .run(&self.command.program, &full, &options)
            .map_err(|err| InstallerError::DependencyInstall {
                tool: "composer",
                message: err.to_string(),
            })?;
        Ok(())
    }
}

/// Installs the Laravel instrumentation packages into the application.
///
/// # Errors
///
/// Returns [`InstallerError::DependencyInstall`] if any composer step fails.
pub fn install_laravel(ctx: &mut RunContext, composer: &Composer<'_>) -> Result<()> {
    composer.run(
        ctx,
        &[
            "config",
            "--no-plugins",
            "allow-plugins.php-http/discovery",
            "false",
            "--no-interaction",
        ],
    )?;
    composer.run(ctx, &["config", "minimum-stability", "dev", "--no-interaction"])?;

    let mut require = vec!["require"];
    require.extend(ProjectType::Laravel.packages());
    require.extend(["--with-all-dependencies", "--no-interaction"]);
    composer.run(ctx, &require)
}

/// Host locations touched by the WordPress setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordPressPaths {
    /// Filesystem root the Apache configuration candidates live under.
    pub root: Utf8PathBuf,
    /// Where the composer `vendor/` tree is moved to.
    pub otel_dir: Utf8PathBuf,
    /// Apache's environment file.
    pub envvars: Utf8PathBuf,
}

impl WordPressPaths {
    /// The real host locations.
    #[must_use]
    pub fn host() -> Self {
        Self::under(Utf8Path::new("/"))
    }

    /// The host layout rebased under `root`.
    #[must_use]
    pub fn under(root: &Utf8Path) -> Self {
        Self {
            root: root.to_owned(),
            otel_dir: rebase(root, "/var/www/otel"),
            envvars: rebase(root, crate::environment::APACHE_ENVVARS),
        }
    }
}

fn rebase(root: &Utf8Path, absolute: &str) -> Utf8PathBuf {
    root.join(absolute.trim_start_matches('/'))
}

fn apache_config_candidates(version: Option<&str>) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(v) = version {
        candidates.push(format!("/etc/php/{v}/apache2/conf.d"));
        candidates.push(format!("/etc/php/{v}/apache/conf.d"));
    }
    candidates.push("/etc/php/apache2/conf.d".to_owned());
    candidates.push("/etc/php/apache/conf.d".to_owned());
    candidates.push("/etc/php.d".to_owned());
    if let Some(v) = version {
        candidates.push(format!("/etc/php/{v}/conf.d"));
        candidates.push(format!("/usr/local/etc/php/{v}/conf.d"));
    }
    candidates.push("/etc/apache2/other/php.conf".to_owned());
    candidates.push("/usr/local/etc/httpd/extra".to_owned());
    candidates
}

/// `major.minor` of the runtime's reported version.
#[must_use]
pub fn minor_version(properties: &RuntimeProperties) -> Option<String> {
    let mut parts = properties.version()?.split('.');
    let major = parts.next()?;
    let minor = parts.next()?;
    Some(format!("{major}.{minor}"))
}

/// Finds the directory Apache's PHP reads extra ini files from.
///
/// Well-known distribution layouts under `root` are tried first. Failing
/// those, the runtime's own scan directory is used when it looks like an
/// Apache or `conf.d` directory.
#[must_use]
pub fn find_apache_config_dir(
    root: &Utf8Path,
    properties: &RuntimeProperties,
) -> Option<Utf8PathBuf> {
    let version = minor_version(properties);
    let found = apache_config_candidates(version.as_deref())
        .into_iter()
        .map(|candidate| rebase(root, &candidate))
        .find(|path| path.is_dir());
    if found.is_some() {
        return found;
    }

    properties
        .scan_directory()
        .filter(|dir| {
            let text = dir.as_str();
            text.contains("apache") || text.contains("conf.d")
        })
        .map(Utf8Path::to_owned)
}

/// Whether [`copy_or_move_directory`] keeps the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Leave the source in place.
    Copy,
    /// Remove the source once everything has been transferred.
    Move,
}

/// Copies or moves the tree at `source` into `destination`.
///
/// Existing files at the destination are overwritten. Symbolic links are
/// recreated as links rather than followed. Moves fall back to
/// copy-and-delete when a rename crosses filesystems.
///
/// # Errors
///
/// Returns [`InstallerError::SourceDirectoryMissing`] when `source` is not
/// a directory, or an I/O error if any entry cannot be transferred.
pub fn copy_or_move_directory(
    source: &Utf8Path,
    destination: &Utf8Path,
    mode: TransferMode,
) -> Result<()> {
    if !source.is_dir() {
        return Err(InstallerError::SourceDirectoryMissing {
            path: source.to_owned(),
        });
    }
    std::fs::create_dir_all(destination)?;

    let entries = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(std::io::Error::from)?;

    for entry in entries {
        let file_type = entry.file_type();
        let path = Utf8PathBuf::try_from(entry.into_path()).map_err(|err| err.into_io_error())?;
        let relative = path
            .strip_prefix(source)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        let target = destination.join(relative);

        if file_type.is_symlink() {
            recreate_symlink(&path, &target)?;
            continue;
        }
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        match mode {
            TransferMode::Copy => {
                std::fs::copy(&path, &target)?;
            }
            TransferMode::Move => {
                if std::fs::rename(&path, &target).is_err() {
                    std::fs::copy(&path, &target)?;
                    std::fs::remove_file(&path)?;
                }
            }
        }
    }

    if mode == TransferMode::Move {
        std::fs::remove_dir_all(source)?;
    }
    Ok(())
}

/// Recreates the link at `link` as `target`, pointing where it pointed.
///
/// The link itself is copied, not the tree behind it; the source link goes
/// with the rest of the source on a move.
fn recreate_symlink(link: &Utf8Path, target: &Utf8Path) -> std::io::Result<()> {
    let points_to = std::fs::read_link(link)?;
    if target.symlink_metadata().is_ok() {
        std::fs::remove_file(target)?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(points_to, target)
    }
    #[cfg(windows)]
    {
        if link.is_dir() {
            std::os::windows::fs::symlink_dir(points_to, target)
        } else {
            std::os::windows::fs::symlink_file(points_to, target)
        }
    }
}

/// Writes the ini file that prepends the shared autoloader.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn write_prepend_ini(config_dir: &Utf8Path) -> Result<Utf8PathBuf> {
    let path = config_dir.join(WORDPRESS_INI);
    std::fs::write(&path, format!("auto_prepend_file={OTEL_AUTOLOAD_PATH}\n"))?;
    Ok(path)
}

/// Everything the WordPress setup needs beyond composer.
pub struct WordPressSetup<'a> {
    /// Runs the Apache restart.
    pub runner: &'a dyn CommandRunner,
    /// Host locations.
    pub paths: &'a WordPressPaths,
    /// Properties of the runtime Apache is assumed to use.
    pub properties: &'a RuntimeProperties,
    /// Timeout for the Apache restart.
    pub timeout: Duration,
}

/// Installs the WordPress instrumentation and wires it into Apache.
///
/// Composer runs in the site directory; the resulting `vendor/` tree is
/// moved to the shared autoload location, an ini file prepending it is
/// written into Apache's PHP configuration directory, OTEL exports are
/// appended to Apache's `envvars`, and Apache is restarted.
///
/// # Errors
///
/// Returns [`InstallerError::DependencyInstall`] if composer fails,
/// [`InstallerError::FrameworkConfiguration`] when no Apache configuration
/// directory can be found, and [`InstallerError::SourceDirectoryMissing`]
/// or an I/O error if the files cannot be placed.
pub fn install_wordpress(
    ctx: &mut RunContext,
    composer: &Composer<'_>,
    setup: &WordPressSetup<'_>,
) -> Result<()> {
    composer.run(
        ctx,
        &[
            "init",
            "--name",
            "middleware-labs/wp-auto-instrumentation",
            "--no-interaction",
        ],
    )?;
    let mut require = vec!["require"];
    require.extend(ProjectType::WordPress.packages());
    require.push("--no-interaction");
    composer.run(ctx, &require)?;

    let config_dir = find_apache_config_dir(&setup.paths.root, setup.properties).ok_or_else(
        || InstallerError::FrameworkConfiguration {
            reason: "could not determine the PHP Apache configuration directory".to_owned(),
        },
    )?;

    copy_or_move_directory(
        &composer.project_dir().join("vendor"),
        &setup.paths.otel_dir,
        TransferMode::Move,
    )?;

    ctx.log
        .info(format!("PHP Apache configuration directory: {config_dir}"));
    let ini = write_prepend_ini(&config_dir)?;
    log::debug!("wrote {ini}");

    append_apache_envvars(
        &setup.paths.envvars,
        &OtelEnvironment::from_process(EnvTarget::Apache),
    )?;
    restart_apache(ctx, setup.runner, setup.timeout);
    Ok(())
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
