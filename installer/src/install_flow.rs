//! Install and uninstall flows for the installer binary.
//!
//! This module sequences the library components into the two user-facing
//! runs and keeps telemetry bookkeeping out of `main.rs`.

use camino::{Utf8Path, Utf8PathBuf};
use php_apm_installer::cli::InstallArgs;
use php_apm_installer::command::CommandRunner;
use php_apm_installer::context::RunContext;
use php_apm_installer::engine::{Engine, RunSummary, describe};
use php_apm_installer::environment::{EnvTarget, OtelEnvironment};
use php_apm_installer::error::{InstallerError, Result};
use php_apm_installer::fetch::{BUILD_TIMEOUT, PickleFetcher};
use php_apm_installer::introspect::{RuntimeProperties, introspect};
use php_apm_installer::locator::{LocatorConfig, ProvisioningSet, discover};
use php_apm_installer::project::{
    Composer, ProjectType, WordPressPaths, WordPressSetup, detect_project, framework_version,
    install_laravel, install_wordpress,
};
use php_apm_installer::telemetry::{
    HostFacts, RunDetails, TelemetrySink, Tracker, TrackingStatus, load_agent_config,
};
use php_apm_installer::tooling::{
    Downloader, ToolLocator, check_required_extensions, ensure_composer, prepare_pickle,
};

/// How a run that did not abort ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// Every binary was provisioned (or cleaned) and verified.
    Success,
    /// At least one binary failed; the others were processed.
    CompletedWithErrors,
}

impl RunOutcome {
    fn from_summary(summary: &RunSummary) -> Self {
        if summary.all_verified() {
            Self::Success
        } else {
            Self::CompletedWithErrors
        }
    }

    /// Process exit code for the outcome.
    pub(crate) const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::CompletedWithErrors => 2,
        }
    }
}

/// Host-facing collaborators of a run.
pub(crate) struct Services<'a> {
    /// Runs PHP, composer and Apache commands.
    pub(crate) runner: &'a dyn CommandRunner,
    /// Fetches `pickle.phar` and `composer.phar`.
    pub(crate) downloader: &'a dyn Downloader,
    /// Delivers tracking events.
    pub(crate) sink: &'a dyn TelemetrySink,
    /// Finds `phpize` and `composer`.
    pub(crate) tools: ToolLocator,
    /// Where binaries are searched for.
    pub(crate) locator: LocatorConfig,
    /// Host locations used by the WordPress setup.
    pub(crate) wordpress: WordPressPaths,
}

struct Telemetry<'a> {
    tracker: Option<Tracker<'a>>,
    details: RunDetails,
}

impl Telemetry<'_> {
    fn track(&self, ctx: &mut RunContext, status: TrackingStatus) {
        if let Some(tracker) = &self.tracker {
            tracker.track(ctx, status, &self.details);
        }
    }
}

/// Runs `install`, reporting progress to telemetry.
///
/// A fatal error is logged, reported as `apm_failed` and returned.
pub(crate) fn run_install(
    ctx: &mut RunContext,
    services: &Services<'_>,
    args: &InstallArgs,
) -> Result<RunOutcome> {
    let tracker = (!args.no_telemetry).then(|| {
        let config = load_agent_config(ctx, &args.agent_config);
        Tracker::new(services.sink, config, HostFacts::gather())
    });
    let mut telemetry = Telemetry {
        tracker,
        details: RunDetails {
            service_name: OtelEnvironment::from_process(EnvTarget::Composer)
                .service_name()
                .to_owned(),
            ..RunDetails::default()
        },
    };

    match install_steps(ctx, services, args, &mut telemetry) {
        Ok(outcome) => {
            let status = match outcome {
                RunOutcome::Success => TrackingStatus::Installed,
                RunOutcome::CompletedWithErrors => TrackingStatus::Failed,
            };
            telemetry.track(ctx, status);
            Ok(outcome)
        }
        Err(err) => {
            ctx.log.error(err.to_string());
            telemetry.track(ctx, TrackingStatus::Failed);
            Err(err)
        }
    }
}

fn install_steps(
    ctx: &mut RunContext,
    services: &Services<'_>,
    args: &InstallArgs,
    telemetry: &mut Telemetry<'_>,
) -> Result<RunOutcome> {
    let project_dir = resolve_project_dir(args.project_dir.as_deref())?;
    let project = detect_and_report_project(ctx, &project_dir);
    telemetry.details.project = project;
    if let Some(kind) = project {
        telemetry.details.framework_version = framework_version(kind, &project_dir);
    }
    telemetry.track(ctx, TrackingStatus::Tried);

    let set = discover_binaries(ctx, &services.locator)?;
    let primary = primary_properties(ctx, services.runner, &set);
    if let Some(version) = primary.as_ref().and_then(RuntimeProperties::version) {
        version.clone_into(&mut telemetry.details.php_version);
    }

    // Keeps downloaded tools alive until the run ends.
    let workdir = tempfile::TempDir::new()?;
    let workdir_path = Utf8PathBuf::try_from(workdir.path().to_path_buf())
        .map_err(|err| InstallerError::Io(err.into_io_error()))?;

    let pickle = if args.skip_tooling {
        Utf8PathBuf::from("pickle.phar")
    } else {
        check_required_extensions(ctx, services.runner, &set);
        prepare_pickle(ctx, &services.tools, services.downloader, &workdir_path)?
    };

    let composer_env = OtelEnvironment::from_process(EnvTarget::Composer);
    let fetcher = PickleFetcher::new(services.runner, pickle, BUILD_TIMEOUT)
        .with_env(composer_env.vars().to_vec());
    let summary = Engine::new(services.runner, &fetcher).install(ctx, &set)?;

    if let Some(kind) = project.filter(|_| !args.skip_dependencies) {
        let command = ensure_composer(ctx, &services.tools, services.downloader, &workdir_path)?;
        let composer = Composer::new(services.runner, command, project_dir.clone())
            .with_env(composer_env.vars().to_vec());
        match kind {
            ProjectType::Laravel => install_laravel(ctx, &composer)?,
            ProjectType::WordPress => {
                let properties = primary.unwrap_or_default();
                let setup = WordPressSetup {
                    runner: services.runner,
                    paths: &services.wordpress,
                    properties: &properties,
                    timeout: ctx.settings.command_timeout,
                };
                install_wordpress(ctx, &composer, &setup)?;
            }
        }
    }

    let outcome = RunOutcome::from_summary(&summary);
    report_summary(ctx, &summary, project, outcome);
    Ok(outcome)
}

fn resolve_project_dir(requested: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    if let Some(dir) = requested {
        return Ok(dir.to_owned());
    }
    Utf8PathBuf::try_from(std::env::current_dir()?)
        .map_err(|err| InstallerError::Io(err.into_io_error()))
}

fn detect_and_report_project(ctx: &mut RunContext, project_dir: &Utf8Path) -> Option<ProjectType> {
    let project = detect_project(project_dir);
    match project {
        Some(kind) => ctx.log.success(format!("Detected project type: {kind}")),
        None => ctx.log.warn(format!(
            "Unable to detect project type in {project_dir}. Run the installer from a Laravel \
             or WordPress project root to install the framework packages."
        )),
    }
    project
}

fn discover_binaries(ctx: &mut RunContext, locator: &LocatorConfig) -> Result<ProvisioningSet> {
    let discovered = discover(locator);
    for binary in discovered.iter().filter(|binary| binary.has_shebang) {
        ctx.log.warn(format!(
            "Skipping {}: it is a script wrapper, not a PHP binary",
            describe(binary)
        ));
    }
    let set = ProvisioningSet::from_discovered(discovered)?;
    for binary in set.binaries() {
        ctx.log.info(format!("Found PHP binary: {}", describe(binary)));
    }
    Ok(set)
}

fn primary_properties(
    ctx: &RunContext,
    runner: &dyn CommandRunner,
    set: &ProvisioningSet,
) -> Option<RuntimeProperties> {
    let binary = set.binaries().first()?;
    introspect(
        runner,
        &binary.canonical_path,
        ctx.settings.platform,
        ctx.settings.command_timeout,
    )
    .inspect_err(|err| log::debug!("could not introspect {}: {err}", binary.canonical_path))
    .ok()
}

fn report_summary(
    ctx: &mut RunContext,
    summary: &RunSummary,
    project: Option<ProjectType>,
    outcome: RunOutcome,
) {
    match outcome {
        RunOutcome::Success => {
            let scope = project.map_or_else(|| "PHP".to_owned(), |kind| kind.to_string());
            ctx.log.success(format!(
                "Middleware APM has been successfully installed for {scope}"
            ));
        }
        RunOutcome::CompletedWithErrors => {
            for failure in summary.failures() {
                if let Some(err) = &failure.error {
                    ctx.log.error(format!("{}: {err}", describe(&failure.binary)));
                }
            }
            ctx.log.warn("Installation completed with some errors");
        }
    }
}

/// Runs `uninstall` over every discovered binary.
pub(crate) fn run_uninstall(ctx: &mut RunContext, services: &Services<'_>) -> Result<RunOutcome> {
    let set = discover_binaries(ctx, &services.locator)?;
    // Uninstall never fetches; the fetcher only satisfies the engine.
    let fetcher = PickleFetcher::new(
        services.runner,
        Utf8PathBuf::from("pickle.phar"),
        BUILD_TIMEOUT,
    );
    let summary = Engine::new(services.runner, &fetcher).uninstall(ctx, &set);

    let outcome = RunOutcome::from_summary(&summary);
    match outcome {
        RunOutcome::Success => ctx.log.success(format!(
            "{} extension uninstalled ({} file(s) changed)",
            ctx.settings.extension.name(),
            summary.mutation_count()
        )),
        RunOutcome::CompletedWithErrors => ctx.log.warn("Uninstall completed with some errors"),
    }
    Ok(outcome)
}

#[cfg(all(test, unix))]
#[path = "install_flow_tests.rs"]
mod tests;
