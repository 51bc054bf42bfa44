//! Per-binary install and uninstall orchestration.
//!
//! Installation runs in two phases. Planning probes every binary, reads its
//! properties and resolves its ini targets without touching the filesystem,
//! so a fatal precondition (no place to write a directive) aborts the run
//! before anything is mutated. Applying then fetches, writes and verifies
//! each binary in discovery order. A failure in one binary is recorded in its
//! [`ProvisioningResult`] and the next binary is processed regardless.

use crate::command::CommandRunner;
use crate::context::RunContext;
use crate::error::{InstallerError, ProvisioningError, Result};
use crate::fetch::PackageFetcher;
use crate::ini::{AppendOutcome, Removal, append_directive, remove_directives, uninstall_candidates};
use crate::introspect::{artifact_path, introspect, loaded_modules};
use crate::locator::{ProvisioningSet, ResolvedBinary};
use crate::targets::{ConfigTarget, Fallback, ResolveOptions, resolve};
use crate::verify::verify;
use camino::Utf8PathBuf;

/// Where a binary ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryState {
    /// Not probed yet.
    Unchecked,
    /// The extension was already loaded; nothing was changed.
    AlreadyPresent,
    /// Probed and planned for installation.
    NeedsInstall,
    /// Artefact fetched and ini files written, not yet verified.
    Mutated,
    /// Install verified, or uninstall completed cleanly.
    Verified,
    /// A step failed; see [`ProvisioningResult::error`].
    Failed,
}

/// Outcome for one binary.
#[derive(Debug)]
pub struct ProvisioningResult {
    /// The binary this result describes.
    pub binary: ResolvedBinary,
    /// Final state.
    pub state: BinaryState,
    /// True when the extension was loaded before the run touched anything.
    pub already_installed: bool,
    /// Ini files resolved for the binary.
    pub target: ConfigTarget,
    /// Files actually written, rewritten or deleted.
    pub mutations_applied: Vec<Utf8PathBuf>,
    /// True once verification passed (install) or removal was clean
    /// (uninstall). Also true for [`BinaryState::AlreadyPresent`].
    pub verified: bool,
    /// Why the binary failed, when it did.
    pub error: Option<ProvisioningError>,
}

impl ProvisioningResult {
    fn new(binary: ResolvedBinary) -> Self {
        Self {
            binary,
            state: BinaryState::Unchecked,
            already_installed: false,
            target: ConfigTarget::default(),
            mutations_applied: Vec::new(),
            verified: false,
            error: None,
        }
    }

    fn fail(&mut self, error: ProvisioningError) {
        self.state = BinaryState::Failed;
        self.verified = false;
        self.error = Some(error);
    }

    fn succeed(&mut self) {
        self.state = BinaryState::Verified;
        self.verified = true;
    }
}

/// Aggregated results of one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    results: Vec<ProvisioningResult>,
}

impl RunSummary {
    /// Results in processing order.
    #[must_use]
    pub fn results(&self) -> &[ProvisioningResult] {
        &self.results
    }

    /// True when every binary verified (or was already provisioned).
    #[must_use]
    pub fn all_verified(&self) -> bool {
        self.results.iter().all(|result| result.verified)
    }

    /// Results that failed.
    pub fn failures(&self) -> impl Iterator<Item = &ProvisioningResult> {
        self.results.iter().filter(|result| !result.verified)
    }

    /// Total number of files written, rewritten or deleted.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.results
            .iter()
            .map(|result| result.mutations_applied.len())
            .sum()
    }
}

/// Human-readable label for a binary: the alias with its canonical path,
/// or just the path when both are the same.
#[must_use]
pub fn describe(binary: &ResolvedBinary) -> String {
    if binary.alias == binary.canonical_path.as_str() {
        binary.canonical_path.to_string()
    } else {
        format!("{} ({})", binary.alias, binary.canonical_path)
    }
}

/// Drives install and uninstall over a [`ProvisioningSet`].
pub struct Engine<'a> {
    runner: &'a dyn CommandRunner,
    fetcher: &'a dyn PackageFetcher,
}

impl<'a> Engine<'a> {
    /// Creates an engine that runs binaries through `runner` and places
    /// artefacts with `fetcher`.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, fetcher: &'a dyn PackageFetcher) -> Self {
        Self { runner, fetcher }
    }

    /// Installs the extension into every binary of `set`.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::NoConfigurationTarget`] when some binary has
    /// neither a scan directory nor a main ini file. This is detected before
    /// any binary is modified.
    pub fn install(&self, ctx: &mut RunContext, set: &ProvisioningSet) -> Result<RunSummary> {
        let mut plans = Vec::with_capacity(set.len());
        for binary in set.binaries() {
            plans.push(self.plan_install(ctx, binary)?);
        }

        let mut summary = RunSummary::default();
        for plan in plans {
            summary.results.push(self.apply_install(ctx, plan));
        }
        Ok(summary)
    }

    fn plan_install(
        &self,
        ctx: &mut RunContext,
        binary: &ResolvedBinary,
    ) -> Result<ProvisioningResult> {
        let mut result = ProvisioningResult::new(binary.clone());
        let settings = &ctx.settings;
        let path = &binary.canonical_path;

        match loaded_modules(self.runner, path, settings.command_timeout) {
            Ok(modules) if modules.contains(settings.extension.name()) => {
                ctx.log.info(format!(
                    "{} extension already installed for {}",
                    settings.extension.name(),
                    describe(binary)
                ));
                result.state = BinaryState::AlreadyPresent;
                result.already_installed = true;
                result.verified = true;
                return Ok(result);
            }
            Ok(_) => {}
            Err(err) => log::debug!("module probe for {path} failed: {err}"),
        }

        let properties =
            match introspect(self.runner, path, settings.platform, settings.command_timeout) {
                Ok(properties) => properties,
                Err(err) => {
                    let message = format!("Could not introspect {}: {err}", describe(binary));
                    result.fail(ProvisioningError::Introspection(err));
                    ctx.log.error(message);
                    return Ok(result);
                }
            };

        let options = ResolveOptions {
            extension: &settings.extension,
            extra_dirs: &settings.extra_dirs,
            platform: settings.platform,
        };
        result.target = resolve(&properties, path, options)?;
        warn_about_fallback(ctx, &result.target);
        result.state = BinaryState::NeedsInstall;
        Ok(result)
    }

    fn apply_install(
        &self,
        ctx: &mut RunContext,
        mut result: ProvisioningResult,
    ) -> ProvisioningResult {
        if result.state != BinaryState::NeedsInstall {
            return result;
        }
        let binary = result.binary.clone();
        let extension = ctx.settings.extension.clone();
        let label = describe(&binary);

        ctx.log.info(format!(
            "Installing {} extension to binary: {label}",
            extension.name()
        ));

        if let Err(err) = self.fetcher.fetch(&extension, &binary.canonical_path) {
            ctx.log.error(format!("Fetching {} for {label} failed: {err}", extension.name()));
            result.fail(ProvisioningError::Fetch(err));
            return result;
        }

        for path in result.target.paths().to_vec() {
            match append_directive(&path, &extension) {
                Ok(AppendOutcome::Appended) => {
                    ctx.log.info(format!("Added {} to {path}", extension.directive()));
                    result.mutations_applied.push(path);
                }
                Ok(AppendOutcome::AlreadyPresent) => {
                    log::debug!("{path} already loads {}", extension.name());
                }
                Err(source) => {
                    ctx.log.error(format!("Failed to write to ini file {path}: {source}"));
                    result.fail(ProvisioningError::IniWrite { path, source });
                    return result;
                }
            }
        }
        result.state = BinaryState::Mutated;

        match verify(
            self.runner,
            &binary.canonical_path,
            &extension,
            ctx.settings.platform,
            ctx.settings.command_timeout,
        ) {
            Ok(()) => {
                ctx.log.success(format!(
                    "{} extension installation to '{label}' was successful",
                    extension.name()
                ));
                result.succeed();
            }
            Err(err) => {
                ctx.log.error(format!("{label}: {err}"));
                result.fail(err);
            }
        }
        result
    }

    /// Removes the extension from every binary of `set`.
    ///
    /// Dedicated ini files are deleted, shared ones have the managed lines
    /// commented out, and the artefact is deleted when present. Failures
    /// are recorded per binary.
    pub fn uninstall(&self, ctx: &mut RunContext, set: &ProvisioningSet) -> RunSummary {
        let mut summary = RunSummary::default();
        for binary in set.binaries() {
            summary.results.push(self.uninstall_one(ctx, binary));
        }
        summary
    }

    fn uninstall_one(&self, ctx: &mut RunContext, binary: &ResolvedBinary) -> ProvisioningResult {
        let mut result = ProvisioningResult::new(binary.clone());
        let extension = ctx.settings.extension.clone();
        let path = &binary.canonical_path;
        let label = describe(binary);

        let properties =
            match introspect(self.runner, path, ctx.settings.platform, ctx.settings.command_timeout) {
                Ok(properties) => properties,
                Err(err) => {
                    ctx.log.error(format!("Could not introspect {label}: {err}"));
                    result.fail(ProvisioningError::Introspection(err));
                    return result;
                }
            };

        let options = ResolveOptions {
            extension: &extension,
            extra_dirs: &ctx.settings.extra_dirs,
            platform: ctx.settings.platform,
        };
        result.target = match resolve(&properties, path, options) {
            Ok(target) => target,
            Err(InstallerError::NoConfigurationTarget { .. }) => ConfigTarget::default(),
            Err(err) => {
                result.fail(ProvisioningError::Introspection(err));
                return result;
            }
        };

        ctx.log.info(format!("Removing {} extension from binary: {label}", extension.name()));

        for file in uninstall_candidates(&result.target, &properties, &extension) {
            match remove_directives(&file, &extension) {
                Ok(Removal::Deleted) => {
                    ctx.log.info(format!("Deleted {file}"));
                    result.mutations_applied.push(file);
                }
                Ok(Removal::Commented(lines)) => {
                    ctx.log.info(format!("Commented out {lines} line(s) in {file}"));
                    result.mutations_applied.push(file);
                }
                Ok(Removal::Untouched) => {}
                Err(source) => {
                    ctx.log.error(format!("Failed to update ini file {file}: {source}"));
                    if result.error.is_none() {
                        result.fail(ProvisioningError::IniWrite { path: file, source });
                    }
                }
            }
        }

        let artefact = artifact_path(&properties, path, &extension.artifact_filename());
        if artefact.is_file() {
            match std::fs::remove_file(&artefact) {
                Ok(()) => {
                    ctx.log.info(format!("Deleted {artefact}"));
                    result.mutations_applied.push(artefact);
                }
                Err(source) => {
                    ctx.log.error(format!("Failed to delete {artefact}: {source}"));
                    if result.error.is_none() {
                        result.fail(ProvisioningError::ArtifactRemoval {
                            path: artefact,
                            source,
                        });
                    }
                }
            }
        }

        if result.error.is_none() {
            if result.mutations_applied.is_empty() {
                ctx.log.info(format!("Nothing to remove for {label}"));
            } else {
                ctx.log.success(format!("{} extension removed from {label}", extension.name()));
            }
            result.succeed();
        }
        result
    }
}

fn warn_about_fallback(ctx: &mut RunContext, target: &ConfigTarget) {
    match target.fallback() {
        Some(Fallback::MainConfigFile) => ctx.log.warn(
            "Performing an installation without a scan directory may result in fragile \
             installations that are broken by normal system upgrades. It is advisable to use \
             the configure switch --with-config-file-scan-dir when building PHP.",
        ),
        Some(Fallback::ScanningDisabled) => ctx.log.warn(
            "The runtime reports an empty scan directory, so ini scanning is disabled; \
             writing to the main configuration file instead.",
        ),
        Some(Fallback::WindowsDefault) => ctx.log.warn(
            "No configuration file is loaded; writing php.ini next to the binary.",
        ),
        None => {}
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
