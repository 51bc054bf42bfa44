//! Post-install verification.

use crate::command::CommandRunner;
use crate::error::ProvisioningError;
use crate::extension::Extension;
use crate::introspect::{artifact_path, loaded_modules, parse_properties, run_info};
use crate::platform::Platform;
use camino::Utf8Path;
use std::time::Duration;

fn failed(reason: impl Into<String>) -> ProvisioningError {
    ProvisioningError::Verification {
        reason: reason.into(),
    }
}

/// Confirms that `binary` has the extension artefact on disk and loads it.
///
/// Both checks must pass. A diagnostic dump that exits non-zero, a command
/// that cannot run or times out, a missing artefact, and a module list
/// without the extension are all verification failures.
///
/// # Errors
///
/// Returns [`ProvisioningError::Verification`] naming the failed check.
pub fn verify(
    runner: &dyn CommandRunner,
    binary: &Utf8Path,
    extension: &Extension,
    platform: Platform,
    timeout: Duration,
) -> Result<(), ProvisioningError> {
    let info = run_info(runner, binary, timeout)
        .map_err(|err| failed(format!("could not read PHP info: {err}")))?;
    if !info.success() {
        return Err(failed(format!(
            "PHP info exited with {}",
            info.exit_code
                .map_or_else(|| "a signal".to_owned(), |code| format!("code {code}"))
        )));
    }

    let mut properties = parse_properties(&info.stdout);
    properties.normalize_extension_directory(binary, platform);
    let artefact = artifact_path(&properties, binary, &extension.artifact_filename());
    if !artefact.is_file() {
        return Err(failed(format!(
            "{} has not been installed correctly: {artefact} is missing",
            extension.name()
        )));
    }

    let modules = loaded_modules(runner, binary, timeout)
        .map_err(|err| failed(format!("could not list modules: {err}")))?;
    if !modules.contains(extension.name()) {
        return Err(failed(format!(
            "{} is not loaded; the directive did not reach an active ini file",
            extension.name()
        )));
    }

    log::trace!("{binary}: {artefact} present and {} loaded", extension.name());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstallerError;
    use crate::introspect::{INFO_ARGS, MODULES_ARGS};
    use crate::test_utils::{StubRunner, output_with_code, output_with_stdout};
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    const BINARY: &str = "/opt/php/bin/php";

    fn ext_dir() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, path)
    }

    fn info_for(dir: &Utf8Path) -> String {
        format!("PHP Version => 8.3.6\nextension_dir => {dir} => {dir}\n")
    }

    fn verify_with(runner: &StubRunner) -> Result<(), ProvisioningError> {
        verify(
            runner,
            Utf8Path::new(BINARY),
            &Extension::opentelemetry(Platform::Posix),
            Platform::Posix,
            Duration::from_secs(5),
        )
    }

    fn reason(err: ProvisioningError) -> String {
        match err {
            ProvisioningError::Verification { reason } => reason,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn passes_when_artefact_exists_and_module_loads() {
        let (_guard, dir) = ext_dir();
        std::fs::write(dir.join("opentelemetry.so"), b"").expect("write artefact");
        let runner = StubRunner::new(vec![
            StubRunner::expect(BINARY, INFO_ARGS, Ok(output_with_stdout(&info_for(&dir)))),
            StubRunner::expect(
                BINARY,
                MODULES_ARGS,
                Ok(output_with_stdout("[PHP Modules]\nCore\nopentelemetry\n")),
            ),
        ]);

        verify_with(&runner).expect("verification passes");
        runner.assert_finished();
    }

    #[test]
    fn fails_when_info_exits_non_zero() {
        let runner = StubRunner::new(vec![StubRunner::expect(
            BINARY,
            INFO_ARGS,
            Ok(output_with_code(255)),
        )]);

        let err = verify_with(&runner).expect_err("non-zero info");
        assert!(reason(err).contains("code 255"));
    }

    #[test]
    fn fails_when_artefact_is_missing() {
        let (_guard, dir) = ext_dir();
        let runner = StubRunner::new(vec![StubRunner::expect(
            BINARY,
            INFO_ARGS,
            Ok(output_with_stdout(&info_for(&dir))),
        )]);

        let err = verify_with(&runner).expect_err("no artefact");
        assert!(reason(err).contains("opentelemetry.so is missing"));
        runner.assert_finished();
    }

    #[test]
    fn fails_when_module_is_not_loaded() {
        let (_guard, dir) = ext_dir();
        std::fs::write(dir.join("opentelemetry.so"), b"").expect("write artefact");
        let runner = StubRunner::new(vec![
            StubRunner::expect(BINARY, INFO_ARGS, Ok(output_with_stdout(&info_for(&dir)))),
            StubRunner::expect(BINARY, MODULES_ARGS, Ok(output_with_stdout("Core\n"))),
        ]);

        let err = verify_with(&runner).expect_err("module not loaded");
        assert!(reason(err).contains("not loaded"));
    }

    #[test]
    fn timeout_is_a_verification_failure() {
        let runner = StubRunner::new(vec![StubRunner::expect(
            BINARY,
            INFO_ARGS,
            Err(InstallerError::CommandTimedOut {
                program: BINARY.to_owned(),
                seconds: 5,
            }),
        )]);

        let err = verify_with(&runner).expect_err("timeout");
        assert!(reason(err).contains("timed out"));
    }
}
