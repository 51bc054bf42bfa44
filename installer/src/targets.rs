//! Configuration target resolution.
//!
//! Maps a runtime's reported configuration layout to the ini files that
//! must carry the activation directive. Debian-style layouts keep one scan
//! directory per SAPI under a common parent, so a CLI scan directory also
//! yields its Apache and FPM siblings when those exist.

use crate::error::{InstallerError, Result};
use crate::extension::Extension;
use crate::introspect::RuntimeProperties;
use crate::platform::Platform;
use camino::{Utf8Path, Utf8PathBuf};

const CLI_SEGMENT: &str = "/cli/conf.d";
const APACHE_SEGMENT: &str = "/apache2/conf.d";
const FPM_SEGMENT: &str = "/fpm/conf.d";

/// Server API modes that can own a sibling scan directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sapi {
    /// `mod_php` under Apache.
    Apache,
    /// The FastCGI process manager.
    Fpm,
}

/// Derives the Apache and FPM scan directories that sit beside a CLI scan
/// directory. Returns nothing when `scan_dir` is not a CLI scan directory.
/// Existence is not checked.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use php_apm_installer::targets::{sibling_scan_dirs, Sapi};
///
/// let siblings = sibling_scan_dirs(Utf8Path::new("/etc/php/8.3/cli/conf.d"));
/// assert_eq!(siblings[0], (Sapi::Apache, "/etc/php/8.3/apache2/conf.d".into()));
/// assert_eq!(siblings[1], (Sapi::Fpm, "/etc/php/8.3/fpm/conf.d".into()));
/// assert!(sibling_scan_dirs(Utf8Path::new("/etc/php.d")).is_empty());
/// ```
#[must_use]
pub fn sibling_scan_dirs(scan_dir: &Utf8Path) -> Vec<(Sapi, Utf8PathBuf)> {
    let raw = scan_dir.as_str();
    if !raw.contains(CLI_SEGMENT) {
        return Vec::new();
    }
    vec![
        (Sapi::Apache, Utf8PathBuf::from(raw.replace(CLI_SEGMENT, APACHE_SEGMENT))),
        (Sapi::Fpm, Utf8PathBuf::from(raw.replace(CLI_SEGMENT, FPM_SEGMENT))),
    ]
}

/// Why the target set does not come from a scan directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// No scan directory was reported; the main `php.ini` is used.
    MainConfigFile,
    /// The scan directory was reported empty, meaning scanning is disabled.
    ScanningDisabled,
    /// Windows runtime with no loaded ini; `php.ini` beside the binary.
    WindowsDefault,
}

/// Ordered, duplicate-free ini files for one binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTarget {
    paths: Vec<Utf8PathBuf>,
    fallback: Option<Fallback>,
}

impl ConfigTarget {
    /// Appends `path` unless it is already present.
    pub fn push(&mut self, path: Utf8PathBuf) {
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Target files in resolution order.
    #[must_use]
    pub fn paths(&self) -> &[Utf8PathBuf] {
        &self.paths
    }

    /// Returns true if `path` is a target.
    #[must_use]
    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Number of target files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns true when there are no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Set when the targets were not derived from a scan directory.
    #[must_use]
    pub fn fallback(&self) -> Option<Fallback> {
        self.fallback
    }
}

impl<'a> IntoIterator for &'a ConfigTarget {
    type Item = &'a Utf8PathBuf;
    type IntoIter = std::slice::Iter<'a, Utf8PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

/// Inputs to [`resolve`] that do not come from the runtime.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions<'a> {
    /// Extension being configured.
    pub extension: &'a Extension,
    /// Operator-supplied directories that always receive an ini file.
    pub extra_dirs: &'a [Utf8PathBuf],
    /// Platform conventions.
    pub platform: Platform,
}

/// Computes the ini files that must carry the activation directive.
///
/// With a scan directory the target is `{scan}/{ext}.ini`, plus the Apache
/// sibling when that directory exists and has no `{ext}.ini` yet, plus the
/// FPM sibling whenever its directory exists. Without one the main
/// `php.ini` is used. Extra directories are always appended.
///
/// # Errors
///
/// Returns [`InstallerError::NoConfigurationTarget`] on POSIX when neither a
/// scan directory nor a main configuration file is reported.
pub fn resolve(
    properties: &RuntimeProperties,
    binary: &Utf8Path,
    options: ResolveOptions<'_>,
) -> Result<ConfigTarget> {
    let ini_name = options.extension.ini_filename();
    let mut target = ConfigTarget::default();

    match properties.scan_directory() {
        Some(scan) if !scan.as_str().is_empty() => {
            target.push(scan.join(&ini_name));
            for (sapi, dir) in sibling_scan_dirs(scan) {
                let ini = dir.join(&ini_name);
                let include = match sapi {
                    Sapi::Apache => dir.is_dir() && !ini.exists(),
                    Sapi::Fpm => dir.is_dir(),
                };
                if include {
                    target.push(ini);
                } else {
                    log::trace!("skipping {sapi:?} sibling {ini}");
                }
            }
        }
        scan => {
            target.fallback = Some(if scan.is_some() {
                Fallback::ScanningDisabled
            } else {
                Fallback::MainConfigFile
            });
            match properties.main_config_file().filter(|p| !p.as_str().is_empty()) {
                Some(main) => target.push(main.to_path_buf()),
                None if options.platform.is_windows() => {
                    let dir = binary.parent().unwrap_or_else(|| Utf8Path::new("/"));
                    target.push(dir.join("php.ini"));
                    target.fallback = Some(Fallback::WindowsDefault);
                }
                None => {
                    return Err(InstallerError::NoConfigurationTarget {
                        binary: binary.to_path_buf(),
                    });
                }
            }
        }
    }

    for dir in options.extra_dirs {
        target.push(dir.join(&ini_name));
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::PropertyKey;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Layout {
        _dir: TempDir,
        root: Utf8PathBuf,
    }

    impl Layout {
        fn cli(&self) -> Utf8PathBuf {
            self.root.join("etc/php/8.3/cli/conf.d")
        }

        fn apache(&self) -> Utf8PathBuf {
            self.root.join("etc/php/8.3/apache2/conf.d")
        }

        fn fpm(&self) -> Utf8PathBuf {
            self.root.join("etc/php/8.3/fpm/conf.d")
        }

        fn properties(&self) -> RuntimeProperties {
            let mut props = RuntimeProperties::default();
            props.insert(PropertyKey::ScanDirectory, self.cli().as_str());
            props.insert(
                PropertyKey::MainConfigFile,
                self.root.join("etc/php/8.3/cli/php.ini").as_str(),
            );
            props
        }
    }

    #[fixture]
    fn layout() -> Layout {
        let dir = TempDir::new().expect("create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        let layout = Layout { _dir: dir, root };
        std::fs::create_dir_all(layout.cli()).expect("create cli scan dir");
        layout
    }

    #[fixture]
    fn otel() -> Extension {
        Extension::opentelemetry(Platform::Posix)
    }

    fn options<'a>(extension: &'a Extension, extra: &'a [Utf8PathBuf]) -> ResolveOptions<'a> {
        ResolveOptions {
            extension,
            extra_dirs: extra,
            platform: Platform::Posix,
        }
    }

    const BINARY: &str = "/usr/bin/php8.3";

    #[rstest]
    fn scan_directory_only(layout: Layout, otel: Extension) {
        let target = resolve(&layout.properties(), Utf8Path::new(BINARY), options(&otel, &[]))
            .expect("resolves");
        assert_eq!(target.paths(), &[layout.cli().join("opentelemetry.ini")]);
        assert!(target.fallback().is_none());
    }

    #[rstest]
    fn includes_apache_sibling_when_directory_exists(layout: Layout, otel: Extension) {
        std::fs::create_dir_all(layout.apache()).expect("create apache dir");

        let target = resolve(&layout.properties(), Utf8Path::new(BINARY), options(&otel, &[]))
            .expect("resolves");

        assert_eq!(
            target.paths(),
            &[
                layout.cli().join("opentelemetry.ini"),
                layout.apache().join("opentelemetry.ini"),
            ]
        );
    }

    #[rstest]
    fn excludes_apache_sibling_with_existing_ini(layout: Layout, otel: Extension) {
        std::fs::create_dir_all(layout.apache()).expect("create apache dir");
        std::fs::write(layout.apache().join("opentelemetry.ini"), "extension=opentelemetry.so\n")
            .expect("write apache ini");

        let target = resolve(&layout.properties(), Utf8Path::new(BINARY), options(&otel, &[]))
            .expect("resolves");

        assert!(!target.contains(&layout.apache().join("opentelemetry.ini")));
        assert_eq!(target.len(), 1);
    }

    #[rstest]
    fn fpm_sibling_is_included_even_with_existing_ini(layout: Layout, otel: Extension) {
        std::fs::create_dir_all(layout.fpm()).expect("create fpm dir");
        std::fs::write(layout.fpm().join("opentelemetry.ini"), "").expect("write fpm ini");

        let target = resolve(&layout.properties(), Utf8Path::new(BINARY), options(&otel, &[]))
            .expect("resolves");

        assert!(target.contains(&layout.fpm().join("opentelemetry.ini")));
    }

    #[rstest]
    fn extra_dirs_are_appended_without_duplicates(layout: Layout, otel: Extension) {
        let extra = vec![Utf8PathBuf::from("/srv/php/conf.d"), layout.cli()];

        let target = resolve(&layout.properties(), Utf8Path::new(BINARY), options(&otel, &extra))
            .expect("resolves");

        assert_eq!(
            target.paths(),
            &[
                layout.cli().join("opentelemetry.ini"),
                Utf8PathBuf::from("/srv/php/conf.d/opentelemetry.ini"),
            ]
        );
    }

    #[rstest]
    fn falls_back_to_main_config_without_scan_dir(otel: Extension) {
        let mut props = RuntimeProperties::default();
        props.insert(PropertyKey::MainConfigFile, "/usr/local/etc/php.ini");

        let target =
            resolve(&props, Utf8Path::new(BINARY), options(&otel, &[])).expect("resolves");

        assert_eq!(target.paths(), &[Utf8PathBuf::from("/usr/local/etc/php.ini")]);
        assert_eq!(target.fallback(), Some(Fallback::MainConfigFile));
    }

    #[rstest]
    fn empty_scan_dir_means_scanning_disabled(otel: Extension) {
        let mut props = RuntimeProperties::default();
        props.insert(PropertyKey::ScanDirectory, "");
        props.insert(PropertyKey::MainConfigFile, "/usr/local/etc/php.ini");

        let target =
            resolve(&props, Utf8Path::new(BINARY), options(&otel, &[])).expect("resolves");

        assert_eq!(target.fallback(), Some(Fallback::ScanningDisabled));
        assert_eq!(target.len(), 1);
    }

    #[rstest]
    fn no_scan_dir_and_no_main_config_is_fatal_on_posix(otel: Extension) {
        let err = resolve(
            &RuntimeProperties::default(),
            Utf8Path::new(BINARY),
            options(&otel, &[]),
        )
        .expect_err("nothing to write to");
        assert!(matches!(err, InstallerError::NoConfigurationTarget { .. }));
    }

    #[test]
    fn windows_uses_php_ini_beside_binary() {
        let ext = Extension::opentelemetry(Platform::Windows);
        let target = resolve(
            &RuntimeProperties::default(),
            Utf8Path::new("/php/php.exe"),
            ResolveOptions {
                extension: &ext,
                extra_dirs: &[],
                platform: Platform::Windows,
            },
        )
        .expect("windows has a default");

        assert_eq!(target.paths(), &[Utf8PathBuf::from("/php/php.ini")]);
        assert_eq!(target.fallback(), Some(Fallback::WindowsDefault));
    }

    #[test]
    fn non_cli_scan_dirs_have_no_siblings() {
        assert!(sibling_scan_dirs(Utf8Path::new("/etc/php.d")).is_empty());
        assert!(sibling_scan_dirs(Utf8Path::new("/etc/php/8.3/fpm/conf.d")).is_empty());
    }
}
