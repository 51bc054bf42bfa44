//! Runtime introspection.
//!
//! Reads the diagnostic dump printed by `php -i` and the module list printed
//! by `php -m`. Raw labels are mapped to [`PropertyKey`] here and nowhere
//! else.

use crate::command::{CommandOutput, CommandRunner, RunOptions};
use crate::error::Result;
use crate::platform::Platform;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::time::Duration;

/// Arguments that print the diagnostic dump. The timezone is pinned so an
/// unset `date.timezone` does not add a warning to the output.
pub const INFO_ARGS: &[&str] = &["-d", "date.timezone=UTC", "-i"];

/// Arguments that print the loaded module list.
pub const MODULES_ARGS: &[&str] = &["-m"];

const NONE_PLACEHOLDER: &str = "(none)";

/// Runtime properties the installer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyKey {
    /// `PHP Version`
    Version,
    /// `Loaded Configuration File`
    MainConfigFile,
    /// `Scan this dir for additional .ini files`
    ScanDirectory,
    /// `extension_dir`
    ExtensionDirectory,
    /// `Thread Safety`
    ThreadSafety,
    /// `PHP API`
    ApiTag,
    /// `Debug Build`
    DebugBuild,
}

impl PropertyKey {
    /// Every recognised key.
    pub const ALL: [Self; 7] = [
        Self::Version,
        Self::MainConfigFile,
        Self::ScanDirectory,
        Self::ExtensionDirectory,
        Self::ThreadSafety,
        Self::ApiTag,
        Self::DebugBuild,
    ];

    /// The label printed by `php -i` for this key.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Version => "PHP Version",
            Self::MainConfigFile => "Loaded Configuration File",
            Self::ScanDirectory => "Scan this dir for additional .ini files",
            Self::ExtensionDirectory => "extension_dir",
            Self::ThreadSafety => "Thread Safety",
            Self::ApiTag => "PHP API",
            Self::DebugBuild => "Debug Build",
        }
    }

    /// Maps a printed label back to its key.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.label() == label)
    }
}

/// Properties reported by one runtime.
///
/// A key is absent when the runtime printed `(none)` or never printed it.
/// After [`introspect`] the extension directory is always absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeProperties {
    values: BTreeMap<PropertyKey, String>,
}

impl RuntimeProperties {
    /// Value for `key`, if reported.
    #[must_use]
    pub fn get(&self, key: PropertyKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Sets `key` to `value`.
    pub fn insert(&mut self, key: PropertyKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: PropertyKey) {
        self.values.remove(&key);
    }

    /// Runtime version string.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.get(PropertyKey::Version)
    }

    /// Main `php.ini` path.
    #[must_use]
    pub fn main_config_file(&self) -> Option<&Utf8Path> {
        self.get(PropertyKey::MainConfigFile).map(Utf8Path::new)
    }

    /// Additional ini scan directory.
    #[must_use]
    pub fn scan_directory(&self) -> Option<&Utf8Path> {
        self.get(PropertyKey::ScanDirectory).map(Utf8Path::new)
    }

    /// Extension directory.
    #[must_use]
    pub fn extension_directory(&self) -> Option<&Utf8Path> {
        self.get(PropertyKey::ExtensionDirectory).map(Utf8Path::new)
    }

    /// Number of reported keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Makes the extension directory absolute.
    ///
    /// An absent or empty value becomes the binary's own directory. A
    /// relative value is joined onto that directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use php_apm_installer::introspect::{PropertyKey, RuntimeProperties};
    /// use php_apm_installer::platform::Platform;
    ///
    /// let mut props = RuntimeProperties::default();
    /// props.insert(PropertyKey::ExtensionDirectory, "ext");
    /// props.normalize_extension_directory(Utf8Path::new("/opt/php/bin/php"), Platform::Posix);
    /// assert_eq!(props.extension_directory(), Some(Utf8Path::new("/opt/php/bin/ext")));
    /// ```
    pub fn normalize_extension_directory(&mut self, binary: &Utf8Path, platform: Platform) {
        let binary_dir = binary.parent().unwrap_or_else(|| Utf8Path::new("/"));
        let resolved = match self.get(PropertyKey::ExtensionDirectory) {
            None | Some("") => binary_dir.to_path_buf(),
            Some(dir) if platform.is_absolute(dir) => return,
            Some(dir) => binary_dir.join(dir),
        };
        self.insert(PropertyKey::ExtensionDirectory, resolved.into_string());
    }
}

/// Parses a `php -i` dump.
///
/// Lines are split on `=>`. Two-part lines carry a single value; three-part
/// lines carry local and master values, and the last one wins. Anything
/// else is ignored.
///
/// # Examples
///
/// ```
/// use php_apm_installer::introspect::{parse_properties, PropertyKey};
///
/// let props = parse_properties("PHP Version => 8.3.6\nextension_dir => /a => /b\n");
/// assert_eq!(props.version(), Some("8.3.6"));
/// assert_eq!(props.get(PropertyKey::ExtensionDirectory), Some("/b"));
/// ```
#[must_use]
pub fn parse_properties(dump: &str) -> RuntimeProperties {
    let mut properties = RuntimeProperties::default();

    for line in dump.lines() {
        let parts: Vec<&str> = line.split("=>").collect();
        let (label, value) = match parts.as_slice() {
            [label, value] | [label, _, value] => (label.trim(), value.trim()),
            _ => continue,
        };
        let Some(key) = PropertyKey::from_label(label) else {
            continue;
        };
        if value == NONE_PLACEHOLDER {
            continue;
        }
        properties.insert(key, value);
    }

    properties
}

/// Runs `php -i` for `binary` and returns its normalised properties.
///
/// A non-zero exit is tolerated; only a failure to run the binary at all
/// (or a timeout) is an error.
///
/// # Errors
///
/// Returns an error when the process cannot be spawned or times out.
pub fn introspect(
    runner: &dyn CommandRunner,
    binary: &Utf8Path,
    platform: Platform,
    timeout: Duration,
) -> Result<RuntimeProperties> {
    let output = run_info(runner, binary, timeout)?;
    let mut properties = parse_properties(&output.stdout);
    properties.normalize_extension_directory(binary, platform);
    log::trace!(
        "{binary}: version {:?}, scan dir {:?}, extension dir {:?}",
        properties.version(),
        properties.scan_directory(),
        properties.extension_directory()
    );
    Ok(properties)
}

/// Runs the diagnostic dump and returns the raw output, exit code included.
///
/// # Errors
///
/// Returns an error when the process cannot be spawned or times out.
pub fn run_info(
    runner: &dyn CommandRunner,
    binary: &Utf8Path,
    timeout: Duration,
) -> Result<CommandOutput> {
    runner.run(binary.as_str(), INFO_ARGS, &RunOptions::tolerant(timeout))
}

/// Modules currently loaded by `binary`, as listed by `php -m`.
///
/// Section headers such as `[PHP Modules]` and blank lines are dropped.
///
/// # Errors
///
/// Returns an error when the process cannot be spawned or times out.
pub fn loaded_modules(
    runner: &dyn CommandRunner,
    binary: &Utf8Path,
    timeout: Duration,
) -> Result<ModuleList> {
    let output = runner.run(binary.as_str(), MODULES_ARGS, &RunOptions::tolerant(timeout))?;
    Ok(ModuleList::parse(&output.stdout))
}

/// Names printed by `php -m`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleList {
    names: Vec<String>,
}

impl ModuleList {
    /// Parses `php -m` output.
    #[must_use]
    pub fn parse(output: &str) -> Self {
        let names = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('['))
            .map(str::to_owned)
            .collect();
        Self { names }
    }

    /// Returns true if `module` is loaded. Module names compare without
    /// regard to ASCII case (`SimpleXML` satisfies `simplexml`).
    #[must_use]
    pub fn contains(&self, module: &str) -> bool {
        self.names.iter().any(|name| name.eq_ignore_ascii_case(module))
    }

    /// Listed module names.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Absolute path of the extension artefact for a runtime.
#[must_use]
pub fn artifact_path(properties: &RuntimeProperties, binary: &Utf8Path, artifact: &str) -> Utf8PathBuf {
    properties
        .extension_directory()
        .map_or_else(
            || binary.parent().unwrap_or_else(|| Utf8Path::new("/")).to_path_buf(),
            Utf8Path::to_path_buf,
        )
        .join(artifact)
}
