//! Naming conventions for the extension being provisioned.

use crate::platform::Platform;

/// Marker written in front of directive lines disabled by `uninstall`.
pub const REMOVAL_MARKER: &str = "; [removed by php-apm-installer]";

/// Filename fragments that mark an ini file as belonging to the APM setup
/// rather than being shared with unrelated settings.
const DEDICATED_FILE_MARKERS: &[&str] = &["opentelemetry", "otel", "middleware", "mw."];

/// Describes a native PHP extension and how it is named on a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    name: String,
    platform: Platform,
}

impl Extension {
    /// Creates a descriptor for `name` on `platform`.
    #[must_use]
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        Self {
            name: name.into(),
            platform,
        }
    }

    /// The OpenTelemetry extension on the given platform.
    #[must_use]
    pub fn opentelemetry(platform: Platform) -> Self {
        Self::new("opentelemetry", platform)
    }

    /// Module name as reported by `php -m`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Platform the descriptor was created for.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Name of the ini file placed in scan directories.
    #[must_use]
    pub fn ini_filename(&self) -> String {
        format!("{}.ini", self.name)
    }

    /// Filename of the compiled artefact inside the extension directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use php_apm_installer::extension::Extension;
    /// use php_apm_installer::platform::Platform;
    ///
    /// assert_eq!(Extension::opentelemetry(Platform::Posix).artifact_filename(), "opentelemetry.so");
    /// assert_eq!(
    ///     Extension::opentelemetry(Platform::Windows).artifact_filename(),
    ///     "php_opentelemetry.dll"
    /// );
    /// ```
    #[must_use]
    pub fn artifact_filename(&self) -> String {
        match self.platform {
            Platform::Posix => format!("{}.so", self.name),
            Platform::Windows => format!("php_{}.dll", self.name),
        }
    }

    /// The activation directive line, e.g. `extension=opentelemetry.so`.
    #[must_use]
    pub fn directive(&self) -> String {
        format!("extension={}", self.artifact_filename())
    }

    /// Returns true if `line` is an active (uncommented) directive loading
    /// this extension in any of its common spellings.
    ///
    /// Accepted forms are `extension=<name>`, `extension=<name>.so`,
    /// `extension=php_<name>.dll`, optionally quoted, with or without a
    /// directory prefix, and with whitespace around `=`.
    #[must_use]
    pub fn matches_directive(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let Some((key, value)) = trimmed.split_once('=') else {
            return false;
        };
        if !key.trim().eq_ignore_ascii_case("extension") {
            return false;
        }

        let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
        let file = value.rsplit(['/', '\\']).next().unwrap_or(value);
        let stem = file
            .strip_suffix(".so")
            .or_else(|| file.strip_suffix(".dll"))
            .unwrap_or(file);
        let stem = stem.strip_prefix("php_").unwrap_or(stem);
        stem == self.name
    }

    /// Returns true if an ini file with this name is dedicated to the APM
    /// setup and may be deleted outright on uninstall.
    ///
    /// Anything else is treated as shared configuration whose unrelated
    /// settings must be preserved.
    #[must_use]
    pub fn is_dedicated_ini(&self, filename: &str) -> bool {
        let lower = filename.to_ascii_lowercase();
        lower == self.ini_filename().to_ascii_lowercase()
            || DEDICATED_FILE_MARKERS
                .iter()
                .any(|marker| lower.contains(marker))
    }
}
