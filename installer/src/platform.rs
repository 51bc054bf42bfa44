//! Host operating-system conventions.
//!
//! The installer behaves differently on the Windows family (executable
//! suffix, extension artefact naming, drive-letter absolute paths). Those
//! differences are captured by [`Platform`], which is passed explicitly so
//! both families can be exercised from any host.

/// Operating-system family the installer is targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Linux, macOS and other POSIX systems.
    Posix,
    /// The Windows family.
    Windows,
}

impl Platform {
    /// Returns the platform the installer was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) { Self::Windows } else { Self::Posix }
    }

    /// Returns true for the Windows family.
    #[must_use]
    pub const fn is_windows(self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Suffix appended to executable names.
    #[must_use]
    pub const fn executable_suffix(self) -> &'static str {
        match self {
            Self::Posix => "",
            Self::Windows => ".exe",
        }
    }

    /// Returns true when `path` is absolute under this platform's rules.
    ///
    /// POSIX paths are absolute when they start with `/`. On Windows a
    /// drive-letter prefix (`C:\` or `C:/`) or a UNC prefix (`\\`) also
    /// counts.
    ///
    /// # Examples
    ///
    /// ```
    /// use php_apm_installer::platform::Platform;
    ///
    /// assert!(Platform::Posix.is_absolute("/usr/lib/php"));
    /// assert!(!Platform::Posix.is_absolute("ext"));
    /// assert!(Platform::Windows.is_absolute(r"C:\php\ext"));
    /// assert!(!Platform::Posix.is_absolute(r"C:\php\ext"));
    /// ```
    #[must_use]
    pub fn is_absolute(self, path: &str) -> bool {
        if path.starts_with('/') {
            return true;
        }
        self.is_windows() && (has_drive_prefix(path) || path.starts_with(r"\\"))
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(letter), Some(':'), Some('\\' | '/')) if letter.is_ascii_alphabetic()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::posix_root(Platform::Posix, "/opt/php/lib", true)]
    #[case::posix_relative(Platform::Posix, "ext", false)]
    #[case::posix_ignores_drive(Platform::Posix, "C:/php/ext", false)]
    #[case::windows_drive_backslash(Platform::Windows, r"c:\php\ext", true)]
    #[case::windows_drive_slash(Platform::Windows, "D:/php/ext", true)]
    #[case::windows_unc(Platform::Windows, r"\\server\share\ext", true)]
    #[case::windows_relative(Platform::Windows, "ext", false)]
    #[case::windows_drive_without_separator(Platform::Windows, "C:ext", false)]
    fn absolute_path_rules(#[case] platform: Platform, #[case] path: &str, #[case] expected: bool) {
        assert_eq!(platform.is_absolute(path), expected);
    }

    #[test]
    fn executable_suffix_is_exe_on_windows_only() {
        assert_eq!(Platform::Windows.executable_suffix(), ".exe");
        assert_eq!(Platform::Posix.executable_suffix(), "");
    }
}
