//! PHP binary discovery.
//!
//! Discovery runs two passes over a fixed matrix of candidate executable
//! names: a `PATH` lookup, then a sweep of well-known install directories.
//! Results are deduplicated by canonical path and wrapper scripts are
//! flagged so they can be kept out of the provisioning set.

use crate::error::{InstallerError, Result};
use crate::platform::Platform;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::ffi::OsString;
use std::io::Read;
use walkdir::WalkDir;

/// PHP releases the installer knows how to name, as `(major, minor)`.
pub const SUPPORTED_VERSIONS: &[(u8, u8)] = &[(8, 0), (8, 1), (8, 2), (8, 3)];

const BASE_NAME: &str = "php";
const FPM_NAME: &str = "php-fpm";

/// Builds the ordered list of executable names worth looking for.
///
/// The list starts with `php` and `php-fpm`. For each supported version it
/// adds `php{M}`, `php{M}{m}` and `php{M}.{m}`, each of those with a `-fpm`
/// suffix, and the `php-fpm{M}` family. Names repeated across versions are
/// kept once. On Windows every name carries the `.exe` suffix.
///
/// # Examples
///
/// ```
/// use php_apm_installer::locator::candidate_names;
/// use php_apm_installer::platform::Platform;
///
/// let names = candidate_names(Platform::Posix);
/// assert_eq!(names.first().map(String::as_str), Some("php"));
/// assert!(names.iter().any(|n| n == "php8.3-fpm"));
/// assert!(candidate_names(Platform::Windows).iter().all(|n| n.ends_with(".exe")));
/// ```
#[must_use]
pub fn candidate_names(platform: Platform) -> Vec<String> {
    let mut names = vec![BASE_NAME.to_owned(), FPM_NAME.to_owned()];

    for (major, minor) in SUPPORTED_VERSIONS {
        let forms = [
            format!("{major}"),
            format!("{major}{minor}"),
            format!("{major}.{minor}"),
        ];
        for form in &forms {
            names.push(format!("{BASE_NAME}{form}"));
            names.push(format!("{BASE_NAME}{form}-fpm"));
            names.push(format!("{FPM_NAME}{form}"));
        }
    }

    let mut seen = HashSet::new();
    names.retain(|name| seen.insert(name.clone()));

    let suffix = platform.executable_suffix();
    names
        .into_iter()
        .map(|name| format!("{name}{suffix}"))
        .collect()
}

/// A PHP executable found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    /// Name the binary was found under; the found path for sweep results.
    pub alias: String,
    /// Symlink-resolved location of the executable.
    pub canonical_path: Utf8PathBuf,
    /// True when the file starts with `#!`, i.e. it is a wrapper script.
    pub has_shebang: bool,
}

impl ResolvedBinary {
    /// Directory containing the executable.
    #[must_use]
    pub fn install_dir(&self) -> &Utf8Path {
        self.canonical_path
            .parent()
            .unwrap_or_else(|| Utf8Path::new("/"))
    }
}

/// Where and how to search for binaries.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Platform conventions to apply.
    pub platform: Platform,
    /// Root prepended to the standard install directories.
    pub prefix: Option<Utf8PathBuf>,
    /// `PATH` value used for the lookup pass; the process `PATH` when unset.
    pub search_path: Option<OsString>,
}

impl LocatorConfig {
    /// Configuration for the host platform with no overrides.
    #[must_use]
    pub fn for_host() -> Self {
        Self {
            platform: Platform::current(),
            prefix: None,
            search_path: None,
        }
    }

    /// Sets the sweep root.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Option<Utf8PathBuf>) -> Self {
        self.prefix = prefix;
        self
    }

    /// Sets the `PATH` value for the lookup pass.
    #[must_use]
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    fn prefixed(&self, path: &str) -> Utf8PathBuf {
        match &self.prefix {
            Some(root) => Utf8PathBuf::from(format!("{}{path}", root.as_str().trim_end_matches('/'))),
            None => Utf8PathBuf::from(path),
        }
    }

    /// Directories swept on POSIX systems.
    ///
    /// Covers the usual `bin`/`sbin` locations plus the Remi (`php-fpm`
    /// lives under `/opt/remi/php{M}{m}/root/usr/sbin`) and Plesk layouts.
    #[must_use]
    pub fn posix_sweep_dirs(&self) -> Vec<Utf8PathBuf> {
        let mut dirs: Vec<Utf8PathBuf> = ["/usr/bin", "/usr/sbin", "/usr/local/bin", "/usr/local/sbin"]
            .iter()
            .map(|dir| self.prefixed(dir))
            .collect();
        dirs.extend(
            SUPPORTED_VERSIONS
                .iter()
                .map(|(major, minor)| self.prefixed(&format!("/opt/remi/php{major}{minor}/root/usr/sbin"))),
        );
        dirs.extend(
            SUPPORTED_VERSIONS
                .iter()
                .map(|(major, minor)| self.prefixed(&format!("/opt/plesk/php/{major}.{minor}/bin"))),
        );
        dirs
    }
}

/// Ordered set of binaries keyed by canonical path.
#[derive(Debug, Default)]
struct Discovered {
    entries: Vec<(String, Utf8PathBuf)>,
    seen: HashSet<Utf8PathBuf>,
}

impl Discovered {
    fn insert(&mut self, alias: String, canonical: Utf8PathBuf) {
        if self.seen.insert(canonical.clone()) {
            log::trace!("discovered {alias} -> {canonical}");
            self.entries.push((alias, canonical));
        } else {
            log::trace!("skipping {alias}: {canonical} already discovered");
        }
    }
}

/// Finds every PHP executable reachable through `PATH` or the standard
/// install directories.
///
/// Never fails: an empty vector means nothing was found and the caller
/// decides whether that is fatal.
#[must_use]
pub fn discover(config: &LocatorConfig) -> Vec<ResolvedBinary> {
    let names = candidate_names(config.platform);
    let mut found = Discovered::default();

    lookup_on_path(config, &names, &mut found);

    let swept = match config.platform {
        Platform::Posix => sweep_posix(config, &names),
        Platform::Windows => sweep_windows(&names),
    };
    for path in swept {
        if let Some(canonical) = canonicalize(&path) {
            found.insert(path.into_string(), canonical);
        }
    }

    found
        .entries
        .into_iter()
        .map(|(alias, canonical_path)| {
            let has_shebang = starts_with_shebang(&canonical_path);
            ResolvedBinary {
                alias,
                canonical_path,
                has_shebang,
            }
        })
        .collect()
}

fn lookup_on_path(config: &LocatorConfig, names: &[String], found: &mut Discovered) {
    let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("/"));
    for name in names {
        let hit = match &config.search_path {
            Some(paths) => which::which_in(name, Some(paths), &cwd),
            None => which::which(name),
        };
        let Ok(path) = hit else {
            continue;
        };
        let Ok(path) = Utf8PathBuf::from_path_buf(path) else {
            log::debug!("ignoring non UTF-8 path for {name}");
            continue;
        };
        if let Some(canonical) = canonicalize(&path) {
            found.insert(name.clone(), canonical);
        }
    }
}

fn sweep_posix(config: &LocatorConfig, names: &[String]) -> Vec<Utf8PathBuf> {
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut hits = Vec::new();

    for dir in config.posix_sweep_dirs() {
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(dir.as_std_path())
            .follow_links(true)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| wanted.contains(name));
            if !matches {
                continue;
            }
            if let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) {
                hits.push(path);
            }
        }
    }

    hits
}

/// Directories holding PHP on Windows: the boot disk, `WINDOWS`, any
/// top-level entry whose name mentions php, and the same under the
/// Chocolatey tools directory. Compared case-insensitively.
fn windows_roots() -> Vec<Utf8PathBuf> {
    let drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_owned());
    let boot = Utf8PathBuf::from(format!("{drive}\\"));
    let tools = std::env::var("ChocolateyToolsLocation")
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|_| boot.join("tools"));

    let mut roots = vec![boot.clone(), boot.join("WINDOWS")];
    roots.extend(php_named_children(&boot));
    if tools.is_dir() {
        roots.extend(php_named_children(&tools));
    }

    let mut seen = HashSet::new();
    roots.retain(|root| seen.insert(root.as_str().to_ascii_lowercase()));
    roots
}

fn php_named_children(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let Ok(entries) = dir.read_dir_utf8() else {
        return Vec::new();
    };
    entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_name().to_ascii_lowercase().contains(BASE_NAME))
        .map(|entry| entry.into_path())
        .collect()
}

fn sweep_windows(names: &[String]) -> Vec<Utf8PathBuf> {
    windows_roots()
        .iter()
        .flat_map(|root| names.iter().map(move |name| root.join(name)))
        .filter(|candidate| candidate.exists())
        .collect()
}

fn canonicalize(path: &Utf8Path) -> Option<Utf8PathBuf> {
    path.canonicalize_utf8()
        .map_err(|err| log::debug!("cannot resolve {path}: {err}"))
        .ok()
}

/// Returns true if the file at `path` begins with `#!`.
#[must_use]
pub fn starts_with_shebang(path: &Utf8Path) -> bool {
    let mut head = [0_u8; 2];
    std::fs::File::open(path)
        .and_then(|mut file| file.read_exact(&mut head))
        .is_ok_and(|()| &head == b"#!")
}

/// Binaries eligible to receive the extension.
///
/// Constructed only through [`ProvisioningSet::from_discovered`], which
/// drops wrapper scripts, so every member is a native executable.
#[derive(Debug, Clone)]
pub struct ProvisioningSet {
    binaries: Vec<ResolvedBinary>,
}

impl ProvisioningSet {
    /// Filters discovery results down to provisionable binaries.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::NoBinariesFound`] if nothing is left once
    /// wrapper scripts are removed.
    pub fn from_discovered(discovered: Vec<ResolvedBinary>) -> Result<Self> {
        let binaries: Vec<ResolvedBinary> = discovered
            .into_iter()
            .filter(|binary| {
                if binary.has_shebang {
                    log::debug!("excluding wrapper script {}", binary.canonical_path);
                }
                !binary.has_shebang
            })
            .collect();

        if binaries.is_empty() {
            return Err(InstallerError::NoBinariesFound);
        }
        Ok(Self { binaries })
    }

    /// Binaries in discovery order.
    #[must_use]
    pub fn binaries(&self) -> &[ResolvedBinary] {
        &self.binaries
    }

    /// Number of binaries in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.binaries.len()
    }

    /// Always false; an empty set cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty()
    }
}

#[cfg(test)]
#[path = "locator_tests.rs"]
mod tests;
