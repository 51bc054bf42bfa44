//! Ini file mutation.
//!
//! Installs append the activation directive; uninstalls either delete a
//! file dedicated to the APM setup or comment out the matching lines of a
//! shared one. Shared files are never truncated or removed.

use crate::extension::{Extension, REMOVAL_MARKER};
use crate::introspect::RuntimeProperties;
use crate::targets::{ConfigTarget, sibling_scan_dirs};
use camino::{Utf8Path, Utf8PathBuf};
use std::io;

/// Autoloader prepended to WordPress requests by the framework step.
pub const OTEL_AUTOLOAD_PATH: &str = "/var/www/otel/autoload.php";

/// Result of [`append_directive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The directive was written.
    Appended,
    /// The file already loads the extension; nothing was written.
    AlreadyPresent,
}

/// Result of [`remove_directives`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// A dedicated file was deleted.
    Deleted,
    /// This many lines of a shared file were commented out.
    Commented(usize),
    /// The file was absent or had nothing to remove.
    Untouched,
}

/// Returns true if `line` is one the installer writes: the extension's
/// activation directive, or the WordPress `auto_prepend_file` hook.
#[must_use]
pub fn is_managed_line(extension: &Extension, line: &str) -> bool {
    if extension.matches_directive(line) {
        return true;
    }
    line.trim().split_once('=').is_some_and(|(key, value)| {
        key.trim() == "auto_prepend_file"
            && value.trim().trim_matches(|c: char| c == '"' || c == '\'') == OTEL_AUTOLOAD_PATH
    })
}

/// Returns true if the file at `path` has an active line loading the
/// extension. Unreadable files count as not loading it.
#[must_use]
pub fn has_directive(path: &Utf8Path, extension: &Extension) -> bool {
    any_line(path, |line| extension.matches_directive(line))
}

fn any_line(path: &Utf8Path, predicate: impl Fn(&str) -> bool) -> bool {
    std::fs::read_to_string(path).is_ok_and(|text| text.lines().any(predicate))
}

/// Appends the activation directive to `path`, creating parent directories
/// and the file as needed.
///
/// A file that already carries the directive is left alone. A missing final
/// newline is added before appending so the directive gets its own line.
///
/// # Errors
///
/// Returns the I/O error if the directory, read, or write fails.
pub fn append_directive(path: &Utf8Path, extension: &Extension) -> io::Result<AppendOutcome> {
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let existing = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err),
    };

    if existing.lines().any(|line| extension.matches_directive(line)) {
        return Ok(AppendOutcome::AlreadyPresent);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&extension.directive());
    updated.push('\n');
    std::fs::write(path, updated)?;
    Ok(AppendOutcome::Appended)
}

/// Rewrites `text`, prefixing every managed line with the removal marker.
/// Returns the new text and the number of lines changed.
#[must_use]
pub fn comment_out(text: &str, extension: &Extension) -> (String, usize) {
    let mut changed = 0;
    let mut out = String::with_capacity(text.len());

    for line in text.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        if is_managed_line(extension, body) {
            out.push_str(REMOVAL_MARKER);
            out.push(' ');
            out.push_str(body);
            changed += 1;
        } else {
            out.push_str(body);
        }
        out.push_str(ending);
    }

    (out, changed)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Removes the extension from one ini file.
///
/// Dedicated files are deleted. Shared files have their managed lines
/// commented out in place and every other byte preserved.
///
/// # Errors
///
/// Returns the I/O error if reading, rewriting or deleting fails.
pub fn remove_directives(path: &Utf8Path, extension: &Extension) -> io::Result<Removal> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Removal::Untouched),
        Err(err) => return Err(err),
    };

    let dedicated = path
        .file_name()
        .is_some_and(|name| extension.is_dedicated_ini(name));
    if dedicated {
        std::fs::remove_file(path)?;
        return Ok(Removal::Deleted);
    }

    let (rewritten, changed) = comment_out(&text, extension);
    if changed == 0 {
        return Ok(Removal::Untouched);
    }
    std::fs::write(path, rewritten)?;
    Ok(Removal::Commented(changed))
}

/// Collects the ini files an uninstall should visit for one runtime.
///
/// These are the resolved install targets, the main `php.ini`, and every
/// `*.ini` in the scan directory and its existing SAPI siblings that
/// contains a managed line. Order is stable and paths are unique.
#[must_use]
pub fn uninstall_candidates(
    target: &ConfigTarget,
    properties: &RuntimeProperties,
    extension: &Extension,
) -> Vec<Utf8PathBuf> {
    let mut candidates = ConfigTarget::default();
    for path in target {
        candidates.push(path.clone());
    }
    if let Some(main) = properties.main_config_file().filter(|p| !p.as_str().is_empty()) {
        candidates.push(main.to_path_buf());
    }

    let mut scan_dirs = Vec::new();
    if let Some(scan) = properties.scan_directory().filter(|p| !p.as_str().is_empty()) {
        scan_dirs.push(scan.to_path_buf());
        scan_dirs.extend(sibling_scan_dirs(scan).into_iter().map(|(_, dir)| dir));
    }

    for dir in scan_dirs.iter().filter(|dir| dir.is_dir()) {
        for path in managed_files_in(dir, extension) {
            candidates.push(path);
        }
    }

    candidates.paths().to_vec()
}

fn managed_files_in(dir: &Utf8Path, extension: &Extension) -> Vec<Utf8PathBuf> {
    let Ok(entries) = dir.read_dir_utf8() else {
        return Vec::new();
    };
    let mut files: Vec<Utf8PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.extension() == Some("ini") && path.is_file())
        .filter(|path| any_line(path, |line| is_managed_line(extension, line)))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::PropertyKey;
    use crate::platform::Platform;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn otel() -> Extension {
        Extension::opentelemetry(Platform::Posix)
    }

    #[fixture]
    fn dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir")
    }

    fn read(path: &Utf8Path) -> String {
        std::fs::read_to_string(path).expect("read ini")
    }

    #[rstest]
    fn append_creates_missing_file_and_parents(otel: Extension, dir: TempDir) {
        let path = utf8(&dir).join("etc/php/8.3/cli/conf.d/opentelemetry.ini");

        let outcome = append_directive(&path, &otel).expect("append");

        assert_eq!(outcome, AppendOutcome::Appended);
        assert_eq!(read(&path), "extension=opentelemetry.so\n");
    }

    #[rstest]
    fn append_twice_writes_once(otel: Extension, dir: TempDir) {
        let path = utf8(&dir).join("opentelemetry.ini");

        append_directive(&path, &otel).expect("first append");
        let second = append_directive(&path, &otel).expect("second append");

        assert_eq!(second, AppendOutcome::AlreadyPresent);
        assert_eq!(read(&path).matches("extension=").count(), 1);
    }

    #[rstest]
    fn append_keeps_existing_content_on_its_own_line(otel: Extension, dir: TempDir) {
        let path = utf8(&dir).join("php.ini");
        std::fs::write(&path, "memory_limit=512M").expect("seed ini");

        append_directive(&path, &otel).expect("append");

        assert_eq!(read(&path), "memory_limit=512M\nextension=opentelemetry.so\n");
    }

    #[rstest]
    fn commented_directive_does_not_count_as_present(otel: Extension, dir: TempDir) {
        let path = utf8(&dir).join("php.ini");
        std::fs::write(&path, ";extension=opentelemetry.so\n").expect("seed ini");

        assert_eq!(
            append_directive(&path, &otel).expect("append"),
            AppendOutcome::Appended
        );
    }

    #[rstest]
    #[case::active("memory_limit=512M\nextension=opentelemetry.so\n", true)]
    #[case::commented(";extension=opentelemetry.so\n", false)]
    #[case::hook_only("auto_prepend_file=/var/www/otel/autoload.php\n", false)]
    fn has_directive_ignores_inactive_lines(
        otel: Extension,
        dir: TempDir,
        #[case] text: &str,
        #[case] expected: bool,
    ) {
        let path = utf8(&dir).join("php.ini");
        std::fs::write(&path, text).expect("seed ini");

        assert_eq!(has_directive(&path, &otel), expected);
    }

    #[rstest]
    fn has_directive_treats_missing_file_as_absent(otel: Extension, dir: TempDir) {
        assert!(!has_directive(&utf8(&dir).join("absent.ini"), &otel));
    }

    #[rstest]
    fn comment_out_preserves_unrelated_lines(otel: Extension) {
        let text = "[PHP]\r\nmemory_limit=512M\r\nextension=opentelemetry.so\r\nextension=redis.so";

        let (out, changed) = comment_out(text, &otel);

        assert_eq!(changed, 1);
        assert_eq!(
            out,
            "[PHP]\r\nmemory_limit=512M\r\n; [removed by php-apm-installer] extension=opentelemetry.so\r\nextension=redis.so"
        );
    }

    #[rstest]
    #[case::prepend("auto_prepend_file=/var/www/otel/autoload.php", true)]
    #[case::quoted_prepend("auto_prepend_file = \"/var/www/otel/autoload.php\"", true)]
    #[case::other_prepend("auto_prepend_file=/srv/app/bootstrap.php", false)]
    #[case::directive("extension=opentelemetry", true)]
    fn managed_lines(otel: Extension, #[case] line: &str, #[case] expected: bool) {
        assert_eq!(is_managed_line(&otel, line), expected);
    }

    #[rstest]
    fn shared_file_is_rewritten_not_deleted(otel: Extension, dir: TempDir) {
        let path = utf8(&dir).join("php.ini");
        std::fs::write(&path, "extension=opentelemetry.so\nmemory_limit=256M\n").expect("seed ini");

        let removal = remove_directives(&path, &otel).expect("remove");

        assert_eq!(removal, Removal::Commented(1));
        assert_eq!(
            read(&path),
            "; [removed by php-apm-installer] extension=opentelemetry.so\nmemory_limit=256M\n"
        );
    }

    #[rstest]
    fn dedicated_file_is_deleted(otel: Extension, dir: TempDir) {
        let path = utf8(&dir).join("opentelemetry.ini");
        std::fs::write(&path, "extension=opentelemetry.so\n").expect("seed ini");

        assert_eq!(remove_directives(&path, &otel).expect("remove"), Removal::Deleted);
        assert!(!path.exists());
    }

    #[rstest]
    fn missing_and_clean_files_are_untouched(otel: Extension, dir: TempDir) {
        let root = utf8(&dir);
        let clean = root.join("php.ini");
        std::fs::write(&clean, "memory_limit=256M\n").expect("seed ini");

        assert_eq!(
            remove_directives(&root.join("absent.ini"), &otel).expect("remove"),
            Removal::Untouched
        );
        assert_eq!(remove_directives(&clean, &otel).expect("remove"), Removal::Untouched);
        assert_eq!(read(&clean), "memory_limit=256M\n");
    }

    #[rstest]
    fn candidates_include_managed_files_in_scan_and_sibling_dirs(otel: Extension, dir: TempDir) {
        let root = utf8(&dir);
        let cli = root.join("php/8.3/cli/conf.d");
        let fpm = root.join("php/8.3/fpm/conf.d");
        std::fs::create_dir_all(&cli).expect("cli dir");
        std::fs::create_dir_all(&fpm).expect("fpm dir");
        std::fs::write(cli.join("20-redis.ini"), "extension=redis.so\n").expect("redis ini");
        std::fs::write(cli.join("99-custom.ini"), "extension=opentelemetry.so\n").expect("custom");
        std::fs::write(fpm.join("mw.wordpress.ini"), format!("auto_prepend_file={OTEL_AUTOLOAD_PATH}\n"))
            .expect("wordpress ini");

        let mut props = RuntimeProperties::default();
        props.insert(PropertyKey::ScanDirectory, cli.as_str());
        props.insert(PropertyKey::MainConfigFile, root.join("php/8.3/cli/php.ini").as_str());
        let mut target = ConfigTarget::default();
        target.push(cli.join("opentelemetry.ini"));

        let candidates = uninstall_candidates(&target, &props, &otel);

        assert_eq!(
            candidates,
            vec![
                cli.join("opentelemetry.ini"),
                root.join("php/8.3/cli/php.ini"),
                cli.join("99-custom.ini"),
                fpm.join("mw.wordpress.ini"),
            ]
        );
    }
}
