//! OpenTelemetry environment defaults and Apache wiring.
//!
//! The agent SDK installed by composer reads its configuration from `OTEL_*`
//! variables. Values already present in the environment win; the rest fall
//! back to the Middleware agent defaults. Variables are handed to child
//! processes per invocation and never written into this process.

use crate::command::{CommandRunner, RunOptions, display_command};
use crate::context::RunContext;
use crate::error::Result;
use camino::Utf8Path;
use std::io::Write;
use std::time::Duration;

/// Apache's environment file on Debian-style hosts.
pub const APACHE_ENVVARS: &str = "/etc/apache2/envvars";

/// Endpoint of a locally running Middleware agent.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:9320";

const COMPOSER_PROPAGATORS: &str = "baggage,tracecontext,b3multi";
const APACHE_PROPAGATORS: &str = "baggage,tracecontext";

/// Which consumer the variables are resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvTarget {
    /// Composer and pickle subprocesses.
    Composer,
    /// Apache's `envvars` file.
    Apache,
}

/// Resolved `OTEL_*` variables in a stable order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtelEnvironment {
    vars: Vec<(String, String)>,
}

impl OtelEnvironment {
    /// Resolves the variables from the process environment.
    #[must_use]
    pub fn from_process(target: EnvTarget) -> Self {
        Self::resolve(target, |key| std::env::var(key).ok())
    }

    /// Resolves the variables using `lookup`. Empty values count as unset.
    pub fn resolve<F>(target: EnvTarget, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_owned());

        let propagators = match target {
            EnvTarget::Composer => COMPOSER_PROPAGATORS,
            EnvTarget::Apache => APACHE_PROPAGATORS,
        };
        let service_name = get("OTEL_SERVICE_NAME")
            .or_else(|| get("MW_SERVICE_NAME"))
            .unwrap_or_else(|| format!("service-{}", std::process::id()));
        let endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT")
            .or_else(|| get("MW_TARGET"))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());

        let mut vars = vec![
            ("OTEL_PHP_AUTOLOAD_ENABLED".to_owned(), or("OTEL_PHP_AUTOLOAD_ENABLED", "true")),
            ("OTEL_TRACES_EXPORTER".to_owned(), or("OTEL_TRACES_EXPORTER", "otlp")),
            (
                "OTEL_EXPORTER_OTLP_PROTOCOL".to_owned(),
                or("OTEL_EXPORTER_OTLP_PROTOCOL", "http/json"),
            ),
            ("OTEL_PROPAGATORS".to_owned(), or("OTEL_PROPAGATORS", propagators)),
            ("OTEL_SERVICE_NAME".to_owned(), service_name),
            ("OTEL_EXPORTER_OTLP_ENDPOINT".to_owned(), endpoint),
        ];
        if target == EnvTarget::Composer {
            vars.push((
                "COMPOSER_ALLOW_SUPERUSER".to_owned(),
                or("COMPOSER_ALLOW_SUPERUSER", "1"),
            ));
        }
        Self { vars }
    }

    /// Looks up a resolved variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// The resolved service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.get("OTEL_SERVICE_NAME").unwrap_or_default()
    }

    /// All variables, in resolution order.
    #[must_use]
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// Renders the variables as shell `export` lines.
    #[must_use]
    pub fn render_exports(&self) -> String {
        self.vars
            .iter()
            .map(|(key, value)| format!("export {key}=\"{value}\"\n"))
            .collect()
    }
}

/// Appends `export` lines for `env` to Apache's `envvars` file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or written.
pub fn append_apache_envvars(path: &Utf8Path, env: &OtelEnvironment) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(env.render_exports().as_bytes())?;
    log::debug!("appended {} exports to {path}", env.vars().len());
    Ok(())
}

const RESTART_COMMANDS: &[(&str, &[&str])] = &[
    ("service", &["apache2", "restart"]),
    ("httpd", &["-k", "restart"]),
];

/// Restarts Apache so it picks up the new environment.
///
/// Tries `service apache2 restart` and then `httpd -k restart`. A host
/// where neither works only gets a warning; the instrumentation is active
/// after the next manual restart.
pub fn restart_apache(ctx: &mut RunContext, runner: &dyn CommandRunner, timeout: Duration) {
    let options = RunOptions::strict(timeout);
    for (program, args) in RESTART_COMMANDS {
        match runner.run(program, args, &options) {
            Ok(_) => {
                ctx.log
                    .info("Apache restarted successfully with new environment variables.");
                return;
            }
            Err(err) => log::debug!("{} failed: {err}", display_command(program, args)),
        }
    }
    ctx.log.warn(
        "Failed to restart Apache. Restart it manually to load the new environment variables.",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunSettings, Severity};
    use crate::error::InstallerError;
    use crate::test_utils::{FnRunner, failure_output, success_output};
    use rstest::rstest;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[rstest]
    #[case::composer(EnvTarget::Composer, "baggage,tracecontext,b3multi", 7)]
    #[case::apache(EnvTarget::Apache, "baggage,tracecontext", 6)]
    fn defaults_depend_on_target(
        #[case] target: EnvTarget,
        #[case] propagators: &str,
        #[case] count: usize,
    ) {
        let env = OtelEnvironment::resolve(target, lookup(&[]));

        assert_eq!(env.get("OTEL_PROPAGATORS"), Some(propagators));
        assert_eq!(env.get("OTEL_PHP_AUTOLOAD_ENABLED"), Some("true"));
        assert_eq!(env.get("OTEL_TRACES_EXPORTER"), Some("otlp"));
        assert_eq!(env.get("OTEL_EXPORTER_OTLP_PROTOCOL"), Some("http/json"));
        assert_eq!(env.get("OTEL_EXPORTER_OTLP_ENDPOINT"), Some(DEFAULT_ENDPOINT));
        assert_eq!(
            env.service_name(),
            format!("service-{}", std::process::id())
        );
        assert_eq!(env.vars().len(), count);
    }

    #[test]
    fn middleware_variables_fill_service_and_endpoint() {
        let env = OtelEnvironment::resolve(
            EnvTarget::Composer,
            lookup(&[("MW_SERVICE_NAME", "shop"), ("MW_TARGET", "https://acme.middleware.io")]),
        );
        assert_eq!(env.service_name(), "shop");
        assert_eq!(
            env.get("OTEL_EXPORTER_OTLP_ENDPOINT"),
            Some("https://acme.middleware.io")
        );
    }

    #[test]
    fn explicit_otel_values_win_and_empty_ones_do_not() {
        let env = OtelEnvironment::resolve(
            EnvTarget::Apache,
            lookup(&[
                ("OTEL_SERVICE_NAME", "checkout"),
                ("MW_SERVICE_NAME", "ignored"),
                ("OTEL_TRACES_EXPORTER", ""),
            ]),
        );
        assert_eq!(env.service_name(), "checkout");
        assert_eq!(env.get("OTEL_TRACES_EXPORTER"), Some("otlp"));
    }

    #[test]
    fn process_environment_is_consulted() {
        let env = temp_env::with_var("OTEL_PROPAGATORS", Some("tracecontext"), || {
            OtelEnvironment::from_process(EnvTarget::Composer)
        });
        assert_eq!(env.get("OTEL_PROPAGATORS"), Some("tracecontext"));
    }

    #[test]
    fn envvars_receive_quoted_exports() {
        let dir = TempDir::new().expect("create temp dir");
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("envvars"))
            .expect("utf-8 path");
        std::fs::write(&path, "export APACHE_RUN_USER=www-data\n").expect("seed envvars");
        let env = OtelEnvironment::resolve(
            EnvTarget::Apache,
            lookup(&[("OTEL_SERVICE_NAME", "blog")]),
        );

        append_apache_envvars(&path, &env).expect("append succeeds");

        let content = std::fs::read_to_string(&path).expect("read envvars");
        assert!(content.starts_with("export APACHE_RUN_USER=www-data\n"));
        assert!(content.contains("export OTEL_SERVICE_NAME=\"blog\"\n"));
        assert!(!content.contains("COMPOSER_ALLOW_SUPERUSER"));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn restart_falls_back_to_httpd() {
        let runner = FnRunner::new(|program, _| {
            if program == "service" {
                Ok(failure_output("apache2: unrecognized service"))
            } else {
                Ok(success_output())
            }
        });
        let mut ctx = RunContext::quiet(RunSettings::default());

        restart_apache(&mut ctx, &runner, Duration::from_secs(5));

        assert_eq!(
            runner.command_lines(),
            vec!["service apache2 restart", "httpd -k restart"]
        );
        assert!(ctx.log.contains(Severity::Info, "Apache restarted"));
    }

    #[test]
    fn restart_failure_is_only_a_warning() {
        let runner = FnRunner::new(|program, _| {
            Err(InstallerError::CommandSpawn {
                program: program.to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });
        let mut ctx = RunContext::quiet(RunSettings::default());

        restart_apache(&mut ctx, &runner, Duration::from_secs(5));

        assert!(ctx.log.contains(Severity::Warn, "Failed to restart Apache"));
    }
}
