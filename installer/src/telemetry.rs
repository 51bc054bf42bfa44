//! Installation tracking.
//!
//! When a Middleware agent is configured on the host, the installer reports
//! that an installation was attempted, and whether it succeeded, to the
//! agent's backend. Tracking is best-effort: a missing configuration or a
//! failed request is logged as a warning and never affects the run.

use crate::context::RunContext;
use crate::error::{InstallerError, Result};
use crate::project::ProjectType;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Default location of the agent configuration.
pub const AGENT_CONFIG_PATH: &str = "/etc/mw-agent/agent-config.yaml";

const TRACKING_TIMEOUT: Duration = Duration::from_secs(5);
const TRACKING_PATH: &str = "api/v1/apm/tracking";
const UNKNOWN_DISTRO: &str = "Unknown Linux distribution";

/// Credentials read from the agent configuration.
///
/// Only `api-key` and `target` are read; the agent's other settings are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Account API key.
    #[serde(rename = "api-key", default)]
    pub api_key: String,
    /// Backend base URL.
    #[serde(default)]
    pub target: String,
}

impl AgentConfig {
    /// Parses the agent's YAML configuration.
    ///
    /// A document with nothing but comments yields an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::AgentConfig`] if `text` is not a YAML
    /// mapping with string `api-key` and `target` values.
    pub fn parse(text: &str) -> Result<Self> {
        let has_content = text
            .lines()
            .map(str::trim)
            .any(|line| !line.is_empty() && !line.starts_with('#') && line != "---");
        if !has_content {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads and parses the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`InstallerError::AgentConfig`] if it cannot be parsed.
    pub fn read(path: &Utf8Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// True when both the key and the target are set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.target.is_empty()
    }

    /// Endpoint that receives tracking events.
    #[must_use]
    pub fn tracking_url(&self) -> String {
        format!(
            "{}/{TRACKING_PATH}/{}",
            self.target.trim_end_matches('/'),
            self.api_key
        )
    }
}

/// Stage of the installation being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackingStatus {
    /// Sent before anything is installed.
    #[serde(rename = "apm_tried")]
    Tried,
    /// Sent after a successful installation.
    #[serde(rename = "apm_installed")]
    Installed,
    /// Sent after a fatal error.
    #[serde(rename = "apm_failed")]
    Failed,
}

impl TrackingStatus {
    /// Reason string accompanying the status.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Tried => "PreInstall tracking",
            Self::Installed | Self::Failed => "PostInstall tracking",
        }
    }

    const fn carries_log(self) -> bool {
        !matches!(self, Self::Tried)
    }
}

/// Facts about the host, gathered once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    /// Host name.
    pub host_id: String,
    /// Operating system family, in PHP's `PHP_OS` spelling.
    pub os_type: String,
    /// Kernel release.
    pub os_version: String,
    /// Distribution name from `/etc/os-release`.
    pub linux_distro: String,
}

impl HostFacts {
    /// Reads the facts from the running host.
    #[must_use]
    pub fn gather() -> Self {
        Self {
            host_id: host_name(),
            os_type: os_type(std::env::consts::OS).to_owned(),
            os_version: read_trimmed("/proc/sys/kernel/osrelease").unwrap_or_default(),
            linux_distro: read_trimmed("/etc/os-release")
                .and_then(|text| distro_name(&text))
                .unwrap_or_else(|| UNKNOWN_DISTRO.to_owned()),
        }
    }
}

fn read_trimmed(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| read_trimmed("/etc/hostname"))
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Maps Rust's OS name to PHP's `PHP_OS` spelling.
#[must_use]
pub fn os_type(os: &str) -> &str {
    match os {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "WINNT",
        "freebsd" => "FreeBSD",
        "netbsd" => "NetBSD",
        "openbsd" => "OpenBSD",
        other => other,
    }
}

/// `NAME` from an `os-release` file.
#[must_use]
pub fn distro_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        let value = line.trim().strip_prefix("NAME=")?;
        let value = value.trim_matches(|c: char| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_owned())
    })
}

/// Run-specific details reported with every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunDetails {
    /// Resolved `OTEL_SERVICE_NAME`.
    pub service_name: String,
    /// Version of the first provisioned runtime, once known.
    pub php_version: String,
    /// Detected framework.
    pub project: Option<ProjectType>,
    /// Version of the detected framework.
    pub framework_version: String,
}

/// JSON body of a tracking request.
#[derive(Debug, Serialize)]
pub struct TrackingPayload {
    status: TrackingStatus,
    metadata: Metadata,
}

#[derive(Debug, Serialize)]
struct Metadata {
    host_id: String,
    os_type: String,
    apm_type: &'static str,
    apm_data: ApmData,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ApmData {
    service_name: String,
    script: &'static str,
    os_version: String,
    php_version: String,
    reason: &'static str,
    framework_type: &'static str,
    linux_distro: String,
    framework_version: String,
}

impl TrackingPayload {
    /// Builds the payload for `status`.
    ///
    /// Post-install events carry the rendered run log.
    #[must_use]
    pub fn new(
        status: TrackingStatus,
        facts: &HostFacts,
        details: &RunDetails,
        log: Vec<String>,
    ) -> Self {
        Self {
            status,
            metadata: Metadata {
                host_id: facts.host_id.clone(),
                os_type: facts.os_type.clone(),
                apm_type: "PHP",
                apm_data: ApmData {
                    service_name: details.service_name.clone(),
                    script: "php-install",
                    os_version: facts.os_version.clone(),
                    php_version: details.php_version.clone(),
                    reason: status.reason(),
                    framework_type: details.project.map_or("", ProjectType::as_str),
                    linux_distro: facts.linux_distro.clone(),
                    framework_version: details.framework_version.clone(),
                },
                message: status.carries_log().then_some(log),
            },
        }
    }
}

/// Delivers tracking requests.
#[cfg_attr(test, mockall::automock)]
pub trait TelemetrySink {
    /// POSTs the JSON `body` to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::Telemetry`] if the request fails.
    fn send(&self, url: &str, body: &str) -> Result<()>;
}

/// Sends requests over HTTP with a short timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpSink;

fn tracking_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(TRACKING_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

impl TelemetrySink for HttpSink {
    fn send(&self, url: &str, body: &str) -> Result<()> {
        tracking_agent()
            .post(url)
            .header("Content-Type", "application/json")
            .send(body)
            .map_err(|err| InstallerError::Telemetry {
                reason: err.to_string(),
            })?;
        Ok(())
    }
}

/// Reports installation progress when an agent is configured.
pub struct Tracker<'a> {
    sink: &'a dyn TelemetrySink,
    config: Option<AgentConfig>,
    facts: HostFacts,
}

impl<'a> Tracker<'a> {
    /// Creates a tracker. `config` is `None` when no agent is configured.
    #[must_use]
    pub fn new(sink: &'a dyn TelemetrySink, config: Option<AgentConfig>, facts: HostFacts) -> Self {
        Self {
            sink,
            config,
            facts,
        }
    }

    /// Reports `status`.
    ///
    /// Nothing is sent without a complete agent configuration.
    pub fn track(&self, ctx: &mut RunContext, status: TrackingStatus, details: &RunDetails) {
        let Some(config) = self.config.as_ref().filter(|c| c.is_complete()) else {
            ctx.log.warn("Invalid configuration: Missing API key or URL");
            return;
        };

        let payload = TrackingPayload::new(status, &self.facts, details, ctx.log.rendered());
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(err) => {
                ctx.log.warn(format!("Warning: Request failed - {err}"));
                return;
            }
        };

        match self.sink.send(&config.tracking_url(), &body) {
            Ok(()) => ctx.log.info("Successfully tracked event"),
            Err(err) => ctx.log.warn(format!("Warning: Request failed - {err}")),
        }
    }
}

/// Loads the agent configuration, logging why tracking is off when it is.
pub fn load_agent_config(ctx: &mut RunContext, path: &Utf8Path) -> Option<AgentConfig> {
    if !path.is_file() {
        ctx.log.warn("APM Tracking: Config file not found");
        return None;
    }
    match AgentConfig::read(path) {
        Ok(config) => Some(config),
        Err(err) => {
            ctx.log
                .warn(format!("APM Tracking: Error reading config file: {err}"));
            None
        }
    }
}
