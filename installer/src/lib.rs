//! PHP APM installer library.
//!
//! This crate discovers the PHP runtimes installed on a host, provisions the
//! OpenTelemetry extension into each of them idempotently, verifies that it
//! loads, and installs the framework instrumentation for Laravel and
//! WordPress projects. It is used by the `php-apm-installer` CLI binary and
//! can be consumed programmatically for testing or custom workflows.
//!
//! # Modules
//!
//! - [`cli`] - Command-line argument definitions
//! - [`command`] - External command execution with timeouts
//! - [`context`] - Run-scoped settings and the accumulated run log
//! - [`engine`] - Per-binary install and uninstall orchestration
//! - [`environment`] - OpenTelemetry environment defaults and Apache wiring
//! - [`error`] - Fatal and per-binary error types
//! - [`extension`] - Extension naming and directive matching
//! - [`fetch`] - Extension artefact fetching with pickle
//! - [`ini`] - Directive append and removal in ini files
//! - [`introspect`] - Runtime property extraction from `php -i`
//! - [`locator`] - PHP binary discovery and deduplication
//! - [`platform`] - Operating-system conventions
//! - [`project`] - Framework detection and composer installation
//! - [`targets`] - Configuration target resolution
//! - [`telemetry`] - Installation tracking
//! - [`tooling`] - Tool preconditions and downloads
//! - [`verify`] - Post-install verification

pub mod cli;
pub mod command;
pub mod context;
pub mod engine;
pub mod environment;
pub mod error;
pub mod extension;
pub mod fetch;
pub mod ini;
pub mod introspect;
pub mod locator;
pub mod platform;
pub mod project;
pub mod targets;
pub mod telemetry;
pub mod tooling;
pub mod verify;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
