//! Tests for installer CLI parsing and default behaviours.

use super::*;
use clap::CommandFactory;
use rstest::rstest;

fn install(args: &[&str]) -> InstallArgs {
    let cli = Cli::parse_from(std::iter::once("php-apm-installer").chain(args.iter().copied()));
    match cli.command {
        Command::Install(args) => args,
        Command::Uninstall(_) => panic!("expected Install command"),
    }
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn install_parses_defaults() {
    let args = install(&["install"]);
    assert!(args.common.extra_dirs.is_empty());
    assert!(args.common.search_prefix.is_none());
    assert!(!args.common.no_color);
    assert!(args.project_dir.is_none());
    assert!(!args.skip_dependencies);
    assert!(!args.skip_tooling);
    assert!(!args.no_telemetry);
    assert_eq!(args.agent_config, Utf8PathBuf::from("/etc/mw-agent/agent-config.yaml"));
    assert_eq!(args.command_timeout, 120);
}

#[test]
fn install_collects_repeated_extra_dirs() {
    let args = install(&[
        "install",
        "--extra-dir",
        "/opt/php/conf.d",
        "--extra-dir",
        "/srv/php/conf.d",
    ]);
    assert_eq!(
        args.common.extra_dirs,
        vec![
            Utf8PathBuf::from("/opt/php/conf.d"),
            Utf8PathBuf::from("/srv/php/conf.d"),
        ]
    );
}

#[rstest]
#[case::skip_dependencies("--skip-dependencies")]
#[case::skip_tooling("--skip-tooling")]
#[case::no_telemetry("--no-telemetry")]
#[case::no_color("--no-color")]
fn install_accepts_switches(#[case] flag: &str) {
    let args = install(&["install", flag]);
    let set = [
        args.skip_dependencies,
        args.skip_tooling,
        args.no_telemetry,
        args.common.no_color,
    ];
    assert_eq!(set.iter().filter(|on| **on).count(), 1);
}

#[test]
fn install_parses_paths_and_timeout() {
    let args = install(&[
        "install",
        "--project-dir",
        "/var/www/shop",
        "--agent-config",
        "/tmp/agent.yaml",
        "--command-timeout",
        "30",
        "--search-prefix",
        "/chroot",
    ]);
    assert_eq!(args.project_dir, Some(Utf8PathBuf::from("/var/www/shop")));
    assert_eq!(args.agent_config, Utf8PathBuf::from("/tmp/agent.yaml"));
    assert_eq!(args.command_timeout, 30);
    assert_eq!(args.common.search_prefix, Some(Utf8PathBuf::from("/chroot")));
}

#[test]
fn uninstall_parses_common_options() {
    let cli = Cli::parse_from([
        "php-apm-installer",
        "uninstall",
        "--extra-dir",
        "/opt/php/conf.d",
        "--no-color",
    ]);
    assert!(matches!(cli.command, Command::Uninstall(_)));
    assert_eq!(cli.common().extra_dirs.len(), 1);
    assert!(cli.common().no_color);
}

#[test]
fn uninstall_rejects_install_only_flags() {
    let result = Cli::try_parse_from(["php-apm-installer", "uninstall", "--skip-tooling"]);
    assert!(result.is_err());
}

#[test]
fn subcommand_is_required() {
    let result = Cli::try_parse_from(["php-apm-installer"]);
    assert!(result.is_err());
}

#[test]
fn non_numeric_timeout_is_rejected() {
    let result =
        Cli::try_parse_from(["php-apm-installer", "install", "--command-timeout", "soon"]);
    assert!(result.is_err());
}

#[test]
fn install_args_default_matches_bare_install() {
    let parsed = install(&["install"]);
    let default = InstallArgs::default();
    assert_eq!(parsed.agent_config, default.agent_config);
    assert_eq!(parsed.command_timeout, default.command_timeout);
    assert_eq!(parsed.skip_tooling, default.skip_tooling);
}
