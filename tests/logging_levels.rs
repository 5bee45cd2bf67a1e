use clap::Parser;
use framedag::cli::{CliArgs, LogLevel};
use framedag::logging::{parse_level_str, resolve_level};
use tracing::Level;

#[test]
fn cli_flag_beats_environment() {
    assert_eq!(resolve_level(Some(LogLevel::Warn), Some("trace")), Level::WARN);
}

#[test]
fn environment_is_used_without_a_flag() {
    assert_eq!(resolve_level(None, Some("debug")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some(" Warning ")), Level::WARN);
}

#[test]
fn falls_back_to_info() {
    assert_eq!(resolve_level(None, None), Level::INFO);
    assert_eq!(resolve_level(None, Some("loud")), Level::INFO);
    assert_eq!(parse_level_str("loud"), None);
}

#[test]
fn cli_parses_run_options() {
    let args = CliArgs::parse_from([
        "framedag",
        "--config",
        "demos/image_chain.toml",
        "--ticks",
        "3",
        "--log-level",
        "debug",
        "--dry-run",
    ]);
    assert_eq!(args.config, "demos/image_chain.toml");
    assert_eq!(args.ticks, Some(3));
    assert_eq!(args.interval_ms, 16);
    assert!(args.dry_run);
    assert!(matches!(args.log_level, Some(LogLevel::Debug)));

    let defaults = CliArgs::parse_from(["framedag"]);
    assert_eq!(defaults.config, "Framedag.toml");
    assert_eq!(defaults.ticks, None);
    assert!(defaults.log_level.is_none());
}
