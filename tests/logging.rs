// tests/logging.rs

use nodeflow::cli::LogLevel;
use nodeflow::logging::filter_directives;

#[test]
fn defaults_to_info() {
    assert_eq!(filter_directives(None, None), "info");
    assert_eq!(filter_directives(None, Some("  ")), "info");
}

#[test]
fn bare_env_level_becomes_the_default() {
    assert_eq!(filter_directives(None, Some("DEBUG")), "debug");
}

#[test]
fn cli_level_wins_over_env_level_but_keeps_targets() {
    assert_eq!(
        filter_directives(
            Some(LogLevel::Warn),
            Some("trace, nodeflow::waiter=debug,nodeflow::tasks=trace")
        ),
        "warn,nodeflow::waiter=debug,nodeflow::tasks=trace"
    );
}

#[test]
fn targeted_directives_alone_keep_the_info_default() {
    assert_eq!(
        filter_directives(None, Some("nodeflow::engine=debug")),
        "info,nodeflow::engine=debug"
    );
}
