pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

/// Builds the default terminal logger. Components receive a parent `Logger`
/// and derive children with their own key/value context.
pub fn init() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Default logging config must parse");

    config.build_logger().expect("Logger construction failed")
}
