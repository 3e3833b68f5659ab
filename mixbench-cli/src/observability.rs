use std::env;
use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::{Config, LogFormat};

pub fn init_tracing(config: &Config) {
    let (level, env_filter) = parse_rust_log(config.logging.level);

    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format = match config.logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => format.pretty().boxed(),
        LogFormat::Auto | LogFormat::Simplified => format.with_ansi(false).compact().boxed(),
        LogFormat::Pretty => format.pretty().boxed(),
        LogFormat::Json => format.json().flatten_event(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

/// Returns the effective level and a filter enabling the benchmark crates.
///
/// `RUST_LOG` overrides the configured level. If it is not a plain level, it is used as the full
/// filter directive.
pub fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    // Try to parse RUST_LOG as a simple level filter and apply default levels internally.
    // Otherwise, use it literally if the user knows which overrides they want to run.
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        mixbench=TRACE,\
        mixbench_cli=TRACE,\
        mixbench_storage=TRACE,\
        ",
    );

    (level, env_filter)
}
