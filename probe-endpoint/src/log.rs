use clap::ValueEnum;
use std::io::{self, IsTerminal};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Level {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Silent => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Info => LevelFilter::INFO,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Full,
    /// Multi-line human readable output
    Pretty,
    /// One JSON object per line, for log collectors
    Json,
}

/// Install the global subscriber. `RUST_LOG` directives override `level`.
pub fn init_tracing(level: Level, format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();

    let stderr = io::stderr;
    let ansi = stderr().is_terminal();

    match format {
        LogFormat::Full => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_writer(stderr)
                .with_ansi(ansi);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
        LogFormat::Pretty => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_writer(stderr)
                .with_ansi(ansi)
                .pretty();
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
        LogFormat::Json => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_writer(stderr)
                .json()
                .with_current_span(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
    }
}
