//! Structured logging init (ambient). The teacher declares
//! `tracing`/`tracing-subscriber` with the `fmt`/`env-filter`/`json`
//! features in `Cargo.toml` but never calls `tracing_subscriber::fmt()`
//! from `main.rs` — every `src/commands/*.rs` logs through bare
//! `println!`/a handful of unrouted `info!`/`warn!` calls. This module
//! actually wires the declared features up, seeded from `--loglevel`.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Initializes the global `tracing` subscriber once, at process startup.
/// `json` selects the structured JSON formatter (`spec.md` §6 "Optional
/// human-readable log stream (structured JSON)"); otherwise falls back to
/// the human-readable compact formatter.
pub fn init(level: LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter_directive()));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }
}
