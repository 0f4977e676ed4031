//! Process-wide tracing setup.
//!
//! Logs always go to stderr; stdout carries command output only.

use std::{env, io};

use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Filter directives, e.g. `MCPL_LOG=launchpad_mcp=debug`. Falls back to `RUST_LOG`.
pub const LOG_ENV: &str = "MCPL_LOG";

/// Set to `json` for JSON-lines logs.
pub const LOG_FORMAT_ENV: &str = "MCPL_LOG_FORMAT";

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let directives = env::var(LOG_ENV)
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_default();
    EnvFilter::builder()
        .with_default_directive(default.into())
        .parse_lossy(directives)
}

/// Install the global subscriber. Logs go to stderr so stdout stays parseable.
pub fn init(verbose: bool) {
    let json = env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter(verbose));

    let _ = if json {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init()
    };
}
