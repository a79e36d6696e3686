//! CLI entry point
//!
//! Thin wrapper: parse options, install the log subscriber at the
//! requested verbosity, hand over to the library orchestrator, and exit
//! with its code.

#![forbid(unsafe_code)]

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rtlbmc::Options;

/// Map the 0..10 verbosity scale onto tracing levels; 6 (status) is the
/// default, matching `info`.
fn filter_for(verbosity: u32) -> EnvFilter {
    let level = match verbosity {
        0..=1 => "error",
        2..=3 => "warn",
        4..=7 => "info",
        8 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn main() -> anyhow::Result<()> {
    let options = Options::parse();

    tracing_subscriber::fmt()
        .with_env_filter(filter_for(options.verbosity.unwrap_or(6)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot install log subscriber: {e}"))?;

    std::process::exit(rtlbmc::run(&options));
}
