use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use event_throttle_core::clock::SystemClock;
use event_throttle_core::config::Config;
use event_throttle_core::doif::DoIf;
use event_throttle_core::event::JsonEvent;
use event_throttle_core::throttle::{Registry, Throttle, Verdict};

/// Reads newline-delimited JSON events from stdin, applies a configured
/// DoIf predicate and Throttle rule set, and prints a pass/drop verdict per
/// event. This exercises the library boundary; it is not itself a feature
/// of the core.
#[derive(Parser)]
#[command(name = "event-throttle-demo")]
#[command(about = "Demo harness for the DoIf predicate and Throttle rate limiter")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("event_throttle_core={}", cli.log_level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting event-throttle demo v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    info!(pipeline = %config.pipeline, "configuration loaded from {}", cli.config);

    let predicate = config.do_if.as_ref().map(DoIf::build).transpose()?;

    let registry = Registry::new();
    let throttle = config
        .throttle
        .as_ref()
        .map(|cfg| Throttle::start(&config.pipeline, cfg, &registry, Arc::new(SystemClock)))
        .transpose()?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = match JsonEvent::from_raw(line.into_bytes()) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unparseable event");
                continue;
            }
        };

        if let Some(predicate) = &predicate {
            if !predicate.check(&event) {
                writeln!(out, "skip")?;
                continue;
            }
        }

        match &throttle {
            Some(throttle) => match throttle.charge(&event) {
                Verdict::Pass => writeln!(out, "pass")?,
                Verdict::Drop => writeln!(out, "drop")?,
            },
            None => writeln!(out, "pass")?,
        }
    }

    if let Some(throttle) = throttle {
        throttle.stop();
    }

    Ok(())
}
