//! 🚀 bkx-cli — the front door, the bouncer, the maitre d' of bkx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Loads config, sets up logging, reads an NDJSON file, publishes it,
//! prints a receipt. The library does the heavy lifting. Like a manager. 🦆

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use bkx::client::ShutdownSignal;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// 🚀 main() — where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Find the config file (first arg, or `bkx.toml`)
/// 3. Load config (the moment of truth)
/// 4. Run the thing, with Ctrl-C wired to a graceful stop
/// 5. Print the summary, or handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 🎯 first arg, or the ol' reliable
    let path_arg = std::env::args().nth(1).unwrap_or_else(|| "bkx.toml".to_string());
    let config_file = Path::new(&path_arg);
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't even check whether the configuration file exists. If it's a relative path, \
             try an absolute one. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let app_config = bkx::app_config::load_config(config_file)
        .context("💀 In bkx-cli, main, we couldn't load the config. Take a look at the file, and at your BKX_* environment.")?;

    // 🛑 Ctrl-C: stop starting new publishes, let the in-flight ones land
    let shutdown = ShutdownSignal::new();
    let on_interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 interrupt received; finishing in-flight publishes, skipping the rest");
            on_interrupt.trigger();
        }
    });

    let started = Instant::now();
    match bkx::run_until(app_config, shutdown).await {
        Ok(stats) => {
            println!("{}", bkx::summary::render_summary(&stats, started.elapsed()));
            if stats.failed > 0 {
                std::process::exit(2);
            }
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.to_lowercase().contains("connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }
            if err.downcast_ref::<bkx::AllHostsUnreachable>().is_some() {
                the_vibes_are_giving_connection_issues = true;
            }
            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the cluster isn't reachable. Double-check `client.hosts`, \
                    and that the thing behind them is actually running. Even servers need a nudge sometimes. ☕"
                );
            }
            std::process::exit(1);
        }
    }
}
