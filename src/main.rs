use anyhow::{bail, Result};

use courier::config::{self, Config};
use courier::diagnostics;
use courier::{SendOutcome, Telemetry};

const USAGE: &str = "usage: courier [status|send]";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config::ensure_directories(&config)?;
    // Leave an editable file behind on first run
    if !config::config_file_path().exists() {
        config.save()?;
    }

    // Initialize file logging BEFORE any tracing calls
    let log_file_info = diagnostics::init_file_logging(&config::logs_dir())?;

    if let Ok(count) =
        diagnostics::prune_old_logs(&config::logs_dir(), diagnostics::DEFAULT_KEEP_FILES)
    {
        if count > 0 {
            tracing::info!("Cleaned up {} old log files", count);
        }
    }

    tracing::info!("Logging to: {}", log_file_info.path.display());

    let command = std::env::args().nth(1).unwrap_or_else(|| "status".to_string());
    let telemetry = Telemetry::builder(config).capture_faults(false).build()?;

    let result = match command.as_str() {
        "status" => {
            print_status(&telemetry);
            Ok(())
        }
        "send" => send(&telemetry).await,
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => Err(anyhow::anyhow!("unknown command '{other}'\n{USAGE}")),
    };

    telemetry.shutdown();
    result
}

fn print_status(telemetry: &Telemetry) {
    let settings = telemetry.settings();
    println!(
        "level filter: {}  quota: {} bytes",
        settings.log_level(),
        settings.max_log_store_size()
    );
    if telemetry.previous_run_faulted() {
        println!("previous run recorded an undelivered fault");
    }
    for status in telemetry.status() {
        println!(
            "{:<10} enabled={:<5} active={}B overflow={}B buffer={}B{}",
            status.channel,
            settings.channel_enabled(status.channel),
            status.active_bytes,
            status.overflow_bytes,
            status.buffer_bytes,
            if status.pending_delivery {
                "  (delivery pending)"
            } else {
                ""
            }
        );
    }
}

async fn send(telemetry: &Telemetry) -> Result<()> {
    let mut failures = 0;
    for (channel, result) in telemetry.flush().await {
        match result {
            Ok(SendOutcome::Delivered { records }) => {
                println!("{channel}: delivered {records} records")
            }
            Ok(SendOutcome::NothingToSend) => println!("{channel}: nothing to send"),
            Err(e) => {
                failures += 1;
                tracing::warn!(%channel, error = %e, retryable = e.is_retryable(), "Send failed");
                if e.is_retryable() {
                    println!("{channel}: failed, records kept for the next send: {e}");
                } else {
                    println!("{channel}: failed: {e}");
                }
            }
        }
    }
    if failures > 0 {
        bail!("{failures} channel(s) failed to deliver");
    }
    Ok(())
}
