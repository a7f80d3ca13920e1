use std::process::ExitCode;

use clap::Parser;
use ratequeue::{map_async, CancellationToken, DispatchConfig, DispatchError, Dispatcher};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Look up a TV show and list its episodes.
///
/// Connection settings come from the RATEQUEUE_* environment variables.
#[derive(Debug, Parser)]
struct Args {
    /// Show to search for
    query: String,

    /// Give up after this many retries when rate limited
    #[arg(long)]
    max_retries: Option<u32>,

    /// Episodes formatted between pauses
    #[arg(long, default_value_t = ratequeue::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

fn format_episode(episode: &Value) -> String {
    format!(
        "S{:02}E{:02}  {}",
        episode["season"].as_u64().unwrap_or(0),
        episode["number"].as_u64().unwrap_or(0),
        episode["name"].as_str().unwrap_or("(untitled)"),
    )
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = DispatchConfig::from_env();
    if args.max_retries.is_some() {
        config.max_retries = args.max_retries;
    }

    let dispatcher = match Dispatcher::from_config(&config) {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            error!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let show = match dispatcher.find_show(&args.query).await {
        Ok(show) => show,
        Err(DispatchError::NotFound) => {
            println!("no show matches {:?}", args.query);
            return ExitCode::FAILURE;
        }
        Err(err) => {
            error!("search failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    info!(name = %show["name"], "found show");

    let episodes = show["_embedded"]["episodes"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    match map_async(episodes, |episode| format_episode(&episode), args.batch_size, &token).await {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(cancelled) => {
            warn!("{cancelled}");
            ExitCode::FAILURE
        }
    }
}
