mod chat_client;
mod config;
mod db;

use anyhow::{Context, Result};
use chat_client::ChatClient;
use clap::Parser;
use config::{Args, Config};
use db::PgStore;
use dotenv::dotenv;
use scorekeeper_core::registry::FileRegistrySource;
use scorekeeper_core::{EngineConfig, Poller, RegistryCache};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let engine = EngineConfig::from_env().context("Invalid engine configuration")?;

    info!("Starting Score Reporter...");
    info!(
        "Channel: {} | poll every {:?} | registry: {}",
        config.results_channel_id,
        config.poll_interval,
        config.registry_path.display()
    );

    let pool = db::connect(&config.database_url).await?;
    let store = Arc::new(PgStore::new(pool));
    store.init_schema().await?;

    let transport = Arc::new(ChatClient::new(
        &config.chat_api_base_url,
        config.chat_bot_token.clone(),
    )?);
    let registry = Arc::new(RegistryCache::new(
        engine.league.clone(),
        engine.allow_unknown_maps,
        Arc::new(FileRegistrySource::new(config.registry_path.clone())),
        store.clone(),
    ));

    let poller = Poller::new(
        engine,
        config.results_channel_id.clone(),
        transport,
        store.clone(),
        store.clone(),
        store.clone(),
        registry,
    );

    if args.reload {
        let version = poller.reload_registry().await?;
        info!("Registry reloaded (version {})", version);
    }

    if let Some(start) = &args.from {
        let summary = poller.run_from(start, args.include_start).await?;
        info!("Recovery run complete: {}", summary.to_json());
        return Ok(());
    }

    if args.once {
        poller.run_once().await?;
        return Ok(());
    }

    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = poller.run_once().await {
                    error!("Poll cycle failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Score Reporter stopped");
    Ok(())
}
