#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod config;
mod db;
mod discord;
mod limits;
mod parsers;
mod relay;
mod translator;
mod utils;
mod web;

use config::Config;
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = Arc::new(Config::load(cli.config.as_deref())?);
    utils::logging::init_tracing(&config.logging);
    info!("channel translate relay starting up");

    let db_manager = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    let gateway = Arc::new(discord::DiscordGateway::new(config.clone()));
    let chat = Arc::new(gateway.chat_client());
    let gemini = Arc::new(translator::GeminiTranslator::new(
        &config.translator,
        config.gemini_api_key(),
    )?);

    let relay_core = Arc::new(relay::RelayCore::new(
        &config,
        db_manager.guild_store(),
        db_manager.mapping_store(),
        db_manager.usage_store(),
        chat,
        gemini,
    ));
    gateway.set_relay(relay_core.clone()).await;

    let sweep_relay = relay_core.clone();
    let sweep_interval = config.relay.retention_sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = sweep_relay.prune_expired_mappings().await {
                error!("retention sweep failed: {err}");
            }
        }
    });

    let web_handle = if config.web.enabled {
        let web_server = WebServer::new(config.clone(), db_manager.clone()).await?;
        tokio::spawn(async move {
            if let Err(err) = web_server.start().await {
                error!("web server error: {err}");
            }
        })
    } else {
        tokio::spawn(async { std::future::pending::<()>().await })
    };

    let gateway_task = gateway.clone();
    let gateway_handle = tokio::spawn(async move {
        match gateway_task.start().await {
            // The gateway connection lives in its own task; this one only
            // terminates main if the login loop gives up.
            Ok(()) => std::future::pending::<()>().await,
            Err(err) => error!("discord gateway error: {err}"),
        }
    });

    tokio::select! {
        _ = web_handle => {},
        _ = gateway_handle => {},
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    gateway.stop().await?;
    info!("channel translate relay shutting down");
    Ok(())
}
