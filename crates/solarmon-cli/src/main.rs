mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use solarmon_ble::{BtleplugAdapter, DeviceManager};
use solarmon_core::Config;
use solarmon_notify::{AnySink, EventPublisher, LogSink, TelegramSink};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if cli.dry_run {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    run(config, cli.telegram_token).await
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

fn build_sink(config: &Config, token: Option<String>) -> Result<AnySink> {
    let Some(telegram) = &config.telegram else {
        info!("No [telegram] section, notifications go to the log");
        return Ok(LogSink.into());
    };
    let Some(token) = token else {
        warn!("TELEGRAM_BOT_TOKEN is not set, notifications go to the log");
        return Ok(LogSink.into());
    };

    let sink = TelegramSink::new(token, telegram.chat_id.clone())?
        .with_silent_by_default(telegram.silent_by_default);
    info!(chat_id = %telegram.chat_id, "Publishing to Telegram");
    Ok(sink.into())
}

async fn run(config: Config, token: Option<String>) -> Result<()> {
    let mut publisher = EventPublisher::new(build_sink(&config, token)?, &config.events);

    let adapter = BtleplugAdapter::new()
        .await
        .context("opening Bluetooth adapter")?;
    let mut handle = DeviceManager::new(adapter, config)?.start().await?;
    info!("Monitoring started, press Ctrl-C to stop");

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
            event = handle.recv() => {
                let Some(event) = event else {
                    warn!("Device manager stopped");
                    break;
                };
                if let Err(e) = publisher.publish(&event).await {
                    warn!("Failed to publish {}: {}", event, e);
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}
