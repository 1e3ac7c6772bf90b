use anyhow::Context;
use buffer::RollingBuffer;
use clap::Parser;
use config::Config;
use db::Journal;
use mqtt::MqttSession;
use sensor::Sensor;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use telemetry::TelemetryLoop;

mod buffer;
mod config;
mod db;
mod measurement;
mod mqtt;
mod sensor;
mod telemetry;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    TermLogger::init(
        config.level_filter()?,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    if let Err(e) = run(config).await {
        log::error!("{e:#}");
    }

    Ok(())
}

pub async fn run(config: Config) -> Result<(), anyhow::Error> {
    let sensor = Sensor::new(config.min_temperature, config.max_temperature, config.seed)
        .context("Failed to initialize simulated sensor")?;

    let session = MqttSession::new(&config).context("Failed to initialize MQTT client")?;
    log::info!(
        "Connecting to {} as {}",
        session.address(),
        config.client_id
    );

    let mut telemetry = TelemetryLoop::new(
        session,
        sensor,
        RollingBuffer::new(config.buffer_capacity),
        config.topic.clone(),
        config.interval(),
    );

    if let Some(path) = &config.journal {
        let journal = Journal::open(path).context("Failed to initialize journal")?;
        journal.init().context("Failed to initialize journal")?;
        log::info!("Journaling payloads to {}", path.display());
        telemetry = telemetry.with_journal(journal);
    }

    telemetry
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => log::info!("Simulation stopped by user"),
                Err(e) => log::error!("Failed to wait for Ctrl+C signal: {e}"),
            }
        })
        .await;

    Ok(())
}
