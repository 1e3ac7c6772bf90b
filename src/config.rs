use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use rumqttc::QoS;

/// Largest temperature magnitude accepted for either bound.
pub const MAX_ABS_TEMPERATURE: f64 = 1.0e6;
pub const MAX_BUFFER_CAPACITY: usize = 10_000;
pub const MAX_INTERVAL_SECS: u64 = 86_400;
/// MQTT carries the keep-alive as a 16-bit number of seconds.
pub const MAX_KEEP_ALIVE_SECS: u64 = u16::MAX as u64;
pub const MAX_CONNECT_TIMEOUT_SECS: u64 = 3_600;

/// Publishes simulated temperature readings to an MQTT topic.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// Broker host name or address
    #[arg(long, env = "SIM_BROKER_HOST", default_value = "localhost")]
    pub broker_host: String,

    #[arg(long, env = "SIM_BROKER_PORT", default_value_t = 1883)]
    pub broker_port: u16,

    /// Topic the payloads are published to
    #[arg(long, env = "SIM_TOPIC", default_value = "esp32/temperature")]
    pub topic: String,

    #[arg(long, env = "SIM_CLIENT_ID", default_value = "ESP32_Simulator")]
    pub client_id: String,

    /// MQTT quality of service for publishes (0, 1 or 2)
    #[arg(long, env = "SIM_QOS", default_value_t = 0)]
    pub qos: u8,

    #[arg(long, env = "SIM_MIN_TEMPERATURE", default_value_t = 20.0, allow_negative_numbers = true)]
    pub min_temperature: f64,

    #[arg(long, env = "SIM_MAX_TEMPERATURE", default_value_t = 30.0, allow_negative_numbers = true)]
    pub max_temperature: f64,

    /// Number of recent readings the moving average is taken over
    #[arg(long, env = "SIM_BUFFER_CAPACITY", default_value_t = 5)]
    pub buffer_capacity: usize,

    /// Seconds between two published readings
    #[arg(long, env = "SIM_INTERVAL_SECS", default_value_t = 10)]
    pub interval_secs: u64,

    #[arg(long, env = "SIM_KEEP_ALIVE_SECS", default_value_t = 5)]
    pub keep_alive_secs: u64,

    /// How long to wait for the broker to acknowledge the connection
    #[arg(long, env = "SIM_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Seed for reproducible readings
    #[arg(long, env = "SIM_SEED")]
    pub seed: Option<u64>,

    /// SQLite file every published payload is also written to
    #[arg(long, env = "SIM_JOURNAL")]
    pub journal: Option<PathBuf>,

    #[arg(long, env = "SIM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(
            self.min_temperature.is_finite() && self.max_temperature.is_finite(),
            "Temperature bounds must be finite"
        );
        anyhow::ensure!(
            self.min_temperature.abs() <= MAX_ABS_TEMPERATURE
                && self.max_temperature.abs() <= MAX_ABS_TEMPERATURE,
            "Temperature bounds must lie within ±{MAX_ABS_TEMPERATURE}"
        );
        anyhow::ensure!(
            self.min_temperature <= self.max_temperature,
            "Minimum temperature {} is greater than maximum {}",
            self.min_temperature,
            self.max_temperature
        );
        anyhow::ensure!(
            (1..=MAX_BUFFER_CAPACITY).contains(&self.buffer_capacity),
            "Buffer capacity must be between 1 and {MAX_BUFFER_CAPACITY}"
        );
        anyhow::ensure!(
            (1..=MAX_INTERVAL_SECS).contains(&self.interval_secs),
            "Interval must be between 1 and {MAX_INTERVAL_SECS} seconds"
        );
        anyhow::ensure!(
            self.keep_alive_secs <= MAX_KEEP_ALIVE_SECS,
            "Keep-alive must be at most {MAX_KEEP_ALIVE_SECS} seconds"
        );
        anyhow::ensure!(
            (1..=MAX_CONNECT_TIMEOUT_SECS).contains(&self.connect_timeout_secs),
            "Connect timeout must be between 1 and {MAX_CONNECT_TIMEOUT_SECS} seconds"
        );
        anyhow::ensure!(!self.topic.is_empty(), "Topic must not be empty");
        self.qos()?;
        self.level_filter()?;
        Ok(())
    }

    pub fn qos(&self) -> Result<QoS, anyhow::Error> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            n => Err(anyhow::anyhow!("Invalid QoS {n}, expected 0, 1 or 2")),
        }
    }

    pub fn level_filter(&self) -> Result<LevelFilter, anyhow::Error> {
        self.log_level
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid log level: {}", self.log_level))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
