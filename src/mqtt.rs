use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::telemetry::Transport;

/// Outstanding requests the client buffers while the broker is unreachable.
pub const REQUEST_CAPACITY: usize = 10;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Broker session backed by `rumqttc`. The network event loop runs in its own
/// task once `connect` has been called.
pub struct MqttSession {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    driver: Option<JoinHandle<()>>,
    qos: QoS,
    connect_timeout: Duration,
    address: String,
}

impl MqttSession {
    pub fn new(config: &Config) -> Result<Self, anyhow::Error> {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Ok(Self {
            client,
            eventloop: Some(eventloop),
            driver: None,
            qos: config.qos()?,
            connect_timeout: config.connect_timeout(),
            address: format!("mqtt://{}:{}", config.broker_host, config.broker_port),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for MqttSession {
    async fn connect(&mut self) -> Result<(), anyhow::Error> {
        let mut eventloop = self
            .eventloop
            .take()
            .context("MQTT session was already connected")?;

        let result = tokio::time::timeout(self.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Timed out after {:?} waiting for {} to acknowledge",
                    self.connect_timeout,
                    self.address
                )
            })
            .and_then(|r| r);

        self.driver = Some(tokio::spawn(drive(eventloop)));

        result
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), anyhow::Error> {
        self.client
            .try_publish(topic, self.qos, false, payload.to_vec())
            .with_context(|| format!("Failed to publish to {topic}"))
    }

    async fn close(&mut self) {
        // Nothing to release when connect never got as far as spawning the driver.
        let Some(mut driver) = self.driver.take() else {
            return;
        };

        if let Err(e) = self.client.try_disconnect() {
            log::warn!("Failed to request disconnect: {e}");
        }
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut driver).await.is_err() {
            driver.abort();
        }
        log::info!("Disconnected from {}", self.address);
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), anyhow::Error> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(anyhow::anyhow!("Broker refused connection, return code {code:?}"));
            }
            Err(e) => return Err(e).context("Failed to connect to MQTT broker"),
        }
    }
}

/// Keeps the client's network traffic flowing until the disconnect request
/// has gone out.
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(Event::Incoming(Packet::ConnAck(_))) => log::info!("Connected to MQTT broker"),
            Ok(_) => {}
            Err(e) => {
                log::debug!("MQTT event loop error: {e}");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}
