use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use rand::Rng;

use crate::buffer::RollingBuffer;
use crate::db::Journal;
use crate::measurement::Payload;
use crate::sensor::Sensor;

/// Connection to whatever carries payloads off the device.
pub trait Transport {
    async fn connect(&mut self) -> Result<(), anyhow::Error>;

    /// Hands the payload over without waiting for delivery.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), anyhow::Error>;

    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unstarted,
    Running,
    Stopped,
}

pub struct TelemetryLoop<T, R> {
    transport: T,
    sensor: Sensor<R>,
    buffer: RollingBuffer,
    topic: String,
    interval: Duration,
    journal: Option<Journal>,
    state: State,
}

impl<T: Transport, R: Rng> TelemetryLoop<T, R> {
    pub fn new(
        transport: T,
        sensor: Sensor<R>,
        buffer: RollingBuffer,
        topic: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            sensor,
            buffer,
            topic: topic.into(),
            interval,
            journal: None,
            state: State::Unstarted,
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> State {
        self.state
    }

    #[cfg(test)]
    pub fn buffer(&self) -> &RollingBuffer {
        &self.buffer
    }

    /// Opens the broker session. A failed connection is logged and the loop
    /// carries on regardless.
    pub async fn connect(&mut self) {
        match self.transport.connect().await {
            Ok(()) => log::info!("Connected to MQTT broker"),
            Err(e) => log::error!("Failed to connect: {e:#}"),
        }
        self.state = State::Running;
    }

    pub fn tick(&mut self) -> Result<Payload, anyhow::Error> {
        let temperature = self.sensor.measure();
        self.buffer.push(temperature);
        let payload = Payload::new(temperature, self.buffer.mean());

        let json = payload.to_json().context("Failed to serialize payload")?;
        match self.transport.publish(&self.topic, json.as_bytes()) {
            Ok(()) => log::info!("Published to {}: {json}", self.topic),
            Err(e) => log::warn!("{e:#}"),
        }

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.insert(Local::now(), &payload) {
                log::error!("Failed to write journal: {e:#}");
            }
        }

        Ok(payload)
    }

    /// Ticks once per interval until `shutdown` completes, then stops.
    /// `shutdown` is polled from the start, so it also cuts a slow connect short.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if self.state == State::Unstarted {
            let interrupted = tokio::select! {
                biased;
                _ = &mut shutdown => true,
                _ = self.connect() => false,
            };
            if interrupted {
                self.stop().await;
                return;
            }
        }

        let (min, max) = self.sensor.range();
        log::info!(
            "Publishing readings in [{min}, {max}] to {} every {:?}, averaged over the last {}",
            self.topic,
            self.interval,
            self.buffer.capacity()
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick() {
                        log::error!("{e:#}");
                    }
                }
            }
        }

        self.stop().await;
    }

    pub async fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        self.transport.close().await;
        self.state = State::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::measurement::round2;

    #[derive(Debug, Default)]
    struct Recorded {
        connects: usize,
        closes: usize,
        messages: Vec<(String, String)>,
    }

    #[derive(Debug, Clone, Default)]
    struct FakeTransport {
        refuse_connect: bool,
        connect_delay: Option<Duration>,
        fail_publish: bool,
        recorded: Arc<Mutex<Recorded>>,
    }

    impl Transport for FakeTransport {
        async fn connect(&mut self) -> Result<(), anyhow::Error> {
            self.recorded.lock().unwrap().connects += 1;
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            if self.refuse_connect {
                anyhow::bail!("Broker refused connection, return code 5");
            }
            Ok(())
        }

        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), anyhow::Error> {
            if self.fail_publish {
                anyhow::bail!("Failed to publish to {topic}");
            }
            let payload = String::from_utf8(payload.to_vec())?;
            self.recorded
                .lock()
                .unwrap()
                .messages
                .push((topic.to_string(), payload));
            Ok(())
        }

        async fn close(&mut self) {
            self.recorded.lock().unwrap().closes += 1;
        }
    }

    fn telemetry(transport: FakeTransport) -> TelemetryLoop<FakeTransport, StdRng> {
        let sensor = Sensor::with_rng(StdRng::seed_from_u64(11), 20.0, 30.0).unwrap();
        TelemetryLoop::new(
            transport,
            sensor,
            RollingBuffer::default(),
            "esp32/temperature",
            Duration::from_secs(10),
        )
    }

    fn has_two_decimals(v: f64) -> bool {
        round2(v) == v
    }

    #[test]
    fn test_tick_publishes_payload() {
        let transport = FakeTransport::default();
        let recorded = transport.recorded.clone();
        let mut sim = telemetry(transport);

        let mut payloads = Vec::new();
        for _ in 0..8 {
            let payload = sim.tick().unwrap();
            payloads.push(payload);
            assert!(sim.buffer().len() <= 5);
            assert!((20.0..=30.0).contains(&payload.temperature));
            assert!((20.0..=30.0).contains(&payload.average));
            assert!(has_two_decimals(payload.temperature));
            assert!(has_two_decimals(payload.average));
            assert_eq!(payload.average, round2(sim.buffer().mean()));
        }

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.messages.len(), 8);
        for ((topic, json), payload) in recorded.messages.iter().zip(&payloads) {
            assert_eq!(topic, "esp32/temperature");
            assert_eq!(json, &payload.to_json().unwrap());
            let value: serde_json::Value = serde_json::from_str(json).unwrap();
            let object = value.as_object().unwrap();
            assert_eq!(object.len(), 2);
            assert!(object["temperature"].is_f64());
            assert!(object["average"].is_f64());
        }
    }

    #[test]
    fn test_first_tick_average_equals_reading() {
        let mut sim = telemetry(FakeTransport::default());
        let payload = sim.tick().unwrap();
        assert_eq!(payload.temperature, payload.average);
    }

    #[test]
    fn test_publish_failure_is_not_fatal() {
        let transport = FakeTransport {
            fail_publish: true,
            ..Default::default()
        };
        let mut sim = telemetry(transport);

        assert!(sim.tick().is_ok());
        assert!(sim.tick().is_ok());
        assert_eq!(sim.buffer().len(), 2);
    }

    #[test]
    fn test_tick_writes_journal() {
        let journal = Journal::open_in_memory().unwrap();
        journal.init().unwrap();
        let mut sim = telemetry(FakeTransport::default()).with_journal(journal);

        let first = sim.tick().unwrap();
        let second = sim.tick().unwrap();

        let rows = sim.journal.as_ref().unwrap().latest(10).unwrap();
        assert_eq!(rows, vec![second, first]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let transport = FakeTransport::default();
        let recorded = transport.recorded.clone();
        let mut sim = telemetry(transport);
        assert_eq!(sim.state(), State::Unstarted);

        // Ticks at 0s, 10s and 20s.
        sim.run(tokio::time::sleep(Duration::from_secs(25))).await;

        assert_eq!(sim.state(), State::Stopped);
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.connects, 1);
        assert_eq!(recorded.messages.len(), 3);
        assert_eq!(recorded.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_keeps_ticking() {
        let transport = FakeTransport {
            refuse_connect: true,
            ..Default::default()
        };
        let recorded = transport.recorded.clone();
        let mut sim = telemetry(transport);

        sim.connect().await;
        assert_eq!(sim.state(), State::Running);

        sim.run(tokio::time::sleep(Duration::from_secs(15))).await;

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.connects, 1);
        assert_eq!(recorded.messages.len(), 2);
        assert_eq!(recorded.closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let transport = FakeTransport::default();
        let recorded = transport.recorded.clone();
        let mut sim = telemetry(transport);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let _ = tx.send(());
        });

        let started = tokio::time::Instant::now();
        sim.run(async {
            let _ = rx.await;
        })
        .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(recorded.lock().unwrap().messages.len(), 1);
        assert_eq!(sim.state(), State::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_connect() {
        let transport = FakeTransport {
            connect_delay: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let recorded = transport.recorded.clone();
        let mut sim = telemetry(transport);

        let started = tokio::time::Instant::now();
        sim.run(tokio::time::sleep(Duration::from_secs(1))).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sim.state(), State::Stopped);
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.connects, 1);
        assert!(recorded.messages.is_empty());
        assert_eq!(recorded.closes, 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let transport = FakeTransport::default();
        let recorded = transport.recorded.clone();
        let mut sim = telemetry(transport);

        sim.stop().await;
        sim.stop().await;
        assert_eq!(sim.state(), State::Stopped);
        assert_eq!(recorded.lock().unwrap().closes, 1);
    }
}
