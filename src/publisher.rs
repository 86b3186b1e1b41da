//! Periodic publishers
//!
//! Two independently timer-gated publishers: the liveness heartbeat
//! (`modules/<hostname>`, uptime and version) and the measurement publisher
//! (temperature and humidity, one retained decimal string per channel).

use core::fmt::Write;

use embassy_time::Instant;
use heapless::String;
use log::{info, warn};

use crate::config::NodeConfig;
use crate::dht::SensorError;
use crate::session::{BusSession, BusTransport, Message};
use crate::state::NodeState;
use crate::timer::IntervalTimer;
use crate::{ConfigError, NodeError, Topic, VERSION};

/// Size of the outbound payload buffer
pub const PAYLOAD_BUFFER_SIZE: usize = 128;

/// One raw sensor sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
}

/// Source of temperature/humidity samples
pub trait SensorSource {
    fn read(&mut self) -> Result<Reading, SensorError>;
}

/// Result of one publisher run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Timer has not elapsed
    Idle,
    /// Session down, retried on the next pass
    Deferred,
    /// Every channel went out
    Published,
    /// Sensor failed, nothing published, retried on the next scheduled period
    SensorFailed(SensorError),
    /// At least one publish failed, timer reset
    Failed(NodeError),
}

/// Compact liveness record
pub fn format_liveness(
    uptime_secs: u64,
    version: &str,
) -> Result<String<PAYLOAD_BUFFER_SIZE>, NodeError> {
    let mut payload = String::new();
    write!(
        payload,
        "{{\"uptime\":{},\"version\":\"{}\"}}",
        uptime_secs, version
    )
    .map_err(|_| NodeError::PayloadOverflow)?;
    Ok(payload)
}

/// Measurement value with two fractional digits
pub fn format_measurement(value: f32) -> Result<String<PAYLOAD_BUFFER_SIZE>, NodeError> {
    let mut payload = String::new();
    write!(payload, "{:.2}", value).map_err(|_| NodeError::PayloadOverflow)?;
    Ok(payload)
}

/// Periodic heartbeat on `<modules_root>/<hostname>`
pub struct LivenessPublisher {
    timer: IntervalTimer,
    topic: Topic,
}

impl LivenessPublisher {
    pub fn new(config: &NodeConfig, now: Instant) -> Result<Self, ConfigError> {
        Ok(Self {
            timer: IntervalTimer::new(config.liveness_interval, now)?,
            topic: config
                .liveness_topic()
                .map_err(|_| ConfigError::ValueTooLong("HOSTNAME"))?,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn run<T: BusTransport>(
        &mut self,
        now: Instant,
        state: &NodeState,
        session: &mut BusSession<T>,
    ) -> PublishOutcome {
        if !self.timer.has_elapsed(now) {
            return PublishOutcome::Idle;
        }
        if !session.is_connected() {
            return PublishOutcome::Deferred;
        }

        info!("[PUB] Sending active status ... ");
        let result = match format_liveness(state.uptime_secs(), VERSION) {
            Ok(payload) => {
                session
                    .publish(&Message {
                        topic: &self.topic,
                        payload: payload.as_bytes(),
                        durable: true,
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        self.timer.reset(now);

        match result {
            Ok(()) => {
                info!("[PUB] Sending active status ... done!");
                PublishOutcome::Published
            }
            Err(e) => {
                warn!("[PUB] Sending active status ... failed: {}", e);
                PublishOutcome::Failed(e)
            }
        }
    }
}

/// Periodic temperature/humidity publisher
pub struct MeasurementPublisher<S> {
    sensor: S,
    timer: IntervalTimer,
    temperature_topic: Topic,
    humidity_topic: Topic,
    temperature_offset: f32,
}

impl<S: SensorSource> MeasurementPublisher<S> {
    pub fn new(sensor: S, config: &NodeConfig, now: Instant) -> Result<Self, ConfigError> {
        Ok(Self {
            sensor,
            timer: IntervalTimer::new(config.measurement_interval, now)?,
            temperature_topic: config.topics.temperature.clone(),
            humidity_topic: config.topics.humidity.clone(),
            temperature_offset: config.temperature_offset,
        })
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub async fn run<T: BusTransport>(
        &mut self,
        now: Instant,
        state: &mut NodeState,
        session: &mut BusSession<T>,
    ) -> PublishOutcome {
        if !self.timer.has_elapsed(now) {
            return PublishOutcome::Idle;
        }
        if !session.is_connected() {
            return PublishOutcome::Deferred;
        }

        info!("[PUB] Sending temperature status ... ");
        let reading = match self.sensor.read() {
            Ok(reading) => reading,
            Err(e) => {
                self.timer.advance(now);
                warn!("[PUB] Measurement failed! Error: {}", e.as_str());
                return PublishOutcome::SensorFailed(e);
            }
        };

        state.temperature = reading.temperature + self.temperature_offset;
        state.humidity = reading.humidity;
        info!("[PUB] Temperature: {:.2}", state.temperature);
        info!("[PUB] Humidity: {:.2}", state.humidity);

        let channels = [
            (&self.temperature_topic, state.temperature),
            (&self.humidity_topic, state.humidity),
        ];
        let mut failure = None;
        for (topic, value) in channels {
            let result = match format_measurement(value) {
                Ok(payload) => {
                    session
                        .publish(&Message {
                            topic,
                            payload: payload.as_bytes(),
                            durable: true,
                        })
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("[PUB] Publishing '{}' failed: {}", topic.as_str(), e);
                failure.get_or_insert(e);
            }
        }
        self.timer.reset(now);

        match failure {
            None => {
                info!("[PUB] Done!");
                PublishOutcome::Published
            }
            Some(e) => PublishOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_record_is_compact_json() {
        assert_eq!(
            format_liveness(42, "0.4.0").unwrap(),
            "{\"uptime\":42,\"version\":\"0.4.0\"}"
        );
    }

    #[test]
    fn measurements_have_two_decimals() {
        assert_eq!(format_measurement(21.3).unwrap(), "21.30");
        assert_eq!(format_measurement(47.0).unwrap(), "47.00");
        assert_eq!(format_measurement(-2.5).unwrap(), "-2.50");
        assert_eq!(format_measurement(23.3 - 2.0).unwrap(), "21.30");
    }
}
