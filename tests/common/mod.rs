//! Fakes shared by the scenario tests
#![allow(dead_code)]

use std::collections::VecDeque;

use embassy_time::Instant;
use pc_table::dht::SensorError;
use pc_table::encoder::{InputDevice, RotaryMove};
use pc_table::link::LinkLayer;
use pc_table::publisher::{Reading, SensorSource};
use pc_table::{BusTransport, InboundMessage, Message, NodeConfig, Topic, TransportError};

pub fn at_millis(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

pub fn at_secs(secs: u64) -> Instant {
    Instant::from_secs(secs)
}

/// Default configuration with the options in `pairs` applied
pub fn config(pairs: &[(&str, &str)]) -> NodeConfig {
    NodeConfig::from_pairs(pairs.iter().copied()).expect("test configuration is valid")
}

/// Everything the node did on the bus, in order
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Connect(String),
    Subscribe(String),
    Publish {
        topic: String,
        payload: String,
        durable: bool,
    },
}

pub struct FakeTransport {
    pub events: Vec<BusEvent>,
    /// Scripted handshake results, `default_connect` once empty
    pub connect_results: VecDeque<Result<(), TransportError>>,
    pub default_connect: Result<(), TransportError>,
    pub subscribe_error: Option<TransportError>,
    pub publish_error: Option<TransportError>,
    pub inbound: VecDeque<Result<InboundMessage, TransportError>>,
    pub connected: bool,
}

impl FakeTransport {
    /// Broker that accepts every handshake
    pub fn reachable() -> Self {
        Self {
            events: Vec::new(),
            connect_results: VecDeque::new(),
            default_connect: Ok(()),
            subscribe_error: None,
            publish_error: None,
            inbound: VecDeque::new(),
            connected: false,
        }
    }

    /// Broker that refuses every handshake
    pub fn unreachable() -> Self {
        Self {
            default_connect: Err(TransportError::Network),
            ..Self::reachable()
        }
    }

    pub fn push_inbound(&mut self, topic: &str, payload: &str) {
        let message = InboundMessage::new(topic, payload.as_bytes()).expect("fits");
        self.inbound.push_back(Ok(message));
    }

    /// Broker closed the connection
    pub fn drop_connection(&mut self) {
        self.connected = false;
    }

    pub fn connects(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, BusEvent::Connect(_)))
            .count()
    }

    pub fn subscriptions(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Subscribe(topic) => Some(topic.as_str()),
                _ => None,
            })
            .collect()
    }

    /// `(topic, payload, durable)` of every publish
    pub fn publishes(&self) -> Vec<(&str, &str, bool)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Publish {
                    topic,
                    payload,
                    durable,
                } => Some((topic.as_str(), payload.as_str(), *durable)),
                _ => None,
            })
            .collect()
    }

    pub fn publishes_on(&self, topic: &str) -> Vec<&str> {
        self.publishes()
            .into_iter()
            .filter(|(t, _, _)| *t == topic)
            .map(|(_, payload, _)| payload)
            .collect()
    }
}

impl BusTransport for FakeTransport {
    async fn connect(&mut self, client_id: &str) -> Result<(), TransportError> {
        self.events.push(BusEvent::Connect(client_id.to_string()));
        let result = self
            .connect_results
            .pop_front()
            .unwrap_or(self.default_connect);
        self.connected = result.is_ok();
        result
    }

    async fn subscribe(&mut self, topics: &[Topic]) -> Result<(), TransportError> {
        self.events.extend(
            topics
                .iter()
                .map(|topic| BusEvent::Subscribe(topic.to_string())),
        );
        match self.subscribe_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn publish(&mut self, message: &Message<'_>) -> Result<(), TransportError> {
        if let Some(e) = self.publish_error {
            if matches!(e, TransportError::Network | TransportError::Closed) {
                self.connected = false;
            }
            return Err(e);
        }
        self.events.push(BusEvent::Publish {
            topic: message.topic.to_string(),
            payload: String::from_utf8_lossy(message.payload).into_owned(),
            durable: message.durable,
        });
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        self.inbound.pop_front().transpose()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

pub struct FakeLink {
    pub up: bool,
    pub maintained: usize,
}

impl FakeLink {
    pub fn up() -> Self {
        Self {
            up: true,
            maintained: 0,
        }
    }

    pub fn down() -> Self {
        Self {
            up: false,
            maintained: 0,
        }
    }
}

impl LinkLayer for FakeLink {
    fn is_link_up(&self) -> bool {
        self.up
    }

    fn maintain(&mut self, _now: Instant) {
        self.maintained += 1;
    }
}

/// Sensor answering from a script, failing once the script is exhausted
#[derive(Default)]
pub struct FakeSensor {
    pub script: VecDeque<Result<Reading, SensorError>>,
    pub reads: usize,
}

impl FakeSensor {
    pub fn with_reading(temperature: f32, humidity: f32) -> Self {
        let mut sensor = Self::default();
        sensor.push(temperature, humidity);
        sensor
    }

    pub fn push(&mut self, temperature: f32, humidity: f32) {
        self.script.push_back(Ok(Reading {
            temperature,
            humidity,
        }));
    }

    pub fn push_failure(&mut self, e: SensorError) {
        self.script.push_back(Err(e));
    }
}

impl SensorSource for FakeSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.reads += 1;
        self.script.pop_front().unwrap_or(Err(SensorError::Timeout))
    }
}

#[derive(Default)]
pub struct FakeEncoder {
    pub moves: VecDeque<RotaryMove>,
}

impl InputDevice for FakeEncoder {
    fn poll(&mut self) -> RotaryMove {
        self.moves.pop_front().unwrap_or(RotaryMove::None)
    }
}
