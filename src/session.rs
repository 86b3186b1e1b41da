//! Bus session manager
//!
//! Owns the MQTT session of the node: rate-limited reconnects, topic
//! resubscription on every new session, publishing, and draining inbound
//! messages. The transport itself is injected through [`BusTransport`].

use core::fmt;

use embassy_time::Instant;
use heapless::Vec;
use log::{debug, info, warn};

use crate::config::{MAX_COMMAND_ROUTES, MAX_HOSTNAME_LEN, NodeConfig};
use crate::state_machine::{Action, SessionEvent, SessionState, SessionStateMachine};
use crate::timer::IntervalTimer;
use crate::{ConfigError, NodeError, Topic};

/// Largest inbound payload kept; longer payloads are truncated
pub const MAX_INBOUND_PAYLOAD: usize = 64;

/// Inbound messages handled per loop pass
pub const MAX_INBOUND_PER_PASS: usize = 4;

/// Transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// TCP connect, DNS, read or write failed
    Network,
    /// Broker did not answer in time
    Timeout,
    /// Broker refused the connection with this CONNACK reason code
    Refused(u8),
    /// Broker sent something that is not valid MQTT
    Protocol,
    /// Connection closed by the peer
    Closed,
    /// Packet does not fit the transport buffers
    BufferTooSmall,
}

impl TransportError {
    /// Status code logged for failed handshakes. Negative values are local
    /// failures, positive values the broker's CONNACK reason code.
    pub fn code(&self) -> i16 {
        match self {
            TransportError::Timeout => -4,
            TransportError::Closed => -3,
            TransportError::Network => -2,
            TransportError::Protocol => -5,
            TransportError::BufferTooSmall => -6,
            TransportError::Refused(code) => i16::from(*code),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network => f.write_str("network failure"),
            TransportError::Timeout => f.write_str("timeout"),
            TransportError::Refused(code) => write!(f, "refused by broker ({})", code),
            TransportError::Protocol => f.write_str("protocol violation"),
            TransportError::Closed => f.write_str("connection closed"),
            TransportError::BufferTooSmall => f.write_str("buffer too small"),
        }
    }
}

/// Outbound message, constructed, sent and dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    /// Retained by the broker as the topic's last known value
    pub durable: bool,
}

/// Inbound message as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: Topic,
    pub payload: Vec<u8, MAX_INBOUND_PAYLOAD>,
}

impl InboundMessage {
    /// Build a message, truncating an oversized payload
    pub fn new(topic: &str, payload: &[u8]) -> Result<Self, NodeError> {
        let topic = Topic::try_from(topic).map_err(|_| NodeError::TopicOverflow)?;
        let len = payload.len().min(MAX_INBOUND_PAYLOAD);
        let payload = Vec::from_slice(&payload[..len]).map_err(|_| NodeError::PayloadOverflow)?;
        Ok(Self { topic, payload })
    }
}

/// Publish/subscribe transport of the bus session
#[allow(async_fn_in_trait)]
pub trait BusTransport {
    /// Open a session as `client_id`
    async fn connect(&mut self, client_id: &str) -> Result<(), TransportError>;

    /// Subscribe to the whole topic set in one request
    async fn subscribe(&mut self, topics: &[Topic]) -> Result<(), TransportError>;

    async fn publish(&mut self, message: &Message<'_>) -> Result<(), TransportError>;

    /// Next inbound message if one is ready, never waits for one
    async fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError>;

    /// Whether the transport still considers the session open
    fn is_connected(&self) -> bool;
}

/// Outcome of one [`BusSession::reconnect`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Session was already up
    AlreadyConnected,
    /// Link down or reconnect timer still running
    Deferred,
    /// Handshake succeeded, subscriptions sent
    Connected,
    /// Handshake failed with this status
    Failed(TransportError),
}

/// Bus session manager
pub struct BusSession<T> {
    transport: T,
    state_machine: SessionStateMachine,
    reconnect_timer: IntervalTimer,
    client_id: heapless::String<MAX_HOSTNAME_LEN>,
    subscriptions: Vec<Topic, MAX_COMMAND_ROUTES>,
}

impl<T: BusTransport> BusSession<T> {
    /// Session for the node described by `config`. The reconnect timer
    /// starts expired so the first attempt happens right away.
    pub fn new(transport: T, config: &NodeConfig) -> Result<Self, ConfigError> {
        let subscriptions = config
            .topics
            .commands
            .iter()
            .map(|route| route.topic.clone())
            .collect();

        Ok(Self {
            transport,
            state_machine: SessionStateMachine::new(),
            reconnect_timer: IntervalTimer::expired(config.reconnect_interval)?,
            client_id: config.hostname.clone(),
            subscriptions,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state_machine.get_current_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state_machine.is_connected()
    }

    pub fn state_machine(&self) -> &SessionStateMachine {
        &self.state_machine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn subscriptions(&self) -> &[Topic] {
        &self.subscriptions
    }

    /// Bring the session up if it is down and an attempt is due.
    /// At most one handshake per call.
    pub async fn reconnect(&mut self, link_up: bool, now: Instant) -> ReconnectOutcome {
        self.check_transport();

        if self.state_machine.is_connected() {
            return ReconnectOutcome::AlreadyConnected;
        }

        if !link_up || !self.reconnect_timer.has_elapsed(now) {
            return ReconnectOutcome::Deferred;
        }

        self.state_machine.handle_event(SessionEvent::ReconnectDue);
        if !self.state_machine.update().contains(&Action::StartHandshake) {
            return ReconnectOutcome::Deferred;
        }

        info!("[MQTT] Connecting to MQTT-Server ... ");
        let (event, outcome) = match self.transport.connect(&self.client_id).await {
            Ok(()) => {
                info!("[MQTT] Connecting to MQTT-Server ... done!");
                (SessionEvent::HandshakeSucceeded, ReconnectOutcome::Connected)
            }
            Err(e) => {
                warn!(
                    "[MQTT] Connecting to MQTT-Server ... failed! Error-Code ({})",
                    e.code()
                );
                (SessionEvent::HandshakeFailed, ReconnectOutcome::Failed(e))
            }
        };

        self.state_machine.handle_event(event);
        if self.state_machine.actions_for(event).contains(&Action::ArmReconnectTimer) {
            self.reconnect_timer.reset(now);
        }

        if self.state_machine.update().contains(&Action::Resubscribe) {
            self.resubscribe().await;
        }

        outcome
    }

    /// Subscribe to the fixed topic set, best effort
    async fn resubscribe(&mut self) {
        match self.transport.subscribe(&self.subscriptions).await {
            Ok(()) => {
                for topic in self.subscriptions.iter() {
                    debug!("[MQTT] Subscribed to '{}'", topic.as_str());
                }
            }
            Err(e) => warn!(
                "[MQTT] Subscribing to {} topics failed: {}, staying connected",
                self.subscriptions.len(),
                e
            ),
        }
        self.state_machine.mark_resubscribed();
    }

    /// Publish on the current session
    pub async fn publish(&mut self, message: &Message<'_>) -> Result<(), NodeError> {
        self.check_transport();
        if !self.state_machine.is_connected() {
            return Err(NodeError::NotConnected);
        }

        match self.transport.publish(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.on_transport_error(e);
                Err(NodeError::Transport(e))
            }
        }
    }

    /// Drain up to [`MAX_INBOUND_PER_PASS`] inbound messages
    pub async fn poll_inbound(&mut self) -> Vec<InboundMessage, MAX_INBOUND_PER_PASS> {
        let mut inbound = Vec::new();
        self.check_transport();

        while self.state_machine.update().contains(&Action::PollInbound) && !inbound.is_full() {
            match self.transport.poll().await {
                Ok(Some(message)) => {
                    let _ = inbound.push(message);
                }
                Ok(None) => break,
                Err(e) => {
                    self.on_transport_error(e);
                    break;
                }
            }
        }

        inbound
    }

    /// Pick up a session the transport dropped on its own
    fn check_transport(&mut self) {
        if self.state_machine.is_connected() && !self.transport.is_connected() {
            warn!("[MQTT] Transport reports disconnect");
            self.state_machine
                .handle_event(SessionEvent::TransportDisconnected);
        }
    }

    fn on_transport_error(&mut self, e: TransportError) {
        match e {
            TransportError::Network | TransportError::Closed | TransportError::Timeout => {
                warn!("[MQTT] Session broken: {}", e);
                self.state_machine
                    .handle_event(SessionEvent::TransportDisconnected);
            }
            // The session survives a single malformed or oversized packet
            _ => warn!("[MQTT] Transport error: {}", e),
        }
    }
}
