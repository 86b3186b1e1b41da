//! MQTT over embassy-net TCP
//!
//! [`BusTransport`] implementation for the firmware: a `rust-mqtt` client on
//! one TCP socket to the broker. The socket sits behind a mutex so the
//! transport can reopen it underneath the client on every reconnect. Inbound
//! packets are only read once the socket has bytes queued, so
//! [`BusTransport::poll`] never waits for the broker.

use core::net::Ipv4Addr;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{self, TcpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, with_timeout};
use embedded_io_async::{ErrorType, Read, Write};
use log::{debug, info, warn};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

use crate::Topic;
use crate::config::{MAX_COMMAND_ROUTES, NodeConfig};
use crate::mqtt::{self, MAX_PROPERTIES};
use crate::session::{BusTransport, InboundMessage, Message, TransportError};

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest wait for a broker answer (CONNACK, SUBACK, PINGRESP) or for the
/// rest of a packet that started arriving
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP socket to the broker, shared by the transport and its client
pub type BrokerSocket<'a> = Mutex<NoopRawMutex, TcpSocket<'a>>;

/// Byte stream the MQTT client runs on
pub struct SharedSocket<'a>(&'a BrokerSocket<'a>);

impl ErrorType for SharedSocket<'_> {
    type Error = tcp::Error;
}

impl Read for SharedSocket<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.lock().await.read(buf).await
    }
}

impl Write for SharedSocket<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.lock().await.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.lock().await.flush().await
    }
}

type Client<'a> = MqttClient<'a, SharedSocket<'a>, MAX_PROPERTIES, CountingRng>;

/// MQTT session over a single embassy-net TCP socket
pub struct TcpBusTransport<'a> {
    stack: Stack<'a>,
    socket: &'a BrokerSocket<'a>,
    client: Client<'a>,
    broker_host: &'a str,
    broker_port: u16,
    keep_alive: Duration,
    connected: bool,
    last_sent: Instant,
}

impl<'a> TcpBusTransport<'a> {
    /// Transport for the broker in `config`. The client id is the
    /// configured hostname, fixed for the lifetime of the transport.
    pub fn new(
        stack: Stack<'a>,
        socket: &'a BrokerSocket<'a>,
        send_buffer: &'a mut [u8],
        recv_buffer: &'a mut [u8],
        config: &'a NodeConfig,
    ) -> Self {
        let send_len = send_buffer.len();
        let recv_len = recv_buffer.len();
        let client = MqttClient::new(
            SharedSocket(socket),
            send_buffer,
            send_len,
            recv_buffer,
            recv_len,
            mqtt::client_config(config.hostname.as_str(), config.keep_alive),
        );

        Self {
            stack,
            socket,
            client,
            broker_host: config.broker_host.as_str(),
            broker_port: config.broker_port,
            keep_alive: config.keep_alive,
            connected: false,
            last_sent: Instant::from_ticks(0),
        }
    }

    /// Broker address, either an IPv4 literal or a DNS name
    async fn resolve_broker(&self) -> Result<IpAddress, TransportError> {
        if let Ok(addr) = self.broker_host.parse::<Ipv4Addr>() {
            return Ok(IpAddress::Ipv4(addr));
        }

        let addrs = self
            .stack
            .dns_query(self.broker_host, DnsQueryType::A)
            .await
            .map_err(|e| {
                warn!("[MQTT] DNS lookup of '{}' failed: {:?}", self.broker_host, e);
                TransportError::Network
            })?;
        addrs.first().copied().ok_or(TransportError::Network)
    }

    fn drop_session(&mut self, e: TransportError) -> TransportError {
        if self.connected {
            warn!("[MQTT] Dropping broker connection: {}", e);
        }
        self.connected = false;
        // The client only holds the lock for the duration of its own calls
        if let Ok(mut socket) = self.socket.try_lock() {
            socket.abort();
        }
        e
    }

    /// Failure reported by the client. Only an outbound packet that did not
    /// fit the send buffer leaves the stream in a known state.
    fn client_error(&mut self, code: ReasonCode) -> TransportError {
        match mqtt::transport_error(code) {
            TransportError::BufferTooSmall => TransportError::BufferTooSmall,
            e => self.drop_session(e),
        }
    }

    /// Whether an inbound packet started arriving
    fn inbound_pending(&self) -> Result<bool, TransportError> {
        let Ok(socket) = self.socket.try_lock() else {
            return Ok(false);
        };
        if socket.can_recv() {
            Ok(true)
        } else if socket.may_recv() {
            Ok(false)
        } else {
            Err(TransportError::Closed)
        }
    }

    async fn ping_if_idle(&mut self) -> Result<(), TransportError> {
        let idle = Instant::now()
            .checked_duration_since(self.last_sent)
            .unwrap_or(Duration::from_ticks(0));
        if idle < self.keep_alive / 2 {
            return Ok(());
        }

        match with_timeout(RESPONSE_TIMEOUT, self.client.send_ping()).await {
            Ok(Ok(())) => {
                debug!("[MQTT] PINGRESP");
                self.last_sent = Instant::now();
                Ok(())
            }
            Ok(Err(code)) => Err(self.drop_session(mqtt::transport_error(code))),
            Err(_) => Err(self.drop_session(TransportError::Timeout)),
        }
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let addr = self.resolve_broker().await?;
        debug!("[MQTT] Broker resolved to {}", addr);

        {
            let mut socket = self.socket.lock().await;
            let endpoint = (addr, self.broker_port);
            match with_timeout(TCP_CONNECT_TIMEOUT, socket.connect(endpoint)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("[MQTT] TCP connect failed: {:?}", e);
                    return Err(TransportError::Network);
                }
                Err(_) => return Err(TransportError::Timeout),
            }
        }

        match with_timeout(RESPONSE_TIMEOUT, self.client.connect_to_broker()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(code)) => {
                warn!("[MQTT] Broker answered {:?}", code);
                Err(mqtt::handshake_error(code))
            }
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

impl BusTransport for TcpBusTransport<'_> {
    /// The client id was fixed by [`TcpBusTransport::new`]
    async fn connect(&mut self, _client_id: &str) -> Result<(), TransportError> {
        // Start from a closed socket
        self.drop_session(TransportError::Closed);

        self.open().await.map_err(|e| self.drop_session(e))?;
        self.connected = true;
        self.last_sent = Instant::now();
        info!(
            "[MQTT] Session open with {}:{}",
            self.broker_host, self.broker_port
        );
        Ok(())
    }

    async fn subscribe(&mut self, topics: &[Topic]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        if topics.is_empty() {
            return Ok(());
        }

        let filters = topics
            .iter()
            .map(Topic::as_str)
            .take(MAX_COMMAND_ROUTES)
            .collect();
        let subscribe = self
            .client
            .subscribe_to_topics::<MAX_COMMAND_ROUTES>(&filters);
        match with_timeout(RESPONSE_TIMEOUT, subscribe).await {
            Ok(Ok(())) => {
                self.last_sent = Instant::now();
                Ok(())
            }
            Ok(Err(code)) => Err(self.client_error(code)),
            Err(_) => Err(self.drop_session(TransportError::Timeout)),
        }
    }

    async fn publish(&mut self, message: &Message<'_>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }

        let send = self.client.send_message(
            message.topic,
            message.payload,
            QualityOfService::QoS0,
            message.durable,
        );
        match with_timeout(RESPONSE_TIMEOUT, send).await {
            Ok(Ok(())) => {
                self.last_sent = Instant::now();
                Ok(())
            }
            Ok(Err(code)) => Err(self.client_error(code)),
            Err(_) => Err(self.drop_session(TransportError::Timeout)),
        }
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        if !self.connected {
            return Ok(None);
        }

        match self.inbound_pending() {
            Ok(true) => {}
            Ok(false) => {
                self.ping_if_idle().await?;
                return Ok(None);
            }
            Err(e) => return Err(self.drop_session(e)),
        }

        let receive = self.client.receive_message();
        let received = match with_timeout(RESPONSE_TIMEOUT, receive).await {
            Ok(Ok((topic, payload))) => Ok(InboundMessage::new(topic, payload)),
            Ok(Err(code)) => Err(mqtt::transport_error(code)),
            Err(_) => Err(TransportError::Timeout),
        };

        match received {
            Ok(Ok(message)) => Ok(Some(message)),
            Ok(Err(e)) => {
                warn!("[MQTT] Dropped inbound message: {}", e);
                Ok(None)
            }
            // The stream position is unknown after a failed receive
            Err(e) => Err(self.drop_session(e)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
