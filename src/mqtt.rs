//! MQTT client settings
//!
//! The wire protocol is `rust-mqtt`'s. This module pins down how the node
//! uses it: MQTT v5 session parameters, the packet size limit announced to
//! the broker, and how broker reason codes map onto [`TransportError`].
//!
//! The broker must speak MQTT v5, the client has no 3.1.1 mode.

use embassy_time::Duration;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;

use crate::session::TransportError;

/// MQTT v5 properties carried by the client configuration
pub const MAX_PROPERTIES: usize = 5;

/// Size of each of the client's send and receive buffers.
///
/// Announced to the broker as the Maximum Packet Size of the session. A
/// compliant broker discards messages that would exceed it instead of
/// delivering them, so an oversized retained command never reaches the node.
pub const PACKET_BUFFER_SIZE: usize = 512;

/// Packet identifier seed
const PACKET_ID_SEED: u64 = 20_000;

pub type NodeClientConfig<'a> = ClientConfig<'a, MAX_PROPERTIES, CountingRng>;

/// Client configuration for a session as `client_id`
pub fn client_config(client_id: &str, keep_alive: Duration) -> NodeClientConfig<'_> {
    let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(PACKET_ID_SEED));
    config.add_client_id(client_id);
    config.keep_alive = keep_alive_secs(keep_alive);
    config.max_packet_size = PACKET_BUFFER_SIZE as u32;
    config.add_max_packet_size_as_prop();
    config
}

/// Keep-alive as carried by CONNECT, saturating at the field's range
pub fn keep_alive_secs(keep_alive: Duration) -> u16 {
    u16::try_from(keep_alive.as_secs()).unwrap_or(u16::MAX)
}

/// Failure of an operation on an open session
pub fn transport_error(code: ReasonCode) -> TransportError {
    match code {
        ReasonCode::NetworkError => TransportError::Network,
        ReasonCode::BuffError => TransportError::BufferTooSmall,
        _ => TransportError::Protocol,
    }
}

/// Failure of the CONNECT/CONNACK handshake. Anything the broker answered
/// with is a refusal carrying its reason code.
pub fn handshake_error(code: ReasonCode) -> TransportError {
    match code {
        ReasonCode::NetworkError | ReasonCode::BuffError => transport_error(code),
        refused => TransportError::Refused(refused.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_parameters() {
        let config = client_config("pc-table", Duration::from_secs(15));

        assert_eq!(config.keep_alive, 15);
        assert_eq!(config.max_packet_size, PACKET_BUFFER_SIZE as u32);
        // Maximum Packet Size goes out with CONNECT
        assert_eq!(config.properties.len(), 1);
    }

    #[test]
    fn keep_alive_saturates() {
        assert_eq!(keep_alive_secs(Duration::from_secs(60)), 60);
        assert_eq!(keep_alive_secs(Duration::from_secs(100_000)), u16::MAX);
    }

    #[test]
    fn reason_codes_map_to_transport_errors() {
        assert_eq!(
            transport_error(ReasonCode::NetworkError),
            TransportError::Network
        );
        assert_eq!(
            transport_error(ReasonCode::BuffError),
            TransportError::BufferTooSmall
        );
        assert_eq!(
            transport_error(ReasonCode::ImplementationSpecificError),
            TransportError::Protocol
        );
    }

    #[test]
    fn handshake_refusals_keep_the_reason_code() {
        assert_eq!(
            handshake_error(ReasonCode::NotAuthorized),
            TransportError::Refused(0x87)
        );
        assert_eq!(
            handshake_error(ReasonCode::ServerUnavailable),
            TransportError::Refused(0x88)
        );
        assert_eq!(
            handshake_error(ReasonCode::NetworkError),
            TransportError::Network
        );
    }
}
