//! Node configuration
//!
//! Boot-time configuration of the PC-Table node. Defaults mirror the values
//! the module has always shipped with; `build.rs` forwards overrides from a
//! `.env` file or the build environment, and [`NodeConfig::from_build_env`]
//! applies and validates them once at startup. A configuration that fails
//! validation is fatal: the firmware refuses to boot rather than run with
//! undefined timing.

use core::fmt;

use embassy_time::Duration;
use heapless::{String, Vec};

use crate::Topic;

/// Longest topic the node handles
pub const MAX_TOPIC_LEN: usize = 64;

/// Longest hostname, also the MQTT client id and DHCP hostname
pub const MAX_HOSTNAME_LEN: usize = 32;

/// Maximum number of inbound command routes
pub const MAX_COMMAND_ROUTES: usize = 4;

/// Longest logical actuator name
pub const MAX_ACTUATOR_NAME_LEN: usize = 24;

/// Longest accepted interval, about 49 days
pub const MAX_INTERVAL_MS: u64 = u32::MAX as u64;

/// Longest keep-alive the MQTT CONNECT packet can carry
pub const MAX_KEEP_ALIVE_S: u64 = u16::MAX as u64;

/// Default configuration constants
pub mod defaults {
    pub const HOSTNAME: &str = "pc-table";
    pub const BROKER_HOST: &str = "cosy-hub.local";
    pub const BROKER_PORT: u16 = 1883;

    /// Minimum spacing between two MQTT connection attempts
    pub const RECONNECT_INTERVAL_MS: u64 = 5000;
    pub const LIVENESS_INTERVAL_MS: u64 = 10000;
    pub const MEASUREMENT_INTERVAL_MS: u64 = 10000;
    pub const KEEP_ALIVE_S: u64 = 15;

    /// The DHT11 on this table reads about two degrees high
    pub const TEMP_CORRECTION: f32 = -2.0;

    pub const TOPIC_MODULES: &str = "modules";
    pub const TOPIC_TEMP: &str = "sensors/temp";
    pub const TOPIC_HUMID: &str = "sensors/humid";
    pub const TOPIC_LIGHT_CHAIN_MAIN: &str = "light/chain/main";
    pub const TOPIC_LIGHT_CHAIN_LIVING: &str = "light/chain/living";

    pub const ACTUATOR_CHAIN_MAIN: &str = "chain_main";
    pub const ACTUATOR_CHAIN_LIVING: &str = "chain_living";
}

/// Pin assignment of the PC-Table board
pub mod pins {
    /// Data pin of the DHT11 temperature/humidity sensor
    pub const DHT_SENSOR: u8 = 26;
    /// Buzzer output
    pub const BUZZER: u8 = 25;

    /// Upper rotary encoder (CLK, DT, SW)
    pub const UPPER_ENCODER: (u8, u8, u8) = (23, 19, 18);
    /// Lower rotary encoder (CLK, DT, SW)
    pub const LOWER_ENCODER: (u8, u8, u8) = (16, 27, 14);
}

/// Configuration errors, all fatal at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Key is not part of the recognized option set
    UnknownKey,
    /// Value could not be parsed for its key
    InvalidValue(&'static str),
    /// Value does not fit its bounded buffer
    ValueTooLong(&'static str),
    /// An interval of zero has no defined timing behavior
    ZeroInterval,
    /// Hostname is empty
    EmptyHostname,
    /// Broker host is empty
    EmptyBrokerHost,
    /// Broker port is zero
    InvalidPort,
    /// Calibration offset is NaN or infinite
    InvalidOffset,
    /// Too many command routes
    TooManyRoutes,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownKey => f.write_str("unknown configuration key"),
            ConfigError::InvalidValue(key) => write!(f, "invalid value for {}", key),
            ConfigError::ValueTooLong(key) => write!(f, "value too long for {}", key),
            ConfigError::ZeroInterval => f.write_str("intervals must be greater than zero"),
            ConfigError::EmptyHostname => f.write_str("hostname must not be empty"),
            ConfigError::EmptyBrokerHost => f.write_str("broker host must not be empty"),
            ConfigError::InvalidPort => f.write_str("broker port must not be zero"),
            ConfigError::InvalidOffset => f.write_str("calibration offset must be finite"),
            ConfigError::TooManyRoutes => f.write_str("too many command routes"),
        }
    }
}

/// Inbound command topic and the actuator flag it drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRoute {
    pub topic: Topic,
    pub actuator: String<MAX_ACTUATOR_NAME_LEN>,
}

impl CommandRoute {
    pub fn new(topic: &str, actuator: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            topic: bounded(topic, "command topic")?,
            actuator: bounded(actuator, "actuator")?,
        })
    }
}

/// Topic layout of the node
#[derive(Debug, Clone, PartialEq)]
pub struct TopicConfig {
    /// Root of the per-module liveness topics, joined with the hostname
    pub modules_root: Topic,
    pub temperature: Topic,
    pub humidity: Topic,
    /// Subscribed command topics, also the dispatch table
    pub commands: Vec<CommandRoute, MAX_COMMAND_ROUTES>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        let mut commands = Vec::new();
        for (topic, actuator) in [
            (
                defaults::TOPIC_LIGHT_CHAIN_MAIN,
                defaults::ACTUATOR_CHAIN_MAIN,
            ),
            (
                defaults::TOPIC_LIGHT_CHAIN_LIVING,
                defaults::ACTUATOR_CHAIN_LIVING,
            ),
        ] {
            if let Ok(route) = CommandRoute::new(topic, actuator) {
                let _ = commands.push(route);
            }
        }

        Self {
            modules_root: Topic::try_from(defaults::TOPIC_MODULES).unwrap_or_default(),
            temperature: Topic::try_from(defaults::TOPIC_TEMP).unwrap_or_default(),
            humidity: Topic::try_from(defaults::TOPIC_HUMID).unwrap_or_default(),
            commands,
        }
    }
}

/// WiFi credentials
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkConfig {
    pub ssid: String<32>,
    pub password: String<64>,
}

/// Complete node configuration
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub hostname: String<MAX_HOSTNAME_LEN>,
    pub broker_host: String<64>,
    pub broker_port: u16,
    pub reconnect_interval: Duration,
    pub liveness_interval: Duration,
    pub measurement_interval: Duration,
    pub keep_alive: Duration,
    /// Additive correction applied to the raw temperature reading
    pub temperature_offset: f32,
    pub link: LinkConfig,
    pub topics: TopicConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: String::try_from(defaults::HOSTNAME).unwrap_or_default(),
            broker_host: String::try_from(defaults::BROKER_HOST).unwrap_or_default(),
            broker_port: defaults::BROKER_PORT,
            reconnect_interval: Duration::from_millis(defaults::RECONNECT_INTERVAL_MS),
            liveness_interval: Duration::from_millis(defaults::LIVENESS_INTERVAL_MS),
            measurement_interval: Duration::from_millis(defaults::MEASUREMENT_INTERVAL_MS),
            keep_alive: Duration::from_secs(defaults::KEEP_ALIVE_S),
            temperature_offset: defaults::TEMP_CORRECTION,
            link: LinkConfig::default(),
            topics: TopicConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Defaults overridden by the values injected by `build.rs`, validated
    pub fn from_build_env() -> Result<Self, ConfigError> {
        Self::from_pairs([
            ("WIFI_SSID", env!("PC_TABLE_WIFI_SSID")),
            ("WIFI_PASSWORD", env!("PC_TABLE_WIFI_PASSWORD")),
            ("HOSTNAME", env!("PC_TABLE_HOSTNAME")),
            ("MQTT_BROKER_HOST", env!("PC_TABLE_MQTT_BROKER_HOST")),
            ("MQTT_BROKER_PORT", env!("PC_TABLE_MQTT_BROKER_PORT")),
            ("MQTT_RECONNECT_MS", env!("PC_TABLE_MQTT_RECONNECT_MS")),
            ("MQTT_KEEP_ALIVE_S", env!("PC_TABLE_MQTT_KEEP_ALIVE_S")),
            ("LIVENESS_INTERVAL_MS", env!("PC_TABLE_LIVENESS_INTERVAL_MS")),
            (
                "MEASUREMENT_INTERVAL_MS",
                env!("PC_TABLE_MEASUREMENT_INTERVAL_MS"),
            ),
            ("TEMP_CORRECTION", env!("PC_TABLE_TEMP_CORRECTION")),
        ])
    }

    /// Defaults overridden by `(key, value)` pairs, validated
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.apply(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply one option. Empty values keep the current setting.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "WIFI_SSID" => self.link.ssid = bounded(value, "WIFI_SSID")?,
            "WIFI_PASSWORD" => self.link.password = bounded(value, "WIFI_PASSWORD")?,
            _ if value.is_empty() => {
                if !Self::is_known_key(key) {
                    return Err(ConfigError::UnknownKey);
                }
            }
            "HOSTNAME" => self.hostname = bounded(value, "HOSTNAME")?,
            "MQTT_BROKER_HOST" => self.broker_host = bounded(value, "MQTT_BROKER_HOST")?,
            "MQTT_BROKER_PORT" => {
                self.broker_port = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("MQTT_BROKER_PORT"))?
            }
            "MQTT_RECONNECT_MS" => {
                self.reconnect_interval = parse_millis(value, "MQTT_RECONNECT_MS")?
            }
            "MQTT_KEEP_ALIVE_S" => {
                let secs: u64 = value
                    .parse()
                    .ok()
                    .filter(|secs| *secs <= MAX_KEEP_ALIVE_S)
                    .ok_or(ConfigError::InvalidValue("MQTT_KEEP_ALIVE_S"))?;
                self.keep_alive = Duration::from_secs(secs);
            }
            "LIVENESS_INTERVAL_MS" => {
                self.liveness_interval = parse_millis(value, "LIVENESS_INTERVAL_MS")?
            }
            "MEASUREMENT_INTERVAL_MS" => {
                self.measurement_interval = parse_millis(value, "MEASUREMENT_INTERVAL_MS")?
            }
            "TEMP_CORRECTION" => {
                self.temperature_offset = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("TEMP_CORRECTION"))?
            }
            _ => return Err(ConfigError::UnknownKey),
        }
        Ok(())
    }

    fn is_known_key(key: &str) -> bool {
        matches!(
            key,
            "HOSTNAME"
                | "MQTT_BROKER_HOST"
                | "MQTT_BROKER_PORT"
                | "MQTT_RECONNECT_MS"
                | "MQTT_KEEP_ALIVE_S"
                | "LIVENESS_INTERVAL_MS"
                | "MEASUREMENT_INTERVAL_MS"
                | "TEMP_CORRECTION"
        )
    }

    /// Check the configuration for values the node cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = Duration::from_ticks(0);
        if self.reconnect_interval == zero
            || self.liveness_interval == zero
            || self.measurement_interval == zero
        {
            return Err(ConfigError::ZeroInterval);
        }
        let longest = Duration::from_millis(MAX_INTERVAL_MS);
        for (interval, key) in [
            (self.reconnect_interval, "MQTT_RECONNECT_MS"),
            (self.liveness_interval, "LIVENESS_INTERVAL_MS"),
            (self.measurement_interval, "MEASUREMENT_INTERVAL_MS"),
        ] {
            if interval > longest {
                return Err(ConfigError::InvalidValue(key));
            }
        }
        if self.keep_alive < Duration::from_secs(1)
            || self.keep_alive > Duration::from_secs(MAX_KEEP_ALIVE_S)
        {
            return Err(ConfigError::InvalidValue("MQTT_KEEP_ALIVE_S"));
        }
        if self.hostname.is_empty() {
            return Err(ConfigError::EmptyHostname);
        }
        if self.broker_host.is_empty() {
            return Err(ConfigError::EmptyBrokerHost);
        }
        if self.broker_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if !self.temperature_offset.is_finite() {
            return Err(ConfigError::InvalidOffset);
        }
        Ok(())
    }

    /// Liveness topic of this module, `<modules_root>/<hostname>`
    pub fn liveness_topic(&self) -> Result<Topic, crate::NodeError> {
        crate::join_topics(&self.topics.modules_root, &self.hostname)
    }

    /// Add a command route to the subscription and dispatch tables
    pub fn add_command_route(&mut self, topic: &str, actuator: &str) -> Result<(), ConfigError> {
        let route = CommandRoute::new(topic, actuator)?;
        self.topics
            .commands
            .push(route)
            .map_err(|_| ConfigError::TooManyRoutes)
    }
}

fn bounded<const N: usize>(value: &str, key: &'static str) -> Result<String<N>, ConfigError> {
    String::try_from(value).map_err(|_| ConfigError::ValueTooLong(key))
}

fn parse_millis(value: &str, key: &'static str) -> Result<Duration, ConfigError> {
    let ms: u64 = value
        .parse()
        .ok()
        .filter(|ms| *ms <= MAX_INTERVAL_MS)
        .ok_or(ConfigError::InvalidValue(key))?;
    Ok(Duration::from_millis(ms))
}
