//! WiFi module for the ESP32 node
//!
//! Station-mode WiFi using esp-wifi 0.14.1 with embassy-net DHCP. Provides the
//! node's [`LinkLayer`]: the link is up once the station is associated and
//! DHCP configured the stack.

use embassy_net::Stack;
use embassy_time::{Duration, Instant};
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController};
use heapless::Vec;
use log::{info, warn};

use crate::config::{ConfigError, LinkConfig};
use crate::link::LinkLayer;
use crate::timer::IntervalTimer;

/// Link errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiFiError {
    /// SSID or password does not fit the driver configuration
    InvalidCredentials,
    /// The driver rejected the request
    Driver,
}

/// DHCP configuration information
#[derive(Debug, Clone)]
pub struct DhcpInfo {
    pub ip_address: [u8; 4],
    pub prefix_len: u8,
    pub gateway: Option<[u8; 4]>,
    pub dns_servers: Vec<[u8; 4], 3>,
}

/// WiFi manager for handling network connectivity with real DHCP
pub struct WiFiManager<'a> {
    controller: WifiController<'a>,
    stack: Stack<'a>,
    is_connected: bool,
    has_ip: bool,
    reconnect_timer: IntervalTimer,
}

impl<'a> WiFiManager<'a> {
    /// Create a new WiFi manager, re-associating at most every `reconnect_interval`
    pub fn new(
        controller: WifiController<'a>,
        stack: Stack<'a>,
        reconnect_interval: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            controller,
            stack,
            is_connected: false,
            has_ip: false,
            reconnect_timer: IntervalTimer::expired(reconnect_interval)?,
        })
    }

    /// Configure the station and start association. Does not wait for it.
    pub fn start(&mut self, link: &LinkConfig) -> Result<(), WiFiError> {
        info!("[WIFI] Connecting to WiFi network: {}", link.ssid.as_str());

        let client_config = ClientConfiguration {
            ssid: link
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WiFiError::InvalidCredentials)?,
            password: link
                .password
                .as_str()
                .try_into()
                .map_err(|_| WiFiError::InvalidCredentials)?,
            auth_method: if link.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };

        self.controller
            .set_configuration(&Configuration::Client(client_config))
            .map_err(|_| WiFiError::Driver)?;
        self.controller.start().map_err(|_| WiFiError::Driver)?;
        self.controller.connect().map_err(|_| WiFiError::Driver)?;
        Ok(())
    }

    /// Get current IP address from DHCP
    pub fn get_ip_address(&self) -> Option<[u8; 4]> {
        self.stack
            .config_v4()
            .map(|config| config.address.address().octets())
    }

    /// Get detailed DHCP configuration information
    pub fn get_dhcp_info(&self) -> Option<DhcpInfo> {
        let config = self.stack.config_v4()?;
        let mut dns_servers = Vec::new();
        for dns in config.dns_servers.iter() {
            let _ = dns_servers.push(dns.octets());
        }
        Some(DhcpInfo {
            ip_address: config.address.address().octets(),
            prefix_len: config.address.prefix_len(),
            gateway: config.gateway.map(|gw| gw.octets()),
            dns_servers,
        })
    }

    /// Print detailed DHCP information
    pub fn print_dhcp_info(&self) {
        if let Some(info) = self.get_dhcp_info() {
            let ip = info.ip_address;
            info!(
                "[DHCP] IP Address: {}.{}.{}.{}/{}",
                ip[0], ip[1], ip[2], ip[3], info.prefix_len
            );
            if let Some(gw) = info.gateway {
                info!("[DHCP] Gateway: {}.{}.{}.{}", gw[0], gw[1], gw[2], gw[3]);
            }
            for (i, dns) in info.dns_servers.iter().enumerate() {
                info!(
                    "[DHCP] DNS Server {}: {}.{}.{}.{}",
                    i + 1,
                    dns[0],
                    dns[1],
                    dns[2],
                    dns[3]
                );
            }
        } else {
            info!("[DHCP] No DHCP configuration available");
        }
    }
}

impl LinkLayer for WiFiManager<'_> {
    fn is_link_up(&self) -> bool {
        self.is_connected && self.has_ip
    }

    /// Track association and DHCP, re-associate after a drop
    fn maintain(&mut self, now: Instant) {
        let associated = self.controller.is_connected().unwrap_or(false);

        if self.is_connected && !associated {
            warn!("[WIFI] WiFi connection lost!");
            self.is_connected = false;
        } else if !self.is_connected && associated {
            info!("[WIFI] WiFi connection established!");
            self.is_connected = true;
        }

        let has_ip = associated && self.stack.is_config_up();
        if has_ip && !self.has_ip {
            self.print_dhcp_info();
        }
        self.has_ip = has_ip;

        if !associated && self.reconnect_timer.has_elapsed(now) {
            info!("[WIFI] Reconnecting ...");
            if let Err(e) = self.controller.connect() {
                warn!("[WIFI] Reconnect request failed: {:?}", e);
            }
            self.reconnect_timer.reset(now);
        }
    }
}
