use crate::p1::P1Config;
use serde::{Deserialize, Serialize};

/// Copies as much of `value` as fits into a fixed-capacity string.
pub(crate) fn bounded<const N: usize>(value: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in value.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
    /// Delay between two association status checks (ms)
    pub check_delay_ms: u32,
    /// Status checks per association attempt before it counts as failed
    pub check_times: u32,
    /// Backoff between failed association attempts (ms)
    pub retry_delay_ms: u32,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: bounded(option_env!("WIFI_SSID").unwrap_or("YOUR_SSID")),
            password: bounded(option_env!("WIFI_PASS").unwrap_or("YOUR_PASSWORD")),
            check_delay_ms: 1000,
            check_times: 5,
            retry_delay_ms: 8000,
        }
    }
}

/// How the HTTP session is used across POSTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Keep one TCP session open and reuse it while the server keeps it alive.
    KeepAlive,
    /// Open a fresh TCP session for every POST and ask the server to close it.
    PerRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub server_address: heapless::String<64>,
    pub server_port: u16,
    pub path: heapless::String<64>,
    pub policy: SessionPolicy,
    /// Delay between failed session open attempts (ms)
    pub retry_delay_ms: u32,
    pub connect_timeout_ms: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_address: bounded(option_env!("HTTP_SERVER").unwrap_or("192.168.1.10")),
            server_port: 8080,
            path: bounded("/"),
            policy: SessionPolicy::PerRequest,
            retry_delay_ms: 8000,
            connect_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_address: heapless::String<64>,
    pub broker_port: u16,
    pub client_id: heapless::String<32>,
    /// Broker login; empty connects anonymously
    pub username: heapless::String<32>,
    pub password: heapless::String<64>,
    /// Readings are published here
    pub topic: heapless::String<64>,
    /// Inbound messages are taken from here; empty disables subscribing
    pub command_topic: heapless::String<64>,
    /// Delay between failed broker connect attempts (ms)
    pub retry_delay_ms: u32,
    /// Inbound messages of this many bytes or more are discarded
    pub incoming_message_size_limit: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_address: bounded(option_env!("MQTT_BROKER").unwrap_or("mqtt.local")),
            broker_port: 1883,
            client_id: bounded("esp32-p1-gateway"),
            username: bounded(option_env!("MQTT_USER").unwrap_or("")),
            password: bounded(option_env!("MQTT_PASS").unwrap_or("")),
            topic: bounded("meter/electricity"),
            command_topic: bounded("meter/command"),
            retry_delay_ms: 8000,
            incoming_message_size_limit: 256,
        }
    }
}

impl MqttConfig {
    /// Login to present to the broker, if a username is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username.as_str(), self.password.as_str()))
        }
    }
}

/// Which session carries the readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UplinkKind {
    Http,
    Mqtt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub uplink: UplinkKind,
    /// Pace of meter data requests, and so of uploads (ms)
    pub send_interval_ms: u32,
    /// Pace of link/session maintenance checks (ms)
    pub maintenance_interval_ms: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            uplink: UplinkKind::Http,
            send_interval_ms: 10_000,
            maintenance_interval_ms: 1_000,
        }
    }
}

/// Static board settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub wifi: WifiConfig,
    pub http: HttpConfig,
    pub mqtt: MqttConfig,
    pub p1: P1Config,
    pub gateway: GatewayConfig,
    /// Verbose diagnostic logging
    pub debug_output: bool,
}

impl Settings {
    /// Parses settings from JSON; missing keys keep their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
