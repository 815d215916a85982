//! ESP32 P1 Smart Meter Gateway Library
//!
//! Reads DSMR P1 telegrams from an electricity/gas meter and forwards them
//! over WiFi to an HTTP collector or an MQTT broker. Everything except the
//! ESP-IDF drivers runs on the host, behind the traits in [`wifi`], [`http`],
//! [`mqtt`] and [`p1`].

pub mod clock;
pub mod display;
pub mod error;
pub mod gateway;
pub mod http;
pub mod meter;
pub mod mqtt;
pub mod network_config;
pub mod p1;
pub mod payload;
pub mod scheduler;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod wifi;

pub use clock::{Clock, SystemClock};
pub use display::{DisplayMetrics, LogDisplay, MetricsDisplay};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{GatewayStats, MeterGateway, Uplink};
pub use http::{Connector, HttpSession, SessionHandle, SessionState, TcpConnector};
pub use meter::{MeterSimulator, TelegramBuilder};
pub use mqtt::{MessageHandler, MqttSession, MqttStats, MqttTransport};
pub use network_config::{
    GatewayConfig, HttpConfig, MqttConfig, SessionPolicy, Settings, UplinkKind, WifiConfig,
};
pub use p1::{
    parse_telegram, ByteSource, P1Config, P1Reader, ParseError, RecordHandler, TelegramDispatcher,
    TelegramRecord,
};
pub use scheduler::{run_if_elapsed, Interval, ScheduleState};
pub use wifi::{Connected, LinkManager, LinkState, Radio, StillConnecting};
