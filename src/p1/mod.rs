//! DSMR P1 port: frame reader, Fluvius telegram parser and record dispatch.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod reader;
pub mod telegram;
#[cfg(target_os = "espidf")]
pub mod uart;

pub use config::P1Config;
pub use dispatcher::{ByteSource, DispatchStats, RecordHandler, TelegramDispatcher};
pub use error::ParseError;
pub use reader::{P1Reader, MAX_TELEGRAM_LEN};
pub use telegram::{parse_telegram, Fixed, ObisId, TelegramRecord, TimestampedFixed};
#[cfg(target_os = "espidf")]
pub use uart::UartSource;
