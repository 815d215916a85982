use crate::p1::ParseError;
use thiserror::Error;

/// Error categories surfaced by the gateway core.
///
/// Only a human-readable description is carried; callers branch on the
/// variant, never on the text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// WiFi association is not (yet) up. Transient.
    #[error("link unavailable: {0}")]
    LinkUnavailable(String),

    /// The TCP stream or MQTT session could not be opened or was lost. Transient.
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// A telegram frame failed to parse. The frame is skipped.
    #[error("telegram parse error: {0}")]
    TelegramParse(#[from] ParseError),

    /// An inbound message was at or over the configured size limit and was discarded.
    #[error("incoming message of {size} bytes exceeds limit of {limit} bytes")]
    OversizedMessage { size: usize, limit: usize },

    /// A dispatch entry point was used before a handler was registered.
    #[error("no handler registered")]
    HandlerNotSet,

    /// A component was driven before its `begin()` was called.
    #[error("{0} used before begin()")]
    NotInitialized(&'static str),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
