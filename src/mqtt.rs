use crate::clock::Clock;
use crate::error::{GatewayError, GatewayResult};
use crate::http::SessionState;
use crate::network_config::MqttConfig;
use crate::wifi::{LinkManager, Radio};
use core::fmt::Display;
use embedded_hal::blocking::delay::DelayMs;
use log::{info, warn};

#[cfg(target_os = "espidf")]
pub use esp::EspMqttTransport;

/// Inbound bodies are pulled from the transport in chunks of this size.
const READ_CHUNK: usize = 16;

/// Minimal pub/sub client surface the session drives.
pub trait MqttTransport {
    type Error: Display;

    /// Opens a session with the broker in `config`, blocking until accepted or refused.
    fn connect(&mut self, config: &MqttConfig) -> Result<(), Self::Error>;

    fn is_connected(&mut self) -> bool;

    /// Tears the session down. Safe to call on a closed session.
    fn stop(&mut self);

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;

    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Advances to the next pending inbound message, returning its topic and
    /// declared size. Any unread remainder of the previous message is dropped.
    fn next_message(&mut self) -> Option<(String, usize)>;

    /// Copies up to `buf.len()` bytes of the current message body; 0 at the end.
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// Piece of an inbound publication as the client library hands it over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    /// The whole message at once.
    Complete,
    /// First piece of a message of `total` bytes.
    First { total: usize },
    /// Piece starting at `offset` of a message of `total` bytes.
    Next { offset: usize, total: usize },
}

/// Inbound message ready for the session: topic, body and declared size.
pub type Inbound = (String, Vec<u8>, usize);

/// Puts chunked publications back together.
///
/// Messages declared at or above `limit` are never buffered. They come out
/// once, with an empty body and their declared size, and the rest of their
/// chunks is ignored.
#[derive(Debug)]
pub struct ChunkAssembler {
    limit: usize,
    partial: Option<Inbound>,
}

impl ChunkAssembler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            partial: None,
        }
    }

    /// Takes one piece; returns a message once it is whole.
    pub fn push(&mut self, topic: Option<&str>, data: &[u8], fragment: Fragment) -> Option<Inbound> {
        match fragment {
            Fragment::Complete => {
                self.partial = None;
                topic.map(|t| (t.to_string(), data.to_vec(), data.len()))
            }
            Fragment::First { total } => {
                self.partial = None;
                let topic = topic?.to_string();
                if total >= self.limit {
                    return Some((topic, Vec::new(), total));
                }
                self.collect((topic, data.to_vec(), total))
            }
            Fragment::Next { offset, total } => {
                let (topic, mut body, expected) = self.partial.take()?;
                if offset != body.len() || total != expected {
                    warn!(
                        "❌ MQTT: chunk at {} out of sequence on '{}', message dropped",
                        offset, topic
                    );
                    return None;
                }
                body.extend_from_slice(data);
                self.collect((topic, body, expected))
            }
        }
    }

    fn collect(&mut self, message: Inbound) -> Option<Inbound> {
        if message.1.len() >= message.2 {
            Some(message)
        } else {
            self.partial = Some(message);
            None
        }
    }
}

/// Receiver of inbound `(topic, message)` pairs.
pub trait MessageHandler {
    fn on_message(&mut self, topic: &str, message: &str);
}

impl<F> MessageHandler for F
where
    F: FnMut(&str, &str),
{
    fn on_message(&mut self, topic: &str, message: &str) {
        self(topic, message)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MqttStats {
    pub publish_count: u32,
    pub receive_count: u32,
    pub oversized_count: u32,
}

/// MQTT client session layered on a [`LinkManager`].
pub struct MqttSession<R, D, C, T> {
    link: LinkManager<R, D, C>,
    transport: T,
    config: MqttConfig,
    debug: bool,
    state: SessionState,
    on_message: Option<Box<dyn MessageHandler>>,
    subscriptions: Vec<String>,
    stats: MqttStats,
}

impl<R, D, C, T> MqttSession<R, D, C, T>
where
    R: Radio,
    D: DelayMs<u32>,
    C: Clock,
    T: MqttTransport,
{
    pub fn new(link: LinkManager<R, D, C>, transport: T, config: MqttConfig, debug: bool) -> Self {
        Self {
            link,
            transport,
            config,
            debug,
            state: SessionState::Closed,
            on_message: None,
            subscriptions: Vec::new(),
            stats: MqttStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> MqttStats {
        self.stats
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn link(&self) -> &LinkManager<R, D, C> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkManager<R, D, C> {
        &mut self.link
    }

    pub fn first_connect(&mut self) {
        self.link.ensure_connected();
        self.connect_blocking();
    }

    /// Brings link and broker session back if either dropped.
    ///
    /// A session the broker no longer confirms is stopped before a new one is
    /// attempted; attempts repeat after the retry delay without bound.
    pub fn ensure_session(&mut self) {
        self.link.ensure_connected();
        if !self.transport.is_connected() {
            if self.state == SessionState::Open {
                info!("🔌 MQTT: session lost, reconnecting");
            }
            self.stop();
            self.connect_blocking();
        }
    }

    /// Non-blocking maintenance step: one link poll and at most one connect attempt.
    pub fn poll_session(&mut self) -> GatewayResult<()> {
        if let Err(still) = self.link.poll() {
            self.stop();
            return Err(GatewayError::LinkUnavailable(format!(
                "still connecting (attempt failures: {})",
                still.consecutive_failures
            )));
        }

        if self.transport.is_connected() {
            self.state = SessionState::Open;
            return Ok(());
        }

        self.stop();
        self.connect_once()
    }

    /// Publishes when the session is open; otherwise the message is dropped.
    pub fn publish(&mut self, topic: &str, message: &str) -> GatewayResult<()> {
        if !self.link.refresh() {
            self.stop();
            if self.debug {
                info!("📭 MQTT: link down, dropping message for '{}'", topic);
            }
            return Err(GatewayError::LinkUnavailable("WiFi not connected".into()));
        }
        if self.state != SessionState::Open || !self.transport.is_connected() {
            if self.debug {
                info!("📭 MQTT: not connected, dropping message for '{}'", topic);
            }
            return Err(GatewayError::SessionUnavailable(
                "MQTT session not open".into(),
            ));
        }

        self.transport
            .publish(topic, message.as_bytes())
            .map_err(|e| GatewayError::SessionUnavailable(format!("publish failed: {e}")))?;

        self.stats.publish_count += 1;
        if self.debug {
            info!("📤 MQTT: Successfully published {} bytes to '{}'", message.len(), topic);
        }
        Ok(())
    }

    /// Subscribes now if the session is open; the topic is also renewed on every reconnect.
    pub fn subscribe(&mut self, topic: &str) -> GatewayResult<()> {
        if !self.subscriptions.iter().any(|s| s == topic) {
            self.subscriptions.push(topic.to_string());
        }
        if self.state != SessionState::Open {
            info!("📥 MQTT: subscription to '{}' deferred until connected", topic);
            return Ok(());
        }

        self.transport
            .subscribe(topic)
            .map_err(|e| GatewayError::SessionUnavailable(format!("subscribe failed: {e}")))?;
        info!("📥 MQTT subscribe requested for topic: '{}'", topic);
        Ok(())
    }

    pub fn is_on_message_set(&self) -> bool {
        self.on_message.is_some()
    }

    pub fn set_on_message<H>(&mut self, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.on_message = Some(Box::new(handler));
    }

    /// Reads every pending inbound message and hands each one that fits the
    /// size limit to the registered handler. Returns the number delivered.
    ///
    /// Messages at or above the limit are discarded whole and counted; they
    /// never reach the handler, not even in part.
    pub fn drain_incoming(&mut self) -> GatewayResult<usize> {
        if self.on_message.is_none() {
            return Err(GatewayError::HandlerNotSet);
        }

        let mut delivered = 0;
        while let Some((topic, size)) = self.transport.next_message() {
            match self.read_body(size) {
                Ok(message) => {
                    self.stats.receive_count += 1;
                    if let Some(handler) = self.on_message.as_mut() {
                        handler.on_message(&topic, &message);
                    }
                    delivered += 1;
                }
                Err(e) => {
                    self.stats.oversized_count += 1;
                    warn!("📩 MQTT: skipping message on '{}': {}", topic, e);
                }
            }
        }
        Ok(delivered)
    }

    pub fn stop(&mut self) {
        self.transport.stop();
        self.state = SessionState::Closed;
    }

    fn read_body(&mut self, declared: usize) -> GatewayResult<String> {
        let limit = self.config.incoming_message_size_limit;
        let mut chunk = [0u8; READ_CHUNK];

        if declared >= limit {
            while self.transport.read(&mut chunk) > 0 {}
            return Err(GatewayError::OversizedMessage {
                size: declared,
                limit,
            });
        }

        let mut body = Vec::with_capacity(declared);
        loop {
            let n = self.transport.read(&mut chunk);
            if n == 0 {
                break;
            }
            if body.len() + n >= limit {
                let size = body.len() + n;
                while self.transport.read(&mut chunk) > 0 {}
                return Err(GatewayError::OversizedMessage { size, limit });
            }
            body.extend_from_slice(&chunk[..n]);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn connect_blocking(&mut self) {
        while let Err(e) = self.connect_once() {
            warn!("❌ MQTT: {}, retrying in {}ms", e, self.config.retry_delay_ms);
            self.link.delay_ms(self.config.retry_delay_ms);
            self.link.ensure_connected();
        }
    }

    fn connect_once(&mut self) -> GatewayResult<()> {
        if !self.link.refresh() {
            self.state = SessionState::Closed;
            return Err(GatewayError::LinkUnavailable("WiFi not connected".into()));
        }

        if self.debug {
            info!(
                "🌐 MQTT: Connecting to broker at mqtt://{}:{}",
                self.config.broker_address, self.config.broker_port
            );
        }

        self.state = SessionState::Connecting;
        match self.transport.connect(&self.config) {
            Ok(()) => {
                self.state = SessionState::Open;
                info!("✅ MQTT connected to broker");
                for topic in &self.subscriptions {
                    if let Err(e) = self.transport.subscribe(topic) {
                        warn!("❌ MQTT: resubscribe to '{}' failed: {}", topic, e);
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(GatewayError::SessionUnavailable(format!(
                    "broker connect failed: {e}"
                )))
            }
        }
    }
}

#[cfg(target_os = "espidf")]
mod esp {
    use super::{ChunkAssembler, Fragment, Inbound, MqttTransport};
    use crate::network_config::MqttConfig;
    use anyhow::{anyhow, Result};
    use embedded_svc::mqtt::client::Details;
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
    use log::{info, warn};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Arc;
    use std::time::Duration;

    /// Polls of the connected flag while waiting for the broker's CONNACK.
    const CONNECT_WAIT_POLLS: u32 = 50;

    /// ESP-IDF MQTT client exposed as a pollable transport.
    ///
    /// The IDF client delivers events on its own connection thread; inbound
    /// publications are queued there and handed out by `next_message`.
    #[derive(Default)]
    pub struct EspMqttTransport {
        client: Option<EspMqttClient<'static>>,
        connected: Arc<AtomicBool>,
        shutdown: Arc<AtomicBool>,
        inbound: Option<Receiver<Inbound>>,
        current: Vec<u8>,
        cursor: usize,
    }

    impl EspMqttTransport {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl MqttTransport for EspMqttTransport {
        type Error = anyhow::Error;

        fn connect(&mut self, config: &MqttConfig) -> Result<()> {
            self.stop();

            let url = format!("mqtt://{}:{}", config.broker_address, config.broker_port);
            let credentials = config.credentials();
            let mqtt_config = MqttClientConfiguration {
                client_id: Some(config.client_id.as_str()),
                username: credentials.map(|(user, _)| user),
                password: credentials.map(|(_, pass)| pass),
                keep_alive_interval: Some(Duration::from_secs(30)),
                ..Default::default()
            };
            let (client, mut connection) = EspMqttClient::new(&url, &mqtt_config)?;

            let connected = Arc::new(AtomicBool::new(false));
            let shutdown = Arc::new(AtomicBool::new(false));
            let (tx, rx) = mpsc::channel();

            let thread_connected = Arc::clone(&connected);
            let thread_shutdown = Arc::clone(&shutdown);
            let mut assembler = ChunkAssembler::new(config.incoming_message_size_limit);
            std::thread::Builder::new()
                .stack_size(8192)
                .name("mqtt_conn".to_string())
                .spawn(move || {
                    while !thread_shutdown.load(Ordering::Relaxed) {
                        match connection.next() {
                            Ok(event) => match event.payload() {
                                EventPayload::Connected(_) => {
                                    thread_connected.store(true, Ordering::Relaxed);
                                }
                                EventPayload::Disconnected => {
                                    thread_connected.store(false, Ordering::Relaxed);
                                }
                                EventPayload::Received {
                                    topic,
                                    data,
                                    details,
                                    ..
                                } => {
                                    let fragment = match details {
                                        Details::Complete => Fragment::Complete,
                                        Details::InitialChunk(chunk) => Fragment::First {
                                            total: chunk.total_data_size,
                                        },
                                        Details::SubsequentChunk(chunk) => Fragment::Next {
                                            offset: chunk.current_data_offset,
                                            total: chunk.total_data_size,
                                        },
                                    };
                                    if let Some(message) = assembler.push(topic, data, fragment) {
                                        let _ = tx.send(message);
                                    }
                                }
                                EventPayload::Error(e) => {
                                    warn!("❌ MQTT error: {:?}", e);
                                }
                                _ => {}
                            },
                            Err(_) => {
                                thread_connected.store(false, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                    info!("🔌 MQTT connection handler exiting");
                })?;

            self.client = Some(client);
            self.connected = connected;
            self.shutdown = shutdown;
            self.inbound = Some(rx);

            for _ in 0..CONNECT_WAIT_POLLS {
                if self.connected.load(Ordering::Relaxed) {
                    return Ok(());
                }
                FreeRtos::delay_ms(100);
            }

            self.stop();
            Err(anyhow!("broker at {url} did not accept the connection"))
        }

        fn is_connected(&mut self) -> bool {
            self.client.is_some() && self.connected.load(Ordering::Relaxed)
        }

        fn stop(&mut self) {
            self.shutdown.store(true, Ordering::Relaxed);
            self.connected.store(false, Ordering::Relaxed);
            // Dropping the client unblocks and ends the connection thread
            self.client = None;
            self.inbound = None;
            self.current.clear();
            self.cursor = 0;
        }

        fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
            let client = self
                .client
                .as_mut()
                .ok_or_else(|| anyhow!("MQTT client not started"))?;
            client.enqueue(topic, QoS::AtMostOnce, false, payload)?;
            Ok(())
        }

        fn subscribe(&mut self, topic: &str) -> Result<()> {
            let client = self
                .client
                .as_mut()
                .ok_or_else(|| anyhow!("MQTT client not started"))?;
            client.subscribe(topic, QoS::AtMostOnce)?;
            Ok(())
        }

        fn next_message(&mut self) -> Option<(String, usize)> {
            let (topic, data, declared) = self.inbound.as_ref()?.try_recv().ok()?;
            self.current = data;
            self.cursor = 0;
            Some((topic, declared))
        }

        fn read(&mut self, buf: &mut [u8]) -> usize {
            let remaining = &self.current[self.cursor..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.cursor += n;
            n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_config::WifiConfig;
    use crate::testing::{ManualClock, MockMqttTransport, MockRadio, RecordingDelay};
    use crate::wifi::LinkState;
    use std::cell::RefCell;
    use std::rc::Rc;

    type TestSession = MqttSession<MockRadio, RecordingDelay, ManualClock, MockMqttTransport>;

    fn session(transport: MockMqttTransport, limit: usize) -> (TestSession, RecordingDelay) {
        let radio = MockRadio::new();
        radio.set_connected(true);
        let delay = RecordingDelay::new();
        let link = LinkManager::new(
            radio,
            delay.clone(),
            ManualClock::new(0),
            WifiConfig::default(),
            false,
        );
        let config = MqttConfig {
            incoming_message_size_limit: limit,
            ..Default::default()
        };
        (MqttSession::new(link, transport, config, true), delay)
    }

    fn collecting_handler() -> (Rc<RefCell<Vec<(String, String)>>>, impl FnMut(&str, &str)) {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        let handler = move |topic: &str, message: &str| {
            sink.borrow_mut().push((topic.to_string(), message.to_string()));
        };
        (received, handler)
    }

    #[test]
    fn first_connect_retries_broker_with_delay() {
        let transport = MockMqttTransport::new();
        transport.fail_next(2);
        let (mut mqtt, delay) = session(transport.clone(), 256);

        mqtt.first_connect();

        assert_eq!(mqtt.state(), SessionState::Open);
        assert_eq!(transport.connect_count(), 3);
        assert_eq!(delay.calls(), vec![8000, 8000]);
    }

    #[test]
    fn ensure_session_stops_before_reconnecting() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 256);
        mqtt.first_connect();
        let stops_before = transport.stop_count();

        transport.drop_connection();
        mqtt.ensure_session();

        assert_eq!(transport.stop_count(), stops_before + 1);
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(mqtt.state(), SessionState::Open);
    }

    #[test]
    fn ensure_session_is_noop_when_alive() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 256);
        mqtt.first_connect();

        mqtt.ensure_session();

        assert_eq!(transport.connect_count(), 1);
    }

    #[test]
    fn publish_requires_open_session() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 256);

        assert!(matches!(
            mqtt.publish("meter/p1", "{}"),
            Err(GatewayError::SessionUnavailable(_))
        ));

        mqtt.first_connect();
        mqtt.publish("meter/p1", "{\"kw\":1}").unwrap();

        assert_eq!(
            transport.published(),
            vec![("meter/p1".to_string(), b"{\"kw\":1}".to_vec())]
        );
        assert_eq!(mqtt.stats().publish_count, 1);
    }

    #[test]
    fn open_session_follows_link_state() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 256);

        mqtt.poll_session().unwrap();
        assert_eq!(mqtt.state(), SessionState::Open);
        assert_eq!(mqtt.link().state(), LinkState::Connected);

        mqtt.link().radio().set_connected(false);
        assert!(matches!(
            mqtt.publish("meter/p1", "{}"),
            Err(GatewayError::LinkUnavailable(_))
        ));
        assert_eq!(mqtt.state(), SessionState::Closed);
        assert_eq!(mqtt.link().state(), LinkState::Disconnected);
        assert!(transport.published().is_empty());
    }

    #[test]
    fn drain_without_handler_is_rejected() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport, 256);
        assert!(!mqtt.is_on_message_set());
        assert_eq!(mqtt.drain_incoming(), Err(GatewayError::HandlerNotSet));
    }

    #[test]
    fn message_just_under_limit_is_delivered_intact() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 64);
        let (received, handler) = collecting_handler();
        mqtt.set_on_message(handler);

        let body = "m".repeat(63);
        transport.queue_message("cmd/display", body.as_bytes());

        assert_eq!(mqtt.drain_incoming(), Ok(1));
        assert_eq!(
            received.borrow().as_slice(),
            &[("cmd/display".to_string(), body)]
        );
    }

    #[test]
    fn oversized_message_is_never_delivered() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 64);
        let (received, handler) = collecting_handler();
        mqtt.set_on_message(handler);

        transport.queue_message("cmd/big", &[b'x'; 64]);
        transport.queue_message("cmd/small", b"ok");

        assert_eq!(mqtt.drain_incoming(), Ok(1));
        assert_eq!(
            received.borrow().as_slice(),
            &[("cmd/small".to_string(), "ok".to_string())]
        );
        assert_eq!(mqtt.stats().oversized_count, 1);
    }

    #[test]
    fn body_longer_than_declared_size_is_still_bounded() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 32);
        let (received, handler) = collecting_handler();
        mqtt.set_on_message(handler);

        transport.queue_message_with_declared_size("cmd/liar", &[b'y'; 100], 4);

        assert_eq!(mqtt.drain_incoming(), Ok(0));
        assert!(received.borrow().is_empty());
    }

    #[test]
    fn broker_login_is_passed_to_transport() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 256);
        mqtt.first_connect();
        assert_eq!(transport.last_credentials(), None);

        let radio = MockRadio::new();
        radio.set_connected(true);
        let link = LinkManager::new(
            radio,
            RecordingDelay::new(),
            ManualClock::new(0),
            WifiConfig::default(),
            false,
        );
        let config = MqttConfig {
            username: crate::network_config::bounded("meter"),
            password: crate::network_config::bounded("s3cret"),
            ..Default::default()
        };
        let mut mqtt = MqttSession::new(link, transport.clone(), config, false);
        mqtt.first_connect();

        assert_eq!(
            transport.last_credentials(),
            Some(("meter".to_string(), "s3cret".to_string()))
        );
    }

    #[test]
    fn unchunked_message_passes_through() {
        let mut assembler = ChunkAssembler::new(64);
        assert_eq!(
            assembler.push(Some("cmd/display"), b"hello", Fragment::Complete),
            Some(("cmd/display".to_string(), b"hello".to_vec(), 5))
        );
        assert_eq!(assembler.push(None, b"stray", Fragment::Complete), None);
    }

    #[test]
    fn chunks_are_joined_in_order() {
        let mut assembler = ChunkAssembler::new(64);

        assert_eq!(
            assembler.push(Some("cmd/display"), b"abcd", Fragment::First { total: 10 }),
            None
        );
        assert_eq!(
            assembler.push(None, b"efg", Fragment::Next { offset: 4, total: 10 }),
            None
        );
        assert_eq!(
            assembler.push(None, b"hij", Fragment::Next { offset: 7, total: 10 }),
            Some(("cmd/display".to_string(), b"abcdefghij".to_vec(), 10))
        );
    }

    #[test]
    fn chunk_out_of_sequence_drops_the_message() {
        let mut assembler = ChunkAssembler::new(64);

        assembler.push(Some("cmd/display"), b"abcd", Fragment::First { total: 10 });
        assert_eq!(
            assembler.push(None, b"hij", Fragment::Next { offset: 7, total: 10 }),
            None
        );
        assert_eq!(
            assembler.push(None, b"efg", Fragment::Next { offset: 4, total: 10 }),
            None
        );
    }

    #[test]
    fn oversized_chunked_message_is_announced_then_discarded() {
        let mut assembler = ChunkAssembler::new(64);

        let announced = assembler
            .push(Some("cmd/big"), &[b'x'; 32], Fragment::First { total: 100 })
            .unwrap();
        assert_eq!(announced, ("cmd/big".to_string(), Vec::new(), 100));
        assert_eq!(
            assembler.push(None, &[b'x'; 68], Fragment::Next { offset: 32, total: 100 }),
            None
        );

        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 64);
        let (received, handler) = collecting_handler();
        mqtt.set_on_message(handler);
        let (topic, body, declared) = announced;
        transport.queue_message_with_declared_size(&topic, &body, declared);

        assert_eq!(mqtt.drain_incoming(), Ok(0));
        assert!(received.borrow().is_empty());
        assert_eq!(mqtt.stats().oversized_count, 1);
    }

    #[test]
    fn subscribe_records_topic_once() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 256);
        mqtt.first_connect();

        mqtt.subscribe("cmd/#").unwrap();
        mqtt.subscribe("cmd/#").unwrap();

        assert_eq!(mqtt.subscriptions(), &["cmd/#".to_string()]);
        assert_eq!(transport.subscriptions().len(), 2);
    }

    #[test]
    fn subscriptions_are_renewed_after_reconnect() {
        let transport = MockMqttTransport::new();
        let (mut mqtt, _) = session(transport.clone(), 256);

        mqtt.subscribe("cmd/display").unwrap();
        assert!(transport.subscriptions().is_empty());

        mqtt.first_connect();
        assert_eq!(transport.subscriptions(), vec!["cmd/display".to_string()]);

        transport.drop_connection();
        mqtt.ensure_session();
        assert_eq!(transport.subscriptions().len(), 2);
    }

    #[test]
    fn poll_session_makes_single_attempt() {
        let transport = MockMqttTransport::new();
        transport.fail_next(1);
        let (mut mqtt, delay) = session(transport.clone(), 256);

        assert!(matches!(
            mqtt.poll_session(),
            Err(GatewayError::SessionUnavailable(_))
        ));
        assert_eq!(transport.connect_count(), 1);
        assert!(delay.calls().is_empty());

        mqtt.poll_session().unwrap();
        assert_eq!(mqtt.state(), SessionState::Open);
    }
}
