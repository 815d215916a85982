//! Host-side fakes for the hardware and network traits.
//!
//! Every fake is a cheap handle onto shared state: keep a clone in the test
//! to inspect or steer the one moved into the component under test.

use crate::clock::Clock;
use crate::http::{Connector, SessionHandle};
use crate::mqtt::MqttTransport;
use crate::network_config::MqttConfig;
use crate::p1::ByteSource;
use crate::wifi::Radio;
use embedded_hal::blocking::delay::DelayMs;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }

    /// Moves forward, wrapping like the hardware counter.
    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> u32 {
        self.now.get()
    }
}

/// Delay that returns immediately and remembers what was asked.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    calls: Rc<RefCell<Vec<u32>>>,
    clock: Option<ManualClock>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also advances `clock` by every delay.
    pub fn driving(clock: ManualClock) -> Self {
        Self {
            calls: Rc::default(),
            clock: Some(clock),
        }
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.borrow().clone()
    }
}

impl DelayMs<u32> for RecordingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.calls.borrow_mut().push(ms);
        if let Some(clock) = &self.clock {
            clock.advance(ms);
        }
    }
}

#[derive(Debug, Default)]
struct RadioState {
    up: bool,
    begins: u32,
    fail_first: u32,
    status_polls: u32,
    credentials: Option<(String, String)>,
    /// Remaining "not yet" answers before a pending association comes up
    pending: Option<u32>,
}

/// Scriptable WiFi radio.
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Rc<RefCell<RadioState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` association attempts never come up.
    pub fn failing_first(self, n: u32) -> Self {
        self.state.borrow_mut().fail_first = n;
        self
    }

    /// A good association reports "not connected" `k` times before it is up.
    pub fn with_status_polls(self, k: u32) -> Self {
        self.state.borrow_mut().status_polls = k;
        self
    }

    pub fn set_connected(&self, up: bool) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.up = up;
        state.pending = None;
    }

    pub fn is_up(&self) -> bool {
        self.state.borrow().up
    }

    pub fn begin_count(&self) -> u32 {
        self.state.borrow().begins
    }

    /// SSID and password of the most recent association attempt.
    pub fn last_credentials(&self) -> Option<(String, String)> {
        self.state.borrow().credentials.clone()
    }
}

impl Radio for MockRadio {
    type Error = ();

    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), ()> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.begins += 1;
        state.credentials = Some((ssid.to_string(), password.to_string()));
        state.up = false;
        state.pending = if state.begins <= state.fail_first {
            None
        } else {
            Some(state.status_polls)
        };
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.up {
            return true;
        }
        match state.pending {
            Some(0) => {
                state.up = true;
                state.pending = None;
                true
            }
            Some(n) => {
                state.pending = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn disconnect(&mut self) -> Result<(), ()> {
        self.set_connected(false);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HandleState {
    closed: bool,
    dropped: bool,
    pending_response: usize,
}

#[derive(Debug, Default)]
struct ConnectorState {
    attempts: u32,
    fail_next: u32,
    handles: Vec<HandleState>,
    max_live: usize,
    requests: Vec<String>,
}

impl ConnectorState {
    fn live(&self) -> usize {
        self.handles.iter().filter(|h| !h.closed).count()
    }
}

/// In-memory TCP endpoint.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Rc<RefCell<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses the next `n` connection attempts.
    pub fn fail_next(&self, n: u32) {
        self.state.borrow_mut().fail_next = n;
    }

    pub fn attempts(&self) -> u32 {
        self.state.borrow().attempts
    }

    /// Sessions successfully opened so far.
    pub fn opened(&self) -> usize {
        self.state.borrow().handles.len()
    }

    /// Handles opened and not yet closed.
    pub fn live(&self) -> usize {
        self.state.borrow().live()
    }

    pub fn max_live(&self) -> usize {
        self.state.borrow().max_live
    }

    /// Every request written, in order.
    pub fn requests(&self) -> Vec<String> {
        self.state.borrow().requests.clone()
    }

    /// The server side hangs up on every open session.
    pub fn drop_connections(&self) {
        for handle in self.state.borrow_mut().handles.iter_mut() {
            handle.dropped = true;
        }
    }

    /// Queues `n` response bytes on every open session.
    pub fn queue_response(&self, n: usize) {
        for handle in self.state.borrow_mut().handles.iter_mut() {
            if !handle.closed && !handle.dropped {
                handle.pending_response += n;
            }
        }
    }
}

impl Connector for MockConnector {
    type Handle = MockHandle;

    fn connect(&mut self, _host: &str, _port: u16) -> io::Result<MockHandle> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.attempts += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }

        state.handles.push(HandleState::default());
        state.max_live = state.max_live.max(state.live());
        Ok(MockHandle {
            index: state.handles.len() - 1,
            state: Rc::clone(&self.state),
        })
    }
}

pub struct MockHandle {
    index: usize,
    state: Rc<RefCell<ConnectorState>>,
}

impl SessionHandle for MockHandle {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let handle = &state.handles[self.index];
        if handle.closed || handle.dropped {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "session gone"));
        }
        state.requests.push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }

    fn discard_available(&mut self) -> usize {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        std::mem::take(&mut state.handles[self.index].pending_response)
    }

    fn is_connected(&mut self) -> bool {
        let state = self.state.borrow();
        let handle = &state.handles[self.index];
        !handle.closed && !handle.dropped
    }

    fn close(&mut self) {
        self.state.borrow_mut().handles[self.index].closed = true;
    }
}

#[derive(Debug, Default)]
struct MqttState {
    connected: bool,
    fail_next: u32,
    connects: u32,
    credentials: Option<(String, String)>,
    stops: u32,
    published: Vec<(String, Vec<u8>)>,
    subscriptions: Vec<String>,
    inbound: VecDeque<(String, Vec<u8>, usize)>,
    body: Vec<u8>,
    cursor: usize,
}

/// In-memory broker connection.
#[derive(Debug, Clone, Default)]
pub struct MockMqttTransport {
    state: Rc<RefCell<MqttState>>,
}

impl MockMqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.state.borrow_mut().fail_next = n;
    }

    pub fn drop_connection(&self) {
        self.state.borrow_mut().connected = false;
    }

    pub fn connect_count(&self) -> u32 {
        self.state.borrow().connects
    }

    pub fn stop_count(&self) -> u32 {
        self.state.borrow().stops
    }

    /// Login presented on the most recent connect.
    pub fn last_credentials(&self) -> Option<(String, String)> {
        self.state.borrow().credentials.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.borrow().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.clone()
    }

    pub fn queue_message(&self, topic: &str, body: &[u8]) {
        self.queue_message_with_declared_size(topic, body, body.len());
    }

    /// Queues a message whose header announces `declared` bytes, whatever the body holds.
    pub fn queue_message_with_declared_size(&self, topic: &str, body: &[u8], declared: usize) {
        self.state
            .borrow_mut()
            .inbound
            .push_back((topic.to_string(), body.to_vec(), declared));
    }
}

impl MqttTransport for MockMqttTransport {
    type Error = String;

    fn connect(&mut self, config: &MqttConfig) -> Result<(), String> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.connects += 1;
        state.credentials = config
            .credentials()
            .map(|(user, pass)| (user.to_string(), pass.to_string()));
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err("connection refused".to_string());
        }
        state.connected = true;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.state.borrow().connected
    }

    fn stop(&mut self) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.stops += 1;
        state.connected = false;
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), String> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if !state.connected {
            return Err("not connected".to_string());
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), String> {
        self.state.borrow_mut().subscriptions.push(topic.to_string());
        Ok(())
    }

    fn next_message(&mut self) -> Option<(String, usize)> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let (topic, body, declared) = state.inbound.pop_front()?;
        state.body = body;
        state.cursor = 0;
        Some((topic, declared))
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let start = state.cursor;
        let n = (state.body.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&state.body[start..start + n]);
        state.cursor += n;
        n
    }
}

#[derive(Debug, Default)]
struct SourceState {
    bytes: VecDeque<u8>,
    request: bool,
}

/// Serial line fed by the test.
#[derive(Debug, Clone, Default)]
pub struct MockByteSource {
    state: Rc<RefCell<SourceState>>,
}

impl MockByteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes: &[u8]) {
        self.state.borrow_mut().bytes.extend(bytes.iter().copied());
    }

    pub fn request_active(&self) -> bool {
        self.state.borrow().request
    }
}

impl ByteSource for MockByteSource {
    fn read_available(&mut self, buf: &mut [u8]) -> usize {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let n = state.bytes.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(state.bytes.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn set_request(&mut self, active: bool) {
        self.state.borrow_mut().request = active;
    }
}
