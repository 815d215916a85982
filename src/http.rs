//! Fire-and-forget HTTP POST over a single owned TCP session.
//!
//! Responses are never parsed: whatever the server sends back is drained and
//! discarded. At most one stream is open at any time; a stream that reports
//! "not connected" is closed and replaced, never reused.

use crate::clock::Clock;
use crate::error::{GatewayError, GatewayResult};
use crate::network_config::{HttpConfig, SessionPolicy};
use crate::wifi::{LinkManager, Radio};
use embedded_hal::blocking::delay::DelayMs;
use log::{info, warn};
use std::fmt::Write as _;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// An open byte stream to the server.
pub trait SessionHandle {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads and throws away every byte available right now; returns the count.
    fn discard_available(&mut self) -> usize;

    fn is_connected(&mut self) -> bool;

    fn close(&mut self);
}

/// Opens [`SessionHandle`]s.
pub trait Connector {
    type Handle: SessionHandle;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<Self::Handle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Connecting,
    Open,
}

/// Value of the `Connection` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHeader {
    Close,
    KeepAlive,
}

impl ConnectionHeader {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionHeader::Close => "close",
            ConnectionHeader::KeepAlive => "keep-alive",
        }
    }
}

/// Assembles a POST request.
///
/// `Content-Length` is only present for a non-empty body, and a single blank
/// line terminates the headers.
pub fn build_post_request(
    host: &str,
    path: &str,
    body: &str,
    connection: Option<ConnectionHeader>,
) -> String {
    let mut request = String::with_capacity(64 + host.len() + path.len() + body.len());

    let _ = write!(request, "POST {path} HTTP/1.1\r\n");
    let _ = write!(request, "Host: {host}\r\n");
    if let Some(connection) = connection {
        let _ = write!(request, "Connection: {}\r\n", connection.as_str());
    }
    if !body.is_empty() {
        let _ = write!(request, "Content-Length: {}\r\n", body.len());
    }
    request.push_str("\r\n");
    request.push_str(body);

    request
}

/// HTTP client session layered on a [`LinkManager`].
pub struct HttpSession<R, D, C, T: Connector> {
    link: LinkManager<R, D, C>,
    connector: T,
    handle: Option<T::Handle>,
    state: SessionState,
    config: HttpConfig,
    debug: bool,
    sessions_opened: u32,
}

impl<R, D, C, T> HttpSession<R, D, C, T>
where
    R: Radio,
    D: DelayMs<u32>,
    C: Clock,
    T: Connector,
{
    pub fn new(link: LinkManager<R, D, C>, connector: T, config: HttpConfig, debug: bool) -> Self {
        Self {
            link,
            connector,
            handle: None,
            state: SessionState::Closed,
            config,
            debug,
            sessions_opened: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Number of TCP sessions opened over the lifetime of this client.
    pub fn sessions_opened(&self) -> u32 {
        self.sessions_opened
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn link(&self) -> &LinkManager<R, D, C> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkManager<R, D, C> {
        &mut self.link
    }

    /// Brings the link up; a keep-alive client also makes one attempt at the TCP session.
    pub fn first_connect(&mut self) {
        self.link.ensure_connected();
        if self.config.policy == SessionPolicy::KeepAlive {
            if let Err(e) = self.open_once() {
                warn!("❌ HTTP: initial session failed: {}", e);
            }
        }
    }

    /// Blocks until the link is up and a live session is open.
    ///
    /// A session that is still open and alive is left alone. Otherwise the
    /// old handle is closed and new ones are attempted, waiting the retry
    /// delay between failures, with no upper bound on attempts.
    pub fn ensure_session(&mut self) {
        self.link.ensure_connected();
        self.check_liveness();

        while !self.is_open() {
            self.link.ensure_connected();
            if let Err(e) = self.open_once() {
                warn!(
                    "❌ HTTP: {}, retrying in {}ms",
                    e, self.config.retry_delay_ms
                );
                self.link.delay_ms(self.config.retry_delay_ms);
            }
        }
    }

    /// Non-blocking maintenance step: one link poll and at most one open attempt.
    pub fn poll_session(&mut self) -> GatewayResult<()> {
        if let Err(still) = self.link.poll() {
            self.close();
            return Err(GatewayError::LinkUnavailable(format!(
                "still connecting (attempt failures: {})",
                still.consecutive_failures
            )));
        }

        self.check_liveness();
        if self.is_open() {
            Ok(())
        } else {
            self.open_once()
        }
    }

    /// Reads and discards any response bytes; returns the count.
    pub fn drain_incoming(&mut self) -> usize {
        match self.handle.as_mut() {
            Some(handle) => handle.discard_available(),
            None => 0,
        }
    }

    /// Sends a POST to `path`, dropping it if no session can be had.
    ///
    /// A keep-alive client reuses its session and opens exactly one new one
    /// if the previous session was dropped. A per-request client always
    /// starts a fresh session and asks the server to close it.
    pub fn send_post(&mut self, path: &str, body: &str) -> GatewayResult<()> {
        if !self.link.refresh() {
            self.close();
            if self.debug {
                info!("📭 HTTP: link down, dropping POST to '{}'", path);
            }
            return Err(GatewayError::LinkUnavailable("WiFi not connected".into()));
        }

        let connection = match self.config.policy {
            SessionPolicy::PerRequest => {
                if self.handle.is_some() {
                    self.drain_incoming();
                    self.close();
                }
                self.open_once()?;
                ConnectionHeader::Close
            }
            SessionPolicy::KeepAlive => {
                self.check_liveness();
                if !self.is_open() {
                    self.open_once()?;
                }
                ConnectionHeader::KeepAlive
            }
        };

        let request = build_post_request(
            self.config.server_address.as_str(),
            path,
            body,
            Some(connection),
        );

        let written = match self.handle.as_mut() {
            Some(handle) => handle.write_all(request.as_bytes()),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no session")),
        };

        if let Err(e) = written {
            self.close();
            return Err(GatewayError::SessionUnavailable(format!(
                "write failed: {e}"
            )));
        }

        if self.debug {
            info!("📤 HTTP: Successfully sent POST {} ({} bytes)", path, body.len());
        }
        Ok(())
    }

    /// Closes the current handle, if any.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        self.state = SessionState::Closed;
    }

    fn check_liveness(&mut self) {
        self.drain_incoming();
        let dead = match self.handle.as_mut() {
            Some(handle) => !handle.is_connected(),
            None => false,
        };
        if dead {
            if self.debug {
                info!("🔌 HTTP: The tcp session closed");
            }
            self.close();
        }
    }

    fn open_once(&mut self) -> GatewayResult<()> {
        if !self.link.refresh() {
            self.close();
            return Err(GatewayError::LinkUnavailable("WiFi not connected".into()));
        }

        self.close();
        self.state = SessionState::Connecting;

        if self.debug {
            info!(
                "🌐 HTTP: Connecting to http://{}:{}",
                self.config.server_address, self.config.server_port
            );
        }

        match self
            .connector
            .connect(self.config.server_address.as_str(), self.config.server_port)
        {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = SessionState::Open;
                self.sessions_opened += 1;
                if self.debug {
                    info!("✅ HTTP: Connected to the http server");
                }
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(GatewayError::SessionUnavailable(format!(
                    "connect to {}:{} failed: {e}",
                    self.config.server_address, self.config.server_port
                )))
            }
        }
    }
}

/// [`Connector`] over `std::net::TcpStream`; works on host and on ESP-IDF.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for TcpConnector {
    type Handle = TcpHandle;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<TcpHandle> {
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(TcpHandle {
                        stream,
                        closed: false,
                    });
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
        }))
    }
}

pub struct TcpHandle {
    stream: TcpStream,
    closed: bool,
}

impl SessionHandle for TcpHandle {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let result = self.stream.write_all(bytes).and_then(|_| self.stream.flush());
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    fn discard_available(&mut self) -> usize {
        if self.closed || self.stream.set_nonblocking(true).is_err() {
            return 0;
        }

        let mut discarded = 0;
        let mut buf = [0u8; 64];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.closed = true;
                    break;
                }
            }
        }

        let _ = self.stream.set_nonblocking(false);
        discarded
    }

    fn is_connected(&mut self) -> bool {
        if self.closed || self.stream.set_nonblocking(true).is_err() {
            return false;
        }

        let mut peeked = [0u8; 1];
        match self.stream.peek(&mut peeked) {
            Ok(0) => self.closed = true,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => self.closed = true,
        }

        let _ = self.stream.set_nonblocking(false);
        !self.closed
    }

    fn close(&mut self) {
        if !self.closed {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.closed = true;
        }
    }
}
