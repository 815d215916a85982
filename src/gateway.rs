//! The firmware's cooperative control loop.

use crate::clock::Clock;
use crate::display::{DisplayMetrics, MetricsDisplay};
use crate::error::{GatewayError, GatewayResult};
use crate::http::{Connector, HttpSession};
use crate::mqtt::{MqttSession, MqttTransport};
use crate::network_config::GatewayConfig;
use crate::p1::{ByteSource, TelegramDispatcher, TelegramRecord};
use crate::payload::{electricity_payload, gas_payload};
use crate::scheduler::Interval;
use crate::wifi::Radio;
use embedded_hal::blocking::delay::DelayMs;
use log::{info, warn};
use std::cell::RefCell;
use std::rc::Rc;

/// Where payloads go.
pub trait Uplink {
    /// Blocks until the first link (and, where applicable, session) is up.
    fn first_connect(&mut self);

    /// One non-blocking maintenance step.
    fn maintain(&mut self) -> GatewayResult<()>;

    /// Sends one payload, or drops it and says why.
    fn deliver(&mut self, payload: &str) -> GatewayResult<()>;

    fn ssid(&self) -> &str;
}

impl<R, D, C, T> Uplink for HttpSession<R, D, C, T>
where
    R: Radio,
    D: DelayMs<u32>,
    C: Clock,
    T: Connector,
{
    fn first_connect(&mut self) {
        HttpSession::first_connect(self);
    }

    fn maintain(&mut self) -> GatewayResult<()> {
        self.poll_session()
    }

    fn deliver(&mut self, payload: &str) -> GatewayResult<()> {
        let path = self.config().path.clone();
        self.send_post(path.as_str(), payload)
    }

    fn ssid(&self) -> &str {
        self.link().ssid()
    }
}

impl<R, D, C, T> Uplink for MqttSession<R, D, C, T>
where
    R: Radio,
    D: DelayMs<u32>,
    C: Clock,
    T: MqttTransport,
{
    fn first_connect(&mut self) {
        MqttSession::first_connect(self);
    }

    fn maintain(&mut self) -> GatewayResult<()> {
        self.poll_session()?;
        if self.is_on_message_set() {
            self.drain_incoming()?;
        }
        Ok(())
    }

    fn deliver(&mut self, payload: &str) -> GatewayResult<()> {
        let topic = self.config().topic.clone();
        self.publish(topic.as_str(), payload)
    }

    fn ssid(&self) -> &str {
        self.link().ssid()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub delivered: u32,
    pub dropped: u32,
}

/// Meter-to-uplink pipeline driven by repeated [`tick`](Self::tick) calls.
pub struct MeterGateway<S, U, C, Dp> {
    dispatcher: TelegramDispatcher<S>,
    uplink: U,
    clock: C,
    display: Dp,
    latest: Rc<RefCell<Option<TelegramRecord>>>,
    read_interval: Interval,
    maintenance_interval: Interval,
    started: bool,
    stats: GatewayStats,
}

impl<S, U, C, Dp> MeterGateway<S, U, C, Dp>
where
    S: ByteSource,
    U: Uplink,
    C: Clock,
    Dp: MetricsDisplay,
{
    pub fn new(
        dispatcher: TelegramDispatcher<S>,
        uplink: U,
        clock: C,
        display: Dp,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            dispatcher,
            uplink,
            clock,
            display,
            latest: Rc::new(RefCell::new(None)),
            read_interval: Interval::new(config.send_interval_ms),
            maintenance_interval: Interval::new(config.maintenance_interval_ms),
            started: false,
            stats: GatewayStats::default(),
        }
    }

    /// Wires the record handler, brings the uplink up and shows the version.
    pub fn begin(&mut self, version: &str) {
        self.display.draw_version(version);

        let latest = Rc::clone(&self.latest);
        self.dispatcher.set_handler(move |record: &TelegramRecord| {
            *latest.borrow_mut() = Some(record.clone());
        });
        self.dispatcher.begin();

        self.uplink.first_connect();
        self.started = true;
        info!("🚀 Gateway running");
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    pub fn dispatcher(&self) -> &TelegramDispatcher<S> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut TelegramDispatcher<S> {
        &mut self.dispatcher
    }

    pub fn uplink(&self) -> &U {
        &self.uplink
    }

    pub fn uplink_mut(&mut self) -> &mut U {
        &mut self.uplink
    }

    pub fn display(&self) -> &Dp {
        &self.display
    }

    /// One pass of the control loop; returns the number of records forwarded.
    ///
    /// Link and session upkeep and the meter read each run on their own
    /// interval. A read accepts the next valid telegram and its record is
    /// pushed upstream as soon as it is parsed; telegrams the meter sends
    /// between reads are discarded. Records that cannot be sent are dropped.
    pub fn tick(&mut self) -> GatewayResult<usize> {
        if !self.started {
            return Err(GatewayError::NotInitialized("gateway"));
        }

        if self.maintenance_interval.due(&self.clock) {
            if let Err(e) = self.uplink.maintain() {
                warn!("🔄 Gateway: uplink maintenance: {}", e);
            }
        }

        if self.read_interval.due(&self.clock) {
            self.dispatcher.trigger_read();
        }

        self.dispatcher.pump()?;

        let Some(record) = self.latest.borrow_mut().take() else {
            return Ok(0);
        };

        self.display
            .draw_metrics(&DisplayMetrics::from_record(&record, self.uplink.ssid()));

        let mut payloads = Vec::with_capacity(2);
        payloads.push(electricity_payload(&record));
        payloads.extend(gas_payload(&record));

        let mut forwarded = 0;
        for payload in payloads {
            let result = payload
                .map_err(|e| GatewayError::SessionUnavailable(format!("payload encoding: {e}")))
                .and_then(|json| self.uplink.deliver(&json));
            match result {
                Ok(()) => {
                    self.stats.delivered += 1;
                    forwarded = 1;
                }
                Err(e) => {
                    self.stats.dropped += 1;
                    warn!("📭 Gateway: payload dropped: {}", e);
                }
            }
        }

        Ok(forwarded)
    }
}
