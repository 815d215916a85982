use crate::clock::Clock;
use crate::error::{GatewayError, GatewayResult};
use crate::network_config::WifiConfig;
use crate::scheduler::ScheduleState;
use core::fmt::Debug;
use embedded_hal::blocking::delay::DelayMs;
use log::{info, warn};

#[cfg(target_os = "espidf")]
pub use esp::EspRadio;

/// Station-mode radio association API.
pub trait Radio {
    type Error: Debug;

    /// Starts associating with the access point. Returning `Ok` does not mean
    /// the link is up; poll [`Radio::is_connected`] for that.
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Proof that the link reported Connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected;

/// Returned by [`LinkManager::poll`] while association is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StillConnecting {
    /// Failed status checks in the current attempt
    pub checks: u32,
    pub consecutive_failures: u32,
}

/// Owns WiFi association state and retry timing.
///
/// State only changes inside [`ensure_connected`](Self::ensure_connected),
/// [`connect_bounded`](Self::connect_bounded), [`poll`](Self::poll),
/// [`refresh`](Self::refresh) and [`disconnect`](Self::disconnect); there
/// are no background timers.
pub struct LinkManager<R, D, C> {
    radio: R,
    delay: D,
    clock: C,
    config: WifiConfig,
    debug: bool,
    state: LinkState,
    last_check: ScheduleState,
    checks: u32,
    consecutive_failures: u32,
}

impl<R, D, C> LinkManager<R, D, C>
where
    R: Radio,
    D: DelayMs<u32>,
    C: Clock,
{
    pub fn new(radio: R, delay: D, clock: C, config: WifiConfig, debug: bool) -> Self {
        Self {
            radio,
            delay,
            clock,
            config,
            debug,
            state: LinkState::Disconnected,
            last_check: ScheduleState::new(),
            checks: 0,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Link state as last observed; see [`refresh`](Self::refresh).
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Asks the radio whether the link is up and records the answer.
    ///
    /// A Connected link that the radio reports down drops to Disconnected,
    /// so the next [`poll`](Self::poll) starts a new association.
    pub fn refresh(&mut self) -> bool {
        if self.radio.is_connected() {
            self.mark_connected();
            return true;
        }
        if self.state == LinkState::Connected {
            warn!("📶 WiFi: link lost");
            self.state = LinkState::Disconnected;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn ssid(&self) -> &str {
        self.config.ssid.as_str()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Blocks for `ms` using the link's delay provider.
    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Blocks until the radio reports Connected.
    ///
    /// Every failed attempt is followed by the configured backoff and a new
    /// attempt, with no upper bound on the number of attempts.
    pub fn ensure_connected(&mut self) -> Connected {
        if self.radio.is_connected() {
            self.mark_connected();
            return Connected;
        }

        if self.debug {
            info!("📶 WiFi was disconnected, reconnecting...");
        }

        loop {
            match self.connect_bounded() {
                Ok(connected) => return connected,
                Err(_) => {
                    if self.debug {
                        info!(
                            "🔄 WiFi: retrying in {}ms (failure #{})",
                            self.config.retry_delay_ms, self.consecutive_failures
                        );
                    }
                    self.delay.delay_ms(self.config.retry_delay_ms);
                }
            }
        }
    }

    /// One association attempt that gives up after `check_times` status checks.
    pub fn connect_bounded(&mut self) -> GatewayResult<Connected> {
        self.begin_association();

        let mut checks = 0;
        while !self.radio.is_connected() {
            if checks >= self.config.check_times {
                self.consecutive_failures += 1;
                self.state = LinkState::Disconnected;
                warn!("❌ WiFi: failed to connect to '{}'", self.config.ssid);
                return Err(GatewayError::LinkUnavailable(format!(
                    "no association with '{}' after {} checks",
                    self.config.ssid, checks
                )));
            }
            checks += 1;
            self.delay.delay_ms(self.config.check_delay_ms);
        }

        self.mark_connected();
        Ok(Connected)
    }

    /// Advances the association state machine by one step without blocking.
    pub fn poll(&mut self) -> Result<Connected, StillConnecting> {
        if self.radio.is_connected() {
            self.mark_connected();
            return Ok(Connected);
        }

        match self.state {
            LinkState::Connected => {
                warn!("📶 WiFi: link lost");
                self.begin_association();
            }
            LinkState::Disconnected => self.begin_association(),
            LinkState::Connecting => {
                let now = self.clock.millis();
                if self.last_check.check(now, self.config.check_delay_ms) {
                    self.checks += 1;
                    if self.checks >= self.config.check_times {
                        self.consecutive_failures += 1;
                        warn!(
                            "❌ WiFi: attempt #{} to join '{}' timed out, restarting",
                            self.consecutive_failures, self.config.ssid
                        );
                        self.begin_association();
                    }
                }
            }
        }

        Err(StillConnecting {
            checks: self.checks,
            consecutive_failures: self.consecutive_failures,
        })
    }

    pub fn disconnect(&mut self) -> GatewayResult<()> {
        if self.radio.is_connected() {
            info!("🔌 WiFi: Disconnecting...");
            self.radio
                .disconnect()
                .map_err(|e| GatewayError::LinkUnavailable(format!("disconnect failed: {e:?}")))?;
        }
        self.state = LinkState::Disconnected;
        self.checks = 0;
        Ok(())
    }

    fn begin_association(&mut self) {
        if self.debug {
            info!("🌐 WiFi: Connecting to SSID '{}'...", self.config.ssid);
        }
        if let Err(e) = self
            .radio
            .begin(self.config.ssid.as_str(), self.config.password.as_str())
        {
            warn!("❌ WiFi: association request rejected: {:?}", e);
        }
        self.state = LinkState::Connecting;
        self.checks = 0;
        self.last_check = ScheduleState::starting_at(self.clock.millis());
    }

    fn mark_connected(&mut self) {
        if self.state != LinkState::Connected && self.debug {
            info!("✅ WiFi: Connected to '{}'", self.config.ssid);
        }
        self.state = LinkState::Connected;
        self.checks = 0;
        self.consecutive_failures = 0;
    }
}

#[cfg(target_os = "espidf")]
mod esp {
    use super::Radio;
    use anyhow::{anyhow, Result};
    use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
    use esp_idf_hal::modem::Modem;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
    use log::info;
    use std::net::Ipv4Addr;

    /// ESP-IDF station radio.
    ///
    /// `begin` only queues the association; the driver's event loop brings
    /// the link up in the background and `is_connected` reports when the
    /// interface has an address.
    pub struct EspRadio {
        wifi: Box<BlockingWifi<EspWifi<'static>>>,
    }

    impl EspRadio {
        pub fn new(
            modem: Modem,
            sysloop: EspSystemEventLoop,
            nvs: EspDefaultNvsPartition,
        ) -> Result<Self> {
            info!("🌐 WiFi: Creating EspWifi instance...");
            let esp_wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
            let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
            info!("✅ WiFi: driver ready");

            Ok(Self {
                wifi: Box::new(wifi),
            })
        }

        pub fn ip(&self) -> Result<Ipv4Addr> {
            let ip_info = self.wifi.wifi().sta_netif().get_ip_info()?;
            Ok(ip_info.ip)
        }
    }

    impl Radio for EspRadio {
        type Error = anyhow::Error;

        fn begin(&mut self, ssid: &str, password: &str) -> Result<()> {
            let mut ssid_str = heapless::String::<32>::new();
            ssid_str
                .push_str(ssid)
                .map_err(|_| anyhow!("SSID too long (max 32 chars)"))?;
            let mut password_str = heapless::String::<64>::new();
            password_str
                .push_str(password)
                .map_err(|_| anyhow!("Password too long (max 64 chars)"))?;

            let configuration = Configuration::Client(ClientConfiguration {
                ssid: ssid_str,
                auth_method: AuthMethod::WPA2Personal,
                password: password_str,
                ..Default::default()
            });

            let esp_wifi = self.wifi.wifi_mut();
            if esp_wifi.is_connected().unwrap_or(false) {
                let _ = esp_wifi.disconnect();
            }
            esp_wifi.set_configuration(&configuration)?;
            if !esp_wifi.is_started().unwrap_or(false) {
                esp_wifi.start()?;
            }

            // Returns once the request is queued, not when associated
            esp_wifi.connect()?;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.wifi.wifi().is_up().unwrap_or(false)
        }

        fn disconnect(&mut self) -> Result<()> {
            self.wifi.wifi_mut().disconnect()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MockRadio, RecordingDelay};

    fn manager(radio: MockRadio, clock: ManualClock) -> LinkManager<MockRadio, RecordingDelay, ManualClock> {
        LinkManager::new(
            radio,
            RecordingDelay::new(),
            clock,
            WifiConfig::default(),
            true,
        )
    }

    #[test]
    fn ensure_connected_returns_immediately_when_up() {
        let radio = MockRadio::new();
        radio.set_connected(true);
        let mut link = manager(radio.clone(), ManualClock::new(0));

        link.ensure_connected();

        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(radio.begin_count(), 0);
    }

    #[test]
    fn ensure_connected_retries_with_backoff_until_associated() {
        let radio = MockRadio::new().failing_first(3).with_status_polls(2);
        let delay = RecordingDelay::new();
        let mut link = LinkManager::new(
            radio.clone(),
            delay.clone(),
            ManualClock::new(0),
            WifiConfig::default(),
            false,
        );

        link.ensure_connected();

        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(radio.begin_count(), 4);
        assert_eq!(link.consecutive_failures(), 0);
        // three failed attempts: 5 checks of 1000ms then one 8000ms backoff
        let backoffs = delay.calls().iter().filter(|&&ms| ms == 8000).count();
        assert_eq!(backoffs, 3);
    }

    #[test]
    fn connect_bounded_gives_up_after_check_times() {
        let radio = MockRadio::new().failing_first(1);
        let delay = RecordingDelay::new();
        let mut link = LinkManager::new(
            radio,
            delay.clone(),
            ManualClock::new(0),
            WifiConfig::default(),
            false,
        );

        let result = link.connect_bounded();

        assert!(matches!(result, Err(GatewayError::LinkUnavailable(_))));
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.consecutive_failures(), 1);
        assert_eq!(delay.calls(), vec![1000; 5]);
    }

    #[test]
    fn poll_walks_through_connecting_without_blocking() {
        let radio = MockRadio::new().with_status_polls(1);
        let clock = ManualClock::new(0);
        let delay = RecordingDelay::new();
        let mut link = LinkManager::new(
            radio.clone(),
            delay.clone(),
            clock.clone(),
            WifiConfig::default(),
            false,
        );

        assert!(link.poll().is_err());
        assert_eq!(link.state(), LinkState::Connecting);
        assert!(link.poll().is_err());
        assert_eq!(link.poll(), Ok(Connected));
        assert_eq!(link.state(), LinkState::Connected);
        assert!(delay.calls().is_empty());
    }

    #[test]
    fn full_length_credentials_reach_the_radio_intact() {
        let radio = MockRadio::new().with_status_polls(3);
        let ssid = "s".repeat(32);
        let password = "p".repeat(64);
        let config = WifiConfig {
            ssid: crate::network_config::bounded(&ssid),
            password: crate::network_config::bounded(&password),
            ..Default::default()
        };
        let mut link = LinkManager::new(
            radio.clone(),
            RecordingDelay::new(),
            ManualClock::new(0),
            config,
            false,
        );

        assert!(link.poll().is_err());
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(radio.last_credentials(), Some((ssid, password)));
    }

    #[test]
    fn poll_restarts_association_after_check_budget() {
        let radio = MockRadio::new().failing_first(1);
        let clock = ManualClock::new(0);
        let mut link = manager(radio.clone(), clock.clone());

        assert!(link.poll().is_err());
        assert_eq!(radio.begin_count(), 1);

        for _ in 0..5 {
            clock.advance(1000);
            let _ = link.poll();
        }

        assert_eq!(radio.begin_count(), 2);
        assert_eq!(link.consecutive_failures(), 1);
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[test]
    fn poll_detects_link_loss() {
        let radio = MockRadio::new();
        radio.set_connected(true);
        let mut link = manager(radio.clone(), ManualClock::new(0));
        assert_eq!(link.poll(), Ok(Connected));

        radio.set_connected(false);
        let still = link.poll().unwrap_err();

        assert_eq!(still.checks, 0);
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(radio.begin_count(), 1);
    }

    #[test]
    fn refresh_records_what_the_radio_reports() {
        let radio = MockRadio::new();
        let mut link = manager(radio.clone(), ManualClock::new(0));
        assert!(!link.refresh());
        assert_eq!(link.state(), LinkState::Disconnected);

        radio.set_connected(true);
        assert!(link.refresh());
        assert!(link.is_connected());

        radio.set_connected(false);
        assert!(!link.refresh());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(radio.begin_count(), 0);
    }

    #[test]
    fn disconnect_resets_state() {
        let radio = MockRadio::new();
        radio.set_connected(true);
        let mut link = manager(radio.clone(), ManualClock::new(0));
        link.ensure_connected();

        link.disconnect().unwrap();

        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!radio.is_up());
    }
}
