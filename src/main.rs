#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp32_p1_gateway::display::LogDisplay;
    use esp32_p1_gateway::gateway::{MeterGateway, Uplink};
    use esp32_p1_gateway::http::{HttpSession, TcpConnector};
    use esp32_p1_gateway::mqtt::{EspMqttTransport, MqttSession};
    use esp32_p1_gateway::network_config::{Settings, UplinkKind};
    use esp32_p1_gateway::p1::{TelegramDispatcher, UartSource};
    use esp32_p1_gateway::wifi::{EspRadio, LinkManager};
    use esp32_p1_gateway::SystemClock;
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, PinDriver};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys;
    use std::time::Duration;

    fn run<U: Uplink>(
        mut gateway: MeterGateway<UartSource<'static>, U, SystemClock, LogDisplay>,
    ) -> anyhow::Result<()> {
        gateway.begin(env!("CARGO_PKG_VERSION"));
        loop {
            if let Err(e) = gateway.tick() {
                log::warn!("⚠️ Gateway tick: {}", e);
            }
            FreeRtos::delay_ms(10);
        }
    }

    // Initialize ESP-IDF system services
    sys::link_patches();

    // Initialize logging
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("ESP32 P1 Smart Meter Gateway v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Initializing...");

    let settings = Settings::from_json(option_env!("GATEWAY_SETTINGS_JSON").unwrap_or("{}"))?;
    let debug = settings.debug_output;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    log::info!("✅ ESP32 initialized with ESP-IDF");

    // P1 port on UART2; TX must be assigned but stays unconnected
    log::info!(
        "Initializing UART2 for P1 (RX GPIO{}, {} baud)...",
        settings.p1.uart_rx_pin,
        settings.p1.baud_rate
    );
    let uart_config = UartConfig::new().baudrate(settings.p1.baud_rate.into());
    // SAFETY: the pin numbers come from the board settings and are not claimed elsewhere
    let (tx_pin, rx_pin) = unsafe {
        (
            AnyIOPin::new(i32::from(settings.p1.uart_tx_pin)),
            AnyIOPin::new(i32::from(settings.p1.uart_rx_pin)),
        )
    };
    let uart = UartDriver::new(
        peripherals.uart2,
        tx_pin,
        rx_pin,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;

    let request = match settings.p1.request_pin {
        // SAFETY: as above
        Some(pin) => Some(PinDriver::output(unsafe { AnyOutputPin::new(i32::from(pin)) })?),
        None => None,
    };
    let dispatcher = TelegramDispatcher::new(UartSource::new(uart, request), debug);
    log::info!("✅ UART2 initialized");

    let radio = EspRadio::new(peripherals.modem, sysloop, nvs)?;
    let link = LinkManager::new(radio, FreeRtos, SystemClock::new(), settings.wifi.clone(), debug);
    let clock = SystemClock::new();

    match settings.gateway.uplink {
        UplinkKind::Http => {
            let connector = TcpConnector::new(Duration::from_millis(u64::from(
                settings.http.connect_timeout_ms,
            )));
            let http = HttpSession::new(link, connector, settings.http.clone(), debug);
            run(MeterGateway::new(dispatcher, http, clock, LogDisplay, &settings.gateway))
        }
        UplinkKind::Mqtt => {
            let mut mqtt = MqttSession::new(link, EspMqttTransport::new(), settings.mqtt.clone(), debug);
            mqtt.set_on_message(|topic: &str, message: &str| {
                log::info!("📩 MQTT message on '{}': {}", topic, message);
            });
            if !settings.mqtt.command_topic.is_empty() {
                mqtt.subscribe(settings.mqtt.command_topic.as_str())?;
            }
            run(MeterGateway::new(dispatcher, mqtt, clock, LogDisplay, &settings.gateway))
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    println!(
        "gateway_app v{} drives ESP32 hardware; build it for an espidf target.",
        env!("CARGO_PKG_VERSION")
    );
    println!("The gateway core is exercised on the host by `cargo test`.");
}
