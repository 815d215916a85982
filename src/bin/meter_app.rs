//! Simulated Fluvius meter: emits a telegram every second on a UART, the
//! way a real P1 port does, so the gateway can be tested without a meter.

use esp32_p1_gateway::meter::{fluvius_sample, MeterSimulator};
use esp32_p1_gateway::p1::{parse_telegram, Fixed, P1Reader};

/// Fluvius meters push a telegram every second.
const TELEGRAM_INTERVAL_MS: u32 = 1_000;

fn simulator() -> anyhow::Result<MeterSimulator> {
    let sample = fluvius_sample();
    let mut reader = P1Reader::new();
    let frame = sample
        .bytes()
        .find_map(|b| reader.feed(b))
        .ok_or_else(|| anyhow::anyhow!("sample telegram is incomplete"))??;
    let mut meter = MeterSimulator::new(parse_telegram(&frame)?);
    meter.set_power(Fixed::from_milli(1_250));
    Ok(meter)
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
    use esp_idf_svc::sys;

    // Initialize ESP-IDF system services
    sys::link_patches();

    // Initialize logging
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("ESP32 P1 Meter Simulator");
    log::info!("Initializing...");

    let peripherals = Peripherals::take()?;

    // Meter TX on GPIO17, wired to the gateway's P1 RX
    log::info!("Initializing UART2 for P1 output...");
    let uart_config = UartConfig::new().baudrate(115200.into());
    let uart = UartDriver::new(
        peripherals.uart2,
        peripherals.pins.gpio17, // TX
        peripherals.pins.gpio16, // RX (unused)
        Option::<esp_idf_hal::gpio::Gpio0>::None,
        Option::<esp_idf_hal::gpio::Gpio0>::None,
        &uart_config,
    )?;
    log::info!("✅ UART2 initialized (115200 baud)");

    let mut meter = simulator()?;
    let mut sent: u32 = 0;
    loop {
        let telegram = meter.next_telegram(TELEGRAM_INTERVAL_MS);
        match uart.write(telegram.as_bytes()) {
            Ok(_) => {
                sent += 1;
                if sent % 60 == 0 {
                    log::info!("📤 Meter: {} telegrams sent", sent);
                }
            }
            Err(e) => log::warn!("❌ Meter: UART write failed: {:?}", e),
        }
        FreeRtos::delay_ms(TELEGRAM_INTERVAL_MS);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    // On the host, print a few telegrams to stdout
    let mut meter = simulator()?;
    for _ in 0..3 {
        print!("{}", meter.next_telegram(TELEGRAM_INTERVAL_MS));
    }
    Ok(())
}
