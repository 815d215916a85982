use super::dispatcher::ByteSource;
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_hal::uart::UartDriver;
use log::warn;

/// P1 port on an ESP32 UART, with an optional data-request output.
pub struct UartSource<'d> {
    uart: UartDriver<'d>,
    request: Option<PinDriver<'d, AnyOutputPin, Output>>,
}

impl<'d> UartSource<'d> {
    pub fn new(uart: UartDriver<'d>, request: Option<PinDriver<'d, AnyOutputPin, Output>>) -> Self {
        Self { uart, request }
    }
}

impl ByteSource for UartSource<'_> {
    fn read_available(&mut self, buf: &mut [u8]) -> usize {
        // Zero ticks: return what is buffered without blocking
        match self.uart.read(buf, 0) {
            Ok(n) => n,
            Err(e) => {
                warn!("❌ P1: UART read failed: {:?}", e);
                0
            }
        }
    }

    fn set_request(&mut self, active: bool) {
        let Some(pin) = self.request.as_mut() else {
            return;
        };
        let result = if active { pin.set_high() } else { pin.set_low() };
        if let Err(e) = result {
            warn!("❌ P1: request pin update failed: {:?}", e);
        }
    }
}
