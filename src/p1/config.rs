use serde::{Deserialize, Serialize};

/// Serial settings of the P1 port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct P1Config {
    /// Baud rate, 8N1 framing
    pub baud_rate: u32,

    /// GPIO receiving the meter's TX line
    pub uart_rx_pin: u8,

    /// TX is required by the UART driver but left unconnected
    pub uart_tx_pin: u8,

    /// GPIO driving the data-request line, if wired
    pub request_pin: Option<u8>,
}

impl Default for P1Config {
    fn default() -> Self {
        Self {
            baud_rate: 115_200, // Fluvius (DSMR 5) rate
            uart_rx_pin: 16,
            uart_tx_pin: 17,
            request_pin: None,
        }
    }
}
