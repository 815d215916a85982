use crate::p1::TelegramRecord;
use log::info;

/// Values shown on the status screen.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayMetrics {
    /// Net draw in watts; negative while feeding in
    pub power_consumption_w: i32,
    /// Gas counter in litres, when the meter reports one
    pub gas_counter_l: Option<i64>,
    pub wifi_ssid: String,
}

impl DisplayMetrics {
    pub fn from_record(record: &TelegramRecord, wifi_ssid: &str) -> Self {
        // kW in thousandths is W
        let delivered = record.power_delivered.map_or(0, |p| p.milli());
        let returned = record.power_returned.map_or(0, |p| p.milli());
        let net = (delivered - returned).clamp(i64::from(i32::MIN), i64::from(i32::MAX));

        Self {
            power_consumption_w: net as i32,
            // m3 in thousandths is litres
            gas_counter_l: record.gas_m3.as_ref().map(|g| g.value.milli()),
            wifi_ssid: wifi_ssid.to_string(),
        }
    }
}

/// Output-only status screen.
pub trait MetricsDisplay {
    fn draw_version(&mut self, version: &str);
    fn draw_metrics(&mut self, metrics: &DisplayMetrics);
}

/// Screen stand-in that writes to the log.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl MetricsDisplay for LogDisplay {
    fn draw_version(&mut self, version: &str) {
        info!("🖥️ Firmware version : {}", version);
    }

    fn draw_metrics(&mut self, metrics: &DisplayMetrics) {
        match metrics.gas_counter_l {
            Some(gas) => info!(
                "🖥️ PCons={} W  Gas={} l  SSID={}",
                metrics.power_consumption_w, gas, metrics.wifi_ssid
            ),
            None => info!(
                "🖥️ PCons={} W  SSID={}",
                metrics.power_consumption_w, metrics.wifi_ssid
            ),
        }
    }
}
