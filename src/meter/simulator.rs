use crate::p1::reader::frame_crc;
use crate::p1::telegram::{Fixed, TelegramRecord};
use core::fmt::Write as _;

/// Capture of a single-phase Fluvius meter, without its checksum line.
pub const FLUVIUS_SAMPLE_BODY: &str = "/FLU5\\253769484_A\r\n\
\r\n\
0-0:96.1.4(50217)\r\n\
0-0:96.1.1(3153414733313031303231363035)\r\n\
0-0:1.0.0(200512135409S)\r\n\
1-0:1.8.1(000000.034*kWh)\r\n\
1-0:1.8.2(000015.758*kWh)\r\n\
1-0:2.8.1(000000.000*kWh)\r\n\
1-0:2.8.2(000000.011*kWh)\r\n\
1-0:1.4.0(00.000*kW)\r\n\
1-0:1.6.0(200509134558S)(00.000*kW)\r\n\
0-0:98.1.0(0)(1-0:1.6.0)(1-0:1.6.0)()\r\n\
0-0:96.14.0(0001)\r\n\
1-0:1.7.0(00.000*kW)\r\n\
1-0:2.7.0(00.000*kW)\r\n\
1-0:32.7.0(234.7*V)\r\n\
1-0:31.7.0(000.00*A)\r\n\
0-0:96.3.10(1)\r\n\
0-0:17.0.0(999.9*kW)\r\n\
1-0:31.4.0(999*A)\r\n\
0-0:96.13.0()\r\n\
0-1:24.1.0(003)\r\n\
0-1:96.1.1(37464C4F32313139303333373333)\r\n\
0-1:24.4.0(1)\r\n\
0-1:24.2.3(200512134558S)(00112.384*m3)\r\n\
!";

/// The sample capture, framed with its checksum.
pub fn fluvius_sample() -> String {
    frame(FLUVIUS_SAMPLE_BODY)
}

/// Appends the CRC line to a `/`...`!` body.
pub fn frame(body: &str) -> String {
    format!("{body}{:04X}\r\n", frame_crc(body.as_bytes()))
}

/// Assembles a P1 telegram line by line.
#[derive(Debug, Clone)]
pub struct TelegramBuilder {
    body: String,
}

impl TelegramBuilder {
    /// Starts a telegram with header `/identification` and the blank line after it.
    pub fn new(identification: &str) -> Self {
        Self {
            body: format!("/{identification}\r\n\r\n"),
        }
    }

    /// Adds `obis(value)`.
    pub fn line(mut self, obis: &str, value: &str) -> Self {
        let _ = write!(self.body, "{obis}({value})\r\n");
        self
    }

    /// Adds `obis(value*unit)`.
    pub fn fixed(self, obis: &str, value: Fixed, unit: &str) -> Self {
        self.line(obis, &format!("{value}*{unit}"))
    }

    /// Closes the telegram and appends its checksum.
    pub fn build(mut self) -> String {
        self.body.push('!');
        frame(&self.body)
    }
}

/// Writes every present field of `record` back out as a telegram.
pub fn render_record(record: &TelegramRecord) -> String {
    let mut t = TelegramBuilder::new(&record.identification);

    let text = [
        ("0-0:96.1.4", &record.meter_id_electr),
        ("0-0:96.1.1", &record.equipment_id),
        ("0-0:1.0.0", &record.timestamp),
        ("0-0:96.14.0", &record.electricity_tariff),
        ("0-0:96.13.0", &record.message_long),
    ];
    for (obis, value) in text {
        if let Some(value) = value {
            t = t.line(obis, value);
        }
    }

    let fixed = [
        ("1-0:1.8.1", record.energy_delivered_tariff1, "kWh"),
        ("1-0:1.8.2", record.energy_delivered_tariff2, "kWh"),
        ("1-0:2.8.1", record.energy_returned_tariff1, "kWh"),
        ("1-0:2.8.2", record.energy_returned_tariff2, "kWh"),
        ("1-0:1.7.0", record.power_delivered, "kW"),
        ("1-0:21.7.0", record.power_delivered_l1, "kW"),
        ("1-0:41.7.0", record.power_delivered_l2, "kW"),
        ("1-0:61.7.0", record.power_delivered_l3, "kW"),
        ("1-0:2.7.0", record.power_returned, "kW"),
        ("1-0:22.7.0", record.power_returned_l1, "kW"),
        ("1-0:42.7.0", record.power_returned_l2, "kW"),
        ("1-0:62.7.0", record.power_returned_l3, "kW"),
        ("1-0:32.7.0", record.voltage_l1, "V"),
        ("1-0:52.7.0", record.voltage_l2, "V"),
        ("1-0:72.7.0", record.voltage_l3, "V"),
        ("1-0:31.7.0", record.current_l1, "A"),
        ("1-0:51.7.0", record.current_l2, "A"),
        ("1-0:71.7.0", record.current_l3, "A"),
        ("0-0:17.0.0", record.electricity_threshold, "kW"),
    ];
    for (obis, value, unit) in fixed {
        if let Some(value) = value {
            t = t.fixed(obis, value, unit);
        }
    }

    if let Some(position) = record.electricity_switch_position {
        t = t.line("0-0:96.3.10", &position.to_string());
    }
    if let Some(current) = record.current_max {
        t = t.line("1-0:31.4.0", &format!("{current:03}*A"));
    }
    if let Some(device) = record.gas_device_type {
        t = t.line("0-1:24.1.0", &format!("{device:03}"));
    }
    if let Some(id) = &record.meter_id_gas {
        t = t.line("0-1:96.1.1", id);
    }
    if let Some(position) = record.gas_valve_position {
        t = t.line("0-1:24.4.0", &position.to_string());
    }
    if let Some(gas) = &record.gas_m3 {
        t = t.line("0-1:24.2.3", &format!("{})({}*m3", gas.timestamp, gas.value));
    }

    t.build()
}

/// Meter that keeps drawing a constant load and reports it in telegrams.
#[derive(Debug, Clone)]
pub struct MeterSimulator {
    record: TelegramRecord,
    /// Energy in Wh·ms not yet large enough to show in the counter
    residue: i64,
}

impl MeterSimulator {
    /// Starts from `record`, drawing `power_delivered` (or nothing) from then on.
    pub fn new(record: TelegramRecord) -> Self {
        Self { record, residue: 0 }
    }

    pub fn set_power(&mut self, power: Fixed) {
        self.record.power_delivered = Some(power);
        self.record.power_delivered_l1 = Some(power);
    }

    pub fn record(&self) -> &TelegramRecord {
        &self.record
    }

    /// Integrates `elapsed_ms` of load into the tariff 1 counter and renders a telegram.
    pub fn next_telegram(&mut self, elapsed_ms: u32) -> String {
        let watts = self.record.power_delivered.map_or(0, Fixed::milli);
        // W * ms = Wh * 3_600_000
        self.residue += watts * i64::from(elapsed_ms);
        let wh = self.residue / 3_600_000;
        self.residue %= 3_600_000;

        let counter = self
            .record
            .energy_delivered_tariff1
            .map_or(0, Fixed::milli);
        self.record.energy_delivered_tariff1 = Some(Fixed::from_milli(counter + wh));

        render_record(&self.record)
    }
}
