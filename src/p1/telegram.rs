//! Fluvius (Belgian DSMR 5) telegram schema and parser.

use super::error::ParseError;
use core::fmt;
use serde::Serialize;

/// OBIS identifier `A-B:C.D.E`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObisId {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
}

impl ObisId {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8) -> Self {
        Self { a, b, c, d, e }
    }

    /// Parses `A-B:C.D.E`; returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Self> {
        let (ab, cde) = text.split_once(':')?;
        let (a, b) = ab.split_once('-')?;
        let mut parts = cde.split('.');
        let c = parts.next()?;
        let d = parts.next()?;
        let e = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            a: a.parse().ok()?,
            b: b.parse().ok()?,
            c: c.parse().ok()?,
            d: d.parse().ok()?,
            e: e.parse().ok()?,
        })
    }
}

impl fmt::Display for ObisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}:{}.{}.{}", self.a, self.b, self.c, self.d, self.e)
    }
}

/// Decimal reading stored in thousandths of its unit (Wh for kWh, mA for A, dm3 for m3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(into = "f64")]
pub struct Fixed(i64);

impl Fixed {
    pub const fn from_milli(milli: i64) -> Self {
        Self(milli)
    }

    pub fn milli(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Parses `[-]digits[.digits]` with at most three decimals.
    fn parse(text: &str) -> Option<Self> {
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty()
            || frac_part.len() > 3
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let mut milli: i64 = int_part.parse::<i64>().ok()?.checked_mul(1000)?;
        let mut scale = 100;
        for b in frac_part.bytes() {
            milli = milli.checked_add(i64::from(b - b'0') * scale)?;
            scale /= 10;
        }
        if negative {
            milli = milli.checked_neg()?;
        }
        Some(Self(milli))
    }
}

impl From<Fixed> for f64 {
    fn from(value: Fixed) -> Self {
        value.as_f64()
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:03}", abs / 1000, abs % 1000)
    }
}

/// Meter reading tagged with the time the meter captured it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimestampedFixed {
    pub timestamp: String,
    pub value: Fixed,
}

/// One parsed Fluvius telegram. Fields missing from the telegram stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelegramRecord {
    /// Header line without the leading `/`
    pub identification: String,
    pub timestamp: Option<String>,
    pub equipment_id: Option<String>,
    pub message_long: Option<String>,

    pub meter_id_electr: Option<String>,
    pub electricity_switch_position: Option<u8>,
    pub electricity_threshold: Option<Fixed>,
    pub current_max: Option<u16>,

    pub electricity_tariff: Option<String>,
    pub energy_delivered_tariff1: Option<Fixed>,
    pub energy_delivered_tariff2: Option<Fixed>,
    pub energy_returned_tariff1: Option<Fixed>,
    pub energy_returned_tariff2: Option<Fixed>,

    pub power_delivered: Option<Fixed>,
    pub power_delivered_l1: Option<Fixed>,
    pub power_delivered_l2: Option<Fixed>,
    pub power_delivered_l3: Option<Fixed>,
    pub power_returned: Option<Fixed>,
    pub power_returned_l1: Option<Fixed>,
    pub power_returned_l2: Option<Fixed>,
    pub power_returned_l3: Option<Fixed>,
    pub voltage_l1: Option<Fixed>,
    pub voltage_l2: Option<Fixed>,
    pub voltage_l3: Option<Fixed>,
    pub current_l1: Option<Fixed>,
    pub current_l2: Option<Fixed>,
    pub current_l3: Option<Fixed>,

    pub meter_id_gas: Option<String>,
    pub gas_device_type: Option<u16>,
    pub gas_valve_position: Option<u8>,
    pub gas_m3: Option<TimestampedFixed>,
}

/// Decoder applied to the values of one known OBIS line.
enum Kind {
    Text(fn(&mut TelegramRecord) -> &mut Option<String>),
    Timestamp(fn(&mut TelegramRecord) -> &mut Option<String>),
    Decimal(&'static str, fn(&mut TelegramRecord) -> &mut Option<Fixed>),
    U8(fn(&mut TelegramRecord) -> &mut Option<u8>),
    U16(Option<&'static str>, fn(&mut TelegramRecord) -> &mut Option<u16>),
    GasVolume,
}

fn field_kind(id: ObisId) -> Option<Kind> {
    use Kind::*;
    let kind = match (id.a, id.b, id.c, id.d, id.e) {
        (0, 0, 1, 0, 0) => Timestamp(|r| &mut r.timestamp),
        (0, 0, 96, 1, 1) => Text(|r| &mut r.equipment_id),
        (0, 0, 96, 13, 0) => Text(|r| &mut r.message_long),
        (0, 0, 96, 1, 4) => Text(|r| &mut r.meter_id_electr),
        (0, 0, 96, 3, 10) => U8(|r| &mut r.electricity_switch_position),
        (0, 0, 17, 0, 0) => Decimal("kW", |r| &mut r.electricity_threshold),
        (1, 0, 31, 4, 0) => U16(Some("A"), |r| &mut r.current_max),
        (0, 0, 96, 14, 0) => Text(|r| &mut r.electricity_tariff),
        (1, 0, 1, 8, 1) => Decimal("kWh", |r| &mut r.energy_delivered_tariff1),
        (1, 0, 1, 8, 2) => Decimal("kWh", |r| &mut r.energy_delivered_tariff2),
        (1, 0, 2, 8, 1) => Decimal("kWh", |r| &mut r.energy_returned_tariff1),
        (1, 0, 2, 8, 2) => Decimal("kWh", |r| &mut r.energy_returned_tariff2),
        (1, 0, 1, 7, 0) => Decimal("kW", |r| &mut r.power_delivered),
        (1, 0, 21, 7, 0) => Decimal("kW", |r| &mut r.power_delivered_l1),
        (1, 0, 41, 7, 0) => Decimal("kW", |r| &mut r.power_delivered_l2),
        (1, 0, 61, 7, 0) => Decimal("kW", |r| &mut r.power_delivered_l3),
        (1, 0, 2, 7, 0) => Decimal("kW", |r| &mut r.power_returned),
        (1, 0, 22, 7, 0) => Decimal("kW", |r| &mut r.power_returned_l1),
        (1, 0, 42, 7, 0) => Decimal("kW", |r| &mut r.power_returned_l2),
        (1, 0, 62, 7, 0) => Decimal("kW", |r| &mut r.power_returned_l3),
        (1, 0, 32, 7, 0) => Decimal("V", |r| &mut r.voltage_l1),
        (1, 0, 52, 7, 0) => Decimal("V", |r| &mut r.voltage_l2),
        (1, 0, 72, 7, 0) => Decimal("V", |r| &mut r.voltage_l3),
        (1, 0, 31, 7, 0) => Decimal("A", |r| &mut r.current_l1),
        (1, 0, 51, 7, 0) => Decimal("A", |r| &mut r.current_l2),
        (1, 0, 71, 7, 0) => Decimal("A", |r| &mut r.current_l3),
        (0, 1, 96, 1, 1) => Text(|r| &mut r.meter_id_gas),
        (0, 1, 24, 1, 0) => U16(None, |r| &mut r.gas_device_type),
        (0, 1, 24, 4, 0) => U8(|r| &mut r.gas_valve_position),
        (0, 1, 24, 2, 3) => GasVolume,
        _ => return None,
    };
    Some(kind)
}

/// Context for errors raised while decoding one line.
struct Line<'a> {
    number: usize,
    obis: ObisId,
    values: Vec<&'a str>,
}

impl Line<'_> {
    fn invalid(&self, value: &str) -> ParseError {
        ParseError::InvalidValue {
            line: self.number,
            obis: self.obis.to_string(),
            value: value.to_string(),
        }
    }

    fn duplicate(&self) -> ParseError {
        ParseError::DuplicateField {
            line: self.number,
            obis: self.obis.to_string(),
        }
    }

    fn single(&self) -> Result<&str, ParseError> {
        match self.values.as_slice() {
            [value] => Ok(*value),
            _ => Err(ParseError::MalformedLine { line: self.number }),
        }
    }

    /// Splits `number*unit` and checks the unit.
    fn with_unit<'v>(&self, value: &'v str, expected: &str) -> Result<&'v str, ParseError> {
        let Some((number, unit)) = value.split_once('*') else {
            return Err(ParseError::InvalidUnit {
                line: self.number,
                obis: self.obis.to_string(),
                found: String::new(),
                expected: expected.to_string(),
            });
        };
        if !unit.eq_ignore_ascii_case(expected) {
            return Err(ParseError::InvalidUnit {
                line: self.number,
                obis: self.obis.to_string(),
                found: unit.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(number)
    }

    fn fixed(&self, value: &str, unit: &str) -> Result<Fixed, ParseError> {
        let number = self.with_unit(value, unit)?;
        Fixed::parse(number).ok_or_else(|| self.invalid(value))
    }

    fn timestamp(&self, value: &str) -> Result<String, ParseError> {
        // YYMMDDhhmmss + S(ummer)/W(inter)
        let valid = value.len() == 13
            && value.as_bytes()[..12].iter().all(u8::is_ascii_digit)
            && matches!(value.as_bytes()[12], b'S' | b'W');
        if valid {
            Ok(value.to_string())
        } else {
            Err(self.invalid(value))
        }
    }
}

fn store<T>(slot: &mut Option<T>, value: T, line: &Line<'_>) -> Result<(), ParseError> {
    if slot.is_some() {
        return Err(line.duplicate());
    }
    *slot = Some(value);
    Ok(())
}

fn apply(record: &mut TelegramRecord, kind: Kind, line: &Line<'_>) -> Result<(), ParseError> {
    match kind {
        Kind::Text(slot) => {
            let value = line.single()?.to_string();
            store(slot(record), value, line)
        }
        Kind::Timestamp(slot) => {
            let value = line.timestamp(line.single()?)?;
            store(slot(record), value, line)
        }
        Kind::Decimal(unit, slot) => {
            let value = line.fixed(line.single()?, unit)?;
            store(slot(record), value, line)
        }
        Kind::U8(slot) => {
            let raw = line.single()?;
            let value = raw.parse().map_err(|_| line.invalid(raw))?;
            store(slot(record), value, line)
        }
        Kind::U16(unit, slot) => {
            let raw = line.single()?;
            let number = match unit {
                Some(unit) => line.with_unit(raw, unit)?,
                None => raw,
            };
            let value = number.parse().map_err(|_| line.invalid(raw))?;
            store(slot(record), value, line)
        }
        Kind::GasVolume => {
            let [timestamp, volume] = line.values.as_slice() else {
                return Err(ParseError::MalformedLine { line: line.number });
            };
            let value = TimestampedFixed {
                timestamp: line.timestamp(timestamp)?,
                value: line.fixed(volume, "m3")?,
            };
            store(&mut record.gas_m3, value, line)
        }
    }
}

/// Splits `ID(v1)(v2)...` into the id and its values.
fn split_line(text: &str) -> Option<(&str, Vec<&str>)> {
    let open = text.find('(')?;
    let (id, mut rest) = text.split_at(open);
    let mut values = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('(')?;
        let close = inner.find(')')?;
        values.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    Some((id, values))
}

/// Parses a checksum-verified frame (`/` header through the closing `!`).
///
/// Lines with an OBIS id outside the Fluvius schema are skipped. A known id
/// that appears twice fails the whole telegram with
/// [`ParseError::DuplicateField`].
pub fn parse_telegram(text: &str) -> Result<TelegramRecord, ParseError> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim_end()));

    let header = loop {
        match lines.next() {
            Some((_, "")) => continue,
            Some((_, line)) => break line,
            None => return Err(ParseError::Empty),
        }
    };
    let identification = header.strip_prefix('/').ok_or(ParseError::MissingHeader)?;

    let mut record = TelegramRecord {
        identification: identification.to_string(),
        ..Default::default()
    };

    for (number, text) in lines {
        if text.is_empty() || text.starts_with('!') {
            continue;
        }

        let (id, values) = split_line(text).ok_or(ParseError::MalformedLine { line: number })?;
        let obis = ObisId::parse(id).ok_or_else(|| ParseError::InvalidObis {
            line: number,
            id: id.to_string(),
        })?;

        if let Some(kind) = field_kind(obis) {
            let line = Line {
                number,
                obis,
                values,
            };
            apply(&mut record, kind, &line)?;
        }
    }

    Ok(record)
}
