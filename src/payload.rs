//! JSON documents for the time-series collector.
//!
//! The collector accepts `{"measurement", "tags", "fields", "bucket"}` where
//! tags are string pairs and fields are numbers.

use crate::p1::{Fixed, TelegramRecord};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_BUCKET: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorMessage {
    pub measurement: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<&'static str, String>,
    pub fields: BTreeMap<&'static str, f64>,
    pub bucket: &'static str,
}

impl CollectorMessage {
    fn new(measurement: &'static str) -> Self {
        Self {
            measurement,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            bucket: DEFAULT_BUCKET,
        }
    }

    fn tag(&mut self, key: &'static str, value: &Option<String>) {
        if let Some(value) = value {
            self.tags.insert(key, value.clone());
        }
    }

    fn field(&mut self, key: &'static str, value: Option<Fixed>) {
        if let Some(value) = value {
            self.fields.insert(key, value.as_f64());
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Electricity readings of a telegram. Absent values are left out.
pub fn electricity_message(record: &TelegramRecord) -> CollectorMessage {
    let mut msg = CollectorMessage::new("electricity");
    msg.tag("meter_id", &record.meter_id_electr);
    msg.tag("tariff", &record.electricity_tariff);

    msg.field("energy_delivered_tariff1_kwh", record.energy_delivered_tariff1);
    msg.field("energy_delivered_tariff2_kwh", record.energy_delivered_tariff2);
    msg.field("energy_returned_tariff1_kwh", record.energy_returned_tariff1);
    msg.field("energy_returned_tariff2_kwh", record.energy_returned_tariff2);
    msg.field("power_delivered_kw", record.power_delivered);
    msg.field("power_delivered_l1_kw", record.power_delivered_l1);
    msg.field("power_delivered_l2_kw", record.power_delivered_l2);
    msg.field("power_delivered_l3_kw", record.power_delivered_l3);
    msg.field("power_returned_kw", record.power_returned);
    msg.field("power_returned_l1_kw", record.power_returned_l1);
    msg.field("power_returned_l2_kw", record.power_returned_l2);
    msg.field("power_returned_l3_kw", record.power_returned_l3);
    msg.field("voltage_l1_v", record.voltage_l1);
    msg.field("voltage_l2_v", record.voltage_l2);
    msg.field("voltage_l3_v", record.voltage_l3);
    msg.field("current_l1_a", record.current_l1);
    msg.field("current_l2_a", record.current_l2);
    msg.field("current_l3_a", record.current_l3);
    msg
}

/// Gas reading of a telegram, if it carried one.
pub fn gas_message(record: &TelegramRecord) -> Option<CollectorMessage> {
    let gas = record.gas_m3.as_ref()?;
    let mut msg = CollectorMessage::new("gas");
    msg.tag("meter_id", &record.meter_id_gas);
    msg.tags.insert("meter_timestamp", gas.timestamp.clone());
    msg.field("volume_m3", Some(gas.value));
    Some(msg)
}

pub fn electricity_payload(record: &TelegramRecord) -> serde_json::Result<String> {
    electricity_message(record).to_json()
}

pub fn gas_payload(record: &TelegramRecord) -> Option<serde_json::Result<String>> {
    gas_message(record).map(|msg| msg.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::simulator::FLUVIUS_SAMPLE_BODY;
    use crate::p1::parse_telegram;
    use serde_json::{json, Value};

    fn sample() -> TelegramRecord {
        parse_telegram(FLUVIUS_SAMPLE_BODY).unwrap()
    }

    #[test]
    fn electricity_document_has_collector_shape() {
        let json: Value = serde_json::from_str(&electricity_payload(&sample()).unwrap()).unwrap();

        assert_eq!(json["measurement"], "electricity");
        assert_eq!(json["bucket"], "default");
        assert_eq!(json["tags"], json!({"meter_id": "50217", "tariff": "0001"}));
        assert_eq!(json["fields"]["energy_delivered_tariff2_kwh"], json!(15.758));
        assert_eq!(json["fields"]["voltage_l1_v"], json!(234.7));
        assert!(json["fields"].get("voltage_l2_v").is_none());
    }

    #[test]
    fn gas_document_only_when_gas_present() {
        let json: Value = serde_json::from_str(&gas_payload(&sample()).unwrap().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "measurement": "gas",
                "tags": {"meter_id": "37464C4F32313139303333373333", "meter_timestamp": "200512134558S"},
                "fields": {"volume_m3": 112.384},
                "bucket": "default"
            })
        );

        assert!(gas_payload(&TelegramRecord::default()).is_none());
    }

    #[test]
    fn empty_record_omits_tags() {
        let json: Value =
            serde_json::from_str(&electricity_payload(&TelegramRecord::default()).unwrap()).unwrap();
        assert!(json.get("tags").is_none());
        assert_eq!(json["fields"], json!({}));
    }
}
