//! Derived sensor entities published back to Home Assistant.

use crate::monitor::TankSnapshot;
use serde_json::{json, Map, Value};

const DEVICE_NAME: &str = "Heating Oil Tank";
const DEVICE_SLUG: &str = "heating_oil_tank";
const DEVICE_MANUFACTURER: &str = "Custom";
const DEVICE_MODEL: &str = "Oil Level Monitor";

/// State published when a value can't be computed
pub const UNKNOWN_STATE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    OilLevel,
    OilPercentage,
    OilConsumed,
    OilRemaining,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::OilLevel,
        SensorKind::OilPercentage,
        SensorKind::OilConsumed,
        SensorKind::OilRemaining,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::OilLevel => "Oil Level",
            SensorKind::OilPercentage => "Oil Level Percentage",
            SensorKind::OilConsumed => "Oil Consumed Since Reading",
            SensorKind::OilRemaining => "Oil Remaining",
        }
    }

    fn key(&self) -> &'static str {
        match self {
            SensorKind::OilLevel => "oil_level",
            SensorKind::OilPercentage => "oil_percentage",
            SensorKind::OilConsumed => "oil_consumed",
            SensorKind::OilRemaining => "oil_remaining",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::OilPercentage => "%",
            _ => "L",
        }
    }

    pub fn device_class(&self) -> Option<&'static str> {
        match self {
            SensorKind::OilPercentage => None,
            _ => Some("volume_storage"),
        }
    }

    pub fn state_class(&self) -> &'static str {
        match self {
            SensorKind::OilConsumed => "total_increasing",
            _ => "measurement",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            SensorKind::OilLevel => "mdi:oil",
            SensorKind::OilPercentage => "mdi:gauge",
            SensorKind::OilConsumed => "mdi:fire",
            SensorKind::OilRemaining => "mdi:oil-level",
        }
    }

    /// The Home Assistant entity the state is written to.
    ///
    /// Fixed per sensor kind and not scoped by instance, so only one monitor
    /// can write to a given Home Assistant. `unique_id` does carry the instance.
    pub fn entity_id(&self) -> String {
        format!("sensor.{DEVICE_SLUG}_{}", self.key())
    }

    pub fn unique_id(&self, instance_id: &str) -> String {
        format!("{instance_id}_{}", self.key())
    }

    pub fn value(&self, snapshot: &TankSnapshot) -> Option<f64> {
        match self {
            SensorKind::OilLevel | SensorKind::OilRemaining => snapshot.current_level,
            SensorKind::OilPercentage => snapshot.percentage,
            SensorKind::OilConsumed => snapshot.oil_consumed,
        }
    }

    fn extra_attributes(&self, snapshot: &TankSnapshot, attributes: &mut Map<String, Value>) {
        if *self != SensorKind::OilLevel {
            return;
        }
        let reading = &snapshot.reading;
        attributes.insert("last_reading".into(), json!(reading.last_reading));
        attributes.insert(
            "last_reading_date".into(),
            json!(reading
                .last_reading_date
                .map(|date| date.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        );
        attributes.insert("energy_at_reading".into(), json!(reading.energy_at_reading));
        attributes.insert("oil_consumed".into(), json!(snapshot.oil_consumed));
        attributes.insert(
            "tank_capacity".into(),
            json!(snapshot.config.tank_capacity_litres()),
        );
    }
}

/// One entity state ready to be written to the host
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    pub entity_id: String,
    pub state: String,
    pub attributes: Map<String, Value>,
}

/// Renders every sensor for `snapshot`
pub fn render(instance_id: &str, snapshot: &TankSnapshot) -> Vec<SensorState> {
    SensorKind::ALL
        .iter()
        .map(|kind| render_one(*kind, instance_id, snapshot))
        .collect()
}

fn render_one(kind: SensorKind, instance_id: &str, snapshot: &TankSnapshot) -> SensorState {
    let mut attributes = Map::new();
    attributes.insert("friendly_name".into(), json!(format!("{DEVICE_NAME} {}", kind.name())));
    attributes.insert("unique_id".into(), json!(kind.unique_id(instance_id)));
    attributes.insert("unit_of_measurement".into(), json!(kind.unit()));
    attributes.insert("state_class".into(), json!(kind.state_class()));
    attributes.insert("icon".into(), json!(kind.icon()));
    if let Some(device_class) = kind.device_class() {
        attributes.insert("device_class".into(), json!(device_class));
    }
    attributes.insert(
        "device".into(),
        json!({
            "identifiers": [[crate::config::DOMAIN, instance_id]],
            "name": DEVICE_NAME,
            "manufacturer": DEVICE_MANUFACTURER,
            "model": DEVICE_MODEL,
        }),
    );
    kind.extra_attributes(snapshot, &mut attributes);

    SensorState {
        entity_id: kind.entity_id(),
        state: format_state(kind.value(snapshot)),
        attributes,
    }
}

fn format_state(value: Option<f64>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => UNKNOWN_STATE.to_string(),
    }
}
