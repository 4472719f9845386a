use crate::domain::models::{RemoteSensorRecord, RemoteSnapshot, ThermostatRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const FULL_FEATURED_MODELS: &[&str] = &[
    "athenaSmart",
    "apolloSmart",
    "nikeSmart",
    "vulcanSmart",
    "aresSmart",
];
const OCCUPANCY_MODELS: &[&str] = &[
    "athenaSmart",
    "apolloSmart",
    "corSmart",
    "vulcanSmart",
    "aresSmart",
];
const PRESENCE_EVENT_MODELS: &[&str] = &["athenaSmart", "nikeSmart", "apolloSmart", "vulcanSmart"];

/// Which optional vendor fields a thermostat model reports.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub secondary_temperature: bool,
    pub occupancy_sensor: bool,
    pub remote_sensors: bool,
    pub presence_events: bool,
}

impl CapabilityDescriptor {
    pub fn for_model(model_number: &str) -> Self {
        let full_featured = FULL_FEATURED_MODELS.contains(&model_number);
        Self {
            secondary_temperature: full_featured,
            occupancy_sensor: OCCUPANCY_MODELS.contains(&model_number),
            remote_sensors: full_featured,
            presence_events: PRESENCE_EVENT_MODELS.contains(&model_number),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "capabilities")]
pub enum DeviceCapability {
    FullFeaturedThermostat(CapabilityDescriptor),
    LegacyThermostat(CapabilityDescriptor),
    RemoteSensor,
}

impl DeviceCapability {
    pub fn for_thermostat_model(model_number: &str) -> Self {
        let descriptor = CapabilityDescriptor::for_model(model_number);
        if descriptor.remote_sensors {
            Self::FullFeaturedThermostat(descriptor)
        } else {
            Self::LegacyThermostat(descriptor)
        }
    }

    pub fn descriptor(&self) -> CapabilityDescriptor {
        match self {
            Self::FullFeaturedThermostat(descriptor) | Self::LegacyThermostat(descriptor) => {
                *descriptor
            }
            Self::RemoteSensor => CapabilityDescriptor::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeviceKind {
    Thermostat,
    RemoteSensor,
}

/// A host device bound to a thermostat identifier or remote sensor code of one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBinding {
    pub device_id: String,
    /// Empty means the default account.
    #[serde(default)]
    pub account_id: String,
    pub address: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub hold_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StateValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

pub type DeviceStates = BTreeMap<String, StateValue>;

/// Maps the snapshot entry for `binding` onto host state keys.
///
/// Returns `None` when the snapshot holds no data for the bound address.
pub fn map_device_states(binding: &DeviceBinding, snapshot: &RemoteSnapshot) -> Option<DeviceStates> {
    match binding.kind {
        DeviceKind::Thermostat => {
            let record = snapshot.thermostat(&binding.address)?;
            let capability =
                DeviceCapability::for_thermostat_model(record.model_number.as_deref().unwrap_or(""));
            Some(thermostat_states(capability, record))
        }
        DeviceKind::RemoteSensor => snapshot.sensor(&binding.address).map(remote_sensor_states),
    }
}

fn thermostat_states(capability: DeviceCapability, record: &ThermostatRecord) -> DeviceStates {
    let descriptor = capability.descriptor();
    let mut states = DeviceStates::new();

    if let Some(model) = record.model_number.as_deref() {
        states.insert("device_type".to_string(), StateValue::Text(model.to_string()));
    }
    insert_temperature(&mut states, "setpointHeat", record.desired_heat);
    insert_temperature(&mut states, "setpointCool", record.desired_cool);
    insert_temperature(&mut states, "temperatureInput1", record.actual_temperature);

    if let Some(climate) = record.current_climate.as_deref() {
        states.insert("climate".to_string(), StateValue::Text(climate.to_string()));
    }
    if let Some(mode) = record.hvac_mode.as_deref().and_then(host_hvac_mode) {
        states.insert("hvacOperationMode".to_string(), StateValue::Text(mode.to_string()));
    }
    if let Some(mode) = record.desired_fan_mode.as_deref().and_then(host_fan_mode) {
        states.insert("hvacFanMode".to_string(), StateValue::Text(mode.to_string()));
    }
    if let Some(humidity) = record.actual_humidity {
        states.insert("humidityInput1".to_string(), StateValue::Number(humidity as f64));
    }
    if let Some(minutes) = record.fan_min_on_time {
        states.insert("fanMinOnTime".to_string(), StateValue::Number(minutes as f64));
    }

    let status = record.equipment_status.as_str();
    states.insert(
        "equipmentStatus".to_string(),
        StateValue::Text(status.to_string()),
    );
    states.insert(
        "hvacHeaterIsOn".to_string(),
        StateValue::Bool(status.contains("heatPump") || status.contains("auxHeat")),
    );
    states.insert(
        "hvacCoolerIsOn".to_string(),
        StateValue::Bool(status.contains("compCool")),
    );
    states.insert(
        "hvacFanIsOn".to_string(),
        StateValue::Bool(status.contains("fan") || status.contains("ventilator")),
    );

    if descriptor.secondary_temperature {
        let reading = record
            .internal
            .get("temperature")
            .and_then(|value| value.parse::<i64>().ok());
        insert_temperature(&mut states, "temperatureInput2", reading);
    }
    if descriptor.presence_events {
        let event = record.latest_event_type.as_deref().unwrap_or("");
        states.insert("autoHome".to_string(), StateValue::Bool(event.contains("autoHome")));
        states.insert("autoAway".to_string(), StateValue::Bool(event.contains("autoAway")));
    }
    if descriptor.occupancy_sensor {
        if let Some(occupied) = record.internal.get("occupancy") {
            states.insert("occupied".to_string(), StateValue::Bool(is_truthy(occupied)));
        }
    }

    states
}

fn remote_sensor_states(sensor: &RemoteSensorRecord) -> DeviceStates {
    let mut states = DeviceStates::new();
    if let Some(occupied) = sensor.capability("occupancy") {
        states.insert("onOffState".to_string(), StateValue::Bool(is_truthy(occupied)));
    }
    // Unresponsive sensors report "unknown" instead of a reading.
    let reading = sensor
        .capability("temperature")
        .filter(|value| !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()))
        .and_then(|value| value.parse::<i64>().ok());
    insert_temperature(&mut states, "sensorValue", reading);
    states
}

fn insert_temperature(states: &mut DeviceStates, key: &str, tenths: Option<i64>) {
    if let Some(tenths) = tenths {
        states.insert(key.to_string(), StateValue::Number(tenths as f64 / 10.0));
    }
}

fn host_hvac_mode(vendor_mode: &str) -> Option<&'static str> {
    match vendor_mode {
        "heat" | "auxHeatOnly" => Some("heat"),
        "cool" => Some("cool"),
        "auto" => Some("heatCool"),
        "off" => Some("off"),
        _ => None,
    }
}

fn host_fan_mode(vendor_mode: &str) -> Option<&'static str> {
    match vendor_mode {
        "auto" => Some("auto"),
        "on" => Some("alwaysOn"),
        _ => None,
    }
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
