use crate::domain::models::{RemoteSensorRecord, RemoteSnapshot, ThermostatRecord};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const SENSOR_TYPE_REMOTE: &str = "ecobee3_remote_sensor";
const SENSOR_TYPE_THERMOSTAT: &str = "thermostat";
const SENSOR_TYPE_MONITOR: &str = "monitor_sensor";
const CAPABILITY_OCCUPANCY: &str = "occupancy";

/// Builds a complete snapshot from the vendor's `thermostatList`.
pub fn parse_thermostat_list(thermostats: &[Value]) -> RemoteSnapshot {
    let mut snapshot = RemoteSnapshot::default();

    for raw in thermostats {
        let Some(identifier) = str_at(raw, &["identifier"])
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            debug!("skipping thermostat entry without identifier");
            continue;
        };

        let mut record = ThermostatRecord {
            identifier: identifier.to_string(),
            name: str_at(raw, &["name"]).unwrap_or(identifier).to_string(),
            brand: owned_str_at(raw, &["brand"]),
            features: owned_str_at(raw, &["features"]),
            model_number: owned_str_at(raw, &["modelNumber"]),
            equipment_status: str_at(raw, &["equipmentStatus"]).unwrap_or("").to_string(),
            current_climate: owned_str_at(raw, &["program", "currentClimateRef"]),
            hvac_mode: owned_str_at(raw, &["settings", "hvacMode"]),
            fan_min_on_time: int_at(raw, &["settings", "fanMinOnTime"]),
            desired_cool: int_at(raw, &["runtime", "desiredCool"]),
            desired_heat: int_at(raw, &["runtime", "desiredHeat"]),
            actual_temperature: int_at(raw, &["runtime", "actualTemperature"]),
            actual_humidity: int_at(raw, &["runtime", "actualHumidity"]),
            desired_fan_mode: owned_str_at(raw, &["runtime", "desiredFanMode"]),
            latest_event_type: raw
                .get("events")
                .and_then(Value::as_array)
                .and_then(|events| events.first())
                .and_then(|event| event.get("type"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            climates: parse_climates(raw),
            internal: BTreeMap::new(),
            remotes: BTreeMap::new(),
        };

        for sensor in raw
            .get("remoteSensors")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            match str_at(sensor, &["type"]) {
                Some(SENSOR_TYPE_REMOTE) => {
                    let Some(code) = str_at(sensor, &["code"]).filter(|code| !code.is_empty()) else {
                        debug!(thermostat = identifier, "skipping remote sensor without code");
                        continue;
                    };
                    let remote = RemoteSensorRecord {
                        code: code.to_string(),
                        name: str_at(sensor, &["name"]).unwrap_or(code).to_string(),
                        thermostat: identifier.to_string(),
                        capabilities: parse_capabilities(sensor, |_| true),
                    };
                    snapshot.sensors.insert(remote.code.clone(), remote.clone());
                    record.remotes.insert(remote.code.clone(), remote);
                }
                Some(SENSOR_TYPE_THERMOSTAT) => {
                    record.internal = parse_capabilities(sensor, |_| true);
                }
                Some(SENSOR_TYPE_MONITOR) => {
                    record.internal = parse_capabilities(sensor, |kind| kind == CAPABILITY_OCCUPANCY);
                }
                _ => {}
            }
        }

        snapshot.thermostats.insert(record.identifier.clone(), record);
    }

    snapshot
}

fn parse_climates(raw: &Value) -> BTreeMap<String, String> {
    raw.get("program")
        .and_then(|program| program.get("climates"))
        .and_then(Value::as_array)
        .map(|climates| {
            climates
                .iter()
                .filter_map(|climate| {
                    let climate_ref = str_at(climate, &["climateRef"])?;
                    let name = str_at(climate, &["name"]).unwrap_or(climate_ref);
                    Some((climate_ref.to_string(), name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_capabilities<F>(sensor: &Value, keep: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> bool,
{
    sensor
        .get("capability")
        .and_then(Value::as_array)
        .map(|capabilities| {
            capabilities
                .iter()
                .filter_map(|capability| {
                    let kind = str_at(capability, &["type"])?;
                    if !keep(kind) {
                        return None;
                    }
                    let value = match capability.get("value")? {
                        Value::String(value) => value.clone(),
                        Value::Null => return None,
                        other => other.to_string(),
                    };
                    Some((kind.to_string(), value))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn value_at<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(raw, |current, key| current.get(*key))
}

fn str_at<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a str> {
    value_at(raw, path).and_then(Value::as_str)
}

fn owned_str_at(raw: &Value, path: &[&str]) -> Option<String> {
    str_at(raw, path).map(ToOwned::to_owned)
}

/// Integers sometimes arrive as strings.
fn int_at(raw: &Value, path: &[&str]) -> Option<i64> {
    match value_at(raw, path)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_thermostat() -> Value {
        json!({
            "identifier": "311012345678",
            "name": "Hallway",
            "brand": "ecobee",
            "features": "HomeKit",
            "modelNumber": "athenaSmart",
            "equipmentStatus": "heatPump,fan",
            "program": {
                "currentClimateRef": "home",
                "climates": [
                    { "climateRef": "home", "name": "Home" },
                    { "climateRef": "away", "name": "Away" }
                ]
            },
            "settings": { "hvacMode": "auto", "fanMinOnTime": 5 },
            "runtime": {
                "desiredCool": 760,
                "desiredHeat": 680,
                "actualTemperature": 705,
                "actualHumidity": 41,
                "desiredFanMode": "auto"
            },
            "events": [{ "type": "autoAway" }],
            "remoteSensors": [
                {
                    "code": "RS01",
                    "name": "Bedroom",
                    "type": "ecobee3_remote_sensor",
                    "capability": [
                        { "type": "temperature", "value": "698" },
                        { "type": "occupancy", "value": "false" }
                    ]
                },
                {
                    "name": "Hallway",
                    "type": "thermostat",
                    "capability": [
                        { "type": "temperature", "value": "712" },
                        { "type": "humidity", "value": "41" },
                        { "type": "occupancy", "value": "true" }
                    ]
                }
            ]
        })
    }

    #[test]
    fn parses_thermostat_fields_and_nested_sensors() {
        let snapshot = parse_thermostat_list(&[sample_thermostat()]);

        let record = snapshot.thermostat("311012345678").expect("thermostat record");
        assert_eq!(record.name, "Hallway");
        assert_eq!(record.model_number.as_deref(), Some("athenaSmart"));
        assert_eq!(record.current_climate.as_deref(), Some("home"));
        assert_eq!(record.hvac_mode.as_deref(), Some("auto"));
        assert_eq!(record.fan_min_on_time, Some(5));
        assert_eq!(record.desired_heat, Some(680));
        assert_eq!(record.actual_humidity, Some(41));
        assert_eq!(record.latest_event_type.as_deref(), Some("autoAway"));
        assert_eq!(record.climates.get("away").map(String::as_str), Some("Away"));
        assert_eq!(record.internal.get("temperature").map(String::as_str), Some("712"));
        assert_eq!(record.internal.len(), 3);
        assert!(record.remotes.contains_key("RS01"));

        let sensor = snapshot.sensor("RS01").expect("sensor record");
        assert_eq!(sensor.thermostat, "311012345678");
        assert_eq!(sensor.capability("temperature"), Some("698"));
    }

    #[test]
    fn monitor_sensor_keeps_occupancy_only() {
        let mut raw = sample_thermostat();
        raw["remoteSensors"] = json!([{
            "type": "monitor_sensor",
            "capability": [
                { "type": "occupancy", "value": "true" },
                { "type": "temperature", "value": "700" }
            ]
        }]);

        let snapshot = parse_thermostat_list(&[raw]);
        let record = snapshot.thermostat("311012345678").expect("thermostat record");
        assert_eq!(record.internal.len(), 1);
        assert_eq!(record.internal.get("occupancy").map(String::as_str), Some("true"));
        assert!(snapshot.sensors.is_empty());
    }

    #[test]
    fn missing_fields_fall_back_instead_of_failing() {
        let snapshot = parse_thermostat_list(&[
            json!({ "identifier": "bare" }),
            json!({ "name": "no identifier" }),
            json!({ "identifier": "stringy", "runtime": { "desiredHeat": "655" } }),
        ]);

        assert_eq!(snapshot.thermostats.len(), 2);
        let bare = snapshot.thermostat("bare").expect("bare record");
        assert_eq!(bare.name, "bare");
        assert_eq!(bare.equipment_status, "");
        assert!(bare.hvac_mode.is_none());
        assert!(bare.latest_event_type.is_none());
        assert!(bare.climates.is_empty());
        assert_eq!(
            snapshot.thermostat("stringy").and_then(|record| record.desired_heat),
            Some(655)
        );
    }
}
