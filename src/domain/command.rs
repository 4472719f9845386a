use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HoldType {
    #[default]
    NextTransition,
    Indefinite,
}

impl HoldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NextTransition => "nextTransition",
            Self::Indefinite => "indefinite",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "nextTransition" => Some(Self::NextTransition),
            "indefinite" => Some(Self::Indefinite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HvacMode {
    Auto,
    AuxHeatOnly,
    Cool,
    Heat,
    Off,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::AuxHeatOnly => "auxHeatOnly",
            Self::Cool => "cool",
            Self::Heat => "heat",
            Self::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setpoint {
    Cool,
    Heat,
}

/// Requested change to one setpoint, in °F.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetpointChange {
    Set(f64),
    Increase(f64),
    Decrease(f64),
}

impl SetpointChange {
    pub fn apply(self, current: f64) -> f64 {
        match self {
            Self::Set(value) => value,
            Self::Increase(delta) => current + delta,
            Self::Decrease(delta) => current - delta,
        }
    }
}

/// Host-facing fan mode. `On` is a fan hold; `Auto` hands the fan back to the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    On,
    Auto,
}

/// Write operations forwarded to the vendor thermostat endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ThermostatCommand {
    SetHvacMode(HvacMode),
    /// Setpoints in °F.
    SetHold {
        cool: f64,
        heat: f64,
        hold_type: HoldType,
        fan_on: bool,
    },
    SetClimateHold {
        climate_ref: String,
        hold_type: HoldType,
    },
    ResumeProgram {
        resume_all: bool,
    },
}

impl ThermostatCommand {
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::SetHvacMode(_) => "set HVAC mode",
            Self::SetHold { fan_on: true, .. } => "set hold temp with fan on",
            Self::SetHold { .. } => "set hold temp",
            Self::SetClimateHold { .. } => "set climate hold",
            Self::ResumeProgram { .. } => "resume program",
        }
    }

    /// Hold that moves `setpoint` and keeps the other one at its current value.
    pub fn setpoint_hold(
        current_cool: f64,
        current_heat: f64,
        setpoint: Setpoint,
        change: SetpointChange,
        hold_type: HoldType,
    ) -> Self {
        let (cool, heat) = match setpoint {
            Setpoint::Cool => (change.apply(current_cool), current_heat),
            Setpoint::Heat => (current_cool, change.apply(current_heat)),
        };
        Self::SetHold {
            cool,
            heat,
            hold_type,
            fan_on: false,
        }
    }

    pub fn to_request_body(&self, thermostat_id: &str) -> Value {
        let selection = json!({
            "selectionType": "thermostats",
            "selectionMatch": thermostat_id,
        });

        match self {
            Self::SetHvacMode(mode) => json!({
                "selection": selection,
                "thermostat": { "settings": { "hvacMode": mode.as_str() } },
            }),
            Self::SetHold {
                cool,
                heat,
                hold_type,
                fan_on,
            } => {
                let mut params = json!({
                    "holdType": hold_type.as_str(),
                    "coolHoldTemp": to_tenths(*cool),
                    "heatHoldTemp": to_tenths(*heat),
                });
                if *fan_on {
                    params["fan"] = json!("on");
                }
                function_body(selection, "setHold", params)
            }
            Self::SetClimateHold {
                climate_ref,
                hold_type,
            } => function_body(
                selection,
                "setHold",
                json!({
                    "holdType": hold_type.as_str(),
                    "holdClimateRef": climate_ref,
                }),
            ),
            Self::ResumeProgram { resume_all } => function_body(
                selection,
                "resumeProgram",
                json!({ "resumeAll": resume_all }),
            ),
        }
    }
}

impl fmt::Display for ThermostatCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_name())
    }
}

fn function_body(selection: Value, function_type: &str, params: Value) -> Value {
    json!({
        "selection": selection,
        "functions": [{ "type": function_type, "params": params }],
    })
}

fn to_tenths(degrees: f64) -> i64 {
    (degrees * 10.0).trunc() as i64
}
