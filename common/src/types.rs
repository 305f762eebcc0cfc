use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureMode {
    #[default]
    Target,
    Manual,
}

impl TemperatureMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "target" => Some(Self::Target),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermalState {
    Heating,
    Cooling,
    #[default]
    Off,
}

impl ThermalState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heating => "HEATING",
            Self::Cooling => "COOLING",
            Self::Off => "OFF",
        }
    }

    /// Numeric encoding used by the text exposition.
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Heating => 1,
            Self::Cooling => 2,
        }
    }

    pub fn outputs(self) -> ActuatorOutputs {
        match self {
            Self::Heating => ActuatorOutputs {
                heating: true,
                cooling: false,
            },
            Self::Cooling => ActuatorOutputs {
                heating: false,
                cooling: true,
            },
            Self::Off => ActuatorOutputs {
                heating: false,
                cooling: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Celsius => "celsius",
            Self::Fahrenheit => "fahrenheit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "celsius" => Some(Self::Celsius),
            "fahrenheit" => Some(Self::Fahrenheit),
            _ => None,
        }
    }

    pub fn from_celsius(self, celsius: f64) -> f64 {
        match self {
            Self::Celsius => celsius,
            Self::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    pub fn to_celsius(self, value: f64) -> f64 {
        match self {
            Self::Celsius => value,
            Self::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
        }
    }

    /// Re-expresses `value`, given in this unit, in `target`.
    pub fn convert(self, value: f64, target: Self) -> f64 {
        if self == target {
            value
        } else {
            target.from_celsius(self.to_celsius(value))
        }
    }
}

/// Logical actuator activity, independent of the relay polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorOutputs {
    pub heating: bool,
    pub cooling: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Last decoded hydrometer advertisement. Replaced as a whole, never merged.
///
/// `current_temperature` is in `temperature_unit`, the unit configured when the
/// advertisement was decoded. Consumers read it through `temperature_in` so a
/// later unit change applies immediately.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub current_temperature: Option<f64>,
    pub temperature_unit: TemperatureUnit,
    pub battery_level: Option<f64>,
    pub gravity: Option<f64>,
    pub orientation: Orientation,
    pub signal_strength: Option<i16>,
    pub received_at: Option<DateTime<Utc>>,
}

impl SensorReading {
    pub fn temperature_in(&self, unit: TemperatureUnit) -> Option<f64> {
        self.current_temperature
            .map(|value| self.temperature_unit.convert(value, unit))
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.received_at
            .map(|received| now.signed_duration_since(received).num_seconds())
    }
}
