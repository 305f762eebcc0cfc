use serde_json::{Map, Value};

use crate::{
    config::ControlProfile,
    types::{SensorReading, ThermalState},
};

const THERMAL_STATE_KEY: &str = "thermalState";

/// Flat view of profile and reading, in a stable key order.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    fields: Map<String, Value>,
}

impl Snapshot {
    pub fn capture(profile: &ControlProfile, reading: &SensorReading) -> Self {
        let mut fields = match serde_json::to_value(profile) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        };

        let orientation = reading.orientation;
        let reading_fields = [
            (
                "currentTemperature",
                Value::from(reading.temperature_in(profile.temperature_unit)),
            ),
            ("batteryLevel", Value::from(reading.battery_level)),
            ("gravity", Value::from(reading.gravity)),
            ("xAxis", Value::from(orientation.x)),
            ("yAxis", Value::from(orientation.y)),
            ("zAxis", Value::from(orientation.z)),
            ("signalStrength", Value::from(reading.signal_strength)),
        ];
        for (key, value) in reading_fields {
            fields.insert(key.to_string(), value);
        }

        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.fields)
    }

    /// One `key value` line per field, keys in snake case.
    pub fn to_prometheus(&self) -> String {
        self.fields
            .iter()
            .map(|(key, value)| format!("{} {}", camel_to_snake(key), exposition_value(key, value)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn camel_to_snake(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_uppercase() {
            snake.push('_');
            snake.extend(ch.to_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake.trim_start_matches('_').to_string()
}

fn exposition_value(key: &str, value: &Value) -> String {
    if key == THERMAL_STATE_KEY {
        if let Ok(state) = serde_json::from_value::<ThermalState>(value.clone()) {
            return state.code().to_string();
        }
    }

    match value {
        Value::Null => "NaN".to_string(),
        Value::Bool(flag) => u8::from(*flag).to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
