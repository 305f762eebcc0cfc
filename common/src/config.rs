use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{TemperatureMode, TemperatureUnit, ThermalState};

/// Name of the only sensor backend the controller knows how to ingest.
pub const RAPT_PILL_SENSOR: &str = "raptpill";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlProfile {
    pub temperature_mode: TemperatureMode,
    #[serde(default)]
    pub thermal_state: ThermalState,
    pub temperature_unit: TemperatureUnit,
    pub target_temperature: f64,
    pub hysteresis: f64,
    pub cooling_pin: i32,
    pub heating_pin: i32,
    pub temperature_sensor: String,
}

impl Default for ControlProfile {
    fn default() -> Self {
        Self {
            temperature_mode: TemperatureMode::Target,
            thermal_state: ThermalState::Off,
            temperature_unit: TemperatureUnit::Celsius,
            target_temperature: 20.0,
            hysteresis: 0.5,
            cooling_pin: 26,
            heating_pin: 27,
            temperature_sensor: RAPT_PILL_SENSOR.to_string(),
        }
    }
}

impl ControlProfile {
    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn uses_rapt_pill(&self) -> bool {
        self.temperature_sensor == RAPT_PILL_SENSOR
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub sensor_interval_ms: u64,
    pub thermal_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sensor_interval_ms: 1_000,
            thermal_interval_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn sensor_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_interval_ms.max(1))
    }

    pub fn thermal_interval(&self) -> Duration {
        Duration::from_millis(self.thermal_interval_ms.max(1))
    }
}
