//! Runtime mutation of the control profile.

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::warn;

use crate::{
    config::ControlProfile,
    types::{TemperatureMode, TemperatureUnit},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("{0} unknown parameter")]
    UnknownParameter(String),
    #[error("{key}: '{value}' is not a valid integer")]
    InvalidInteger { key: ControlKey, value: String },
    #[error("{key}: '{value}' is not a valid number")]
    InvalidFloat { key: ControlKey, value: String },
}

/// Profile fields a client may set. `thermalState` is derived and absent here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    TemperatureMode,
    TemperatureUnit,
    CoolingPin,
    HeatingPin,
    Hysteresis,
    TargetTemperature,
    TemperatureSensor,
}

impl ControlKey {
    pub const ALL: [Self; 7] = [
        Self::TemperatureMode,
        Self::TemperatureUnit,
        Self::CoolingPin,
        Self::HeatingPin,
        Self::Hysteresis,
        Self::TargetTemperature,
        Self::TemperatureSensor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TemperatureMode => "temperatureMode",
            Self::TemperatureUnit => "temperatureUnit",
            Self::CoolingPin => "coolingPin",
            Self::HeatingPin => "heatingPin",
            Self::Hysteresis => "hysteresis",
            Self::TargetTemperature => "targetTemperature",
            Self::TemperatureSensor => "temperatureSensor",
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlKey {
    type Err = ControlError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == name)
            .ok_or_else(|| ControlError::UnknownParameter(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    TemperatureMode(TemperatureMode),
    TemperatureUnit(TemperatureUnit),
    CoolingPin(i32),
    HeatingPin(i32),
    Hysteresis(f64),
    TargetTemperature(f64),
    TemperatureSensor(String),
    /// Recognized key with a value outside its enumeration. Applying it
    /// leaves the profile unchanged.
    Ignored { key: ControlKey, value: String },
}

impl ControlCommand {
    pub fn parse(name: &str, value: &str) -> Result<Self, ControlError> {
        let key: ControlKey = name.parse()?;

        let command = match key {
            ControlKey::TemperatureMode => match TemperatureMode::parse(value) {
                Some(mode) => Self::TemperatureMode(mode),
                None => Self::ignored(key, value),
            },
            ControlKey::TemperatureUnit => match TemperatureUnit::parse(value) {
                Some(unit) => Self::TemperatureUnit(unit),
                None => Self::ignored(key, value),
            },
            ControlKey::CoolingPin => Self::CoolingPin(parse_int(key, value)?),
            ControlKey::HeatingPin => Self::HeatingPin(parse_int(key, value)?),
            ControlKey::Hysteresis => Self::Hysteresis(parse_float(key, value)?),
            ControlKey::TargetTemperature => Self::TargetTemperature(parse_float(key, value)?),
            ControlKey::TemperatureSensor => Self::TemperatureSensor(value.to_string()),
        };

        Ok(command)
    }

    fn ignored(key: ControlKey, value: &str) -> Self {
        Self::Ignored {
            key,
            value: value.to_string(),
        }
    }
}

impl ControlProfile {
    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::TemperatureMode(mode) => self.temperature_mode = mode,
            ControlCommand::TemperatureUnit(unit) => self.temperature_unit = unit,
            ControlCommand::CoolingPin(pin) => self.cooling_pin = pin,
            ControlCommand::HeatingPin(pin) => self.heating_pin = pin,
            ControlCommand::Hysteresis(hysteresis) => self.hysteresis = hysteresis,
            ControlCommand::TargetTemperature(target) => self.target_temperature = target,
            ControlCommand::TemperatureSensor(sensor) => self.temperature_sensor = sensor,
            ControlCommand::Ignored { key, value } => {
                warn!("ignoring {key}: '{value}' is not an accepted value");
            }
        }
    }

    /// Parses and applies one setting. On error the profile is untouched.
    pub fn set(&mut self, name: &str, value: &str) -> Result<&ControlProfile, ControlError> {
        let command = ControlCommand::parse(name, value)?;
        self.apply(command);
        Ok(&*self)
    }
}

fn parse_int(key: ControlKey, value: &str) -> Result<i32, ControlError> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| ControlError::InvalidInteger {
            key,
            value: value.to_string(),
        })
}

fn parse_float(key: ControlKey, value: &str) -> Result<f64, ControlError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ControlError::InvalidFloat {
            key,
            value: value.to_string(),
        })
}
