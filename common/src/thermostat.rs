use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::ControlProfile,
    types::{ActuatorOutputs, SensorReading, ThermalState},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to drive output pin {pin}: {reason}")]
pub struct OutputError {
    pub pin: i32,
    pub reason: String,
}

/// Digital output lines addressed by logical pin id.
pub trait OutputPort {
    fn set_level(&mut self, pin: i32, level: bool) -> Result<(), OutputError>;
}

/// Electrical level that energizes a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputPolarity {
    ActiveHigh,
    /// Relay boards that pull the coil in on a low input.
    #[default]
    ActiveLow,
}

impl OutputPolarity {
    pub fn level(self, active: bool) -> bool {
        match self {
            Self::ActiveHigh => active,
            Self::ActiveLow => !active,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active-high" | "high" => Some(Self::ActiveHigh),
            "active-low" | "low" => Some(Self::ActiveLow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalDecision {
    NoReading,
    Actuate(ThermalState),
}

impl ThermalDecision {
    pub fn state(self) -> Option<ThermalState> {
        match self {
            Self::NoReading => None,
            Self::Actuate(state) => Some(state),
        }
    }
}

/// Hysteresis law. Stateless: the same inputs always give the same decision.
pub fn evaluate(temperature: Option<f64>, target: f64, hysteresis: f64) -> ThermalDecision {
    let Some(temperature) = temperature else {
        return ThermalDecision::NoReading;
    };

    let lower_bound = target - hysteresis;
    let upper_bound = target + hysteresis;

    let state = if temperature < lower_bound {
        ThermalState::Heating
    } else if temperature > upper_bound {
        ThermalState::Cooling
    } else {
        ThermalState::Off
    };

    ThermalDecision::Actuate(state)
}

#[derive(Debug)]
pub struct ThermalController<P> {
    port: P,
    polarity: OutputPolarity,
}

impl<P: OutputPort> ThermalController<P> {
    pub fn new(port: P, polarity: OutputPolarity) -> Self {
        Self { port, polarity }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Evaluates the law and rewrites both outputs from scratch.
    ///
    /// Both pins are attempted even if one write fails; the first error is
    /// returned.
    pub fn update(
        &mut self,
        reading: &SensorReading,
        profile: &ControlProfile,
    ) -> Result<ThermalDecision, OutputError> {
        let decision = evaluate(
            reading.temperature_in(profile.temperature_unit),
            profile.target_temperature,
            profile.hysteresis,
        );

        if let ThermalDecision::Actuate(state) = decision {
            self.write_outputs(profile, state.outputs())?;
        }

        Ok(decision)
    }

    fn write_outputs(
        &mut self,
        profile: &ControlProfile,
        outputs: ActuatorOutputs,
    ) -> Result<(), OutputError> {
        let heating = self
            .port
            .set_level(profile.heating_pin, self.polarity.level(outputs.heating));
        let cooling = self
            .port
            .set_level(profile.cooling_pin, self.polarity.level(outputs.cooling));
        heating.and(cooling)
    }
}
