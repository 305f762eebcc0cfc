pub mod config;
pub mod control;
pub mod metrics;
pub mod rapt;
pub mod thermostat;
pub mod types;

pub use config::{ControlProfile, SchedulerConfig, RAPT_PILL_SENSOR};
pub use control::{ControlCommand, ControlError, ControlKey};
pub use metrics::Snapshot;
pub use rapt::{decode, DecodeError, PillFrame};
pub use thermostat::{
    evaluate, OutputError, OutputPolarity, OutputPort, ThermalController, ThermalDecision,
};
pub use types::{
    ActuatorOutputs, Orientation, SensorReading, TemperatureMode, TemperatureUnit, ThermalState,
};
