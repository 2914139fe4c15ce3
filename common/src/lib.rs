pub mod config;
pub mod error;
pub mod quirks;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use config::{NetworkConfig, RuntimeConfig, ThermostatConfig};
pub use error::ControlError;
pub use quirks::{read_activity, Activity, SENTINEL_SETPOINT};
pub use thermostat::ThermostatEngine;
pub use topics::*;
pub use types::{
    ActuatorCommand, ActuatorMode, ActuatorState, ActuatorStateChange, HvacAction, HvacMode,
    PersistedState, Preset, SensorReading, ThermostatSnapshot, Trigger,
};
