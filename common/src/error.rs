use thiserror::Error;

use crate::types::HvacMode;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("unrecognized hvac mode: {0}")]
    UnrecognizedMode(String),
    #[error("hvac mode {0} is not supported by this zone")]
    UnsupportedMode(HvacMode),
    #[error("unable to parse temperature {0:?}")]
    InvalidTemperature(String),
    #[error("unrecognized preset: {0}")]
    UnrecognizedPreset(String),
    #[error("away preset requested but no away temperature is configured")]
    PresetUnavailable,
}
