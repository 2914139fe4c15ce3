use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// User-facing operating mode of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
        }
    }
}

impl FromStr for HvacMode {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            _ => Err(ControlError::UnrecognizedMode(value.to_string())),
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the zone is doing right now, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacAction {
    Off,
    Idle,
    Heating,
    Cooling,
}

impl HvacAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    None,
    Away,
}

impl FromStr for Preset {
    type Err = ControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "home" => Ok(Self::None),
            "away" => Ok(Self::Away),
            _ => Err(ControlError::UnrecognizedPreset(value.to_string())),
        }
    }
}

/// Mode as reported by (or commanded to) the valve itself.
///
/// The valve speaks a wider vocabulary than [`HvacMode`]; `Auto` only ever
/// appears here. Anything the valve reports that we do not know is kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActuatorMode {
    Off,
    Heat,
    Cool,
    Auto,
    Other(String),
}

impl ActuatorMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Auto => "auto",
            Self::Other(raw) => raw,
        }
    }
}

impl From<&str> for ActuatorMode {
    fn from(value: &str) -> Self {
        match value {
            "off" => Self::Off,
            "heat" => Self::Heat,
            "cool" => Self::Cool,
            "auto" => Self::Auto,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ActuatorMode {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ActuatorMode> for String {
    fn from(value: ActuatorMode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ActuatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub mode: ActuatorMode,
    pub setpoint: Option<f32>,
    /// Monotonic time at which the valve last flipped between active and
    /// inactive, as read by [`ActuatorState::activity`].
    #[serde(rename = "lastChangedMs")]
    pub last_changed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorStateChange {
    pub old: ActuatorState,
    pub new: ActuatorState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCommand {
    SetMode(ActuatorMode),
    SetTemperature(f32),
    PowerOff,
}

/// Why the control procedure is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Sensor update; subject to the minimum cycle duration.
    Unforced,
    /// Explicit user command; bypasses the minimum cycle duration.
    Forced,
    /// Periodic keep-alive; bypasses the minimum cycle duration and reasserts
    /// the current state when no switch is needed.
    KeepAlive,
}

/// Raw reading delivered by a sensor subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorReading {
    Value(String),
    Unavailable,
    Unknown,
}

impl SensorReading {
    pub fn from_payload(payload: &str) -> Self {
        match payload.trim() {
            "unavailable" => Self::Unavailable,
            "unknown" | "" => Self::Unknown,
            value => Self::Value(value.to_string()),
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Value(raw) => Some(raw),
            Self::Unavailable | Self::Unknown => None,
        }
    }
}

/// Observable state of a zone, emitted after every state-changing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatSnapshot {
    pub name: String,
    #[serde(rename = "currentTemperature")]
    pub current_temperature: Option<f32>,
    #[serde(rename = "targetTemperature")]
    pub target_temperature: Option<f32>,
    #[serde(rename = "hvacMode")]
    pub hvac_mode: HvacMode,
    #[serde(rename = "hvacModes")]
    pub hvac_modes: Vec<HvacMode>,
    #[serde(rename = "hvacAction")]
    pub hvac_action: HvacAction,
    pub preset: Preset,
    #[serde(rename = "presetModes")]
    pub preset_modes: Vec<Preset>,
    #[serde(rename = "minTemp")]
    pub min_temp: f32,
    #[serde(rename = "maxTemp")]
    pub max_temp: f32,
    pub precision: f32,
    #[serde(rename = "targetTemperatureStep")]
    pub target_temperature_step: f32,
    pub active: bool,
    pub unit: String,
}

/// Attributes restored across restarts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(rename = "targetTemperature", default)]
    pub target_temperature: Option<f32>,
    #[serde(rename = "hvacMode", default)]
    pub hvac_mode: Option<HvacMode>,
    #[serde(default)]
    pub preset: Preset,
}

impl From<&ThermostatSnapshot> for PersistedState {
    fn from(snapshot: &ThermostatSnapshot) -> Self {
        Self {
            target_temperature: snapshot.target_temperature,
            hvac_mode: Some(snapshot.hvac_mode),
            preset: snapshot.preset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes_case_insensitively() {
        assert_eq!("HEAT".parse::<HvacMode>().unwrap(), HvacMode::Heat);
        assert_eq!(" cool ".parse::<HvacMode>().unwrap(), HvacMode::Cool);
        assert!(matches!(
            "auto".parse::<HvacMode>(),
            Err(ControlError::UnrecognizedMode(_))
        ));
    }

    #[test]
    fn actuator_mode_keeps_unknown_values() {
        let mode = ActuatorMode::from("boost");
        assert_eq!(mode, ActuatorMode::Other("boost".to_string()));
        assert_eq!(mode.as_str(), "boost");

        let json = serde_json::to_string(&ActuatorMode::Auto).unwrap();
        assert_eq!(json, "\"auto\"");
    }

    #[test]
    fn sensor_payload_markers_are_not_values() {
        assert_eq!(SensorReading::from_payload("unavailable").value(), None);
        assert_eq!(SensorReading::from_payload("unknown").value(), None);
        assert_eq!(SensorReading::from_payload("21.4\n").value(), Some("21.4"));
    }

    #[test]
    fn persisted_state_tolerates_missing_fields() {
        let state: PersistedState = serde_json::from_str("{}").unwrap();
        assert_eq!(state, PersistedState::default());
    }
}
