use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{HvacMode, Preset};

pub const DEFAULT_TOLERANCE: f32 = 0.3;
pub const DEFAULT_MIN_TEMP: f32 = 7.0;
pub const DEFAULT_MAX_TEMP: f32 = 35.0;
pub const DEFAULT_PRECISION: f32 = 0.1;
pub const SUPPORTED_PRECISIONS: [f32; 3] = [0.1, 0.5, 1.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub name: String,
    /// Identifier of the valve driven by this zone.
    pub heater: String,
    /// Identifier of the temperature sensor feeding this zone.
    pub target_sensor: String,
    pub min_temp: Option<f32>,
    pub max_temp: Option<f32>,
    pub target_temp: Option<f32>,
    pub ac_mode: bool,
    pub min_cycle_duration_ms: Option<u64>,
    pub cold_tolerance: f32,
    pub hot_tolerance: f32,
    pub keep_alive_ms: Option<u64>,
    pub initial_hvac_mode: Option<HvacMode>,
    pub away_temp: Option<f32>,
    pub precision: Option<f32>,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            name: "SPZB0001 Thermostat".to_string(),
            heater: "climate.spzb0001".to_string(),
            target_sensor: "sensor.room_temperature".to_string(),
            min_temp: None,
            max_temp: None,
            target_temp: None,
            ac_mode: false,
            min_cycle_duration_ms: None,
            cold_tolerance: DEFAULT_TOLERANCE,
            hot_tolerance: DEFAULT_TOLERANCE,
            keep_alive_ms: None,
            initial_hvac_mode: None,
            away_temp: None,
            precision: None,
        }
    }
}

impl ThermostatConfig {
    pub fn min_temp(&self) -> f32 {
        self.min_temp.unwrap_or(DEFAULT_MIN_TEMP)
    }

    pub fn max_temp(&self) -> f32 {
        self.max_temp.unwrap_or(DEFAULT_MAX_TEMP)
    }

    pub fn precision(&self) -> f32 {
        self.precision.unwrap_or(DEFAULT_PRECISION)
    }

    /// Bound used when no target temperature can be restored.
    pub fn fallback_target_temp(&self) -> f32 {
        if self.ac_mode {
            self.max_temp()
        } else {
            self.min_temp()
        }
    }

    pub fn hvac_modes(&self) -> Vec<HvacMode> {
        if self.ac_mode {
            vec![HvacMode::Cool, HvacMode::Off]
        } else {
            vec![HvacMode::Heat, HvacMode::Off]
        }
    }

    pub fn supports_mode(&self, mode: HvacMode) -> bool {
        self.hvac_modes().contains(&mode)
    }

    pub fn preset_modes(&self) -> Vec<Preset> {
        if self.away_temp.is_some() {
            vec![Preset::None, Preset::Away]
        } else {
            vec![Preset::None]
        }
    }

    pub fn min_cycle_duration(&self) -> Option<Duration> {
        self.min_cycle_duration_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn sanitize(&mut self) {
        self.cold_tolerance = self.cold_tolerance.abs();
        self.hot_tolerance = self.hot_tolerance.abs();

        let (min, max) = (self.min_temp(), self.max_temp());
        if min > max {
            self.min_temp = Some(max);
            self.max_temp = Some(min);
        }

        if let Some(precision) = self.precision {
            if !SUPPORTED_PRECISIONS.contains(&precision) {
                self.precision = None;
            }
        }

        if let Some(mode) = self.initial_hvac_mode {
            if !self.supports_mode(mode) {
                self.initial_hvac_mode = None;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub thermostat: ThermostatConfig,
    pub network: NetworkConfig,
    pub http_port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatConfig::default(),
            network: NetworkConfig::default(),
            http_port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_set_follows_ac_flag() {
        let heat = ThermostatConfig::default();
        assert_eq!(heat.hvac_modes(), vec![HvacMode::Heat, HvacMode::Off]);
        assert!(!heat.supports_mode(HvacMode::Cool));

        let cool = ThermostatConfig {
            ac_mode: true,
            ..ThermostatConfig::default()
        };
        assert_eq!(cool.hvac_modes(), vec![HvacMode::Cool, HvacMode::Off]);
        assert_eq!(cool.fallback_target_temp(), DEFAULT_MAX_TEMP);
    }

    #[test]
    fn sanitize_repairs_obvious_mistakes() {
        let mut config = ThermostatConfig {
            cold_tolerance: -0.5,
            min_temp: Some(30.0),
            max_temp: Some(8.0),
            precision: Some(0.25),
            initial_hvac_mode: Some(HvacMode::Cool),
            ..ThermostatConfig::default()
        };
        config.sanitize();

        assert_eq!(config.cold_tolerance, 0.5);
        assert_eq!(config.min_temp(), 8.0);
        assert_eq!(config.max_temp(), 30.0);
        assert_eq!(config.precision(), DEFAULT_PRECISION);
        assert_eq!(config.initial_hvac_mode, None);
    }

    #[test]
    fn sanitize_checks_bounds_against_defaults() {
        let mut low_max = ThermostatConfig {
            min_temp: Some(40.0),
            ..ThermostatConfig::default()
        };
        low_max.sanitize();
        assert_eq!(low_max.min_temp(), DEFAULT_MAX_TEMP);
        assert_eq!(low_max.max_temp(), 40.0);

        let mut high_min = ThermostatConfig {
            max_temp: Some(5.0),
            ..ThermostatConfig::default()
        };
        high_min.sanitize();
        assert_eq!(high_min.min_temp(), 5.0);
        assert_eq!(high_min.max_temp(), DEFAULT_MIN_TEMP);

        let mut untouched = ThermostatConfig::default();
        untouched.sanitize();
        assert_eq!(untouched.min_temp, None);
        assert_eq!(untouched.max_temp, None);
    }

    #[test]
    fn partial_runtime_config_uses_defaults() {
        let runtime: RuntimeConfig =
            serde_json::from_str(r#"{"thermostat":{"away_temp":16.0,"keep_alive_ms":180000}}"#)
                .unwrap();

        assert_eq!(runtime.thermostat.cold_tolerance, DEFAULT_TOLERANCE);
        assert_eq!(
            runtime.thermostat.preset_modes(),
            vec![Preset::None, Preset::Away]
        );
        assert_eq!(
            runtime.thermostat.keep_alive(),
            Some(Duration::from_secs(180))
        );
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert_eq!(runtime.http_port, 8080);
    }
}
