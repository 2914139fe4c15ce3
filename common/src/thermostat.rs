use tracing::{debug, info, warn};

use crate::{
    config::ThermostatConfig,
    error::ControlError,
    quirks::Activity,
    types::{
        ActuatorCommand, ActuatorMode, ActuatorState, ActuatorStateChange, HvacAction, HvacMode,
        PersistedState, Preset, ThermostatSnapshot, Trigger,
    },
};

pub const TEMPERATURE_UNIT: &str = "°C";

/// Control state of one zone.
///
/// The engine never talks to the valve itself; it hands back the command
/// sequences the caller has to execute, in order, stopping at the first
/// failure.
#[derive(Debug, Clone)]
pub struct ThermostatEngine {
    pub config: ThermostatConfig,

    mode: HvacMode,
    target_temp: Option<f32>,
    saved_target_temp: Option<f32>,
    current_temp: Option<f32>,

    active: bool,
    is_away: bool,
    startup_pending: bool,
}

impl ThermostatEngine {
    pub fn new(mut config: ThermostatConfig, restored: Option<PersistedState>) -> Self {
        config.sanitize();

        let mut target_temp = config.target_temp;
        let mut mode = config.initial_hvac_mode;
        let mut is_away = false;

        match restored {
            Some(previous) => {
                if target_temp.is_none() {
                    target_temp = match previous.target_temperature {
                        Some(value) => Some(value),
                        None => {
                            let fallback = config.fallback_target_temp();
                            warn!("Undefined target temperature, falling back to {fallback}");
                            Some(fallback)
                        }
                    };
                }
                if previous.preset == Preset::Away && config.away_temp.is_some() {
                    is_away = true;
                }
                if mode.is_none() {
                    mode = previous
                        .hvac_mode
                        .filter(|restored_mode| config.supports_mode(*restored_mode));
                }
            }
            None => {
                let target = *target_temp.get_or_insert(config.fallback_target_temp());
                warn!("No previously saved temperature, setting to {target}");
            }
        }

        let mut saved_target_temp = config.target_temp.or(config.away_temp);
        if is_away {
            saved_target_temp = target_temp;
            target_temp = config.away_temp;
        }

        Self {
            saved_target_temp,
            mode: mode.unwrap_or(HvacMode::Off),
            target_temp,
            current_temp: None,
            active: false,
            is_away,
            startup_pending: true,
            config,
        }
    }

    pub fn mode(&self) -> HvacMode {
        self.mode
    }

    pub fn target_temp(&self) -> Option<f32> {
        self.target_temp
    }

    pub fn current_temp(&self) -> Option<f32> {
        self.current_temp
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn preset(&self) -> Preset {
        if self.is_away {
            Preset::Away
        } else {
            Preset::None
        }
    }

    pub fn startup_pending(&self) -> bool {
        self.startup_pending
    }

    /// Marks the one-time startup shutdown as done.
    pub fn complete_startup(&mut self) {
        self.startup_pending = false;
    }

    pub fn set_mode(&mut self, mode: HvacMode) -> Result<(), ControlError> {
        if !self.config.supports_mode(mode) {
            return Err(ControlError::UnsupportedMode(mode));
        }
        self.mode = mode;
        Ok(())
    }

    /// Returns `false` and leaves the target untouched when no usable value
    /// was supplied.
    pub fn set_target_temp(&mut self, value: Option<f32>) -> bool {
        match value {
            Some(temp) if temp.is_finite() => {
                self.target_temp = Some(temp);
                true
            }
            _ => false,
        }
    }

    /// Returns whether the preset actually changed.
    pub fn set_preset(&mut self, preset: Preset) -> Result<bool, ControlError> {
        match preset {
            Preset::Away if !self.is_away => {
                let Some(away_temp) = self.config.away_temp else {
                    return Err(ControlError::PresetUnavailable);
                };
                self.is_away = true;
                self.saved_target_temp = self.target_temp;
                self.target_temp = Some(away_temp);
                Ok(true)
            }
            Preset::None if self.is_away => {
                self.is_away = false;
                self.target_temp = self.saved_target_temp;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn update_current_temp(&mut self, raw: &str) -> Result<f32, ControlError> {
        let temp = raw
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| ControlError::InvalidTemperature(raw.to_string()))?;
        self.current_temp = Some(temp);
        Ok(temp)
    }

    /// Auto mode with the setpoint pinned at the maximum makes the valve open fully.
    pub fn turn_on_sequence(&self) -> Vec<ActuatorCommand> {
        vec![
            ActuatorCommand::SetMode(ActuatorMode::Auto),
            ActuatorCommand::SetTemperature(self.config.max_temp()),
        ]
    }

    pub fn turn_off_sequence(&self) -> Vec<ActuatorCommand> {
        vec![
            ActuatorCommand::SetMode(ActuatorMode::Off),
            ActuatorCommand::SetTemperature(self.config.min_temp()),
            ActuatorCommand::PowerOff,
        ]
    }

    /// Hysteresis decision for one control pass.
    pub fn evaluate(
        &mut self,
        actuator: &ActuatorState,
        trigger: Trigger,
        now_ms: u64,
    ) -> Vec<ActuatorCommand> {
        if !self.active {
            if let (Some(current), Some(target)) = (self.current_temp, self.target_temp) {
                self.active = true;
                info!(
                    "Obtained current and target temperature. {} active. {current}, {target}",
                    self.config.name
                );
            }
        }

        if !self.active || self.mode == HvacMode::Off {
            return self.turn_off_sequence();
        }
        let (Some(current), Some(target)) = (self.current_temp, self.target_temp) else {
            return self.turn_off_sequence();
        };

        if trigger == Trigger::Unforced && !self.cycle_elapsed(actuator, now_ms) {
            return Vec::new();
        }

        let too_cold = target >= current + self.config.cold_tolerance;
        let too_hot = current >= target + self.config.hot_tolerance;
        let ac_mode = self.config.ac_mode;

        match actuator.activity() {
            Activity::Active => {
                if (ac_mode && too_cold) || (!ac_mode && too_hot) {
                    info!("Turning off heater {}", self.config.heater);
                    self.turn_off_sequence()
                } else if trigger == Trigger::KeepAlive {
                    info!("Keep-alive - Turning on heater {}", self.config.heater);
                    self.turn_on_sequence()
                } else {
                    Vec::new()
                }
            }
            Activity::Inactive => {
                if (ac_mode && too_hot) || (!ac_mode && too_cold) {
                    info!("Turning on heater {}", self.config.heater);
                    self.turn_on_sequence()
                } else if trigger == Trigger::KeepAlive {
                    info!("Keep-alive - Turning off heater {}", self.config.heater);
                    self.turn_off_sequence()
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Sequence that puts the valve back under our control after someone
    /// switched it to `heat` behind our back.
    pub fn correct_drift(&self, change: &ActuatorStateChange) -> Option<Vec<ActuatorCommand>> {
        match (&change.old.mode, &change.new.mode) {
            (ActuatorMode::Auto, ActuatorMode::Heat) | (ActuatorMode::Off, ActuatorMode::Heat) => {
                info!(
                    "{} switched from {} to heat, reverting to auto",
                    self.config.heater, change.old.mode
                );
                Some(self.turn_on_sequence())
            }
            _ => None,
        }
    }

    pub fn hvac_action(&self, actuator: Option<&ActuatorState>) -> HvacAction {
        if self.mode == HvacMode::Off {
            return HvacAction::Off;
        }
        let active = actuator
            .map(|state| state.activity().is_active())
            .unwrap_or(false);
        if !active {
            HvacAction::Idle
        } else if self.config.ac_mode {
            HvacAction::Cooling
        } else {
            HvacAction::Heating
        }
    }

    pub fn snapshot(&self, actuator: Option<&ActuatorState>) -> ThermostatSnapshot {
        ThermostatSnapshot {
            name: self.config.name.clone(),
            current_temperature: self.current_temp,
            target_temperature: self.target_temp,
            hvac_mode: self.mode,
            hvac_modes: self.config.hvac_modes(),
            hvac_action: self.hvac_action(actuator),
            preset: self.preset(),
            preset_modes: self.config.preset_modes(),
            min_temp: self.config.min_temp(),
            max_temp: self.config.max_temp(),
            precision: self.config.precision(),
            target_temperature_step: self.config.precision(),
            active: self.active,
            unit: TEMPERATURE_UNIT.to_string(),
        }
    }

    fn cycle_elapsed(&self, actuator: &ActuatorState, now_ms: u64) -> bool {
        let Some(min_cycle) = self.config.min_cycle_duration() else {
            return true;
        };
        let held_ms = now_ms.saturating_sub(actuator.last_changed_ms);
        if u128::from(held_ms) < min_cycle.as_millis() {
            debug!(
                "{} held its state for {held_ms}ms, waiting for {}ms",
                self.config.heater,
                min_cycle.as_millis()
            );
            return false;
        }
        true
    }
}
