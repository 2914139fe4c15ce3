//! Interpretation of the Eurotronic Spirit (SPZB0001) valve state.
//!
//! The valve never reports a plain "on". It heats in `heat` mode, and in
//! `auto` mode it follows its own setpoint; parking it in `auto` at 5 °C is
//! how the valve is effectively switched off.

use crate::types::{ActuatorMode, ActuatorState};

/// Setpoint at which an `auto` valve is considered off.
pub const SENTINEL_SETPOINT: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Inactive,
}

impl Activity {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

pub fn read_activity(mode: &ActuatorMode, setpoint: Option<f32>) -> Activity {
    // The sentinel case must be checked before the generic auto rule.
    match mode {
        ActuatorMode::Auto if setpoint == Some(SENTINEL_SETPOINT) => Activity::Inactive,
        ActuatorMode::Heat | ActuatorMode::Auto => Activity::Active,
        _ => Activity::Inactive,
    }
}

impl ActuatorState {
    pub fn activity(&self) -> Activity {
        read_activity(&self.mode, self.setpoint)
    }

    /// Restarts the hold timer only when the valve flips between active and
    /// inactive. Setpoint nudges that keep it open or closed do not count.
    pub fn stamp_transition(&mut self, previous: &ActuatorState, now_ms: u64) {
        if self.activity() != previous.activity() {
            self.last_changed_ms = now_ms;
        }
    }
}
