//! In-process stand-in for the SPZB0001 valve.
//!
//! Applies every command to its own state and broadcasts the resulting
//! `{old, new}` pairs, which is all a zone needs from a real device.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use spzb_common::{ActuatorMode, ActuatorState, ActuatorStateChange};

use crate::{
    clock::Clock,
    ports::{ActuatorController, ActuatorError},
};

const CHANGE_CHANNEL_CAPACITY: usize = 32;
const INITIAL_SETPOINT: f32 = 21.0;

pub struct SimulatedValve {
    name: String,
    state: Mutex<ActuatorState>,
    changes: broadcast::Sender<ActuatorStateChange>,
    clock: Clock,
}

impl SimulatedValve {
    /// A valve as it comes out of the box: `auto` at its factory setpoint.
    pub fn new(name: impl Into<String>, clock: Clock) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            state: Mutex::new(ActuatorState {
                mode: ActuatorMode::Auto,
                setpoint: Some(INITIAL_SETPOINT),
                last_changed_ms: clock.now_ms(),
            }),
            changes,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> ActuatorState {
        self.lock().clone()
    }

    /// Changes the mode the way someone turning the knob on the device would.
    pub fn manual_override(&self, mode: ActuatorMode) {
        info!("{} manually switched to {mode}", self.name);
        self.update(|state| state.mode = mode);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ActuatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, apply: impl FnOnce(&mut ActuatorState)) {
        let change = {
            let mut state = self.lock();
            let old = state.clone();
            apply(&mut state);
            if state.mode == old.mode && state.setpoint == old.setpoint {
                return;
            }
            state.stamp_transition(&old, self.clock.now_ms());
            ActuatorStateChange {
                old,
                new: state.clone(),
            }
        };
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl ActuatorController for SimulatedValve {
    async fn state(&self) -> Result<ActuatorState, ActuatorError> {
        Ok(self.current())
    }

    async fn set_mode(&self, mode: ActuatorMode) -> Result<(), ActuatorError> {
        if let ActuatorMode::Other(other) = &mode {
            return Err(ActuatorError::Rejected {
                device: self.name.clone(),
                command: "set_hvac_mode".to_string(),
                reason: format!("unsupported mode {other}"),
            });
        }
        info!("{} set_hvac_mode {mode}", self.name);
        self.update(|state| state.mode = mode);
        Ok(())
    }

    async fn set_temperature(&self, value: f32) -> Result<(), ActuatorError> {
        if !value.is_finite() {
            return Err(ActuatorError::Rejected {
                device: self.name.clone(),
                command: "set_temperature".to_string(),
                reason: format!("invalid setpoint {value}"),
            });
        }
        info!("{} set_temperature {value}", self.name);
        self.update(|state| state.setpoint = Some(value));
        Ok(())
    }

    async fn power_off(&self) -> Result<(), ActuatorError> {
        info!("{} turn_off", self.name);
        self.update(|state| state.mode = ActuatorMode::Off);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ActuatorStateChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn commands_are_applied_and_broadcast() {
        let valve = SimulatedValve::new("climate.spzb0001", Clock::new());
        let mut changes = valve.subscribe();

        valve.set_mode(ActuatorMode::Off).await.unwrap();
        valve.set_temperature(7.0).await.unwrap();

        let first = changes.recv().await.unwrap();
        assert_eq!(first.old.mode, ActuatorMode::Auto);
        assert_eq!(first.new.mode, ActuatorMode::Off);
        let second = changes.recv().await.unwrap();
        assert_eq!(second.new.setpoint, Some(7.0));

        let state = valve.state().await.unwrap();
        assert_eq!(state.mode, ActuatorMode::Off);
        assert!(!state.activity().is_active());
    }

    #[tokio::test]
    async fn repeated_commands_do_not_count_as_changes() {
        let valve = SimulatedValve::new("climate.spzb0001", Clock::new());
        let mut changes = valve.subscribe();

        valve.set_mode(ActuatorMode::Auto).await.unwrap();
        valve.set_temperature(INITIAL_SETPOINT).await.unwrap();
        valve.power_off().await.unwrap();
        valve.power_off().await.unwrap();

        let only = changes.recv().await.unwrap();
        assert_eq!(only.new.mode, ActuatorMode::Off);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_flips_are_stamped_with_the_clock() {
        let valve = SimulatedValve::new("climate.spzb0001", Clock::new());

        tokio::time::advance(Duration::from_secs(90)).await;
        valve.power_off().await.unwrap();
        assert_eq!(valve.current().last_changed_ms, 90_000);

        tokio::time::advance(Duration::from_secs(30)).await;
        valve.manual_override(ActuatorMode::Heat);
        assert_eq!(valve.current().last_changed_ms, 120_000);
        assert!(valve.current().activity().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn setpoint_nudges_keep_the_hold_timer() {
        let valve = SimulatedValve::new("climate.spzb0001", Clock::new());
        let mut changes = valve.subscribe();

        tokio::time::advance(Duration::from_secs(400)).await;
        valve.set_temperature(29.0).await.unwrap();
        valve.manual_override(ActuatorMode::Heat);

        assert_eq!(valve.current().last_changed_ms, 0);
        assert_eq!(changes.recv().await.unwrap().new.setpoint, Some(29.0));
        assert_eq!(changes.recv().await.unwrap().new.mode, ActuatorMode::Heat);
    }

    #[tokio::test]
    async fn unknown_modes_are_rejected() {
        let valve = SimulatedValve::new("climate.spzb0001", Clock::new());

        let result = valve.set_mode(ActuatorMode::from("boost")).await;

        assert!(matches!(result, Err(ActuatorError::Rejected { .. })));
        assert_eq!(valve.current().mode, ActuatorMode::Auto);
    }
}
