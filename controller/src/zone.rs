use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::{broadcast::error::RecvError, watch, Mutex};
use tracing::{info, warn};

use spzb_common::{
    ActuatorCommand, ActuatorStateChange, ControlError, HvacMode, Preset, SensorReading,
    ThermostatEngine, ThermostatSnapshot, Trigger,
};

use crate::{
    clock::Clock,
    ports::{ActuatorController, ActuatorError, Scheduler, SensorReader},
    scheduler::TaskHandle,
};

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

/// One controlled zone: the engine behind a lock, plus the valve it drives.
///
/// The mutex around the engine is the decision lock. Every operation holds it
/// for its whole pass, valve round-trips included, so commands coming from
/// sensor updates, valve events, keep-alive ticks and user requests never
/// interleave.
pub struct ZoneController {
    engine: Mutex<ThermostatEngine>,
    actuator: Arc<dyn ActuatorController>,
    snapshots: watch::Sender<ThermostatSnapshot>,
    keep_alive: Option<Duration>,
    clock: Clock,
}

/// Background work of a started zone. Dropping it tears the subscriptions
/// and the keep-alive timer down.
#[derive(Debug)]
pub struct ZoneHandle {
    _tasks: Vec<TaskHandle>,
}

impl ZoneController {
    pub fn new(
        engine: ThermostatEngine,
        actuator: Arc<dyn ActuatorController>,
        clock: Clock,
    ) -> Self {
        let (snapshots, _) = watch::channel(engine.snapshot(None));
        Self {
            keep_alive: engine.config.keep_alive(),
            engine: Mutex::new(engine),
            actuator,
            snapshots,
            clock,
        }
    }

    pub fn snapshot(&self) -> ThermostatSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<ThermostatSnapshot> {
        self.snapshots.subscribe()
    }

    /// Subscribes to the sensor and the valve and arms the keep-alive timer.
    pub fn start<S, T>(self: &Arc<Self>, sensor: &S, scheduler: &T) -> ZoneHandle
    where
        S: SensorReader + ?Sized,
        T: Scheduler,
    {
        let mut tasks = Vec::new();

        let mut readings = sensor.subscribe();
        let initial = sensor.latest();
        let zone = self.clone();
        tasks.push(TaskHandle::spawn(async move {
            if let Some(reading) = initial {
                zone.prime(&reading).await;
            }
            loop {
                match readings.recv().await {
                    Ok(reading) => {
                        let Some(raw) = reading.value() else {
                            continue;
                        };
                        if let Err(err) = zone.on_sensor_update(raw).await {
                            warn!("control pass after sensor update failed: {err}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("sensor subscription lagged, skipped {skipped} readings");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        let mut changes = self.actuator.subscribe();
        let zone = self.clone();
        tasks.push(TaskHandle::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if let Err(err) = zone.on_actuator_state_changed(&change).await {
                            warn!("valve correction failed: {err}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("valve subscription lagged, skipped {skipped} changes");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        if let Some(period) = self.keep_alive {
            let zone = self.clone();
            tasks.push(scheduler.every(period, move || {
                let zone = zone.clone();
                async move {
                    if let Err(err) = zone.on_periodic_tick().await {
                        warn!("keep-alive pass failed: {err}");
                    }
                }
            }));
        }

        ZoneHandle { _tasks: tasks }
    }

    pub async fn set_mode(&self, mode: HvacMode) -> Result<(), ZoneError> {
        let mut engine = self.engine.lock().await;
        engine.set_mode(mode)?;

        let result = if mode == HvacMode::Off {
            self.turn_off_if_active(&engine).await
        } else {
            self.control(&mut engine, Trigger::Forced).await
        };
        self.emit(&engine).await;
        result
    }

    pub async fn set_target_temperature(&self, value: Option<f32>) -> Result<(), ZoneError> {
        let mut engine = self.engine.lock().await;
        if !engine.set_target_temp(value) {
            return Ok(());
        }

        let result = self.control(&mut engine, Trigger::Forced).await;
        self.emit(&engine).await;
        result
    }

    pub async fn set_preset(&self, preset: Preset) -> Result<(), ZoneError> {
        let mut engine = self.engine.lock().await;
        let result = if engine.set_preset(preset)? {
            self.control(&mut engine, Trigger::Forced).await
        } else {
            Ok(())
        };
        self.emit(&engine).await;
        result
    }

    pub async fn on_sensor_update(&self, raw: &str) -> Result<(), ZoneError> {
        let mut engine = self.engine.lock().await;
        if let Err(err) = engine.update_current_temp(raw) {
            warn!("Unable to update from sensor: {err}");
        }

        let result = self.control(&mut engine, Trigger::Unforced).await;
        self.emit(&engine).await;
        result
    }

    pub async fn on_actuator_state_changed(
        &self,
        change: &ActuatorStateChange,
    ) -> Result<(), ZoneError> {
        let engine = self.engine.lock().await;
        let result = match engine.correct_drift(change) {
            Some(commands) => self.execute(&commands).await.map_err(ZoneError::from),
            None => Ok(()),
        };
        self.emit(&engine).await;
        result
    }

    pub async fn on_periodic_tick(&self) -> Result<(), ZoneError> {
        let mut engine = self.engine.lock().await;
        self.control(&mut engine, Trigger::KeepAlive).await
    }

    /// Takes the sensor's reading at startup without running a control pass.
    async fn prime(&self, reading: &SensorReading) {
        let Some(raw) = reading.value() else {
            return;
        };
        let mut engine = self.engine.lock().await;
        if let Err(err) = engine.update_current_temp(raw) {
            warn!("Unable to update from sensor: {err}");
            return;
        }
        self.emit(&engine).await;
    }

    async fn control(
        &self,
        engine: &mut ThermostatEngine,
        trigger: Trigger,
    ) -> Result<(), ZoneError> {
        if engine.startup_pending() {
            info!(
                "Shutting down {} to clear state inherited from a previous run",
                engine.config.heater
            );
            self.execute(&engine.turn_off_sequence()).await?;
            engine.complete_startup();
        }

        let state = self.actuator.state().await?;
        let commands = engine.evaluate(&state, trigger, self.clock.now_ms());
        self.execute(&commands).await?;
        Ok(())
    }

    async fn turn_off_if_active(&self, engine: &ThermostatEngine) -> Result<(), ZoneError> {
        let state = self.actuator.state().await?;
        if state.activity().is_active() {
            self.execute(&engine.turn_off_sequence()).await?;
        }
        Ok(())
    }

    /// Runs the commands in order, stopping at the first failure.
    async fn execute(&self, commands: &[ActuatorCommand]) -> Result<(), ActuatorError> {
        for command in commands {
            match command {
                ActuatorCommand::SetMode(mode) => self.actuator.set_mode(mode.clone()).await?,
                ActuatorCommand::SetTemperature(value) => {
                    self.actuator.set_temperature(*value).await?
                }
                ActuatorCommand::PowerOff => self.actuator.power_off().await?,
            }
        }
        Ok(())
    }

    async fn emit(&self, engine: &ThermostatEngine) {
        let actuator = match self.actuator.state().await {
            Ok(state) => Some(state),
            Err(err) => {
                warn!("unable to read {} state: {err}", engine.config.heater);
                None
            }
        };
        self.snapshots.send_replace(engine.snapshot(actuator.as_ref()));
    }
}
