//! Narrow interfaces between a zone and the outside world.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use spzb_common::{ActuatorMode, ActuatorState, ActuatorStateChange, PersistedState, SensorReading};

use crate::scheduler::TaskHandle;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("{device} rejected {command}: {reason}")]
    Rejected {
        device: String,
        command: String,
        reason: String,
    },
    #[error("{0} is unavailable")]
    Unavailable(String),
}

/// The valve. Every command is an independent round-trip that either
/// succeeds or fails on its own.
#[async_trait]
pub trait ActuatorController: Send + Sync {
    async fn state(&self) -> Result<ActuatorState, ActuatorError>;

    async fn set_mode(&self, mode: ActuatorMode) -> Result<(), ActuatorError>;

    async fn set_temperature(&self, value: f32) -> Result<(), ActuatorError>;

    async fn power_off(&self) -> Result<(), ActuatorError>;

    /// State changes, delivered as `{old, new}` pairs.
    fn subscribe(&self) -> broadcast::Receiver<ActuatorStateChange>;
}

pub trait SensorReader: Send + Sync {
    fn latest(&self) -> Option<SensorReading>;

    fn subscribe(&self) -> broadcast::Receiver<SensorReading>;
}

pub trait Scheduler {
    /// Runs `task` every `period`, first after one full period. Dropping the
    /// returned handle cancels it.
    fn every<F, Fut>(&self, period: Duration, task: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static;
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn restore(&self) -> anyhow::Result<Option<PersistedState>>;

    async fn persist(&self, state: &PersistedState) -> anyhow::Result<()>;
}
