use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use spzb_common::{PersistedState, RuntimeConfig};

use crate::ports::PersistenceStore;

const DEFAULT_DATA_DIR: &str = "./.thermostat";

/// JSON files in the data directory: `runtime.json` for configuration and
/// `state.json` for the attributes restored at the next start.
#[derive(Clone)]
pub struct JsonStore {
    runtime_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl JsonStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        Ok(self.read(&self.runtime_path).await?.unwrap_or_default())
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> anyhow::Result<Option<T>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice::<T>(&raw)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for JsonStore {
    async fn restore(&self) -> anyhow::Result<Option<PersistedState>> {
        self.read(&self.state_path).await
    }

    async fn persist(&self, state: &PersistedState) -> anyhow::Result<()> {
        self.write(&self.state_path, state).await
    }
}
