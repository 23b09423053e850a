//! Strategy config stores
//!
//! `JsonFileStore` keeps every account's config in one JSON array on disk;
//! `MemoryStore` backs tests and embedded use.

use super::{StoreError, StrategyConfig, StrategyStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Strategy configs persisted as a JSON array
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the whole file with `configs`
    pub async fn save(&self, configs: &[StrategyConfig]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write(configs).await
    }

    async fn read(&self) -> Result<Vec<StrategyConfig>, StoreError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write to a sibling temp file and rename over the target
    async fn write(&self, configs: &[StrategyConfig]) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(configs)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StrategyStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<StrategyConfig>, StoreError> {
        self.read().await
    }

    async fn record_trigger(&self, account_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut configs = self.read().await?;
        let config = configs
            .iter_mut()
            .find(|c| c.account_id == account_id)
            .ok_or(StoreError::UnknownAccount(account_id))?;
        config.last_trigger_at = Some(at);

        self.write(&configs).await
    }
}

/// In-memory strategy store
#[derive(Default)]
pub struct MemoryStore {
    configs: std::sync::Mutex<BTreeMap<i64, StrategyConfig>>,
}

impl MemoryStore {
    pub fn new(configs: impl IntoIterator<Item = StrategyConfig>) -> Self {
        Self {
            configs: std::sync::Mutex::new(
                configs.into_iter().map(|c| (c.account_id, c)).collect(),
            ),
        }
    }

    pub fn upsert(&self, config: StrategyConfig) {
        self.lock().insert(config.account_id, config);
    }

    pub fn remove(&self, account_id: i64) -> Option<StrategyConfig> {
        self.lock().remove(&account_id)
    }

    pub fn get(&self, account_id: i64) -> Option<StrategyConfig> {
        self.lock().get(&account_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, StrategyConfig>> {
        self.configs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StrategyStore for MemoryStore {
    async fn load(&self) -> Result<Vec<StrategyConfig>, StoreError> {
        Ok(self.lock().values().cloned().collect())
    }

    async fn record_trigger(&self, account_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut configs = self.lock();
        let config = configs
            .get_mut(&account_id)
            .ok_or(StoreError::UnknownAccount(account_id))?;
        config.last_trigger_at = Some(at);
        Ok(())
    }
}
