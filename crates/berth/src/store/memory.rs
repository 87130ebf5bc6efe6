use async_trait::async_trait;
use berth_core::{Error, Result, StateStore};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    values: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    counters: HashMap<String, i64>,
    closed: bool,
}

impl Tables {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::StoreUnavailable("store is closed".to_string()));
        }
        Ok(())
    }
}

/// In-process [`StateStore`] for co-located deployments.
///
/// All tables live behind a single lock, so each trait call is atomic with
/// respect to concurrent callers, including the counter primitives the
/// admission controller depends on.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let tables = self.tables.lock().await;
        tables.check_open()?;
        Ok(tables.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check_open()?;
        tables.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check_open()?;
        tables.values.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        tables.check_open()?;
        Ok(tables
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        tables.check_open()?;
        Ok(tables
            .sets
            .get_mut(key)
            .is_some_and(|set| set.remove(member)))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let tables = self.tables.lock().await;
        tables.check_open()?;
        Ok(tables
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let tables = self.tables.lock().await;
        tables.check_open()?;
        Ok(keys
            .iter()
            .map(|key| tables.values.get(key).cloned())
            .collect())
    }

    async fn incr_below(&self, key: &str, cap: i64) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        tables.check_open()?;
        let counter = tables.counters.entry(key.to_string()).or_insert(0);
        if *counter >= cap {
            return Ok(false);
        }
        *counter += 1;
        Ok(true)
    }

    async fn decr_clamped(&self, key: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check_open()?;
        let counter = tables.counters.entry(key.to_string()).or_insert(0);
        *counter = (*counter - 1).max(0);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.closed = true;
        Ok(())
    }
}
