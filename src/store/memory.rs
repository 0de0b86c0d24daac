//! In-process store, optionally persisted as a JSON snapshot.

use super::{DisasterStore, Lease};
use crate::error::{StoreError, StoreResult};
use crate::models::{Area, Disaster, Report};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

/// Full store contents. Also the snapshot file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    #[serde(default)]
    pub reports: Vec<Report>,
    #[serde(default)]
    pub areas: BTreeMap<String, Area>,
    #[serde(default)]
    pub disasters: BTreeMap<String, Disaster>,
    #[serde(default)]
    pub current_generation: Option<String>,
    #[serde(default)]
    pub lease: Option<LeaseRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Load a snapshot file. A missing file yields an empty store.
    pub fn load(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            debug!("Snapshot {} not found, starting empty", path.display());
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let state: StoreState = serde_json::from_str(&content)?;
        Ok(Self::from_state(state))
    }

    /// Write the current contents back to a snapshot file.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(&*self.lock()?)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[cfg(test)]
impl MemoryStore {
    pub fn insert_report(&self, report: Report) -> StoreResult<()> {
        self.lock()?.reports.push(report);
        Ok(())
    }

    pub fn insert_area(&self, id: &str, name: Option<&str>) -> StoreResult<()> {
        self.lock()?.areas.insert(
            id.to_string(),
            Area {
                id: id.to_string(),
                name: name.map(String::from),
            },
        );
        Ok(())
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> StoreResult<StoreState> {
        Ok(self.lock()?.clone())
    }
}

#[async_trait]
impl DisasterStore for MemoryStore {
    async fn reports_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Report>> {
        // Reports without a timestamp never match a range filter.
        Ok(self
            .lock()?
            .reports
            .iter()
            .filter(|r| r.timestamp.is_some_and(|ts| ts >= since))
            .cloned()
            .collect())
    }

    async fn area(&self, id: &str) -> StoreResult<Option<Area>> {
        Ok(self.lock()?.areas.get(id).cloned())
    }

    async fn list_disasters(&self) -> StoreResult<Vec<Disaster>> {
        Ok(self.lock()?.disasters.values().cloned().collect())
    }

    async fn delete_disasters(&self, ids: &[String]) -> StoreResult<()> {
        let mut state = self.lock()?;
        for id in ids {
            state.disasters.remove(id);
        }
        Ok(())
    }

    async fn upsert_disaster(&self, disaster: &Disaster) -> StoreResult<()> {
        // Every field is written, so merge and overwrite coincide.
        self.lock()?
            .disasters
            .insert(disaster.disaster_id.clone(), disaster.clone());
        Ok(())
    }

    async fn set_current_generation(&self, generation: &str) -> StoreResult<()> {
        self.lock()?.current_generation = Some(generation.to_string());
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<Lease> {
        let mut state = self.lock()?;
        if let Some(existing) = &state.lease {
            if existing.holder != holder && existing.expires_at > now {
                return Ok(Lease::Held {
                    holder: existing.holder.clone(),
                });
            }
        }
        state.lease = Some(LeaseRecord {
            holder: holder.to_string(),
            expires_at: now + ttl,
        });
        Ok(Lease::Acquired)
    }

    async fn release_lease(&self, holder: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.lease.as_ref().is_some_and(|l| l.holder == holder) {
            state.lease = None;
        }
        Ok(())
    }
}
