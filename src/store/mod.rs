//! Document store access.
//!
//! The aggregator reads reports and areas and replaces disasters through
//! [`DisasterStore`]. Firestore is the production backend; the in-memory
//! store backs tests and local snapshot runs.

pub mod firestore;
pub mod memory;
pub mod value;

use crate::config::{ApiKey, StoreBackend, StoreConfig};
use crate::error::StoreResult;
use crate::models::{Area, Disaster, Report};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub use firestore::{FirestoreConfig, FirestoreStore};
pub use memory::MemoryStore;

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lease {
    Acquired,
    /// Someone else holds an unexpired lease.
    Held { holder: String },
}

/// Storage operations used by one aggregation pass.
#[async_trait]
pub trait DisasterStore: Send + Sync {
    /// Reports whose timestamp is at or after `since`.
    async fn reports_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Report>>;

    /// Look up one area by id.
    async fn area(&self, id: &str) -> StoreResult<Option<Area>>;

    async fn list_disasters(&self) -> StoreResult<Vec<Disaster>>;

    async fn delete_disasters(&self, ids: &[String]) -> StoreResult<()>;

    /// Write a disaster keyed by its id, merging into any existing document.
    async fn upsert_disaster(&self, disaster: &Disaster) -> StoreResult<()>;

    /// Point readers at the generation that was just written.
    async fn set_current_generation(&self, generation: &str) -> StoreResult<()>;

    async fn try_acquire_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> StoreResult<Lease>;

    /// Release the lease if `holder` still owns it.
    async fn release_lease(&self, holder: &str) -> StoreResult<()>;
}

/// A store opened from configuration.
pub enum OpenedStore {
    Firestore(Arc<FirestoreStore>),
    /// Snapshot-backed memory store and the file it is saved to.
    Snapshot(Arc<MemoryStore>, PathBuf),
}

impl OpenedStore {
    pub fn open(config: &StoreConfig, token: Option<ApiKey>, timeout_seconds: u64) -> Result<Self> {
        match config.backend {
            StoreBackend::Firestore => {
                if config.project_id.trim().is_empty() {
                    bail!("Firestore backend needs a project id (--project or [store].project_id)");
                }
                let firestore = FirestoreConfig::from_store_config(config, token, timeout_seconds);
                Ok(Self::Firestore(Arc::new(FirestoreStore::new(firestore)?)))
            }
            StoreBackend::Snapshot => {
                let path = config
                    .snapshot_path
                    .clone()
                    .context("Snapshot backend needs a snapshot path")?;
                let store = MemoryStore::load(&path)
                    .with_context(|| format!("Failed to load snapshot {}", path.display()))?;
                info!("Loaded snapshot from {}", path.display());
                Ok(Self::Snapshot(Arc::new(store), path))
            }
        }
    }

    pub fn handle(&self) -> Arc<dyn DisasterStore> {
        match self {
            Self::Firestore(store) => store.clone() as Arc<dyn DisasterStore>,
            Self::Snapshot(store, _) => store.clone() as Arc<dyn DisasterStore>,
        }
    }

    /// Flush local state. Remote backends write through.
    pub fn persist(&self) -> Result<()> {
        if let Self::Snapshot(store, path) = self {
            store
                .save(path)
                .with_context(|| format!("Failed to save snapshot {}", path.display()))?;
            info!("Saved snapshot to {}", path.display());
        }
        Ok(())
    }
}
