//! Report aggregation.
//!
//! Clears or supersedes the previous disaster set, loads the report
//! window, asks the classifier for clusters, names each cluster after its
//! primary area and upserts the result.

use crate::classifier::ClusterClassifier;
use crate::config::{AggregationConfig, ReplaceStrategy, MAX_LEASE_TTL_SECONDS};
use crate::error::AggregateError;
use crate::models::{AggregationSummary, Disaster, DisasterCandidate, Report};
use crate::store::{DisasterStore, Lease};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Settings for one aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub window: Duration,
    pub fallback_title: String,
    pub strategy: ReplaceStrategy,
    /// `None` disables the run lease.
    pub lease_ttl: Option<Duration>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self::from(&AggregationConfig::default())
    }
}

impl From<&AggregationConfig> for AggregatorOptions {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            window: Duration::days(i64::from(config.window_days)),
            fallback_title: config.fallback_title.clone(),
            strategy: config.replace_strategy,
            lease_ttl: config.lease_enabled.then(|| {
                Duration::seconds(config.lease_ttl_seconds.min(MAX_LEASE_TTL_SECONDS) as i64)
            }),
        }
    }
}

pub struct ReportAggregator {
    store: Arc<dyn DisasterStore>,
    classifier: Arc<dyn ClusterClassifier>,
    options: AggregatorOptions,
}

impl ReportAggregator {
    pub fn new(
        store: Arc<dyn DisasterStore>,
        classifier: Arc<dyn ClusterClassifier>,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            store,
            classifier,
            options,
        }
    }

    /// Run one aggregation pass against the current time.
    pub async fn aggregate(&self) -> Result<AggregationSummary, AggregateError> {
        self.aggregate_at(Utc::now()).await
    }

    /// Run one aggregation pass with `now` as the window's end.
    pub async fn aggregate_at(&self, now: DateTime<Utc>) -> Result<AggregationSummary, AggregateError> {
        let since = self.window_start(now)?;
        let generation = format!("gen_{}", now.timestamp_millis());
        let holder = lease_holder(&generation);

        if let Some(ttl) = self.options.lease_ttl {
            if let Lease::Held { holder } = self.store.try_acquire_lease(&holder, now, ttl).await? {
                return Err(AggregateError::AlreadyRunning { holder });
            }
            debug!("Acquired aggregation lease as {}", holder);
        }

        let result = match self.options.strategy {
            ReplaceStrategy::ClearFirst => self.run_clear_first(since, &generation).await,
            ReplaceStrategy::Generational => self.run_generational(since, &generation).await,
        };

        if self.options.lease_ttl.is_some() {
            if let Err(e) = self.store.release_lease(&holder).await {
                warn!("Failed to release aggregation lease: {}", e);
            }
        }

        let summary = result?;
        info!(
            "Aggregation complete. {} disasters processed.",
            summary.disasters_written
        );
        Ok(summary)
    }

    /// Start of the window ending at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AggregateError> {
        now.checked_sub_signed(self.options.window).ok_or_else(|| {
            AggregateError::Window(format!(
                "{} days before {} is out of range",
                self.options.window.num_days(),
                now
            ))
        })
    }

    /// Reports created at or after `since`.
    pub async fn load_window(&self, since: DateTime<Utc>) -> Result<Vec<Report>, AggregateError> {
        let mut reports = self.store.reports_since(since).await?;
        reports.retain(|r| r.timestamp.is_some_and(|ts| ts >= since));
        debug!("Loaded {} reports since {}", reports.len(), since);
        Ok(reports)
    }

    /// Delete everything, then rebuild. A failure after the clear leaves
    /// the collection empty.
    async fn run_clear_first(
        &self,
        since: DateTime<Utc>,
        generation: &str,
    ) -> Result<AggregationSummary, AggregateError> {
        let previous = self.clear_all().await?;

        let reports = self.load_window(since).await?;
        let mut summary = AggregationSummary {
            generation: generation.to_string(),
            reports_considered: reports.len(),
            previous_removed: previous,
            ..AggregationSummary::default()
        };

        if reports.is_empty() {
            info!("No reports in the aggregation window; nothing to classify");
            return Ok(summary);
        }

        let candidates = self.classifier.classify(&reports).await?;
        self.persist(candidates, generation, &mut summary).await?;
        self.store.set_current_generation(generation).await?;
        Ok(summary)
    }

    /// Write the new generation first, then drop everything older. A
    /// failure before the writes leaves the previous generation intact.
    async fn run_generational(
        &self,
        since: DateTime<Utc>,
        generation: &str,
    ) -> Result<AggregationSummary, AggregateError> {
        let reports = self.load_window(since).await?;
        let mut summary = AggregationSummary {
            generation: generation.to_string(),
            reports_considered: reports.len(),
            ..AggregationSummary::default()
        };

        if reports.is_empty() {
            info!("No reports in the aggregation window; nothing to classify");
        } else {
            let candidates = self.classifier.classify(&reports).await?;
            self.persist(candidates, generation, &mut summary).await?;
        }

        self.store.set_current_generation(generation).await?;

        let stale: Vec<String> = self
            .store
            .list_disasters()
            .await?
            .into_iter()
            .filter(|d| d.generation.as_deref() != Some(generation))
            .map(|d| d.disaster_id)
            .collect();
        if !stale.is_empty() {
            self.store.delete_disasters(&stale).await?;
            info!("Removed {} disasters from earlier generations", stale.len());
        }
        summary.previous_removed = stale.len();

        Ok(summary)
    }

    async fn clear_all(&self) -> Result<usize, AggregateError> {
        let ids: Vec<String> = self
            .store
            .list_disasters()
            .await?
            .into_iter()
            .map(|d| d.disaster_id)
            .collect();

        if !ids.is_empty() {
            self.store.delete_disasters(&ids).await?;
            info!("Cleared {} existing disasters.", ids.len());
        }
        Ok(ids.len())
    }

    async fn persist(
        &self,
        candidates: Vec<DisasterCandidate>,
        generation: &str,
        summary: &mut AggregationSummary,
    ) -> Result<(), AggregateError> {
        for candidate in candidates {
            let title = self.resolve_title(&candidate).await?;
            let disaster = Disaster::from_candidate(candidate, title, generation);

            self.store.upsert_disaster(&disaster).await?;
            debug!("Upserted {} ({})", disaster.disaster_id, disaster.title);

            summary.disasters_written += 1;
            *summary.by_severity.entry(disaster.severity).or_insert(0) += 1;
        }
        Ok(())
    }

    /// Name of the primary area, else the classifier's title, else the
    /// fallback title.
    pub async fn resolve_title(&self, candidate: &DisasterCandidate) -> Result<String, AggregateError> {
        if let Some(area_id) = candidate.primary_area_id() {
            if let Some(name) = self.store.area(area_id).await?.and_then(|a| a.name) {
                return Ok(name);
            }
            debug!("Area {} has no name, falling back", area_id);
        }

        Ok(candidate
            .title
            .clone()
            .unwrap_or_else(|| self.options.fallback_title.clone()))
    }
}

/// Lease holder for one run. Runs started in the same millisecond share a
/// generation id but never a holder.
fn lease_holder(generation: &str) -> String {
    format!("{}_{}", generation, Uuid::new_v4().simple())
}
