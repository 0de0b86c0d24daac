//! Cluster classification of incident reports.
//!
//! The aggregator only sees the [`ClusterClassifier`] trait: reports in,
//! validated candidates out. The hosted Gemini model is one backend.

pub mod gemini;
pub mod prompt;
pub mod validate;

use crate::error::AggregateError;
use crate::models::{DisasterCandidate, Report};
use async_trait::async_trait;

pub use gemini::{GeminiClassifier, GeminiConfig};

/// Groups reports describing the same event into disaster candidates.
#[async_trait]
pub trait ClusterClassifier: Send + Sync {
    /// Classify a non-empty batch of reports.
    async fn classify(&self, reports: &[Report]) -> Result<Vec<DisasterCandidate>, AggregateError>;
}
