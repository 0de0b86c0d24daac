//! Invocation paths: the new-report event and the on-demand callable.

use super::ReportAggregator;
use crate::models::AggregationSummary;
use serde::Serialize;
use tracing::{error, info};

/// Body returned by the callable on success: `{"success": true}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallableResponse {
    pub success: bool,
}

impl CallableResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Error surfaced to callable clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallableError {
    pub status: &'static str,
    pub message: String,
}

impl CallableError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: "INTERNAL",
            message: message.into(),
        }
    }

    /// Wire form: `{"error": {"status": ..., "message": ...}}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self })
    }
}

/// New-report event. Failures are logged and swallowed; the next report
/// retries the whole pass.
pub async fn on_report_created(aggregator: &ReportAggregator) -> Option<AggregationSummary> {
    info!("New report created. Triggering aggregation...");
    match aggregator.aggregate().await {
        Ok(summary) => Some(summary),
        Err(e) => {
            error!("Aggregation failed: {}", e);
            None
        }
    }
}

/// On-demand re-aggregation. Any failure becomes an internal error
/// carrying the underlying message.
pub async fn reaggregate(
    aggregator: &ReportAggregator,
) -> Result<(CallableResponse, AggregationSummary), CallableError> {
    match aggregator.aggregate().await {
        Ok(summary) => Ok((CallableResponse::ok(), summary)),
        Err(e) => {
            error!("Re-aggregation failed: {}", e);
            Err(CallableError::internal(e.to_string()))
        }
    }
}
