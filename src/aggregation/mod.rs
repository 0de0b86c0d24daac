//! Aggregation pipeline.
//!
//! One pass rebuilds the disaster collection from the trailing report
//! window; `trigger` maps the two invocation paths onto it.

pub mod aggregator;
pub mod trigger;

pub use aggregator::{AggregatorOptions, ReportAggregator};
