//! Data models for the disaster aggregator.
//!
//! This module contains the records read from storage (reports, areas),
//! the candidates produced by the classifier, and the disaster records
//! written back after reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of real-world event a disaster cluster describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisasterType {
    Flood,
    Fire,
    Storm,
    Earthquake,
    Tsunami,
    Other,
}

impl DisasterType {
    pub const ALL: [DisasterType; 6] = [
        DisasterType::Flood,
        DisasterType::Fire,
        DisasterType::Storm,
        DisasterType::Earthquake,
        DisasterType::Tsunami,
        DisasterType::Other,
    ];

    /// Upper-case wire name (e.g. `FLOOD`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DisasterType::Flood => "FLOOD",
            DisasterType::Fire => "FIRE",
            DisasterType::Storm => "STORM",
            DisasterType::Earthquake => "EARTHQUAKE",
            DisasterType::Tsunami => "TSUNAMI",
            DisasterType::Other => "OTHER",
        }
    }
}

impl fmt::Display for DisasterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DisasterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| format!("unknown disaster type '{}'", s))
    }
}

/// Severity of a disaster cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Minor damage
    Medium,
    /// Serious damage
    High,
    /// Immediate danger, people trapped
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// A single submitted incident, as stored in `reported_cases`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Document id in the store.
    pub id: String,
    /// Human-facing case id, when the reporter assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    pub description: String,
    pub category: String,
    pub area_id: String,
    pub people_affected: u64,
    /// Creation time. Missing only for malformed documents.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A named zone from the `Areas` reference collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A validated cluster proposed by the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct DisasterCandidate {
    pub disaster_id: String,
    pub disaster_type: DisasterType,
    pub severity: Severity,
    pub title: Option<String>,
    pub description: String,
    pub location_label: Option<String>,
    pub affected_area_ids: Vec<String>,
    pub affected_count: u64,
    pub case_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl DisasterCandidate {
    /// The area whose name becomes the disaster title.
    pub fn primary_area_id(&self) -> Option<&str> {
        self.affected_area_ids.first().map(String::as_str)
    }
}

/// A materialized disaster record, as stored in `disasters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disaster {
    pub disaster_id: String,
    #[serde(rename = "type")]
    pub disaster_type: DisasterType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location_label: String,
    pub affected_area_ids: Vec<String>,
    pub affected_count: u64,
    pub case_count: u64,
    pub updated_at: DateTime<Utc>,
    /// Run that wrote this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

impl Disaster {
    /// Build the stored record from a candidate and its resolved title.
    pub fn from_candidate(candidate: DisasterCandidate, title: String, generation: &str) -> Self {
        let location_label = candidate
            .location_label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| title.clone());

        Self {
            disaster_id: candidate.disaster_id,
            disaster_type: candidate.disaster_type,
            severity: candidate.severity,
            title,
            description: candidate.description,
            location_label,
            affected_area_ids: candidate.affected_area_ids,
            affected_count: candidate.affected_count,
            case_count: candidate.case_count,
            updated_at: candidate.updated_at,
            generation: Some(generation.to_string()),
        }
    }
}

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationSummary {
    pub generation: String,
    pub reports_considered: usize,
    pub disasters_written: usize,
    pub previous_removed: usize,
    pub by_severity: std::collections::BTreeMap<Severity, usize>,
}

/// Lower-case a zone or id fragment and join its words with underscores.
fn slug(s: &str) -> String {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// Build the stable id `disaster_{type}_{zone}`.
pub fn disaster_id(disaster_type: DisasterType, zone: &str) -> String {
    let zone = slug(zone);
    let kind = disaster_type.as_str().to_lowercase();
    if zone.is_empty() {
        format!("disaster_{}", kind)
    } else {
        format!("disaster_{}_{}", kind, zone)
    }
}

/// Normalize a classifier-supplied id to lowercase, underscore-joined form.
pub fn normalize_disaster_id(raw: &str) -> String {
    slug(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_disaster_type_from_str() {
        assert_eq!("FLOOD".parse::<DisasterType>(), Ok(DisasterType::Flood));
        assert_eq!(" earthquake ".parse::<DisasterType>(), Ok(DisasterType::Earthquake));
        assert!("VOLCANO".parse::<DisasterType>().is_err());
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("Critical".parse::<Severity>(), Ok(Severity::Critical));
        assert!("low".parse::<Severity>().is_err());
    }

    #[test]
    fn test_disaster_id() {
        assert_eq!(
            disaster_id(DisasterType::Flood, "Wangsa Maju"),
            "disaster_flood_wangsa_maju"
        );
        assert_eq!(
            disaster_id(DisasterType::Fire, "  Jalan  Ipoh / KL "),
            "disaster_fire_jalan_ipoh_kl"
        );
        assert_eq!(disaster_id(DisasterType::Other, ""), "disaster_other");
    }

    #[test]
    fn test_normalize_disaster_id_is_stable() {
        let once = normalize_disaster_id("Disaster_FLOOD_Wangsa Maju");
        assert_eq!(once, "disaster_flood_wangsa_maju");
        assert_eq!(normalize_disaster_id(&once), once);
    }

    #[test]
    fn test_disaster_serializes_with_wire_names() {
        let disaster = Disaster {
            disaster_id: "disaster_storm_setapak".to_string(),
            disaster_type: DisasterType::Storm,
            severity: Severity::High,
            title: "Setapak".to_string(),
            description: "Strong winds".to_string(),
            location_label: "Setapak".to_string(),
            affected_area_ids: vec!["A2".to_string()],
            affected_count: 12,
            case_count: 2,
            updated_at: Utc::now(),
            generation: None,
        };

        let json = serde_json::to_value(&disaster).unwrap();
        assert_eq!(json["type"], "STORM");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["disasterId"], "disaster_storm_setapak");
        assert_eq!(json["affectedAreaIds"][0], "A2");
        assert!(json.get("generation").is_none());
    }

    #[test]
    fn test_location_label_falls_back_to_title() {
        let candidate = DisasterCandidate {
            disaster_id: "disaster_fire_cheras".to_string(),
            disaster_type: DisasterType::Fire,
            severity: Severity::Critical,
            title: None,
            description: "Shophouse fire".to_string(),
            location_label: Some("  ".to_string()),
            affected_area_ids: vec!["C1".to_string()],
            affected_count: 4,
            case_count: 1,
            updated_at: Utc::now(),
        };

        let disaster = Disaster::from_candidate(candidate, "Cheras".to_string(), "gen_1");
        assert_eq!(disaster.location_label, "Cheras");
        assert_eq!(disaster.generation.as_deref(), Some("gen_1"));
    }
}
