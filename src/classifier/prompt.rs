//! Prompt construction for the clustering request.

use crate::models::Report;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Compact form of a report as the model sees it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptReport<'a> {
    pub case_id: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub area_id: &'a str,
    pub people_affected: u64,
    pub created_at: String,
}

impl<'a> PromptReport<'a> {
    /// `now` stands in for a missing report timestamp.
    pub fn from_report(report: &'a Report, now: DateTime<Utc>) -> Self {
        Self {
            case_id: report.case_id.as_deref().unwrap_or(&report.id),
            description: &report.description,
            category: &report.category,
            area_id: &report.area_id,
            people_affected: report.people_affected,
            created_at: report
                .timestamp
                .unwrap_or(now)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

const INSTRUCTIONS: &str = r#"You are an expert disaster response coordinator. Read the incident reports below and group them into "disasters".
A disaster is a cluster of incidents that describe the same real-world event: the same type of hazard in the same or an adjoining area.
Judge from the free-text descriptions whether reporters are talking about the same event."#;

const OUTPUT_CONTRACT: &str = r#"For every disaster, produce:
- disasterId: "disaster_{type}_{zone_name}", all lowercase, words joined with underscores
- type: one of "FLOOD", "FIRE", "STORM", "EARTHQUAKE", "TSUNAMI", "OTHER"
- severity: "critical" (immediate danger, people trapped), "high" (serious damage) or "medium" (minor)
- title: "TYPE - Zone Name" (for example "FLOOD - Wangsa Maju")
- description: one short sentence summarizing the situation
- locationLabel: short area or landmark name
- affectedAreaIds: the unique areaId values of the grouped reports
- affectedCount: the SUM of peopleAffected over the grouped reports
- caseCount: the number of reports grouped into this disaster
- updatedAt: the latest createdAt among the grouped reports, ISO-8601

Respond with STRICT JSON ONLY. No markdown fences, no prose.
{
  "disasters": [
    {
      "disasterId": "...",
      "type": "...",
      "severity": "...",
      "title": "...",
      "description": "...",
      "locationLabel": "...",
      "affectedAreaIds": ["..."],
      "affectedCount": 0,
      "caseCount": 0,
      "updatedAt": "..."
    }
  ]
}"#;

/// Serialize the report batch as pretty JSON.
pub fn serialize_reports(reports: &[Report], now: DateTime<Utc>) -> serde_json::Result<String> {
    let batch: Vec<PromptReport<'_>> = reports
        .iter()
        .map(|r| PromptReport::from_report(r, now))
        .collect();
    serde_json::to_string_pretty(&batch)
}

/// Build the full clustering prompt.
pub fn build_prompt(reports: &[Report], now: DateTime<Utc>) -> serde_json::Result<String> {
    let batch = serialize_reports(reports, now)?;

    let mut prompt = String::new();
    prompt.push_str(INSTRUCTIONS);
    prompt.push_str("\n\nInput Reports:\n");
    prompt.push_str(&batch);
    prompt.push_str("\n\n");
    prompt.push_str(OUTPUT_CONTRACT);
    prompt.push('\n');
    Ok(prompt)
}
