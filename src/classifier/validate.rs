//! Parsing and field-level validation of classifier output.

use crate::error::AggregateError;
use crate::models::{disaster_id, normalize_disaster_id, DisasterCandidate, DisasterType, Severity};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};

/// Top-level classifier document: `{ "disasters": [...] }`.
#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    #[serde(default)]
    disasters: Option<Vec<RawCandidate>>,
}

/// A candidate exactly as the model wrote it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCandidate {
    pub disaster_id: Option<String>,
    #[serde(rename = "type")]
    pub disaster_type: Option<String>,
    pub severity: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location_label: Option<String>,
    pub affected_area_ids: Option<Vec<String>>,
    pub affected_count: Option<Value>,
    pub case_count: Option<Value>,
    pub updated_at: Option<String>,
}

impl RawCandidate {
    /// Best label for this candidate in logs and errors.
    pub fn label(&self) -> String {
        self.disaster_id
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| "<unnamed>".to_string())
    }
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// Parse the model's text into raw candidates.
///
/// Unparsable text is logged in full and reported without its content.
pub fn parse_output(text: &str) -> Result<Vec<RawCandidate>, AggregateError> {
    let body = strip_code_fence(text);

    let output: ClassifierOutput = serde_json::from_str(body).map_err(|e| {
        error!("Failed to parse classifier JSON: {}", text);
        AggregateError::ClassifierResponse(format!("classifier returned invalid JSON ({})", e))
    })?;

    Ok(output.disasters.unwrap_or_default())
}

fn count(value: Option<&Value>, field: &str) -> Result<Option<u64>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                Ok(Some(v))
            } else if let Some(f) = n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0) {
                Ok(Some(f as u64))
            } else {
                Err(format!("{} must be a non-negative integer, got {}", field, n))
            }
        }
        Some(other) => Err(format!("{} must be a number, got {}", field, other)),
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Check one candidate against the output contract.
pub fn validate_candidate(raw: &RawCandidate) -> Result<DisasterCandidate, AggregateError> {
    let reject = |reason: String| AggregateError::Validation {
        disaster_id: raw.label(),
        reason,
    };

    let disaster_type: DisasterType = raw
        .disaster_type
        .as_deref()
        .ok_or_else(|| reject("type is missing".to_string()))?
        .parse()
        .map_err(reject)?;

    let severity: Severity = raw
        .severity
        .as_deref()
        .ok_or_else(|| reject("severity is missing".to_string()))?
        .parse()
        .map_err(reject)?;

    let affected_area_ids: Vec<String> = raw
        .affected_area_ids
        .iter()
        .flatten()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect();
    if affected_area_ids.is_empty() {
        return Err(reject("affectedAreaIds is empty".to_string()));
    }

    let affected_count = count(raw.affected_count.as_ref(), "affectedCount")
        .map_err(reject)?
        .ok_or_else(|| reject("affectedCount is missing".to_string()))?;
    let case_count = count(raw.case_count.as_ref(), "caseCount")
        .map_err(reject)?
        .unwrap_or(0);

    let updated_at = raw
        .updated_at
        .as_deref()
        .ok_or_else(|| reject("updatedAt is missing".to_string()))
        .and_then(|s| {
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| reject(format!("updatedAt '{}' is not ISO-8601: {}", s, e)))
        })?;

    let title = non_blank(raw.title.as_ref());
    let location_label = non_blank(raw.location_label.as_ref());

    // An id with no alphanumeric content normalizes to nothing; derive one instead.
    let id = match raw
        .disaster_id
        .as_deref()
        .map(normalize_disaster_id)
        .filter(|id| !id.is_empty())
    {
        Some(id) => id,
        None => {
            let zone = location_label.as_deref().or(title.as_deref()).unwrap_or("");
            disaster_id(disaster_type, zone)
        }
    };

    Ok(DisasterCandidate {
        disaster_id: id,
        disaster_type,
        severity,
        title,
        description: raw.description.clone().unwrap_or_default(),
        location_label,
        affected_area_ids,
        affected_count,
        case_count,
        updated_at,
    })
}

/// Validate raw candidates, dropping or failing on bad ones.
pub fn accept_candidates(
    raw: Vec<RawCandidate>,
    strict: bool,
) -> Result<(Vec<DisasterCandidate>, usize), AggregateError> {
    let mut accepted = Vec::with_capacity(raw.len());
    let mut rejected = 0;

    for candidate in &raw {
        match validate_candidate(candidate) {
            Ok(c) => accepted.push(c),
            Err(e) if strict => return Err(e),
            Err(e) => {
                warn!("Dropping classifier candidate: {}", e);
                rejected += 1;
            }
        }
    }

    Ok((accepted, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> RawCandidate {
        RawCandidate {
            disaster_id: Some("disaster_flood_wangsa_maju".to_string()),
            disaster_type: Some("FLOOD".to_string()),
            severity: Some("high".to_string()),
            title: Some("FLOOD - Wangsa Maju".to_string()),
            description: Some("Flash flood near the LRT station.".to_string()),
            location_label: Some("Wangsa Maju".to_string()),
            affected_area_ids: Some(vec!["A1".to_string()]),
            affected_count: Some(json!(14)),
            case_count: Some(json!(3)),
            updated_at: Some("2026-10-17T09:15:00.000Z".to_string()),
        }
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_output_valid() {
        let text = r#"{"disasters":[{"disasterId":"disaster_fire_cheras","type":"FIRE"}]}"#;
        let parsed = parse_output(text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].disaster_type.as_deref(), Some("FIRE"));
    }

    #[test]
    fn test_parse_output_missing_key_is_empty() {
        assert!(parse_output("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_output_invalid_json() {
        let err = parse_output("Here are the disasters: [").unwrap_err();
        assert!(matches!(err, AggregateError::ClassifierResponse(_)));
        assert!(!err.to_string().contains("Here are the disasters"));
    }

    #[test]
    fn test_validate_happy_path() {
        let candidate = validate_candidate(&raw()).unwrap();
        assert_eq!(candidate.disaster_id, "disaster_flood_wangsa_maju");
        assert_eq!(candidate.disaster_type, DisasterType::Flood);
        assert_eq!(candidate.severity, Severity::High);
        assert_eq!(candidate.affected_count, 14);
        assert_eq!(candidate.case_count, 3);
        assert_eq!(candidate.primary_area_id(), Some("A1"));
    }

    #[test]
    fn test_validate_rejects_out_of_enum_values() {
        let bad_type = RawCandidate {
            disaster_type: Some("VOLCANO".to_string()),
            ..raw()
        };
        assert!(matches!(
            validate_candidate(&bad_type),
            Err(AggregateError::Validation { .. })
        ));

        let bad_severity = RawCandidate {
            severity: Some("low".to_string()),
            ..raw()
        };
        assert!(validate_candidate(&bad_severity).is_err());
    }

    #[test]
    fn test_validate_rejects_negative_counts() {
        let negative = RawCandidate {
            affected_count: Some(json!(-2)),
            ..raw()
        };
        assert!(validate_candidate(&negative).is_err());

        let fractional = RawCandidate {
            case_count: Some(json!(1.5)),
            ..raw()
        };
        assert!(validate_candidate(&fractional).is_err());
    }

    #[test]
    fn test_validate_accepts_integral_float_and_missing_case_count() {
        let candidate = validate_candidate(&RawCandidate {
            affected_count: Some(json!(12.0)),
            case_count: None,
            ..raw()
        })
        .unwrap();
        assert_eq!(candidate.affected_count, 12);
        assert_eq!(candidate.case_count, 0);
    }

    #[test]
    fn test_validate_requires_area_ids() {
        let empty = RawCandidate {
            affected_area_ids: Some(vec![" ".to_string()]),
            ..raw()
        };
        assert!(validate_candidate(&empty).is_err());
    }

    #[test]
    fn test_validate_bad_timestamp() {
        let bad = RawCandidate {
            updated_at: Some("yesterday".to_string()),
            ..raw()
        };
        assert!(validate_candidate(&bad).is_err());
    }

    #[test]
    fn test_validate_derives_missing_id() {
        let candidate = validate_candidate(&RawCandidate {
            disaster_id: None,
            ..raw()
        })
        .unwrap();
        assert_eq!(candidate.disaster_id, "disaster_flood_wangsa_maju");
    }

    #[test]
    fn test_validate_normalizes_supplied_id() {
        let candidate = validate_candidate(&RawCandidate {
            disaster_id: Some("Disaster_Flood_Wangsa Maju".to_string()),
            ..raw()
        })
        .unwrap();
        assert_eq!(candidate.disaster_id, "disaster_flood_wangsa_maju");
    }

    #[test]
    fn test_validate_punctuation_only_id_is_derived() {
        for supplied in ["---", "  ", "/#?"] {
            let candidate = validate_candidate(&RawCandidate {
                disaster_id: Some(supplied.to_string()),
                ..raw()
            })
            .unwrap();
            assert_eq!(candidate.disaster_id, "disaster_flood_wangsa_maju", "{:?}", supplied);
        }
    }

    #[test]
    fn test_validate_blank_title_becomes_none() {
        let candidate = validate_candidate(&RawCandidate {
            title: Some("   ".to_string()),
            ..raw()
        })
        .unwrap();
        assert_eq!(candidate.title, None);
    }

    #[test]
    fn test_accept_candidates_lenient_and_strict() {
        let good = RawCandidate {
            disaster_id: Some("disaster_fire_cheras".to_string()),
            disaster_type: Some("FIRE".to_string()),
            severity: Some("critical".to_string()),
            affected_area_ids: Some(vec!["C1".to_string()]),
            affected_count: Some(json!(3)),
            case_count: Some(json!(1)),
            updated_at: Some("2026-10-17T10:00:00Z".to_string()),
            ..RawCandidate::default()
        };
        let bad = RawCandidate {
            disaster_type: Some("METEOR".to_string()),
            ..good.clone()
        };

        let (accepted, rejected) = accept_candidates(vec![good.clone(), bad.clone()], false).unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(rejected, 1);

        assert!(accept_candidates(vec![good, bad], true).is_err());
    }
}
