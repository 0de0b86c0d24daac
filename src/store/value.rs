//! Firestore REST `Value` encoding and document field mapping.

use crate::error::{StoreError, StoreResult};
use crate::models::{Area, Disaster, DisasterType, Report, Severity};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed field value, as in `{"stringValue": "x"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(Option<String>),
    BooleanValue(bool),
    /// int64 travels as a decimal string.
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
    ReferenceValue(String),
    GeoPointValue(serde_json::Value),
    BytesValue(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(default)]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(default)]
    pub fields: Fields,
}

pub type Fields = BTreeMap<String, Value>;

/// A stored document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    /// Last path segment of the document name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or("")
    }

    fn decode_error(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Decode {
            document: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::StringValue(s) => Some(s.clone()),
            Value::IntegerValue(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn required_string(&self, key: &str) -> StoreResult<String> {
        self.string(key)
            .ok_or_else(|| self.decode_error(format!("missing string field '{}'", key)))
    }

    fn count(&self, key: &str) -> StoreResult<Option<u64>> {
        match self.fields.get(key) {
            None | Some(Value::NullValue(_)) => Ok(None),
            Some(Value::IntegerValue(s)) => s
                .parse::<i64>()
                .map(|v| Some(v.max(0) as u64))
                .map_err(|e| self.decode_error(format!("'{}': {}", key, e))),
            Some(Value::DoubleValue(f)) => Ok(Some(f.max(0.0) as u64)),
            Some(other) => Err(self.decode_error(format!("'{}' is not numeric: {:?}", key, other))),
        }
    }

    fn timestamp(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
        match self.fields.get(key) {
            Some(Value::TimestampValue(s)) | Some(Value::StringValue(s)) => parse_timestamp(s)
                .map(Some)
                .map_err(|e| self.decode_error(format!("'{}': {}", key, e))),
            _ => Ok(None),
        }
    }

    fn string_array(&self, key: &str) -> Vec<String> {
        match self.fields.get(key) {
            Some(Value::ArrayValue(arr)) => arr
                .values
                .iter()
                .filter_map(|v| match v {
                    Value::StringValue(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::TimestampValue(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub fn string_value(s: impl Into<String>) -> Value {
    Value::StringValue(s.into())
}

pub fn integer_value(n: u64) -> Value {
    Value::IntegerValue(n.to_string())
}

pub fn report_from_document(doc: &Document) -> StoreResult<Report> {
    Ok(Report {
        id: doc.id().to_string(),
        case_id: doc.string("caseId"),
        description: doc.string("description").unwrap_or_default(),
        category: doc.string("category").unwrap_or_default(),
        // Passed through empty when missing; the classifier still sees the report.
        area_id: doc.string("areaId").unwrap_or_default(),
        people_affected: doc.count("peopleAffected")?.unwrap_or(0),
        timestamp: doc.timestamp("timestamp")?,
    })
}

pub fn area_from_document(doc: &Document) -> Area {
    Area {
        id: doc.id().to_string(),
        name: doc.string("name").filter(|n| !n.trim().is_empty()),
    }
}

pub fn disaster_from_document(doc: &Document) -> StoreResult<Disaster> {
    let disaster_type: DisasterType = doc
        .required_string("type")?
        .parse()
        .map_err(|e: String| doc.decode_error(e))?;
    let severity: Severity = doc
        .required_string("severity")?
        .parse()
        .map_err(|e: String| doc.decode_error(e))?;

    Ok(Disaster {
        disaster_id: doc.string("disasterId").unwrap_or_else(|| doc.id().to_string()),
        disaster_type,
        severity,
        title: doc.string("title").unwrap_or_default(),
        description: doc.string("description").unwrap_or_default(),
        location_label: doc.string("locationLabel").unwrap_or_default(),
        affected_area_ids: doc.string_array("affectedAreaIds"),
        affected_count: doc.count("affectedCount")?.unwrap_or(0),
        case_count: doc.count("caseCount")?.unwrap_or(0),
        updated_at: doc
            .timestamp("updatedAt")?
            .ok_or_else(|| doc.decode_error("missing 'updatedAt'"))?,
        generation: doc.string("generation"),
    })
}

/// Field map written for a disaster. Every key is part of the update mask.
pub fn disaster_fields(disaster: &Disaster) -> Fields {
    let mut fields = Fields::new();
    fields.insert("disasterId".into(), string_value(&disaster.disaster_id));
    fields.insert("type".into(), string_value(disaster.disaster_type.as_str()));
    fields.insert("severity".into(), string_value(disaster.severity.as_str()));
    fields.insert("title".into(), string_value(&disaster.title));
    fields.insert("description".into(), string_value(&disaster.description));
    fields.insert("locationLabel".into(), string_value(&disaster.location_label));
    fields.insert(
        "affectedAreaIds".into(),
        Value::ArrayValue(ArrayValue {
            values: disaster
                .affected_area_ids
                .iter()
                .map(|id| string_value(id.as_str()))
                .collect(),
        }),
    );
    fields.insert("affectedCount".into(), integer_value(disaster.affected_count));
    fields.insert("caseCount".into(), integer_value(disaster.case_count));
    fields.insert("updatedAt".into(), timestamp_value(disaster.updated_at));
    if let Some(generation) = &disaster.generation {
        fields.insert("generation".into(), string_value(generation.as_str()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_value_wire_shape() {
        let v = serde_json::to_value(integer_value(42)).unwrap();
        assert_eq!(v, json!({ "integerValue": "42" }));

        let parsed: Value = serde_json::from_value(json!({ "nullValue": null })).unwrap();
        assert_eq!(parsed, Value::NullValue(None));

        let parsed: Value = serde_json::from_value(json!({ "arrayValue": {} })).unwrap();
        assert_eq!(parsed, Value::ArrayValue(ArrayValue::default()));
    }

    #[test]
    fn test_report_from_document() {
        let doc: Document = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/reported_cases/abc123",
            "fields": {
                "caseId": { "stringValue": "CASE-9" },
                "description": { "stringValue": "Roof collapsed" },
                "category": { "stringValue": "STORM" },
                "areaId": { "stringValue": "A7" },
                "peopleAffected": { "integerValue": "6" },
                "timestamp": { "timestampValue": "2026-10-16T04:05:06.123456Z" }
            },
            "updateTime": "2026-10-16T04:05:07Z"
        }))
        .unwrap();

        let report = report_from_document(&doc).unwrap();
        assert_eq!(report.id, "abc123");
        assert_eq!(report.case_id.as_deref(), Some("CASE-9"));
        assert_eq!(report.area_id, "A7");
        assert_eq!(report.people_affected, 6);
        assert_eq!(
            report.timestamp.unwrap().timestamp(),
            Utc.with_ymd_and_hms(2026, 10, 16, 4, 5, 6).unwrap().timestamp()
        );
    }

    #[test]
    fn test_report_accepts_double_count_and_missing_area() {
        let doc: Document = serde_json::from_value(json!({
            "name": "x/reported_cases/r1",
            "fields": {
                "areaId": { "stringValue": "A1" },
                "peopleAffected": { "doubleValue": 3.0 }
            }
        }))
        .unwrap();
        assert_eq!(report_from_document(&doc).unwrap().people_affected, 3);

        let doc = Document {
            name: "x/reported_cases/r2".to_string(),
            ..Document::default()
        };
        assert_eq!(report_from_document(&doc).unwrap().area_id, "");

        let mut fields = Fields::new();
        fields.insert("timestamp".into(), Value::TimestampValue("soon".to_string()));
        let doc = Document {
            name: "x/reported_cases/r3".to_string(),
            fields,
            update_time: None,
        };
        assert!(matches!(
            report_from_document(&doc),
            Err(StoreError::Decode { .. })
        ));
    }

    #[test]
    fn test_area_blank_name_is_none() {
        let mut fields = Fields::new();
        fields.insert("name".into(), string_value("  "));
        let doc = Document {
            name: "x/Areas/A1".to_string(),
            fields,
            update_time: None,
        };
        assert_eq!(area_from_document(&doc).name, None);
    }

    #[test]
    fn test_disaster_fields_decode_back() {
        let disaster = Disaster {
            disaster_id: "disaster_flood_wangsa_maju".to_string(),
            disaster_type: DisasterType::Flood,
            severity: Severity::High,
            title: "Wangsa Maju".to_string(),
            description: "Flash flood".to_string(),
            location_label: "Wangsa Maju".to_string(),
            affected_area_ids: vec!["A1".to_string(), "A2".to_string()],
            affected_count: 17,
            case_count: 3,
            updated_at: Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap(),
            generation: Some("gen_1".to_string()),
        };

        let doc = Document {
            name: "x/disasters/disaster_flood_wangsa_maju".to_string(),
            fields: disaster_fields(&disaster),
            update_time: None,
        };
        assert_eq!(doc.fields["affectedCount"], Value::IntegerValue("17".to_string()));
        assert_eq!(disaster_from_document(&doc).unwrap(), disaster);
    }
}
