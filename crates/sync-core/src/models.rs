//! Core data models for order sync

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One external entity as returned by the remote order API.
///
/// The core only looks at the identifier, the business key and the
/// configured date fields; every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a record from a JSON value, rejecting anything but an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Scalar field rendered as a string key (strings as-is, numbers via Display)
    pub fn key(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Filters accepted by the remote record source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl SyncFilters {
    pub fn is_empty(&self) -> bool {
        self.date_from.is_none()
            && self.date_to.is_none()
            && self.updated_after.is_none()
            && self.status.is_none()
    }
}

/// Sort direction for paginated fetches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Stable sort applied to every page request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::ascending("id")
    }
}

/// Reasons a record is rejected before it reaches the store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' is not a valid timestamp: {value}")]
    InvalidDate { field: String, value: String },
}

/// Field rules a record must satisfy before it is written
#[derive(Debug, Clone)]
pub struct SanitizeRules {
    pub id_field: String,
    pub business_key_field: String,
    pub date_fields: Vec<String>,
}

impl Default for SanitizeRules {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            business_key_field: "order_number".to_string(),
            date_fields: vec!["date_ordered".to_string()],
        }
    }
}

impl SanitizeRules {
    /// Validate and normalize a record.
    ///
    /// String values are trimmed, date fields are rewritten as RFC 3339 UTC
    /// and empty date strings become null.
    pub fn sanitize(&self, record: Record) -> Result<Record, SanitizeError> {
        let mut fields = record.0;

        for value in fields.values_mut() {
            if let Value::String(s) = value {
                let trimmed = s.trim();
                if trimmed.len() != s.len() {
                    *s = trimmed.to_string();
                }
            }
        }

        for required in [&self.id_field, &self.business_key_field] {
            let present = match fields.get(required.as_str()) {
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Number(_)) => true,
                _ => false,
            };
            if !present {
                return Err(SanitizeError::MissingField(required.clone()));
            }
        }

        for field in &self.date_fields {
            let normalized = match fields.get(field.as_str()) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) if s.is_empty() => Value::Null,
                Some(Value::String(s)) => match parse_timestamp(s) {
                    Some(ts) => Value::String(ts.to_rfc3339()),
                    None => {
                        return Err(SanitizeError::InvalidDate {
                            field: field.clone(),
                            value: s.clone(),
                        })
                    }
                },
                Some(other) => {
                    return Err(SanitizeError::InvalidDate {
                        field: field.clone(),
                        value: other.to_string(),
                    })
                }
            };
            fields.insert(field.clone(), normalized);
        }

        Ok(Record(fields))
    }

    /// The record's primary date (first configured date field that parses)
    pub fn record_date(&self, record: &Record) -> Option<DateTime<Utc>> {
        self.date_fields
            .iter()
            .filter_map(|f| record.get(f).and_then(Value::as_str))
            .find_map(parse_timestamp)
    }
}

/// Parse the timestamp shapes order APIs commonly emit
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
