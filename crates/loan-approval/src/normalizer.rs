//! Converts a loosely typed JSON application into the canonical feature record.
//!
//! Absence of a required key is an error; a present value that fails to parse falls back to the
//! field's default unless its policy says otherwise. Categorical flags never fail.

use crate::schema::{FeatureSchema, FieldKind, FieldSpec, OnParseFail, FEATURE_SCHEMA};
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// A single encoded feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Pre-encoded categorical (flags and property area).
    Code(u8),
    /// Text kept verbatim for count-style fields such as `Dependents`.
    Text(String),
    Number(f64),
}

impl FeatureValue {
    /// Numeric form fed to the classifiers.
    pub fn as_f64(&self) -> f64 {
        match self {
            FeatureValue::Code(code) => f64::from(*code),
            FeatureValue::Number(value) => *value,
            FeatureValue::Text(text) => count_value(text),
        }
    }
}

/// Fixed-order, fully defaulted representation of one application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    schema_version: &'static str,
    features: Vec<(&'static str, FeatureValue)>,
}

impl FeatureRecord {
    pub fn schema_version(&self) -> &'static str {
        self.schema_version
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.features.iter().map(|(name, _)| *name)
    }

    pub fn values(&self) -> Vec<&FeatureValue> {
        self.features.iter().map(|(_, value)| value).collect()
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.features
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Flat numeric vector in schema order.
    pub fn to_vector(&self) -> Vec<f64> {
        self.features
            .iter()
            .map(|(_, value)| value.as_f64())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
    #[error("invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldNormalizer {
    schema: &'static FeatureSchema,
}

impl Default for FieldNormalizer {
    fn default() -> Self {
        Self::new(&FEATURE_SCHEMA)
    }
}

impl FieldNormalizer {
    pub fn new(schema: &'static FeatureSchema) -> Self {
        Self { schema }
    }

    pub fn normalize(&self, raw: &Value) -> Result<FeatureRecord, NormalizeError> {
        let object = raw.as_object().ok_or(NormalizeError::NotAnObject)?;
        self.normalize_object(object)
    }

    pub fn normalize_object(
        &self,
        raw: &Map<String, Value>,
    ) -> Result<FeatureRecord, NormalizeError> {
        let mut features = Vec::with_capacity(self.schema.len());

        for spec in self.schema.fields {
            let value = match raw.get(spec.name) {
                None | Some(Value::Null) if spec.policy.required => {
                    return Err(NormalizeError::MissingField { field: spec.name });
                }
                None | Some(Value::Null) => default_value(spec.kind),
                Some(value) => encode(spec, value)?,
            };
            features.push((spec.name, value));
        }

        Ok(FeatureRecord {
            schema_version: self.schema.version,
            features,
        })
    }
}

fn default_value(kind: FieldKind) -> FeatureValue {
    match kind {
        FieldKind::Flag { .. } | FieldKind::Area => FeatureValue::Code(0),
        FieldKind::Count { default } => FeatureValue::Text(default.to_string()),
        FieldKind::Numeric => FeatureValue::Number(0.0),
    }
}

fn encode(spec: &FieldSpec, value: &Value) -> Result<FeatureValue, NormalizeError> {
    let encoded = match spec.kind {
        FieldKind::Flag { truthy } => FeatureValue::Code(encode_flag(&raw_text(value), truthy)),
        FieldKind::Count { default } => {
            let text = raw_text(value);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                FeatureValue::Text(default.to_string())
            } else {
                FeatureValue::Text(trimmed.to_string())
            }
        }
        FieldKind::Numeric => match parse_number(value) {
            Some(number) => FeatureValue::Number(number),
            None if spec.policy.on_parse_fail == OnParseFail::Reject => {
                return Err(NormalizeError::InvalidValue {
                    field: spec.name,
                    value: raw_text(value).into_owned(),
                });
            }
            None => default_value(spec.kind),
        },
        FieldKind::Area => FeatureValue::Code(encode_area(&raw_text(value))),
    };

    Ok(encoded)
}

fn raw_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        other => Cow::Owned(other.to_string()),
    }
}

fn encode_flag(text: &str, truthy: &[&str]) -> u8 {
    let lowered = text.to_lowercase();
    u8::from(truthy.contains(&lowered.as_str()))
}

fn encode_area(text: &str) -> u8 {
    let lowered = text.to_lowercase();
    if lowered.contains("semi") {
        1
    } else if lowered.contains("urban") {
        2
    } else {
        0
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    };
    number.filter(|value| value.is_finite())
}

fn count_value(text: &str) -> f64 {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}
