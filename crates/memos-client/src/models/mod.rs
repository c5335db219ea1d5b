//! Data models for the Memos API and their wire (de)serialization.
//!
//! Every model implements [`WireModel`]. Decoding never stops at the first
//! bad field: all violations for an object are collected into a single
//! [`ValidationError`].

mod attachment;
mod filter;
mod memo;
mod names;
mod user;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::ValidationError;

pub use attachment::Attachment;
pub use filter::{SearchFilter, SortOrder};
pub use memo::{extract_tags, validate_tag, Location, Memo, MemoPage, State, Visibility};
pub use names::{AttachmentName, MemoName, UserName};
pub use user::{Role, User};

/// A domain object with a JSON wire representation.
pub trait WireModel: Sized {
    /// Human readable kind used in validation errors.
    const KIND: &'static str;

    fn from_wire(value: &Value) -> Result<Self, ValidationError>;

    fn to_wire(&self) -> Value;
}

/// Decode raw JSON text into a typed model.
pub fn decode<T: WireModel>(raw_json: &str) -> Result<T, ValidationError> {
    let value: Value = serde_json::from_str(raw_json).map_err(|error| {
        ValidationError::single(T::KIND, "$", format!("invalid JSON: {error}"))
    })?;
    T::from_wire(&value)
}

/// Encode a typed model into JSON text.
pub fn encode<T: WireModel>(model: &T) -> String {
    model.to_wire().to_string()
}

/// Decode a JSON array found under `key` of a list response.
pub(crate) fn decode_list<T: WireModel>(value: &Value, key: &str) -> Result<Vec<T>, ValidationError> {
    let items = match value.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ValidationError::single(
                format!("{} list", T::KIND),
                key,
                "expected an array",
            ))
        }
    };

    let mut combined = ValidationError::new(format!("{} list", T::KIND));
    let mut decoded = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match T::from_wire(item) {
            Ok(model) => decoded.push(model),
            Err(error) => {
                for violation in error.violations {
                    combined.push(format!("{key}[{index}].{}", violation.field), violation.message);
                }
            }
        }
    }
    combined.into_result()?;
    Ok(decoded)
}

pub(crate) fn timestamp_to_wire(value: &DateTime<Utc>) -> Value {
    Value::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| format!("invalid RFC 3339 timestamp '{raw}': {error}"))
}

/// Reads fields out of a JSON object while recording every violation.
///
/// Keys are looked up by their camelCase wire name first and then by the
/// snake_case alias.
pub(crate) struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    errors: ValidationError,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(kind: &str, value: &'a Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(object) => Ok(Self {
                object,
                errors: ValidationError::new(kind),
            }),
            _ => Err(ValidationError::single(kind, "$", "expected a JSON object")),
        }
    }

    fn raw(&self, key: &str, alias: &str) -> Option<&'a Value> {
        self.object
            .get(key)
            .or_else(|| self.object.get(alias))
            .filter(|value| !value.is_null())
    }

    pub(crate) fn violation(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(field, message);
    }

    fn string(&mut self, key: &str, alias: &str) -> Option<Option<String>> {
        match self.raw(key, alias) {
            None => Some(None),
            Some(Value::String(value)) => Some(Some(value.clone())),
            Some(other) => {
                self.violation(key, format!("expected a string, found {other}"));
                None
            }
        }
    }

    pub(crate) fn required_string(&mut self, key: &str, alias: &str) -> Option<String> {
        match self.string(key, alias)? {
            Some(value) => Some(value),
            None => {
                self.violation(key, "is required");
                None
            }
        }
    }

    pub(crate) fn string_or_default(&mut self, key: &str, alias: &str) -> String {
        self.string(key, alias).flatten().unwrap_or_default()
    }

    /// Optional string where an empty value means absent.
    pub(crate) fn optional_string(&mut self, key: &str, alias: &str) -> Option<String> {
        self.string(key, alias)
            .flatten()
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn required_with<T>(
        &mut self,
        key: &str,
        alias: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Option<T> {
        let raw = self.required_string(key, alias)?;
        match parse(&raw) {
            Ok(value) => Some(value),
            Err(message) => {
                self.violation(key, message);
                None
            }
        }
    }

    /// Returns `Ok(None)` when absent and `Err(())` when present but invalid.
    pub(crate) fn optional_with<T>(
        &mut self,
        key: &str,
        alias: &str,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> Result<Option<T>, ()> {
        let Some(raw) = self.string(key, alias).ok_or(())? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        match parse(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(message) => {
                self.violation(key, message);
                Err(())
            }
        }
    }

    pub(crate) fn required_timestamp(&mut self, key: &str, alias: &str) -> Option<DateTime<Utc>> {
        self.required_with(key, alias, parse_timestamp)
    }

    pub(crate) fn optional_timestamp(
        &mut self,
        key: &str,
        alias: &str,
    ) -> Result<Option<DateTime<Utc>>, ()> {
        self.optional_with(key, alias, parse_timestamp)
    }

    pub(crate) fn bool_or_default(&mut self, key: &str, alias: &str) -> bool {
        match self.raw(key, alias) {
            None => false,
            Some(Value::Bool(value)) => *value,
            Some(other) => {
                self.violation(key, format!("expected a boolean, found {other}"));
                false
            }
        }
    }

    /// int64 fields arrive as JSON strings (protojson) or plain numbers.
    pub(crate) fn int64_or_default(&mut self, key: &str, alias: &str) -> Option<i64> {
        match self.raw(key, alias) {
            None => Some(0),
            Some(Value::Number(number)) => number.as_i64().or_else(|| {
                self.violation(key, format!("expected an integer, found {number}"));
                None
            }),
            Some(Value::String(raw)) => raw.trim().parse::<i64>().map_or_else(
                |_| {
                    self.violation(key, format!("expected an integer, found '{raw}'"));
                    None
                },
                Some,
            ),
            Some(other) => {
                self.violation(key, format!("expected an integer, found {other}"));
                None
            }
        }
    }

    pub(crate) fn optional_f64(&mut self, key: &str, alias: &str) -> Result<Option<f64>, ()> {
        match self.raw(key, alias) {
            None => Ok(None),
            Some(Value::Number(number)) => Ok(number.as_f64()),
            Some(other) => {
                self.violation(key, format!("expected a number, found {other}"));
                Err(())
            }
        }
    }

    pub(crate) fn array(&mut self, key: &str, alias: &str) -> &'a [Value] {
        match self.raw(key, alias) {
            None => &[],
            Some(Value::Array(items)) => items,
            Some(other) => {
                self.violation(key, format!("expected an array, found {other}"));
                &[]
            }
        }
    }

    pub(crate) fn object(&mut self, key: &str, alias: &str) -> Result<Option<&'a Map<String, Value>>, ()> {
        match self.raw(key, alias) {
            None => Ok(None),
            Some(Value::Object(object)) => Ok(Some(object)),
            Some(other) => {
                self.violation(key, format!("expected an object, found {other}"));
                Err(())
            }
        }
    }

    pub(crate) fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn into_error(self) -> ValidationError {
        self.errors
    }
}
