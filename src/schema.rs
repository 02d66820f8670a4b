//! Record schema descriptors.
//!
//! Schemas validate two things: documents a parsing step defers for
//! validation, and entry parameters supplied through typed invocations.
//! Primitive values are coerced where a lossless conversion exists; dates
//! accept ISO-8601 strings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{DataFormatFailure, FieldError};

/// Field and parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Object,
    Array,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Type keyword used in the JSON-schema rendering.
    fn json_schema_type(&self) -> &'static str {
        match self {
            Self::Date => "string",
            other => other.as_str(),
        }
    }

    /// Coerce a value into this kind. Returns `None` when no lossless
    /// conversion exists.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match self {
            Self::String => match value {
                Value::String(_) => Some(value.clone()),
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
            Self::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
                Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
                _ => None,
            },
            Self::Number => match value {
                Value::Number(_) => Some(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number)),
                _ => None,
            },
            Self::Boolean => match value {
                Value::Bool(_) => Some(value.clone()),
                Value::String(s) => match s.as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            Self::Date => match value {
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .ok()
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
                _ => None,
            },
            Self::Object => matches!(value, Value::Object(_)).then(|| value.clone()),
            Self::Array => matches!(value, Value::Array(_)).then(|| value.clone()),
        }
    }
}

/// One field of a record schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Declarative schema for a record produced by a scraper.
///
/// Fields not declared in the schema pass through validation untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a required field.
    pub fn require(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec::required(name, kind));
        self
    }

    /// Add an optional field.
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec::optional(name, kind));
        self
    }

    /// Validate and coerce a document against this schema.
    ///
    /// Returns the coerced document, or every per-field error at once.
    pub fn validate(
        &self,
        document: &Map<String, Value>,
        url: Option<&str>,
    ) -> Result<Value, DataFormatFailure> {
        let mut errors = Vec::new();
        let mut coerced = document.clone();

        for field in &self.fields {
            match document.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(FieldError::new(&field.name, "required field is missing"));
                    }
                }
                Some(value) => match field.kind.coerce(value) {
                    Some(value) => {
                        coerced.insert(field.name.clone(), value);
                    }
                    None => errors.push(FieldError::new(
                        &field.name,
                        format!("expected {}, got {value}", field.kind.as_str()),
                    )),
                },
            }
        }

        if errors.is_empty() {
            Ok(Value::Object(coerced))
        } else {
            Err(DataFormatFailure {
                errors,
                document: Value::Object(document.clone()),
                schema: self.name.clone(),
                url: url.map(|s| s.to_string()),
            })
        }
    }

    /// Render this schema as a JSON-schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("type".to_string(), json!(field.kind.json_schema_type()));
            if field.kind == FieldKind::Date {
                prop.insert("format".to_string(), json!("date"));
            }
            properties.insert(field.name.clone(), Value::Object(prop));
            if field.required {
                required.push(json!(field.name));
            }
        }
        json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
