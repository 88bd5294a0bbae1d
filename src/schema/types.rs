//! Schema type definitions
//!
//! Supported field types:
//! - string: UTF-8 string
//! - number: any JSON number
//! - integer: JSON number without fractional part
//! - boolean
//! - date: RFC 3339 timestamp or `YYYY-MM-DD` string
//! - object, array: JSON containers, contents unchecked
//! - any: no type check
//! - computed: derived at read time, never stored

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::hooks::HookRegistry;
use crate::record::Record;

/// Function deriving a computed field from a record
pub type ComputedFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Declared field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    Object,
    Array,
    Any,
    Computed,
}

impl FieldType {
    /// Resolves a declared type name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "any" => Some(Self::Any),
            "computed" => Some(Self::Computed),
            _ => None,
        }
    }

    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
            Self::Computed => "computed",
        }
    }

    /// Whether `min`/`max` make sense for this type
    pub fn is_measurable(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Number | Self::Integer | Self::Array
        )
    }
}

/// Index options of a field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDef {
    #[serde(default)]
    pub unique: bool,
}

/// Declarative field definition
///
/// In a JSON definition a field is either a bare type name (`"string"`)
/// or an object:
///
/// ```json
/// { "type": "string", "required": true, "index": { "unique": true } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexDef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,

    /// Lower bound: value for numbers, length for strings and arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Upper bound: value for numbers, length for strings and arrays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Regular expression strings must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldDef {
    /// Optional field of the given type with no constraints
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            index: None,
            default: None,
            allowed: None,
            min: None,
            max: None,
            pattern: None,
        }
    }

    pub fn string() -> Self {
        Self::of(FieldType::String)
    }

    pub fn number() -> Self {
        Self::of(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::of(FieldType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(FieldType::Boolean)
    }

    pub fn date() -> Self {
        Self::of(FieldType::Date)
    }

    pub fn object() -> Self {
        Self::of(FieldType::Object)
    }

    pub fn array() -> Self {
        Self::of(FieldType::Array)
    }

    pub fn any() -> Self {
        Self::of(FieldType::Any)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.index = Some(IndexDef { unique: true });
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn is_unique(&self) -> bool {
        self.index.is_some_and(|i| i.unique)
    }
}

/// A field resolved at schema construction
#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub def: FieldDef,
    pub(crate) pattern: Option<Regex>,
    pub(crate) compute: Option<ComputedFn>,
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        self.def.field_type
    }

    pub fn is_computed(&self) -> bool {
        self.def.field_type == FieldType::Computed
    }

    pub fn is_required(&self) -> bool {
        self.def.required
    }

    pub fn is_unique(&self) -> bool {
        self.def.is_unique()
    }

    /// Evaluates a computed field; `None` for stored fields
    pub fn compute(&self, record: &Record) -> Option<Value> {
        self.compute.as_ref().map(|f| f(record))
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("def", &self.def)
            .finish()
    }
}

/// Policy for fields a record carries but the schema does not declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdditionalProperties {
    #[default]
    Reject,
    Allow,
}

/// A constructed schema
///
/// Fields are fixed after construction; only the hook registry changes.
pub struct Schema {
    pub(crate) name: String,
    pub(crate) fields: BTreeMap<String, Field>,
    pub(crate) additional_properties: AdditionalProperties,
    pub(crate) hooks: HookRegistry,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Fields in name order
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn additional_properties(&self) -> AdditionalProperties {
        self.additional_properties
    }

    /// Names of fields carrying a unique index
    pub fn unique_fields(&self) -> Vec<String> {
        self.fields
            .values()
            .filter(|f| f.is_unique())
            .map(|f| f.name.clone())
            .collect()
    }

    /// Computed fields in name order
    pub fn computed_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| f.is_computed())
    }

    pub fn is_computed(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(Field::is_computed)
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("additional_properties", &self.additional_properties)
            .finish()
    }
}
