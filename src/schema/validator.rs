//! Record validation
//!
//! Validation semantics:
//! - Required fields are present and non-null
//! - Present values match the declared type exactly (no coercion)
//! - `enum`, `min`, `max` and `pattern` constraints hold
//! - Undeclared fields are rejected unless the schema allows them
//! - Computed fields are ignored; they are never stored
//!
//! Every violation is collected; validation never stops at the first one.
//! Uniqueness is not checked here: it needs a store lookup and is enforced
//! by the adapter at write time.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use super::errors::{FieldError, FieldErrorKind};
use super::hooks::{unexpected_payload, Event, HookPayload, Phase};
use super::types::{AdditionalProperties, Field, FieldType, Schema};
use crate::context::Context;
use crate::error::{ResourceError, ResourceResult};
use crate::record::{is_reserved_key, Document, Record};

/// Outcome of validating one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts a failed report into `ResourceError::Validation`
    pub fn into_result(self) -> ResourceResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ResourceError::validation(self.errors))
        }
    }
}

impl Schema {
    /// Validates a record's fields against the schema
    ///
    /// `_id` and `_attachments` are engine managed and skipped.
    pub fn validate(&self, record: &Document) -> ValidationReport {
        let mut errors = Vec::new();

        if self.additional_properties == AdditionalProperties::Reject {
            for key in record.keys() {
                if !is_reserved_key(key) && !self.fields.contains_key(key) {
                    errors.push(FieldError::unknown_field(key));
                }
            }
        }

        for field in self.fields.values().filter(|f| !f.is_computed()) {
            match record.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.is_required() {
                        errors.push(FieldError::required(&field.name));
                    }
                }
                Some(value) => check_value(field, value, &mut errors),
            }
        }

        ValidationReport { errors }
    }

    /// Runs validate hooks around `validate`
    ///
    /// Before hooks may rewrite the record, after hooks may add or drop
    /// errors. Returns the (possibly rewritten) record when valid.
    pub async fn validate_with_hooks(
        self: &Arc<Self>,
        record: Document,
        ctx: &Context,
    ) -> ResourceResult<Document> {
        let mut payload = HookPayload::Validate {
            record,
            schema: Arc::clone(self),
            errors: Vec::new(),
        };
        self.hooks
            .run(Event::Validate, Phase::Before, &mut payload, ctx)
            .await?;

        match &mut payload {
            HookPayload::Validate { record, errors, .. } => *errors = self.validate(record).errors,
            other => return Err(unexpected_payload(Event::Validate, other)),
        }

        self.hooks
            .run(Event::Validate, Phase::After, &mut payload, ctx)
            .await?;

        match payload {
            HookPayload::Validate { record, errors, .. } => {
                ValidationReport { errors }.into_result()?;
                Ok(record)
            }
            other => Err(unexpected_payload(Event::Validate, &other)),
        }
    }

    /// Fills absent or null fields that declare a default
    pub fn apply_defaults(&self, record: &mut Document) {
        for field in self.fields.values() {
            if let Some(default) = &field.def.default {
                let missing = matches!(record.get(&field.name), None | Some(Value::Null));
                if missing {
                    record.insert(field.name.clone(), default.clone());
                }
            }
        }
    }

    /// Removes engine managed keys and computed field values
    pub fn strip_unstored(&self, record: &mut Document) {
        record.retain(|key, _| !is_reserved_key(key) && !self.is_computed(key));
    }

    /// Attaches computed field values to a record
    pub fn resolve_computed(&self, record: &mut Record) {
        let computed: Vec<(String, Value)> = self
            .computed_fields()
            .filter_map(|field| field.compute(record).map(|v| (field.name.clone(), v)))
            .collect();
        record.fields.extend(computed);
    }
}

/// Validates a single present, non-null value
pub(crate) fn check_value(field: &Field, value: &Value, errors: &mut Vec<FieldError>) {
    let field_type = field.field_type();
    if !type_matches(field_type, value) {
        errors.push(FieldError::type_mismatch(
            &field.name,
            field_type.type_name(),
            json_type_name(value),
        ));
        return;
    }

    if let Some(allowed) = &field.def.allowed {
        if !allowed.contains(value) {
            errors.push(FieldError::new(
                &field.name,
                FieldErrorKind::Enum,
                format!("value {} is not one of the allowed values", value),
            ));
        }
    }

    if let Some(measure) = measure(value) {
        if let Some(min) = field.def.min {
            if measure < min {
                errors.push(FieldError::new(
                    &field.name,
                    FieldErrorKind::Min,
                    format!("{} is below minimum {}", measure, min),
                ));
            }
        }
        if let Some(max) = field.def.max {
            if measure > max {
                errors.push(FieldError::new(
                    &field.name,
                    FieldErrorKind::Max,
                    format!("{} is above maximum {}", measure, max),
                ));
            }
        }
    }

    if let (Some(pattern), Some(s)) = (&field.pattern, value.as_str()) {
        if !pattern.is_match(s) {
            errors.push(FieldError::new(
                &field.name,
                FieldErrorKind::Pattern,
                format!("value does not match pattern '{}'", pattern.as_str()),
            ));
        }
    }
}

fn type_matches(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Integer => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
        }
        FieldType::Boolean => value.is_boolean(),
        FieldType::Date => value.as_str().is_some_and(is_date),
        FieldType::Object => value.is_object(),
        FieldType::Array => value.is_array(),
        FieldType::Any | FieldType::Computed => true,
    }
}

fn is_date(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Value for numbers, character count for strings, length for arrays
fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(a) => Some(a.len() as f64),
        _ => None,
    }
}

/// Get JSON type name for error messages
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{hook, FieldDef};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn users() -> Schema {
        Schema::builder("users")
            .field("firstname", FieldDef::string().required())
            .field("age", FieldDef::integer().min(0.0).max(150.0))
            .field("role", FieldDef::string().one_of(vec![json!("admin"), json!("user")]))
            .field("code", FieldDef::string().pattern("^[A-Z]{3}$"))
            .field("birthday", FieldDef::date())
            .field("active", FieldDef::boolean().default_value(true))
            .computed("label", |r| json!(format!("#{}", r.id)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_valid_record() {
        let report = users().validate(&doc(json!({
            "firstname": "Cedric",
            "age": 40,
            "role": "admin",
            "code": "ABC",
            "birthday": "1984-02-01"
        })));
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_missing_required_field() {
        let report = users().validate(&doc(json!({ "age": 3 })));
        assert_eq!(report.errors, vec![FieldError::required("firstname")]);
    }

    #[test]
    fn test_null_counts_as_missing() {
        let report = users().validate(&doc(json!({ "firstname": null })));
        assert_eq!(report.errors[0].kind, FieldErrorKind::Required);
    }

    #[test]
    fn test_type_mismatch_no_coercion() {
        let report = users().validate(&doc(json!({ "firstname": "A", "age": "40" })));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].field, "age");
        assert_eq!(report.errors[0].kind, FieldErrorKind::Type);
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let schema = users();
        assert!(!schema.validate(&doc(json!({ "firstname": "A", "age": 4.5 }))).is_valid());
        assert!(schema.validate(&doc(json!({ "firstname": "A", "age": 4.0 }))).is_valid());
    }

    #[test]
    fn test_collects_every_error() {
        let report = users().validate(&doc(json!({
            "age": 200,
            "role": "root",
            "code": "abc",
            "birthday": "yesterday",
            "nickname": "x"
        })));
        let kinds: Vec<_> = report.errors.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&FieldErrorKind::UnknownField));
        assert!(kinds.contains(&FieldErrorKind::Required));
        assert!(kinds.contains(&FieldErrorKind::Max));
        assert!(kinds.contains(&FieldErrorKind::Enum));
        assert!(kinds.contains(&FieldErrorKind::Pattern));
        assert!(kinds.contains(&FieldErrorKind::Type));
    }

    #[test]
    fn test_string_length_bounds() {
        let schema = Schema::builder("t")
            .field("name", FieldDef::string().min(2.0).max(4.0))
            .build()
            .unwrap();
        assert!(!schema.validate(&doc(json!({ "name": "a" }))).is_valid());
        assert!(schema.validate(&doc(json!({ "name": "abcd" }))).is_valid());
        assert!(!schema.validate(&doc(json!({ "name": "abcde" }))).is_valid());
    }

    #[test]
    fn test_additional_properties_allowed() {
        let schema = Schema::builder("t")
            .field("name", FieldDef::string())
            .additional_properties(AdditionalProperties::Allow)
            .build()
            .unwrap();
        assert!(schema.validate(&doc(json!({ "anything": [1, 2] }))).is_valid());
    }

    #[test]
    fn test_reserved_and_computed_keys_are_not_unknown() {
        let report = users().validate(&doc(json!({
            "_id": "x",
            "_attachments": [],
            "firstname": "A",
            "label": "whatever"
        })));
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_apply_defaults_fills_missing_only() {
        let schema = users();
        let mut record = doc(json!({ "firstname": "A" }));
        schema.apply_defaults(&mut record);
        assert_eq!(record["active"], json!(true));

        let mut record = doc(json!({ "firstname": "A", "active": false }));
        schema.apply_defaults(&mut record);
        assert_eq!(record["active"], json!(false));
    }

    #[test]
    fn test_strip_unstored() {
        let mut record = doc(json!({ "_id": "x", "label": "y", "firstname": "A" }));
        users().strip_unstored(&mut record);
        assert_eq!(record, doc(json!({ "firstname": "A" })));
    }

    #[test]
    fn test_resolve_computed() {
        let mut record = Record::new("42", doc(json!({ "firstname": "A" })));
        users().resolve_computed(&mut record);
        assert_eq!(record.get("label"), Some(&json!("#42")));
    }

    #[tokio::test]
    async fn test_validate_hooks_can_rewrite_and_reject() {
        let schema = Arc::new(users());
        schema.before(Event::Validate, |payload, _ctx| {
            Box::pin(async move {
                if let Some(record) = payload.record_mut() {
                    record.insert("firstname".into(), json!("Filled"));
                }
                Ok(())
            })
        });

        let record = schema
            .validate_with_hooks(doc(json!({})), &Context::new())
            .await
            .unwrap();
        assert_eq!(record["firstname"], json!("Filled"));

        schema.hooks().register(
            Event::Validate,
            Phase::After,
            hook(|payload, _ctx| {
                Box::pin(async move {
                    if let Some(errors) = payload.errors_mut() {
                        errors.push(FieldError::custom("firstname", "taken"));
                    }
                    Ok(())
                })
            }),
        );

        let err = schema
            .validate_with_hooks(doc(json!({})), &Context::new())
            .await
            .unwrap_err();
        assert_eq!(err.field_errors()[0].kind, FieldErrorKind::Custom);
    }
}
