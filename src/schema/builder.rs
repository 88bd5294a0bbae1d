//! Schema construction
//!
//! Definitions are resolved once here: type names become `FieldType`,
//! patterns are compiled, computed functions are bound and conflicting
//! constraints are rejected with `SchemaError`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use super::errors::{SchemaError, SchemaResult};
use super::hooks::{Event, Hook, HookPayload, HookRegistry, Phase};
use super::types::{AdditionalProperties, ComputedFn, Field, FieldDef, FieldType, Schema};
use super::validator::check_value;
use crate::context::Context;
use crate::error::ResourceResult;
use crate::record::{is_reserved_key, Record};

use futures_util::future::BoxFuture;

/// Builder for `Schema`
#[derive(Default)]
pub struct SchemaBuilder {
    name: String,
    definition: Option<Value>,
    fields: Vec<(String, FieldDef)>,
    computed: HashMap<String, ComputedFn>,
    additional_properties: AdditionalProperties,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declarative field map, e.g.
    ///
    /// ```json
    /// {
    ///   "firstname": "string",
    ///   "username": { "type": "string", "index": { "unique": true } }
    /// }
    /// ```
    pub fn definition(mut self, definition: Value) -> Self {
        self.definition = Some(definition);
        self
    }

    /// Declares one field
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.push((name.into(), def));
        self
    }

    /// Binds the function of a computed field, declaring it if needed
    pub fn computed<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.computed.insert(name.into(), Arc::new(f));
        self
    }

    pub fn additional_properties(mut self, policy: AdditionalProperties) -> Self {
        self.additional_properties = policy;
        self
    }

    /// Resolves the definition into a `Schema`
    pub fn build(self) -> SchemaResult<Schema> {
        let mut defs: BTreeMap<String, FieldDef> = BTreeMap::new();

        if let Some(definition) = self.definition {
            let map = match definition {
                Value::Object(map) => map,
                _ => return Err(SchemaError::invalid("$root", "definition must be an object")),
            };
            for (name, spec) in map {
                let def = parse_field(&name, spec)?;
                defs.insert(name, def);
            }
        }
        for (name, def) in self.fields {
            defs.insert(name, def);
        }

        let mut computed = self.computed;
        for name in computed.keys() {
            defs.entry(name.clone())
                .or_insert_with(|| FieldDef::of(FieldType::Computed));
        }

        let mut fields = BTreeMap::new();
        for (name, def) in defs {
            let compute = computed.remove(&name);
            let field = resolve_field(name.clone(), def, compute)?;
            fields.insert(name, field);
        }

        Ok(Schema {
            name: self.name,
            fields,
            additional_properties: self.additional_properties,
            hooks: HookRegistry::new(),
        })
    }
}

/// Parses one entry of a declarative definition
fn parse_field(name: &str, spec: Value) -> SchemaResult<FieldDef> {
    match spec {
        Value::String(type_name) => FieldType::parse(&type_name)
            .map(FieldDef::of)
            .ok_or_else(|| SchemaError::UnknownType {
                field: name.to_string(),
                type_name,
            }),
        Value::Object(map) => {
            let type_name = map
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::invalid(name, "missing 'type'"))?;
            if FieldType::parse(type_name).is_none() {
                return Err(SchemaError::UnknownType {
                    field: name.to_string(),
                    type_name: type_name.to_string(),
                });
            }
            serde_json::from_value(Value::Object(map))
                .map_err(|e| SchemaError::invalid(name, e.to_string()))
        }
        _ => Err(SchemaError::invalid(
            name,
            "field spec must be a type name or an object",
        )),
    }
}

fn resolve_field(name: String, def: FieldDef, compute: Option<ComputedFn>) -> SchemaResult<Field> {
    if name.is_empty() {
        return Err(SchemaError::invalid("$root", "field names must not be empty"));
    }
    if is_reserved_key(&name) {
        return Err(SchemaError::ReservedField(name));
    }

    if def.field_type == FieldType::Computed {
        let conflicts = [
            (def.required, "required"),
            (def.is_unique(), "unique index"),
            (def.default.is_some(), "default"),
            (def.allowed.is_some(), "enum"),
            (def.min.is_some() || def.max.is_some(), "min/max"),
            (def.pattern.is_some(), "pattern"),
        ];
        if let Some((_, what)) = conflicts.iter().find(|(set, _)| *set) {
            return Err(SchemaError::conflict(
                &name,
                format!("computed fields cannot declare {}", what),
            ));
        }
        if compute.is_none() {
            return Err(SchemaError::computed(&name, "no function bound"));
        }
        return Ok(Field {
            name,
            def,
            pattern: None,
            compute,
        });
    }

    if compute.is_some() {
        return Err(SchemaError::computed(
            &name,
            format!("declared as {}, not computed", def.field_type.type_name()),
        ));
    }

    if (def.min.is_some() || def.max.is_some()) && !def.field_type.is_measurable() {
        return Err(SchemaError::conflict(
            &name,
            format!("min/max do not apply to {}", def.field_type.type_name()),
        ));
    }
    if let (Some(min), Some(max)) = (def.min, def.max) {
        if min > max {
            return Err(SchemaError::conflict(&name, format!("min {} > max {}", min, max)));
        }
    }

    let pattern = match &def.pattern {
        Some(_) if def.field_type != FieldType::String => {
            return Err(SchemaError::conflict(&name, "pattern applies to strings only"));
        }
        Some(p) => Some(
            Regex::new(p).map_err(|e| SchemaError::invalid(&name, format!("bad pattern: {}", e)))?,
        ),
        None => None,
    };

    let field = Field {
        name,
        def,
        pattern,
        compute: None,
    };

    if let Some(default) = &field.def.default {
        let mut errors = Vec::new();
        check_value(&field, default, &mut errors);
        if let Some(err) = errors.first() {
            return Err(SchemaError::conflict(
                &field.name,
                format!("default value is invalid: {}", err.message),
            ));
        }
    }

    Ok(field)
}

impl Schema {
    /// Start building a schema
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Builds a schema straight from a declarative definition
    pub fn from_definition(name: impl Into<String>, definition: Value) -> SchemaResult<Self> {
        SchemaBuilder::new(name).definition(definition).build()
    }

    /// Appends a `before` hook for `event`
    pub fn before<F>(&self, event: Event, f: F)
    where
        F: for<'a> Fn(&'a mut HookPayload, &'a Context) -> BoxFuture<'a, ResourceResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.register(event, Phase::Before, Arc::new(f));
    }

    /// Appends an `after` hook for `event`
    pub fn after<F>(&self, event: Event, f: F)
    where
        F: for<'a> Fn(&'a mut HookPayload, &'a Context) -> BoxFuture<'a, ResourceResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.register(event, Phase::After, Arc::new(f));
    }

    /// Appends a hook object
    pub fn register_hook(&self, event: Event, phase: Phase, hook: Arc<dyn Hook>) {
        self.hooks.register(event, phase, hook);
    }

    /// Drops every registered hook. Meant for test isolation.
    pub fn clear_hooks(&self) {
        self.hooks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_shorthand_and_object_forms() {
        let schema = Schema::from_definition(
            "users",
            json!({
                "firstname": "string",
                "username": { "type": "string", "index": { "unique": true } }
            }),
        )
        .unwrap();

        assert_eq!(schema.field("firstname").unwrap().field_type(), FieldType::String);
        assert!(schema.field("username").unwrap().is_unique());
        assert_eq!(schema.unique_fields(), vec!["username".to_string()]);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = Schema::from_definition("t", json!({ "a": "uuid" })).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { ref type_name, .. } if type_name == "uuid"));

        let err = Schema::from_definition("t", json!({ "a": { "type": "money" } })).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { .. }));
    }

    #[test]
    fn test_non_object_definition_rejected() {
        let err = Schema::from_definition("t", json!(["a"])).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_computed_required_conflict() {
        let err = Schema::builder("t")
            .definition(json!({ "full": { "type": "computed", "required": true } }))
            .computed("full", |_| json!(null))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingConstraints { .. }));
    }

    #[test]
    fn test_computed_without_function() {
        let err = Schema::from_definition("t", json!({ "full": "computed" })).unwrap_err();
        assert!(matches!(err, SchemaError::ComputedBinding { .. }));
    }

    #[test]
    fn test_function_bound_to_stored_field() {
        let err = Schema::builder("t")
            .definition(json!({ "full": "string" }))
            .computed("full", |_| json!(null))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ComputedBinding { .. }));
    }

    #[test]
    fn test_computed_declared_implicitly() {
        let schema = Schema::builder("t")
            .computed("upper", |r| json!(r.id.to_uppercase()))
            .build()
            .unwrap();
        assert!(schema.is_computed("upper"));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let err = Schema::from_definition("t", json!({ "_id": "string" })).unwrap_err();
        assert_eq!(err, SchemaError::ReservedField("_id".into()));
    }

    #[test]
    fn test_constraint_conflicts() {
        let err = Schema::builder("t")
            .field("flag", FieldDef::boolean().min(1.0))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingConstraints { .. }));

        let err = Schema::builder("t")
            .field("n", FieldDef::number().min(5.0).max(1.0))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingConstraints { .. }));

        let err = Schema::builder("t")
            .field("n", FieldDef::number().pattern("^1"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingConstraints { .. }));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let err = Schema::builder("t")
            .field("s", FieldDef::string().pattern("(unclosed"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_invalid_default_rejected() {
        let err = Schema::builder("t")
            .field("age", FieldDef::integer().default_value("ten"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingConstraints { .. }));
    }

    #[test]
    fn test_hook_registration_and_clear() {
        let schema = Schema::builder("t").build().unwrap();
        schema.before(Event::Find, |_p, _c| Box::pin(async { Ok(()) }));
        schema.after(Event::Find, |_p, _c| Box::pin(async { Ok(()) }));
        assert_eq!(schema.hooks().count(Event::Find, Phase::Before), 1);
        assert_eq!(schema.hooks().count(Event::Find, Phase::After), 1);

        schema.clear_hooks();
        assert_eq!(schema.hooks().count(Event::Find, Phase::Before), 0);
    }
}
