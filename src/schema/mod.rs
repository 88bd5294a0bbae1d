//! Schema subsystem
//!
//! A schema declares the fields of a collection, the constraints each
//! field carries and the hooks bound to lifecycle events.
//!
//! - Definitions are resolved once, at construction; a bad definition is a
//!   `SchemaError` and no resource gets built on it
//! - Validation collects every violated rule into `FieldError`s
//! - Values are never coerced: `"40"` is not an integer
//! - Computed fields are derived at read time and never stored

mod builder;
mod errors;
mod hooks;
mod loader;
mod types;
mod validator;

pub use builder::SchemaBuilder;
pub use errors::{FieldError, FieldErrorKind, SchemaError, SchemaResult};
pub use hooks::{hook, Event, Hook, HookPayload, HookRegistry, Phase};
pub(crate) use hooks::unexpected_payload;
pub use loader::SchemaFile;
pub use types::{AdditionalProperties, ComputedFn, Field, FieldDef, FieldType, IndexDef, Schema};
pub use validator::ValidationReport;
