//! Record and attachment types
//!
//! A record is a JSON object plus two engine-managed keys:
//!
//! ```text
//! {
//!   "_id": "<uuid>",            assigned on insert, never reassigned
//!   "_attachments": [ {id, name, file}, ... ],
//!   ...declared fields
//! }
//! ```
//!
//! Computed fields are never part of the persisted form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object keyed by field name
pub type Document = Map<String, Value>;

/// Key holding the record identifier
pub const ID_KEY: &str = "_id";

/// Key holding the attachment descriptors
pub const ATTACHMENTS_KEY: &str = "_attachments";

/// Returns true for keys the engine manages itself
pub fn is_reserved_key(key: &str) -> bool {
    key == ID_KEY || key == ATTACHMENTS_KEY
}

/// Descriptor linking a record to blob content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Blob identifier, unique within the owning record
    pub id: String,
    /// Caller supplied label, not unique
    pub name: String,
    /// Backend specific locator of the blob content
    pub file: String,
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_attachments", default)]
    pub attachments: Vec<Attachment>,

    #[serde(flatten)]
    pub fields: Document,
}

impl Record {
    /// Create a record with no attachments
    pub fn new(id: impl Into<String>, fields: Document) -> Self {
        Self {
            id: id.into(),
            attachments: Vec::new(),
            fields,
        }
    }

    /// Returns a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Finds an attachment descriptor by blob id
    pub fn attachment(&self, attachment_id: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.id == attachment_id)
    }

    /// Serializes to the flat persisted form
    pub fn to_document(&self) -> Document {
        let mut doc = self.fields.clone();
        doc.insert(ID_KEY.to_string(), Value::String(self.id.clone()));
        doc.insert(
            ATTACHMENTS_KEY.to_string(),
            Value::Array(
                self.attachments
                    .iter()
                    .map(|a| {
                        serde_json::json!({ "id": a.id, "name": a.name, "file": a.file })
                    })
                    .collect(),
            ),
        );
        doc
    }

    /// Parses the flat persisted form
    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(doc))
    }
}
