//! Operation Context
//!
//! Request-scoped value threaded through every hook invocation of an
//! operation. The engine never interprets it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use uuid::Uuid;

/// Context carried through a resource operation
#[derive(Clone)]
pub struct Context {
    /// Request ID for log correlation
    pub request_id: Uuid,

    /// Caller defined value (session, user, ...)
    extension: Option<Arc<dyn Any + Send + Sync>>,

    /// Scratch space shared by the hooks of one operation
    metadata: Arc<RwLock<HashMap<String, Value>>>,
}

impl Context {
    /// Create an empty context with a fresh request id
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            extension: None,
            metadata: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach a caller defined value
    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extension = Some(Arc::new(value));
        self
    }

    /// Borrow the caller defined value if it has type `T`
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extension.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    /// Store a metadata value visible to later hooks
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.metadata
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    /// Read a metadata value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("has_extension", &self.extension.is_some())
            .finish()
    }
}
