//! Hook registry
//!
//! Each schema owns an ordered list of callbacks per (event, phase).
//! Callbacks of one phase run strictly in registration order; each one is
//! awaited to completion before the next starts. Callbacks receive the
//! operation payload by mutable reference, so rewrites are visible to the
//! rest of the operation. The first failing callback aborts the operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;

use super::errors::FieldError;
use super::types::Schema;
use crate::context::Context;
use crate::error::{ResourceError, ResourceResult};
use crate::filter::Filter;
use crate::record::{Document, Record};

/// Lifecycle events hooks attach to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Validate,
    Create,
    Save,
    Update,
    Remove,
    Find,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Create => "create",
            Self::Save => "save",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Find => "find",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a hook runs before or after the operation body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

/// Payload handed to hooks; the variant is fixed per event and phase
///
/// | event           | before                         | after                                   |
/// |-----------------|--------------------------------|-----------------------------------------|
/// | validate        | `Validate` (errors empty)      | `Validate`                              |
/// | create, save    | `Record`                       | `Record` (persisted form, with `_id`)   |
/// | update          | `Update`                       | `Update`                                |
/// | remove          | `Remove` (`removed_count` None)| `Remove`                                |
/// | find            | `Query`                        | `Records`                               |
#[derive(Debug, Clone)]
pub enum HookPayload {
    Validate {
        record: Document,
        schema: Arc<Schema>,
        errors: Vec<FieldError>,
    },
    Record {
        record: Document,
    },
    Update {
        query: Filter,
        operations: Document,
    },
    Remove {
        query: Filter,
        options: Document,
        removed_count: Option<u64>,
    },
    Query {
        query: Filter,
    },
    Records {
        records: Vec<Record>,
    },
}

impl HookPayload {
    pub fn record(&self) -> Option<&Document> {
        match self {
            Self::Validate { record, .. } | Self::Record { record } => Some(record),
            _ => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut Document> {
        match self {
            Self::Validate { record, .. } | Self::Record { record } => Some(record),
            _ => None,
        }
    }

    pub fn query(&self) -> Option<&Filter> {
        match self {
            Self::Update { query, .. } | Self::Remove { query, .. } | Self::Query { query } => {
                Some(query)
            }
            _ => None,
        }
    }

    pub fn query_mut(&mut self) -> Option<&mut Filter> {
        match self {
            Self::Update { query, .. } | Self::Remove { query, .. } | Self::Query { query } => {
                Some(query)
            }
            _ => None,
        }
    }

    pub fn records_mut(&mut self) -> Option<&mut Vec<Record>> {
        match self {
            Self::Records { records } => Some(records),
            _ => None,
        }
    }

    pub fn errors_mut(&mut self) -> Option<&mut Vec<FieldError>> {
        match self {
            Self::Validate { errors, .. } => Some(errors),
            _ => None,
        }
    }

    pub fn operations_mut(&mut self) -> Option<&mut Document> {
        match self {
            Self::Update { operations, .. } => Some(operations),
            _ => None,
        }
    }

    /// Variant name, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validate { .. } => "validate",
            Self::Record { .. } => "record",
            Self::Update { .. } => "update",
            Self::Remove { .. } => "remove",
            Self::Query { .. } => "query",
            Self::Records { .. } => "records",
        }
    }

    pub fn removed_count(&self) -> Option<u64> {
        match self {
            Self::Remove { removed_count, .. } => *removed_count,
            _ => None,
        }
    }
}

/// Error for a hook that swapped the payload for another variant
pub(crate) fn unexpected_payload(event: Event, payload: &HookPayload) -> ResourceError {
    ResourceError::hook(format!(
        "{} hook replaced the payload with a '{}' payload",
        event,
        payload.kind()
    ))
}

/// A lifecycle callback
pub trait Hook: Send + Sync {
    fn call<'a>(
        &'a self,
        payload: &'a mut HookPayload,
        ctx: &'a Context,
    ) -> BoxFuture<'a, ResourceResult<()>>;
}

impl<F> Hook for F
where
    F: for<'a> Fn(&'a mut HookPayload, &'a Context) -> BoxFuture<'a, ResourceResult<()>>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        payload: &'a mut HookPayload,
        ctx: &'a Context,
    ) -> BoxFuture<'a, ResourceResult<()>> {
        self(payload, ctx)
    }
}

/// Wraps a closure as a shareable hook
///
/// ```ignore
/// let h = hook(|payload, _ctx| Box::pin(async move {
///     if let Some(query) = payload.query_mut() {
///         query.insert("archived", false);
///     }
///     Ok(())
/// }));
/// ```
pub fn hook<F>(f: F) -> Arc<dyn Hook>
where
    F: for<'a> Fn(&'a mut HookPayload, &'a Context) -> BoxFuture<'a, ResourceResult<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

type HookList = Vec<Arc<dyn Hook>>;

/// Ordered callbacks per (event, phase)
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<(Event, Phase), HookList>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook to the list for `event`/`phase`
    pub fn register(&self, event: Event, phase: Phase, hook: Arc<dyn Hook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((event, phase))
            .or_default()
            .push(hook);
    }

    /// Empties every list
    pub fn clear(&self) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of hooks registered for `event`/`phase`
    pub fn count(&self, event: Event, phase: Phase) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(event, phase))
            .map_or(0, Vec::len)
    }

    /// Runs the hooks for `event`/`phase` in registration order
    ///
    /// The list is snapshotted first: hooks registered while a phase is
    /// running take effect from the next operation on.
    pub async fn run(
        &self,
        event: Event,
        phase: Phase,
        payload: &mut HookPayload,
        ctx: &Context,
    ) -> ResourceResult<()> {
        let hooks: HookList = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(event, phase))
            .cloned()
            .unwrap_or_default();

        for hook in hooks {
            if let Err(e) = hook.call(payload, ctx).await {
                tracing::debug!(
                    event = %event,
                    phase = ?phase,
                    request_id = %ctx.request_id,
                    error = %e,
                    "hook aborted operation"
                );
                return Err(e);
            }
        }

        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: Vec<_> = hooks
            .iter()
            .map(|((event, phase), list)| (event.as_str(), *phase, list.len()))
            .collect();
        counts.sort_by_key(|(event, phase, _)| (*event, *phase == Phase::After));
        f.debug_struct("HookRegistry").field("hooks", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording_hook(log: Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Arc<dyn Hook> {
        hook(move |_payload, _ctx| {
            let log = log.clone();
            Box::pin(async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push(label);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Event::Find, Phase::Before, recording_hook(log.clone(), "first"));
        registry.register(Event::Find, Phase::Before, recording_hook(log.clone(), "second"));
        registry.register(Event::Find, Phase::After, recording_hook(log.clone(), "after"));

        let mut payload = HookPayload::Query { query: Filter::new() };
        registry
            .run(Event::Find, Phase::Before, &mut payload, &Context::new())
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_mutation_visible_to_later_hooks() {
        let registry = HookRegistry::new();
        registry.register(
            Event::Find,
            Phase::Before,
            hook(|payload, _ctx| {
                Box::pin(async move {
                    if let Some(q) = payload.query_mut() {
                        q.insert("_id", "rewritten");
                    }
                    Ok(())
                })
            }),
        );

        let mut payload = HookPayload::Query { query: Filter::by_id("original") };
        registry
            .run(Event::Find, Phase::Before, &mut payload, &Context::new())
            .await
            .unwrap();

        assert_eq!(payload.query().unwrap().id(), Some("rewritten"));
    }

    #[tokio::test]
    async fn test_failing_hook_stops_the_chain() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(
            Event::Create,
            Phase::Before,
            hook(|_payload, _ctx| {
                Box::pin(async move { Err(ResourceError::hook("denied")) })
            }),
        );
        registry.register(Event::Create, Phase::Before, recording_hook(log.clone(), "never"));

        let mut payload = HookPayload::Record {
            record: json!({"a": 1}).as_object().cloned().unwrap(),
        };
        let err = registry
            .run(Event::Create, Phase::Before, &mut payload, &Context::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "denied");
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Event::Save, Phase::After, recording_hook(log, "x"));
        assert_eq!(registry.count(Event::Save, Phase::After), 1);

        registry.clear();
        assert_eq!(registry.count(Event::Save, Phase::After), 0);
    }
}
