//! Resources
//!
//! The data access layer built on a schema, a storage adapter and a blob
//! store.

mod locks;
mod options;
#[allow(clippy::module_inception)]
mod resource;

pub use crate::context::Context;
pub use options::{FindOptions, RecordSet, ResourceConfig, DEFAULT_PAGE_SIZE};
pub use resource::Resource;
