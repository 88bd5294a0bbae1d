//! Resource options and result types

use serde::{Deserialize, Serialize};

use crate::error::ResourceResult;
use crate::pagination::{PageMeta, PageRequest};
use crate::record::Record;

/// Page size used when a page is requested without a size
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Per-resource settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Options of `find` and `find_one`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FindOptions {
    /// 1-based page number
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    /// Return records as stored, without computed fields
    pub skip_computation: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn skip_computation(mut self) -> Self {
        self.skip_computation = true;
        self
    }

    /// Pagination requested by these options, if any
    pub fn page_request(&self, default_page_size: u64) -> ResourceResult<Option<PageRequest>> {
        match (self.page, self.page_size) {
            (None, None) => Ok(None),
            (page, size) => PageRequest::new(
                page.unwrap_or(1),
                size.unwrap_or(default_page_size),
            )
            .map(Some),
        }
    }
}

/// Result of `find`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordSet {
    pub records: Vec<Record>,
    /// Present when pagination was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<PageMeta>,
}

impl RecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
