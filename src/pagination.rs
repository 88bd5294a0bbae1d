//! Pagination
//!
//! Pages are 1-based. `page == 0` is read as the first page and a page
//! size of zero is rejected. `total_pages` is `ceil(total / page_size)`,
//! so an empty result has zero pages.

use serde::{Deserialize, Serialize};

use crate::adapter::QueryWindow;
use crate::error::{ResourceError, ResourceResult};

/// A validated page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    page_size: u64,
}

impl PageRequest {
    pub fn new(page: u64, page_size: u64) -> ResourceResult<Self> {
        if page_size == 0 {
            return Err(ResourceError::InvalidOptions(
                "page_size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            page: page.max(1),
            page_size,
        })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Slice of the result set this page covers
    pub fn window(&self) -> QueryWindow {
        QueryWindow::new((self.page - 1).saturating_mul(self.page_size), self.page_size)
    }

    /// Metadata for a result set of `total` matching records
    pub fn meta(&self, total: u64) -> PageMeta {
        PageMeta {
            page: self.page,
            page_size: self.page_size,
            total_pages: total.div_ceil(self.page_size),
        }
    }
}

/// Pagination metadata attached to a paginated result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}
