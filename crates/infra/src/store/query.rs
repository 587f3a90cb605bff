//! Ledger query interface for the history/audit view.
//!
//! All queries are tenant-scoped and paginated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::ProductId;
use stockroom_inventory::{ChangeType, LedgerEntry};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page request (1-based page number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    /// Normalise raw input: page 0 becomes 1, size is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page.max(1) as u64 - 1) * self.page_size as u64
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }
}

/// Filter criteria for ledger queries. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub product_id: Option<ProductId>,
    /// Case-insensitive substring of the product name.
    pub product_name: Option<String>,
    pub change_type: Option<ChangeType>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    /// In-process evaluation (used by the in-memory backend).
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if self.product_id.is_some_and(|p| p != entry.product_id) {
            return false;
        }
        if let Some(name) = self.product_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            if !entry
                .product_name
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        if self.change_type.is_some_and(|t| t != entry.change_type) {
            return false;
        }
        if self.from.is_some_and(|from| entry.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.created_at > to) {
            return false;
        }
        true
    }
}

/// One page of ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    /// Total number of entries matching the filter (across all pages).
    pub total: u64,
    pub page: Page,
    pub has_more: bool,
}

impl LedgerPage {
    pub fn new(entries: Vec<LedgerEntry>, total: u64, page: Page) -> Self {
        let has_more = total > page.offset() + entries.len() as u64;
        Self {
            entries,
            total,
            page,
            has_more,
        }
    }
}
