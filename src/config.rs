//! Runtime configuration for a [`Table`](crate::table::Table).
//!
//! The on-disk layout is fixed by the constants in [`crate::format`]; the
//! settings here only bound what the engine does with that layout.

use crate::error::{DbError, Result};
use crate::format::{DEFAULT_MAX_PAGES, INTERNAL_NODE_MAX_KEYS};

/// What the insertion engine does with a full leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitPolicy {
    /// Split the leaf and propagate a separator upward.
    #[default]
    Split,
    /// Refuse the insert with `ExecuteResult::TableFull`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Ceiling on addressable pages. Requests at or past it are errors.
    pub max_pages: u32,
    /// Keys an internal node may hold before it splits.
    pub internal_max_keys: u32,
    pub split_policy: SplitPolicy,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            internal_max_keys: INTERNAL_NODE_MAX_KEYS as u32,
            split_policy: SplitPolicy::Split,
        }
    }
}

impl TableConfig {
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_internal_max_keys(mut self, keys: u32) -> Self {
        self.internal_max_keys = keys;
        self
    }

    pub fn with_split_policy(mut self, policy: SplitPolicy) -> Self {
        self.split_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(DbError::InvalidConfig("max_pages must be at least 1".into()));
        }
        // Child and parent fields are u32 page numbers.
        if self.max_pages == u32::MAX {
            return Err(DbError::InvalidConfig(format!(
                "max_pages must be below {}",
                u32::MAX
            )));
        }
        let max_keys = INTERNAL_NODE_MAX_KEYS as u32;
        if !(2..=max_keys).contains(&self.internal_max_keys) {
            return Err(DbError::InvalidConfig(format!(
                "internal_max_keys must be within 2..={max_keys}, got {}",
                self.internal_max_keys
            )));
        }
        Ok(())
    }
}
