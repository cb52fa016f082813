use crate::shortcode::ShortCode;
use serde::{Deserialize, Serialize};

/// One short-to-long URL mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Backend-local sequence identifier, assigned at creation and never reused.
    pub id: String,
    /// Caller-supplied token echoed back in batch responses. Not unique.
    pub correlation_id: String,
    pub short_code: ShortCode,
    pub original_url: String,
    /// Opaque owner identifier.
    pub user_id: String,
    /// Soft-delete flag. Once set it is never cleared.
    pub deleted: bool,
}

impl Entry {
    /// Returns `true` if this entry is owned by `user_id` and maps `original_url`.
    pub fn is_mapping_of(&self, original_url: &str, user_id: &str) -> bool {
        self.original_url == original_url && self.user_id == user_id
    }

    /// Returns `true` if `target` names this entry.
    pub fn matches(&self, target: &DeleteTarget) -> bool {
        self.short_code == target.short_code && self.user_id == target.user_id
    }
}

/// Input to [`EntryStore::post`](crate::EntryStore::post).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewEntry {
    pub correlation_id: String,
    pub original_url: String,
    pub user_id: String,
    /// A caller-chosen code. `None` lets the store generate one.
    pub short_code: Option<ShortCode>,
}

impl NewEntry {
    pub fn new(original_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            original_url: original_url.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_short_code(mut self, code: ShortCode) -> Self {
        self.short_code = Some(code);
        self
    }
}

/// Result of storing a [`NewEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOutcome {
    /// The stored entry, or the pre-existing one when `duplicate` is set.
    pub entry: Entry,
    /// The user had already shortened this URL; nothing was inserted.
    pub duplicate: bool,
}

impl PostOutcome {
    pub fn created(entry: Entry) -> Self {
        Self {
            entry,
            duplicate: false,
        }
    }

    pub fn duplicate(entry: Entry) -> Self {
        Self {
            entry,
            duplicate: true,
        }
    }

    pub fn short_code(&self) -> &ShortCode {
        &self.entry.short_code
    }
}

/// A `(user, short code)` pair to soft-delete.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteTarget {
    pub user_id: String,
    pub short_code: ShortCode,
}

impl DeleteTarget {
    pub fn new(user_id: impl Into<String>, short_code: ShortCode) -> Self {
        Self {
            user_id: user_id.into(),
            short_code,
        }
    }
}

/// Aggregate counters over the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stat {
    /// Number of stored entries, soft-deleted ones included.
    pub urls: u64,
    /// Number of distinct owners.
    pub users: u64,
}
