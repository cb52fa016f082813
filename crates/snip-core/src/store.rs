use crate::entry::{DeleteTarget, Entry, NewEntry, PostOutcome, Stat};
use crate::error::Result;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::Serialize;

/// Outcome of [`EntryStore::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CompactionReport {
    /// Entries kept (every entry is kept, soft-deleted ones included).
    pub entries: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// The storage contract shared by every backend.
///
/// All methods take `&self` and must be safe to call concurrently from
/// request handlers and deletion workers on the same instance. Once
/// [`close`](EntryStore::close) returns, every further call fails with
/// [`StoreError::Closed`](crate::StoreError::Closed).
#[async_trait]
pub trait EntryStore: Send + Sync + 'static {
    /// Looks up an entry by short code.
    ///
    /// Returns `Ok(None)` when the code is unknown. Soft-deleted entries are
    /// returned with `deleted` set so callers can tell them apart.
    async fn get(&self, code: &ShortCode) -> Result<Option<Entry>>;

    /// Finds the entry `user_id` created for `original_url`, deleted or not.
    async fn find_by_original_url(&self, original_url: &str, user_id: &str)
        -> Result<Option<Entry>>;

    /// Stores a mapping, generating a short code when none is given.
    ///
    /// If the user already shortened `original_url` nothing is inserted and
    /// the existing entry comes back with `duplicate = true`.
    async fn post(&self, entry: NewEntry) -> Result<PostOutcome>;

    /// Stores every entry in input order, returning one outcome per entry.
    ///
    /// Duplicates never abort the batch. Any other failure is reported as
    /// [`StoreError::Batch`](crate::StoreError::Batch); whether earlier
    /// entries survive it depends on the backend.
    async fn post_batch(&self, entries: Vec<NewEntry>) -> Result<Vec<PostOutcome>>;

    /// Lists the non-deleted entries owned by `user_id`, in no particular order.
    async fn get_user_urls(&self, user_id: &str) -> Result<Vec<Entry>>;

    /// Soft-deletes every entry matching one of `targets`. Unknown pairs are ignored.
    async fn delete_user_urls(&self, targets: &[DeleteTarget]) -> Result<()>;

    /// Full-scan aggregate over all entries.
    async fn get_stat(&self) -> Result<Stat>;

    /// Liveness check.
    async fn ping(&self) -> Result<()>;

    /// Releases the backend's resources.
    async fn close(&self) -> Result<()>;

    /// Maintenance pass over the storage medium. Backends that never need one
    /// report nothing.
    async fn compact(&self) -> Result<CompactionReport> {
        Ok(CompactionReport::default())
    }
}
