use crate::placement::{place, Placement};
use async_trait::async_trait;
use parking_lot::RwLock;
use snip_core::error::Result;
use snip_core::{
    DeleteTarget, Entry, EntryStore, NewEntry, PostOutcome, ShortCode, Stat, StoreError,
};
use snip_generator::{AlphaGenerator, Generator};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-local store keeping entries in insertion order.
///
/// Reads share the lock; `post` holds the write lock across the dedup scan
/// and the append, so two concurrent posts of the same `(url, user)` can
/// never both insert.
#[derive(Debug)]
pub struct MemoryStore<G = AlphaGenerator> {
    entries: RwLock<Vec<Entry>>,
    closed: AtomicBool,
    generator: G,
}

impl MemoryStore<AlphaGenerator> {
    /// Creates an empty store generating 7-letter codes.
    pub fn new() -> Self {
        Self::with_generator(AlphaGenerator::new())
    }
}

impl Default for MemoryStore<AlphaGenerator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Generator> MemoryStore<G> {
    /// Creates an empty store drawing short codes from `generator`.
    pub fn with_generator(generator: G) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            generator,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn post_locked(&self, entries: &mut Vec<Entry>, new: NewEntry) -> Result<PostOutcome> {
        match place(entries, new, &self.generator)? {
            Placement::Existing(entry) => Ok(PostOutcome::duplicate(entry)),
            Placement::Fresh(entry) => {
                entries.push(entry.clone());
                Ok(PostOutcome::created(entry))
            }
        }
    }
}

#[async_trait]
impl<G: Generator> EntryStore for MemoryStore<G> {
    async fn get(&self, code: &ShortCode) -> Result<Option<Entry>> {
        self.ensure_open()?;
        let entries = self.entries.read();
        Ok(entries.iter().find(|e| &e.short_code == code).cloned())
    }

    async fn find_by_original_url(
        &self,
        original_url: &str,
        user_id: &str,
    ) -> Result<Option<Entry>> {
        self.ensure_open()?;
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .find(|e| e.is_mapping_of(original_url, user_id))
            .cloned())
    }

    async fn post(&self, entry: NewEntry) -> Result<PostOutcome> {
        self.ensure_open()?;
        let mut entries = self.entries.write();
        self.post_locked(&mut entries, entry)
    }

    async fn post_batch(&self, batch: Vec<NewEntry>) -> Result<Vec<PostOutcome>> {
        self.ensure_open()?;
        let mut entries = self.entries.write();
        let mut outcomes = Vec::with_capacity(batch.len());
        for (index, new) in batch.into_iter().enumerate() {
            let outcome = self
                .post_locked(&mut entries, new)
                .map_err(|err| StoreError::batch(index, err))?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn get_user_urls(&self, user_id: &str) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|e| e.user_id == user_id && !e.deleted)
            .cloned()
            .collect())
    }

    async fn delete_user_urls(&self, targets: &[DeleteTarget]) -> Result<()> {
        self.ensure_open()?;
        if targets.is_empty() {
            return Ok(());
        }
        let wanted: HashSet<(&str, &str)> = targets
            .iter()
            .map(|t| (t.user_id.as_str(), t.short_code.as_str()))
            .collect();

        let mut entries = self.entries.write();
        for entry in entries.iter_mut().filter(|e| !e.deleted) {
            if wanted.contains(&(entry.user_id.as_str(), entry.short_code.as_str())) {
                entry.deleted = true;
            }
        }
        Ok(())
    }

    async fn get_stat(&self) -> Result<Stat> {
        self.ensure_open()?;
        let entries = self.entries.read();
        let users: HashSet<&str> = entries.iter().map(|e| e.user_id.as_str()).collect();
        Ok(Stat {
            urls: entries.len() as u64,
            users: users.len() as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.entries.write().clear();
        Ok(())
    }
}
