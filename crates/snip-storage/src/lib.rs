//! Entry store backends.
//!
//! Three interchangeable implementations of [`EntryStore`]: a process-local
//! [`MemoryStore`], a JSON-lines [`FileStore`] and a [`PostgresStore`].
//! A process runs exactly one, picked by [`open_store`].

pub mod config;
pub mod file;
pub mod memory;
mod placement;
pub mod postgres;

pub use config::{open_store, BackendKind, StorageConfig};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use placement::MAX_GENERATION_ATTEMPTS;
pub use postgres::PostgresStore;
pub use snip_core::{
    CompactionReport, DeleteTarget, Entry, EntryStore, NewEntry, PostOutcome, ShortCode, Stat,
    StoreError,
};
