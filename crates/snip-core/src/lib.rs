//! Core types and traits for the snip URL shortener.
//!
//! This crate provides the entry model, the validated [`ShortCode`] and the
//! [`EntryStore`] contract shared by every storage backend, the deletion
//! pipeline and the shortener service.

pub mod entry;
pub mod error;
pub mod shortcode;
pub mod store;

pub use entry::{DeleteTarget, Entry, NewEntry, PostOutcome, Stat};
pub use error::{CoreError, StoreError};
pub use shortcode::ShortCode;
pub use store::{CompactionReport, EntryStore};
