//! URL shortener service.
//!
//! [`ShortenerService`] ties one [`EntryStore`](snip_core::EntryStore)
//! backend to a [`DeletionPipeline`](snip_deletion::DeletionPipeline) and
//! turns stored short codes into full short URLs.

pub mod error;
pub mod service;

pub use error::{Result, ServiceError};
pub use service::{BatchItem, BatchShortened, Shortened, ShortenerService, UserUrl};
