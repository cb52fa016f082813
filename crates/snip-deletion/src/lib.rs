//! Asynchronous bulk deletion.
//!
//! A [`DeletionPipeline`] accepts a batch of short codes for one user,
//! returns immediately, and soft-deletes the matching entries in the
//! background with a bounded set of workers.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::DeletionConfig;
pub use error::{DeletionError, Result};
pub use pipeline::{DeletionPipeline, DeletionRequest};
