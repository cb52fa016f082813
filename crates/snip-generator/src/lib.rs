//! Short code generators.
//!
//! Generators are pure: they never consult storage. Uniqueness is enforced
//! afterwards by the [`EntryStore`](snip_core::EntryStore) at insert time,
//! which regenerates on collision.

pub mod alpha;
pub mod seq;

pub use alpha::AlphaGenerator;
pub use seq::SeqGenerator;

use snip_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations can vary from random generators to deterministic
/// counters used in tests.
pub trait Generator: Send + Sync + 'static {
    /// Generates a candidate short code. The code is not guaranteed to be unique.
    fn generate(&self) -> ShortCode;
}

impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    fn generate(&self) -> ShortCode {
        (**self).generate()
    }
}
