//! Dedup and short-code assignment for the scan-based backends.
//!
//! The memory and file stores hold their entire dataset behind one lock, so
//! they decide where a new entry goes by scanning a snapshot of every entry.
//! The relational store reaches the same decisions through its constraints.

use snip_core::error::Result;
use snip_core::{Entry, NewEntry, ShortCode, StoreError};
use snip_generator::Generator;
use tracing::debug;

/// How many fresh codes a store draws before giving up on a collision streak.
pub const MAX_GENERATION_ATTEMPTS: usize = 8;

/// Where a [`NewEntry`] lands relative to the existing data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Placement {
    /// The user already shortened this URL.
    Existing(Entry),
    /// A new entry to append, with its id and short code assigned.
    Fresh(Entry),
}

/// Decides whether `new` is a duplicate or a fresh entry.
///
/// Deleted entries still count, both for dedup and for short-code uniqueness.
pub(crate) fn place<G: Generator>(
    entries: &[Entry],
    new: NewEntry,
    generator: &G,
) -> Result<Placement> {
    if let Some(existing) = entries
        .iter()
        .find(|e| e.is_mapping_of(&new.original_url, &new.user_id))
    {
        return Ok(Placement::Existing(existing.clone()));
    }

    let taken = |code: &ShortCode| entries.iter().any(|e| &e.short_code == code);
    let short_code = assign_code(new.short_code, taken, generator)?;

    Ok(Placement::Fresh(Entry {
        id: (entries.len() + 1).to_string(),
        correlation_id: new.correlation_id,
        short_code,
        original_url: new.original_url,
        user_id: new.user_id,
        deleted: false,
    }))
}

/// Picks the short code for a new entry.
///
/// A caller-supplied code must be free. A generated one is redrawn up to
/// [`MAX_GENERATION_ATTEMPTS`] times.
pub(crate) fn assign_code<G, F>(
    requested: Option<ShortCode>,
    taken: F,
    generator: &G,
) -> Result<ShortCode>
where
    G: Generator,
    F: Fn(&ShortCode) -> bool,
{
    if let Some(code) = requested {
        if taken(&code) {
            return Err(StoreError::ShortCodeTaken(code.into_inner()));
        }
        return Ok(code);
    }

    let mut last = None;
    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        let code = generator.generate();
        if !taken(&code) {
            return Ok(code);
        }
        debug!(code = %code, attempt, "generated short code collides, retrying");
        last = Some(code);
    }

    Err(StoreError::ShortCodeTaken(
        last.map(ShortCode::into_inner).unwrap_or_default(),
    ))
}
