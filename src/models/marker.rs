//! Listing cursors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorCode, StorageError};

/// Opaque, monotonic listing cursor.
///
/// A marker names the last item of a page; the next page starts strictly after
/// it. Stores assign the underlying sequence themselves, so the token does not
/// depend on how records are physically kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Marker(u64);

impl Marker {
    pub(crate) fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub(crate) fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{:016x}", self.0)
    }
}

impl FromStr for Marker {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('m')
            .filter(|hex| hex.len() == 16)
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .map(Marker)
            .ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::InvalidInput,
                    format!("Invalid listing marker: {}", s),
                )
            })
    }
}

/// Cuts one page out of `items`.
///
/// `items` must already be restricted to entries after the caller's marker.
/// A full page always yields a marker, even when nothing follows it; callers
/// re-query to find out.
pub(crate) fn paginate<T>(
    mut items: Vec<T>,
    max_results: usize,
    seq_of: impl Fn(&T) -> u64,
) -> (Vec<T>, Option<Marker>) {
    items.sort_by_key(|item| seq_of(item));
    items.truncate(max_results);

    let next_marker = if max_results > 0 && items.len() == max_results {
        items.last().map(|item| Marker(seq_of(item)))
    } else {
        None
    };
    (items, next_marker)
}
