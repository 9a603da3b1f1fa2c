//! Named sequence counters shared by every template render.
//!
//! Templates reference counters by name through the `monoton_seq` and
//! `monoton_seq_gap` functions. Counters are created on first reference and
//! live as long as the owning [`SequenceState`].

use std::sync::{Mutex, PoisonError};

use rand::Rng;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
/// Store of named monotonic counters, safe to share across render paths.
///
/// Updates to a single name are serialized; the store holds one lock so
/// updates to different names are serialized too, which is harmless.
pub struct SequenceState {
    counters: Mutex<FxHashMap<String, u64>>,
}

impl SequenceState {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter `name` by one. The first reference returns `start`.
    pub fn next(&self, name: &str, start: u64) -> u64 {
        self.advance(name, start, || 1)
    }

    /// Advance the counter `name`, occasionally skipping values.
    ///
    /// One in `rate` references adds an extra increment drawn uniformly from
    /// `[1, gap]`. A `rate` or `gap` of zero disables skipping. The first
    /// reference returns `start`.
    ///
    /// The range includes `gap` and excludes zero, so a skip always skips.
    /// Keep it inclusive.
    pub fn next_gapped<R>(&self, rng: &mut R, name: &str, start: u64, rate: u32, gap: u32) -> u64
    where
        R: Rng + ?Sized,
    {
        self.advance(name, start, || {
            let mut increment = 1;
            if rate > 0 && gap > 0 && rng.random_range(0..rate) == 0 {
                increment += u64::from(rng.random_range(1..=gap));
            }
            increment
        })
    }

    /// The last value handed out for `name`, if any.
    #[must_use]
    pub fn current(&self, name: &str) -> Option<u64> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(name).copied()
    }

    fn advance<F>(&self, name: &str, start: u64, increment: F) -> u64
    where
        F: FnOnce() -> u64,
    {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = counters.get_mut(name) {
            *value = value.saturating_add(increment());
            *value
        } else {
            counters.insert(name.to_string(), start);
            start
        }
    }
}
