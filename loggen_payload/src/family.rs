//! Data synthesizers for the built-in log families.
//!
//! A synthesizer produces the values a family's templates are rendered
//! against, either a fixed sample or freshly drawn random data.

use rand::Rng;
use serde::Serialize;

use crate::{Error, Options};

pub mod golang;
pub mod syslog;
pub mod web;

/// Data bound into a template.
pub trait EventData: Serialize {
    /// Classifier used to label emission metrics.
    fn severity(&self) -> String;
}

/// Produces [`EventData`] for one family.
pub trait Synthesizer: std::fmt::Debug + Send + Sync {
    /// The data this family's templates expect.
    type Data: EventData;

    /// The family name, used as the event type.
    fn kind(&self) -> &'static str;

    /// Fixed, deterministic data.
    ///
    /// # Errors
    ///
    /// Fails if a configured time format cannot render the sample instant.
    fn sample(&self) -> Result<Self::Data, Error>;

    /// Freshly drawn random data.
    ///
    /// # Errors
    ///
    /// Fails if a weighted choice is misconfigured or a time format cannot
    /// render the current instant.
    fn random<R>(&self, rng: &mut R, options: &Options) -> Result<Self::Data, Error>
    where
        R: Rng + ?Sized;
}

/// Draw uniformly from `[low, high)`, further capped to `max` when set.
pub(crate) fn bounded<R>(rng: &mut R, low: u32, high: u32, max: Option<u32>) -> u32
where
    R: Rng + ?Sized,
{
    let high = max.map_or(high, |max| high.min(max.saturating_add(1)));
    if high <= low {
        return low;
    }
    rng.random_range(low..high)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    use super::bounded;

    proptest! {
        #[test]
        fn bounded_respects_cap(seed: u64, low in 0u32..100, span in 1u32..1_000, max in proptest::option::of(0u32..2_000)) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let high = low + span;
            let value = bounded(&mut rng, low, high, max);
            prop_assert!(value >= low);
            prop_assert!(value < high || value == low);
            if let Some(max) = max {
                prop_assert!(value <= max.max(low));
            }
        }
    }
}
