//! Weighted choice over a fixed set of values.

use rand::{
    Rng,
    distr::{Distribution, weighted::WeightedIndex},
};

use crate::Error;

#[derive(Debug, Clone)]
/// A set of values chosen in proportion to their weights.
///
/// Weights are relative: `{a: 7, b: 3}` picks `a` seventy percent of the
/// time. Values with weight zero are never picked.
pub struct Weighted<T> {
    values: Vec<T>,
    index: WeightedIndex<u32>,
}

impl<T> Weighted<T> {
    /// Build a choice from `(value, weight)` pairs.
    ///
    /// # Errors
    ///
    /// Fails if there are no pairs or every weight is zero.
    pub fn new<I>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (T, u32)>,
    {
        let (values, weights): (Vec<T>, Vec<u32>) = pairs.into_iter().unzip();
        let index = WeightedIndex::new(weights)?;
        Ok(Self { values, index })
    }

    /// Pick a value.
    pub fn choose<R>(&self, rng: &mut R) -> &T
    where
        R: Rng + ?Sized,
    {
        &self.values[self.index.sample(rng)]
    }
}
