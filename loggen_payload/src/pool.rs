//! Pools of pre-generated identifiers.
//!
//! Host and application names are drawn from a fixed-size pool built once at
//! startup. Sampling is with replacement. An empty pool always yields its
//! fallback name.

use rand::{Rng, seq::IndexedRandom};

const ADJECTIVES: [&str; 32] = [
    "amber", "brave", "calm", "dusty", "eager", "fancy", "gentle", "hollow", "icy", "jolly",
    "keen", "lucky", "misty", "noble", "odd", "proud", "quiet", "rapid", "shy", "tidy", "upbeat",
    "vivid", "wild", "young", "zesty", "bold", "crisp", "dapper", "fuzzy", "grumpy", "humble",
    "nimble",
];

const NOUNS: [&str; 32] = [
    "badger", "comet", "dingo", "falcon", "gecko", "heron", "ibex", "jackal", "koala", "lemur",
    "marmot", "newt", "otter", "panda", "quokka", "raven", "salmon", "tapir", "urchin", "vole",
    "walrus", "yak", "zebra", "beetle", "cobra", "donkey", "ferret", "gopher", "hornet", "iguana",
    "mantis", "pelican",
];

/// Fallback name for an empty host pool.
pub const DEFAULT_HOST: &str = "host";
/// Fallback name for an empty application pool.
pub const DEFAULT_APP: &str = "app";

#[derive(Debug, Clone)]
/// A fixed pool of lowercase names.
pub struct NamePool {
    names: Vec<String>,
    fallback: &'static str,
}

impl NamePool {
    /// Generate `size` names. Names may repeat.
    pub fn new<R>(rng: &mut R, size: usize, fallback: &'static str) -> Self
    where
        R: Rng + ?Sized,
    {
        let names = (0..size).map(|_| silly_name(rng)).collect();
        Self { names, fallback }
    }

    /// Pick a name uniformly.
    pub fn choose<R>(&self, rng: &mut R) -> &str
    where
        R: Rng + ?Sized,
    {
        self.names.choose(rng).map_or(self.fallback, String::as_str)
    }

    /// Number of names in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A random "adjective-noun" pair.
pub fn silly_name<R>(rng: &mut R) -> String
where
    R: Rng + ?Sized,
{
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    format!("{adjective}{noun}")
}

/// A random noun, used to vary generated messages.
pub fn noun<R>(rng: &mut R) -> &'static str
where
    R: Rng + ?Sized,
{
    NOUNS[rng.random_range(0..NOUNS.len())]
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::SmallRng};

    use super::{DEFAULT_HOST, NamePool};

    #[test]
    fn seeded_pools_are_reproducible() {
        let a = NamePool::new(&mut SmallRng::seed_from_u64(9), 16, DEFAULT_HOST);
        let b = NamePool::new(&mut SmallRng::seed_from_u64(9), 16, DEFAULT_HOST);
        assert_eq!(a.names, b.names);
        assert_eq!(a.len(), 16);
        assert!(a.names.iter().all(|n| n.chars().all(|c| c.is_ascii_lowercase())));
    }

    #[test]
    fn empty_pool_falls_back() {
        let mut rng = SmallRng::seed_from_u64(0);
        let pool = NamePool::new(&mut rng, 0, DEFAULT_HOST);
        assert!(pool.is_empty());
        assert_eq!(pool.choose(&mut rng), "host");
    }

    #[test]
    fn choices_come_from_the_pool() {
        let mut rng = SmallRng::seed_from_u64(3);
        let pool = NamePool::new(&mut rng, 4, DEFAULT_HOST);
        for _ in 0..100 {
            let name = pool.choose(&mut rng);
            assert!(pool.names.iter().any(|n| n == name));
        }
    }
}
