//! Jittered ticker
//!
//! The ticker fires once per interval. Each interval is perturbed by a
//! uniformly drawn offset bounded by the configured [`Jitter`], deadlines are
//! absolute so that jitter does not accumulate into drift.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use tokio::time::Duration;

use super::{Clock, Error, Jitter, Pace, RealClock};

#[derive(Debug)]
/// A paced source of ticks.
pub struct Ticker<C = RealClock> {
    schedule: Schedule,
    clock: C,
    rng: SmallRng,
}

impl Ticker<RealClock> {
    /// Create a new [`Ticker`] running against the wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the pace cannot be converted into a non-zero
    /// interval.
    pub fn new(pace: Pace, jitter: Jitter) -> Result<Self, Error> {
        let rng = SmallRng::from_rng(&mut rand::rng());
        Self::with_clock(pace, jitter, RealClock::default(), rng)
    }
}

impl<C> Ticker<C>
where
    C: Clock + Send + Sync,
{
    /// Create a new [`Ticker`] with an explicit clock and random source.
    ///
    /// # Errors
    ///
    /// Returns an error if the pace cannot be converted into a non-zero
    /// interval.
    pub fn with_clock(pace: Pace, jitter: Jitter, clock: C, rng: SmallRng) -> Result<Self, Error> {
        let interval = pace.interval()?;
        Ok(Self {
            schedule: Schedule::new(interval, jitter),
            clock,
            rng,
        })
    }

    /// The nominal interval between ticks.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.schedule.interval)
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) {
        let span = self.schedule.span;
        let offset = if span == 0 {
            0
        } else {
            self.rng.random_range(-span..=span)
        };
        let wait = self.schedule.advance(self.clock.ticks_elapsed(), offset);
        if wait > 0 {
            self.clock.wait(wait).await;
        }
    }
}

/// The non-async interior of [`Ticker`]. Holds the absolute deadline of the
/// next tick in clock ticks.
#[derive(Debug)]
struct Schedule {
    /// Nominal interval, in ticks.
    interval: u64,
    /// Largest absolute offset a single tick may be moved by.
    span: i64,
    /// Absolute deadline of the most recently scheduled tick.
    deadline: u64,
}

impl Schedule {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn new(interval: Duration, jitter: Jitter) -> Self {
        let interval = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
        let span = (interval as f64 * jitter.fraction()) as i64;
        Self {
            interval,
            span,
            deadline: 0,
        }
    }

    /// Schedule the next tick relative to `ticks_elapsed`, moving it by
    /// `offset` ticks, and return how long the caller must wait for it.
    ///
    /// If the caller has fallen more than a full interval behind the missed
    /// ticks are dropped rather than fired in a burst.
    #[allow(clippy::cast_sign_loss)]
    fn advance(&mut self, ticks_elapsed: u64, offset: i64) -> u64 {
        if ticks_elapsed > self.deadline.saturating_add(self.interval) {
            self.deadline = ticks_elapsed;
        }
        let step = i128::from(self.interval) + i128::from(offset);
        let step = u64::try_from(step.max(1)).unwrap_or(u64::MAX);
        self.deadline = self.deadline.saturating_add(step);
        self.deadline.saturating_sub(ticks_elapsed)
    }
}

#[cfg(test)]
mod test {
    use std::{
        num::NonZeroU32,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
    };

    use async_trait::async_trait;
    use proptest::{collection, prelude::*};
    use rand::{SeedableRng, rngs::SmallRng};
    use tokio::time::Duration;

    use super::{Schedule, Ticker};
    use crate::{Clock, Jitter, Pace};

    /// A clock that only moves forward when waited on.
    #[derive(Debug, Clone, Default)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn ticks_elapsed(&self) -> u64 {
            self.now.load(Ordering::Relaxed)
        }

        async fn wait(&self, ticks: u64) {
            self.now.fetch_add(ticks, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn unjittered_ticks_are_evenly_spaced() {
        let clock = ManualClock::default();
        let pace = Pace::EventsPerSecond(NonZeroU32::new(4).unwrap());
        let mut ticker = Ticker::with_clock(
            pace,
            Jitter::NONE,
            clock.clone(),
            SmallRng::seed_from_u64(0),
        )
        .unwrap();

        assert_eq!(ticker.interval(), Duration::from_millis(250));
        for i in 1..=8 {
            ticker.tick().await;
            assert_eq!(clock.ticks_elapsed(), i * 250_000);
        }
    }

    #[tokio::test]
    async fn jitter_does_not_drift() {
        let clock = ManualClock::default();
        let pace = Pace::EventsPerSecond(NonZeroU32::new(10).unwrap());
        let jitter = Jitter::new(0.5).unwrap();
        let mut ticker =
            Ticker::with_clock(pace, jitter, clock.clone(), SmallRng::seed_from_u64(7)).unwrap();

        let mut previous = 0;
        for _ in 0..1_000 {
            ticker.tick().await;
            let now = clock.ticks_elapsed();
            let gap = now - previous;
            assert!((50_000..=150_000).contains(&gap), "gap {gap} out of bounds");
            previous = now;
        }
        // A thousand ticks at 100ms nominal land close to 100 seconds.
        let elapsed = clock.ticks_elapsed();
        assert!(
            (95_000_000..=105_000_000).contains(&elapsed),
            "elapsed {elapsed}"
        );
    }

    #[test]
    fn missed_ticks_are_dropped() {
        let mut schedule = Schedule::new(Duration::from_millis(100), Jitter::NONE);
        assert_eq!(schedule.advance(0, 0), 100_000);
        // The caller stalls for ten intervals. The next tick is one interval
        // from now, not immediate.
        assert_eq!(schedule.advance(1_000_000, 0), 100_000);
        assert_eq!(schedule.advance(1_100_000, 0), 100_000);
    }

    #[test]
    fn late_within_one_interval_catches_up() {
        let mut schedule = Schedule::new(Duration::from_millis(100), Jitter::NONE);
        assert_eq!(schedule.advance(0, 0), 100_000);
        // Woke 30ms late, the following tick is shortened to keep cadence.
        assert_eq!(schedule.advance(130_000, 0), 70_000);
    }

    proptest! {
        #[test]
        fn wait_never_exceeds_jittered_interval(
            interval_ms in 1u64..10_000,
            fraction in 0.0f64..0.99,
            offsets in collection::vec(-1.0f64..=1.0, 1..200),
            lateness in collection::vec(0u64..20_000, 1..200),
        ) {
            let jitter = Jitter::new(fraction).unwrap();
            let mut schedule = Schedule::new(Duration::from_millis(interval_ms), jitter);
            let span = schedule.span;
            let interval = schedule.interval;

            let mut now = 0u64;
            for (unit, late) in offsets.iter().zip(lateness.iter()) {
                #[allow(clippy::cast_possible_truncation)]
                let offset = (unit * span as f64) as i64;
                let previous_deadline = schedule.deadline;
                let wait = schedule.advance(now, offset);
                prop_assert!(schedule.deadline > previous_deadline);
                prop_assert!(wait <= interval + span.unsigned_abs());
                now = now + wait + late;
            }
        }
    }
}
