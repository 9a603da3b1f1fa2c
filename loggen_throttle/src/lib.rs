//! The loggen throttle mechanism
//!
//! This library paces the loggen scheduler. A [`Pace`] is converted into a
//! nominal tick interval and a [`Ticker`] fires on that interval, perturbing
//! every tick by a bounded random [`Jitter`] so that output is not perfectly
//! periodic.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use std::num::{NonZeroU32, NonZeroU64};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Duration, Instant};

pub mod ticker;

pub use ticker::Ticker;

/// Clock ticks per second. Every tick is one microsecond.
pub const TICKS_PER_SECOND: u64 = 1_000_000;

/// Errors produced by this crate.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// The derived tick interval rounds down to zero ticks.
    #[error("Pace is too fast, the tick interval rounds to zero")]
    ZeroInterval,
    /// Jitter must be a finite fraction in `[0, 1)`.
    #[error("Jitter must be a fraction in [0, 1), got {0}")]
    InvalidJitter(f64),
}

#[async_trait]
/// The `Clock` used for every throttle
pub trait Clock {
    /// The number of ticks elapsed since the clock was created
    fn ticks_elapsed(&self) -> u64;
    /// Wait for `ticks` amount of time
    async fn wait(&self, ticks: u64);
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for RealClock {
    /// Return the number of ticks since `Clock` was created.
    ///
    /// # Panics
    ///
    /// Function will panic if the number of ticks elapsed is greater than u64::MAX.
    #[allow(clippy::cast_possible_truncation)]
    fn ticks_elapsed(&self) -> u64 {
        let now = Instant::now();
        let ticks_since: u128 = now.duration_since(self.start).as_micros();
        assert!(
            ticks_since <= u128::from(u64::MAX),
            "584,554 years elapsed since last call!"
        );
        ticks_since as u64
    }

    async fn wait(&self, ticks: u64) {
        time::sleep(Duration::from_micros(ticks)).await;
    }
}

/// The rate at which the scheduler should tick.
///
/// Each tick emits one event per enabled stream, so a bytes-per-second pace
/// has to know how many bytes a single tick is expected to produce.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Pace {
    /// Tick a fixed number of times per second.
    EventsPerSecond(NonZeroU32),
    /// Tick often enough that `bytes_per_tick` sized ticks add up to
    /// `bytes_per_second`.
    BytesPerSecond {
        /// Target throughput.
        bytes_per_second: NonZeroU64,
        /// Bytes produced by one tick, measured from sample output.
        bytes_per_tick: NonZeroU64,
    },
}

impl Pace {
    /// The nominal, un-jittered interval between ticks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroInterval`] if the interval is below one tick.
    #[allow(clippy::cast_possible_truncation)]
    pub fn interval(&self) -> Result<Duration, Error> {
        let ticks: u128 = match *self {
            Pace::EventsPerSecond(events) => {
                u128::from(TICKS_PER_SECOND) / u128::from(events.get())
            }
            // bytes/sec / bytes/tick = ticks/sec, inverted.
            Pace::BytesPerSecond {
                bytes_per_second,
                bytes_per_tick,
            } => {
                u128::from(bytes_per_tick.get()) * u128::from(TICKS_PER_SECOND)
                    / u128::from(bytes_per_second.get())
            }
        };
        if ticks == 0 {
            return Err(Error::ZeroInterval);
        }
        Ok(Duration::from_micros(ticks.min(u128::from(u64::MAX)) as u64))
    }
}

/// Random perturbation applied to each tick, as a fraction of the interval.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(try_from = "f64", into = "f64")]
pub struct Jitter(f64);

impl Jitter {
    /// No perturbation at all.
    pub const NONE: Jitter = Jitter(0.0);

    /// Create a new [`Jitter`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJitter`] unless `fraction` is finite and in
    /// `[0, 1)`.
    pub fn new(fraction: f64) -> Result<Self, Error> {
        if fraction.is_finite() && (0.0..1.0).contains(&fraction) {
            Ok(Self(fraction))
        } else {
            Err(Error::InvalidJitter(fraction))
        }
    }

    /// The fraction of the interval a tick may move by, either direction.
    #[must_use]
    pub fn fraction(self) -> f64 {
        self.0
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self(0.05)
    }
}

impl TryFrom<f64> for Jitter {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Jitter> for f64 {
    fn from(jitter: Jitter) -> Self {
        jitter.0
    }
}

#[cfg(test)]
mod tests {
    use std::num::{NonZeroU32, NonZeroU64};

    use tokio::time::Duration;

    use super::{Error, Jitter, Pace};

    #[test]
    fn events_per_second_interval() {
        let pace = Pace::EventsPerSecond(NonZeroU32::new(2).unwrap());
        assert_eq!(pace.interval().unwrap(), Duration::from_millis(500));

        let pace = Pace::EventsPerSecond(NonZeroU32::new(3).unwrap());
        assert_eq!(pace.interval().unwrap(), Duration::from_micros(333_333));
    }

    #[test]
    fn bytes_per_second_interval() {
        // 200 bytes/sec with 100 byte ticks is two ticks a second.
        let pace = Pace::BytesPerSecond {
            bytes_per_second: NonZeroU64::new(200).unwrap(),
            bytes_per_tick: NonZeroU64::new(100).unwrap(),
        };
        assert_eq!(pace.interval().unwrap(), Duration::from_millis(500));

        // Ticks larger than the budget slow the scheduler below one tick a
        // second.
        let pace = Pace::BytesPerSecond {
            bytes_per_second: NonZeroU64::new(100).unwrap(),
            bytes_per_tick: NonZeroU64::new(250).unwrap(),
        };
        assert_eq!(pace.interval().unwrap(), Duration::from_millis(2_500));
    }

    #[test]
    fn too_fast_is_an_error() {
        let pace = Pace::BytesPerSecond {
            bytes_per_second: NonZeroU64::new(u64::MAX).unwrap(),
            bytes_per_tick: NonZeroU64::new(1).unwrap(),
        };
        assert_eq!(pace.interval(), Err(Error::ZeroInterval));
    }

    #[test]
    fn jitter_bounds() {
        assert!(Jitter::new(0.0).is_ok());
        assert!(Jitter::new(0.5).is_ok());
        assert!(Jitter::new(1.0).is_err());
        assert!(Jitter::new(-0.1).is_err());
        assert!(Jitter::new(f64::NAN).is_err());
    }
}
