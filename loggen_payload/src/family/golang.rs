//! Structured application logs, modelled on a Go service's logger.
//!
//! The level of each random event is drawn from [`LevelWeights`], which are
//! adjustable at runtime, and the message is drawn from a per-level pool.

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, macros::format_description};

use super::{EventData, Synthesizer};
use crate::{
    Error, Options,
    timestamp::{SAMPLE_TIME, TimeFormat, unix_nanos},
    weighted::Weighted,
};

const APPLICATIONS: [&str; 2] = ["webshop", "blog"];
const ENVIRONMENTS: [&str; 3] = ["production", "sandbox", "demo"];
const COMPONENTS: [&str; 3] = ["frontend", "backend", "worker"];

const INFO: [&str; 3] = [
    "constructing many client instances from the same exec auth config can cause performance problems during cert rotation and can exhaust available network connections; 1083 clients constructed calling",
    "starting posthook function",
    "rbac.authorization.k8s.io/v1beta1 ClusterRole is deprecated in v1.17+, unavailable in v1.22+; use rbac.authorization.k8s.io/v1 ClusterRole",
];
const WARNING: [&str; 3] = [
    "no security scan whitelist information available...",
    "firewall is still alive",
    "apiextensions.k8s.io/v1beta1 CustomResourceDefinition is deprecated in v1.16+, unavailable in v1.22+; use apiextensions.k8s.io/v1 CustomResourceDefinition",
];
const ERROR: [&str; 3] = [
    "could not get cluster from database: could not find cluster by ID: cluster not found",
    "Activity error.",
    "converting cluster model to common cluster failed: record not found",
];
const DEBUG: [&str; 3] = [
    "cache refreshed",
    "retrying request after transient failure",
    "loaded configuration from environment",
];

fn default_time_format() -> TimeFormat {
    TimeFormat::compiled(
        "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]",
        format_description!(
            "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
        ),
    )
}

/// Relative weights of the four log levels.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LevelWeights {
    /// Weight of `error`
    #[serde(default)]
    pub error: u32,
    /// Weight of `warning`
    #[serde(default)]
    pub warning: u32,
    /// Weight of `info`
    #[serde(default)]
    pub info: u32,
    /// Weight of `debug`
    #[serde(default)]
    pub debug: u32,
}

impl Default for LevelWeights {
    fn default() -> Self {
        Self {
            error: 0,
            warning: 0,
            info: 1,
            debug: 0,
        }
    }
}

/// A partial update to [`LevelWeights`]. Absent fields keep their value.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct LevelWeightsPatch {
    /// New weight of `error`
    pub error: Option<u32>,
    /// New weight of `warning`
    pub warning: Option<u32>,
    /// New weight of `info`
    pub info: Option<u32>,
    /// New weight of `debug`
    pub debug: Option<u32>,
}

impl LevelWeights {
    /// Merge `patch` into these weights.
    pub fn apply(&mut self, patch: LevelWeightsPatch) {
        if let Some(w) = patch.error {
            self.error = w;
        }
        if let Some(w) = patch.warning {
            self.warning = w;
        }
        if let Some(w) = patch.info {
            self.info = w;
        }
        if let Some(w) = patch.debug {
            self.debug = w;
        }
    }

    fn choice(self) -> Result<Weighted<&'static str>, Error> {
        Weighted::new([
            ("error", self.error),
            ("warning", self.warning),
            ("info", self.info),
            ("debug", self.debug),
        ])
    }
}

/// Configuration for [`Golang`]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Format of the `time` field
    #[serde(default = "default_time_format")]
    pub time_format: TimeFormat,
    /// Initial level weights
    #[serde(default)]
    pub weights: LevelWeights,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
            weights: LevelWeights::default(),
        }
    }
}

/// Fields of one structured log record.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Data {
    /// Emitting application
    pub application: String,
    /// Deployment environment
    pub environment: String,
    /// Application component
    pub component: String,
    /// Log level
    pub level: String,
    /// Message
    pub msg: String,
    /// Record time, in the configured format
    pub time: String,
    /// Record time as unix nanoseconds
    pub timestamp: i64,
}

impl EventData for Data {
    fn severity(&self) -> String {
        self.level.clone()
    }
}

fn message<R>(rng: &mut R, level: &str) -> &'static str
where
    R: Rng + ?Sized,
{
    let pool: &[&'static str] = match level {
        "error" => &ERROR,
        "warning" => &WARNING,
        "info" => &INFO,
        _ => &DEBUG,
    };
    pool.choose(rng).copied().unwrap_or_default()
}

fn pick<R>(rng: &mut R, values: &[&'static str]) -> String
where
    R: Rng + ?Sized,
{
    values.choose(rng).copied().unwrap_or_default().to_string()
}

/// Synthesizer for structured application logs.
#[derive(Debug)]
pub struct Golang {
    time_format: TimeFormat,
}

impl Golang {
    /// Create a new [`Golang`].
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            time_format: config.time_format.clone(),
        }
    }
}

impl Synthesizer for Golang {
    type Data = Data;

    fn kind(&self) -> &'static str {
        "golang"
    }

    fn sample(&self) -> Result<Data, Error> {
        Ok(Data {
            application: "webshop".to_string(),
            environment: "production".to_string(),
            component: "frontend".to_string(),
            level: "info".to_string(),
            msg: "starting posthook function".to_string(),
            time: self.time_format.format(SAMPLE_TIME)?,
            timestamp: unix_nanos(SAMPLE_TIME),
        })
    }

    fn random<R>(&self, rng: &mut R, options: &Options) -> Result<Data, Error>
    where
        R: Rng + ?Sized,
    {
        let level = *options.levels.choice()?.choose(rng);
        let now = OffsetDateTime::now_utc();
        Ok(Data {
            application: pick(rng, &APPLICATIONS),
            environment: pick(rng, &ENVIRONMENTS),
            component: pick(rng, &COMPONENTS),
            level: level.to_string(),
            msg: message(rng, level).to_string(),
            time: self.time_format.format(now)?,
            timestamp: unix_nanos(now),
        })
    }
}
