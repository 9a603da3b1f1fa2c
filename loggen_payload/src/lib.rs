//! The loggen payloads
//!
//! This library synthesizes fake log events for the loggen project. Each log
//! family pairs a data synthesizer with a set of named templates; the
//! [`Registry`] maps a `(type, format)` pair onto a renderable [`Event`].

#![deny(clippy::cargo)]
#![deny(missing_docs)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod family;
pub mod pool;
pub mod registry;
pub mod sequence;
pub mod template;
pub mod timestamp;
pub mod weighted;

pub use family::golang::{LevelWeights, LevelWeightsPatch};
pub use registry::{Event, Family, Record, Registry};
pub use sequence::SequenceState;
pub use template::TemplateStore;

/// Errors related to event synthesis
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// See [`template::Error`]
    #[error(transparent)]
    Template(#[from] template::Error),
    /// See [`registry::Error`]
    #[error(transparent)]
    Registry(#[from] registry::Error),
    /// See [`timestamp::Error`]
    #[error(transparent)]
    Timestamp(#[from] timestamp::Error),
    /// Weighted choice could not be built, usually every weight is zero
    #[error("Invalid weights: {0}")]
    Weights(#[from] rand::distr::weighted::Error),
}

impl Error {
    /// Whether the error names a type or format the registry does not know.
    ///
    /// These are caller mistakes; every other error is a failure to produce a
    /// single event.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::Registry(
                registry::Error::UnsupportedType(_) | registry::Error::UnsupportedFormat { .. }
            )
        )
    }
}

/// Per-event creation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options {
    /// Draw random data instead of the fixed sample.
    pub randomise: bool,
    /// Prefix the rendered payload with its byte length.
    pub framed: bool,
    /// Level distribution for structured application logs.
    pub levels: LevelWeights,
}

/// Configuration for event synthesis
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seed for the host and application name pools. Unseeded pools differ
    /// on every run.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Size of the random host name pool
    #[serde(default = "default_pool_size")]
    pub max_random_hosts: usize,
    /// Size of the random application name pool
    #[serde(default = "default_pool_size")]
    pub max_random_apps: usize,
    /// Upper bound applied to random numeric fields
    #[serde(default)]
    pub max_number: Option<u32>,
    /// Directory holding operator supplied templates, laid out as
    /// `<dir>/<type>/<group>.yaml`. Takes priority over the built-in set.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
    /// Web access log settings
    #[serde(default)]
    pub web: family::web::Config,
    /// Syslog settings
    #[serde(default)]
    pub syslog: family::syslog::Config,
    /// Structured application log settings
    #[serde(default)]
    pub golang: family::golang::Config,
}

fn default_pool_size() -> usize {
    16
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: None,
            max_random_hosts: default_pool_size(),
            max_random_apps: default_pool_size(),
            max_number: None,
            template_dir: None,
            web: family::web::Config::default(),
            syslog: family::syslog::Config::default(),
            golang: family::golang::Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn config_defaults_from_empty_yaml() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_random_hosts, 16);
        assert_eq!(config.golang.weights.info, 1);
    }

    #[test]
    fn config_rejects_unknown_fields() {
        assert!(serde_yaml::from_str::<Config>("colour: blue").is_err());
    }
}
