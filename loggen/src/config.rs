//! This module controls configuration parsing from the end user. Problems in
//! the configuration are reported here, at startup, rather than while events
//! are flowing.

use std::{
    fs,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    num::{NonZeroU32, NonZeroU64},
    path::{Path, PathBuf},
};

use byte_unit::Byte;
use loggen_payload::Registry;
use loggen_throttle::Jitter;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::writer;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Both pacing modes were configured
    #[error("events_per_second and bytes_per_second are mutually exclusive")]
    ConflictingPace,
    /// `bytes_per_second` is zero or too large
    #[error("bytes_per_second must be between 1 and {max}, got {value}")]
    BytesPerSecond {
        /// Configured value
        value: Byte,
        /// Largest accepted value
        max: u64,
    },
    /// Two streams share a name
    #[error("Duplicate stream name: {0}")]
    DuplicateStream(String),
    /// A stream names an unknown type or format
    #[error("Stream {name} is invalid: {source}")]
    Stream {
        /// Stream name
        name: String,
        /// Registry lookup failure
        #[source]
        source: loggen_payload::registry::Error,
    },
}

/// Two events per second.
const DEFAULT_EVENTS_PER_SECOND: NonZeroU32 = NonZeroU32::MIN.saturating_add(1);

fn default_randomise() -> bool {
    true
}

fn default_enabled() -> bool {
    true
}

fn default_api_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 11_000))
}

fn default_base_path() -> String {
    "/".to_string()
}

/// Main configuration struct for this program
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Emission rate and budget
    #[serde(default)]
    pub message: Message,
    /// Continuous streams, one event each per tick while enabled
    #[serde(default)]
    pub streams: Vec<Stream>,
    /// Event synthesis settings
    #[serde(default)]
    pub payload: loggen_payload::Config,
    /// Where events are written
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub destination: writer::Config,
    /// Administrative HTTP surface
    #[serde(default)]
    pub api: Api,
}

/// The requested emission rate, before it is turned into a tick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    /// Fixed number of ticks per second
    EventsPerSecond(NonZeroU32),
    /// Target output throughput
    BytesPerSecond(NonZeroU64),
}

/// Emission rate and budget
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Message {
    /// Ticks per second. Conflicts with `bytes_per_second`.
    #[serde(default)]
    pub events_per_second: Option<NonZeroU32>,
    /// Target output throughput, e.g. "200B" or "1MiB". Conflicts with
    /// `events_per_second`.
    #[serde(default)]
    pub bytes_per_second: Option<Byte>,
    /// Total continuous events to emit. Absent means unbounded.
    #[serde(default)]
    pub count: Option<u64>,
    /// Emit random data rather than fixed samples
    #[serde(default = "default_randomise")]
    pub randomise: bool,
    /// Per-tick perturbation as a fraction of the interval, in `[0, 1)`
    #[serde(default)]
    pub jitter: Jitter,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            events_per_second: None,
            bytes_per_second: None,
            count: None,
            randomise: default_randomise(),
            jitter: Jitter::default(),
        }
    }
}

impl Message {
    /// The configured rate, defaulting to two events per second.
    ///
    /// # Errors
    ///
    /// Fails if both rates are set or the byte rate is out of range.
    pub fn rate(&self) -> Result<Rate, Error> {
        match (self.events_per_second, self.bytes_per_second) {
            (Some(_), Some(_)) => Err(Error::ConflictingPace),
            (Some(eps), None) => Ok(Rate::EventsPerSecond(eps)),
            (None, Some(bps)) => {
                let value = u64::try_from(bps.as_u128()).ok().and_then(NonZeroU64::new);
                value
                    .map(Rate::BytesPerSecond)
                    .ok_or(Error::BytesPerSecond {
                        value: bps,
                        max: u64::MAX,
                    })
            }
            (None, None) => Ok(Rate::EventsPerSecond(DEFAULT_EVENTS_PER_SECOND)),
        }
    }
}

/// A continuous stream of events.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Stream {
    /// Event type, e.g. `web`
    #[serde(rename = "type")]
    pub kind: String,
    /// Event format, e.g. `nginx`
    pub format: String,
    /// Whether the stream starts enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Name used to toggle the stream at runtime. Defaults to the format.
    #[serde(default)]
    pub name: Option<String>,
}

impl Stream {
    /// The stream's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.format)
    }
}

/// Administrative HTTP surface
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Api {
    /// Whether to serve the API at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Listen address
    #[serde(default = "default_api_addr")]
    pub addr: SocketAddr,
    /// Prefix for every route
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_api_addr(),
            base_path: default_base_path(),
        }
    }
}

impl Config {
    /// Parse configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Fails if the text is not valid configuration.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid configuration.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::parse(&contents)
    }

    /// Check everything that can be checked before running: the pace, stream
    /// names and every stream's type and format.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self, registry: &Registry) -> Result<(), Error> {
        self.message.rate()?;
        let mut names = FxHashSet::default();
        for stream in &self.streams {
            if !names.insert(stream.name()) {
                return Err(Error::DuplicateStream(stream.name().to_string()));
            }
            registry
                .validate(&stream.kind, &stream.format)
                .map_err(|source| Error::Stream {
                    name: stream.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        num::{NonZeroU32, NonZeroU64},
        path::PathBuf,
        sync::Arc,
    };

    use loggen_payload::{Registry, SequenceState};

    use super::{Config, Error, Rate};
    use crate::writer;

    fn registry() -> Registry {
        Registry::builtin(
            &loggen_payload::Config::default(),
            &Arc::new(SequenceState::new()),
        )
        .unwrap()
    }

    #[test]
    fn empty_config_is_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.message.randomise);
        assert_eq!(config.message.count, None);
        assert_eq!(
            config.message.rate().unwrap(),
            Rate::EventsPerSecond(NonZeroU32::new(2).unwrap())
        );
        assert_eq!(config.destination, writer::Config::Stdout);
        assert_eq!(config.api.addr.port(), 11_000);
        assert_eq!(config.api.base_path, "/");
    }

    #[test]
    fn full_config() {
        let contents = r#"
message:
  bytes_per_second: "1KiB"
  count: 10
  randomise: false
  jitter: 0.1
streams:
  - type: web
    format: nginx
  - type: syslog
    format: syslog.rfc5424
    name: audit
    enabled: false
payload:
  seed: 7
  max_random_hosts: 2
  golang:
    weights:
      error: 1
      info: 3
destination:
  file:
    path: /tmp/loggen.log
    create: true
    append: true
    file_mode: "0600"
api:
  enabled: false
  base_path: /generator
"#;
        let config = Config::parse(contents).unwrap();
        assert_eq!(
            config.message.rate().unwrap(),
            Rate::BytesPerSecond(NonZeroU64::new(1024).unwrap())
        );
        assert_eq!(config.message.count, Some(10));
        assert_eq!(config.streams[0].name(), "nginx");
        assert_eq!(config.streams[1].name(), "audit");
        assert!(!config.streams[1].enabled);
        assert_eq!(config.payload.seed, Some(7));
        assert_eq!(config.payload.golang.weights.info, 3);
        assert_eq!(config.payload.golang.weights.warning, 0);
        match &config.destination {
            writer::Config::File(file) => {
                assert_eq!(file.path, PathBuf::from("/tmp/loggen.log"));
                assert_eq!(file.file_mode.bits(), 0o600);
            }
            other => panic!("unexpected destination {other:?}"),
        }
        config.validate(&registry()).unwrap();
    }

    #[test]
    fn network_destination() {
        let contents = r"
destination:
  network:
    address: 127.0.0.1:5140
";
        let config = Config::parse(contents).unwrap();
        assert!(matches!(config.destination, writer::Config::Network(_)));
    }

    #[test]
    fn conflicting_pace() {
        let contents = r"
message:
  events_per_second: 5
  bytes_per_second: 200B
";
        let config = Config::parse(contents).unwrap();
        assert!(matches!(config.message.rate(), Err(Error::ConflictingPace)));
        assert!(config.validate(&registry()).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::parse("message:\n  jitter: 1.5\n").is_err());
        assert!(Config::parse("message:\n  events_per_second: 0\n").is_err());
        assert!(Config::parse("colour: blue\n").is_err());
        assert!(Config::parse("payload:\n  web:\n    time_format: \"[year\"\n").is_err());
    }

    #[test]
    fn stream_validation() {
        let registry = registry();

        let config = Config::parse("streams:\n  - type: nope\n    format: nginx\n").unwrap();
        assert!(matches!(
            config.validate(&registry),
            Err(Error::Stream { .. })
        ));

        let config = Config::parse("streams:\n  - type: web\n    format: nope\n").unwrap();
        assert!(matches!(
            config.validate(&registry),
            Err(Error::Stream { .. })
        ));

        let dup = "streams:\n  - type: web\n    format: nginx\n  - type: web\n    format: nginx\n";
        let config = Config::parse(dup).unwrap();
        assert!(matches!(
            config.validate(&registry),
            Err(Error::DuplicateStream(_))
        ));
    }
}
