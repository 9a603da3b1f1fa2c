//! Syslog style logs.
//!
//! The same data backs RFC 3164, RFC 5424 and free-form syslog-like formats,
//! the templates pick which fields and time renderings to print.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{EventData, Synthesizer, bounded};
use crate::{
    Error, Options,
    pool::{self, DEFAULT_APP, DEFAULT_HOST, NamePool},
    timestamp::{Renderings, SAMPLE_TIME},
};

const FACILITIES: u8 = 24;
const SEVERITIES: u8 = 8;
const MAX_PID: u32 = 10_000;
const MAX_SEQ: u32 = 10_000;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_app_name() -> String {
    "loggen".to_string()
}

/// Configuration for [`Syslog`]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Host name used by sample data
    #[serde(default = "default_host")]
    pub host: String,
    /// Application name used by sample data
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            app_name: default_app_name(),
        }
    }
}

/// Fields of one syslog line.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Data {
    /// Facility, `0..24`
    pub facility: u8,
    /// Severity, `0..8`
    pub severity: u8,
    /// Priority value in angle brackets, `<facility * 8 + severity>`
    pub pri: String,
    /// Originating host
    pub host: String,
    /// Originating application
    pub app_name: String,
    /// Process id
    pub pid: u32,
    /// Message sequence number
    pub seq: u32,
    /// Free text
    pub msg: String,
    /// Time renderings, flattened into the top level
    #[serde(flatten)]
    pub time: Renderings,
}

impl EventData for Data {
    fn severity(&self) -> String {
        self.severity.to_string()
    }
}

fn pri(facility: u8, severity: u8) -> String {
    format!("<{}>", u16::from(facility) * 8 + u16::from(severity))
}

/// Synthesizer for syslog style logs.
#[derive(Debug)]
pub struct Syslog {
    config: Config,
    hosts: NamePool,
    apps: NamePool,
    max_number: Option<u32>,
}

impl Syslog {
    /// Create a new [`Syslog`], generating its host and application pools.
    /// A `seed` makes the pools identical across runs.
    #[must_use]
    pub fn new(
        config: &Config,
        seed: Option<u64>,
        max_hosts: usize,
        max_apps: usize,
        max_number: Option<u32>,
    ) -> Self {
        let mut rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut rand::rng()),
        };
        Self {
            config: config.clone(),
            hosts: NamePool::new(&mut rng, max_hosts, DEFAULT_HOST),
            apps: NamePool::new(&mut rng, max_apps, DEFAULT_APP),
            max_number,
        }
    }
}

impl Synthesizer for Syslog {
    type Data = Data;

    fn kind(&self) -> &'static str {
        "syslog"
    }

    fn sample(&self) -> Result<Data, Error> {
        let (facility, severity) = (20, 5);
        Ok(Data {
            facility,
            severity,
            pri: pri(facility, severity),
            host: self.config.host.clone(),
            app_name: self.config.app_name.clone(),
            pid: 1143,
            seq: 1,
            msg: "An application event log entry...".to_string(),
            time: Renderings::new(SAMPLE_TIME)?,
        })
    }

    fn random<R>(&self, rng: &mut R, _options: &Options) -> Result<Data, Error>
    where
        R: Rng + ?Sized,
    {
        let facility = rng.random_range(0..FACILITIES);
        let severity = rng.random_range(0..SEVERITIES);
        let msg = format!(
            "An application event log entry {} {}",
            pool::noun(rng),
            pool::noun(rng)
        );
        Ok(Data {
            facility,
            severity,
            pri: pri(facility, severity),
            host: self.hosts.choose(rng).to_string(),
            app_name: self.apps.choose(rng).to_string(),
            pid: bounded(rng, 1, MAX_PID, self.max_number),
            seq: bounded(rng, 1, MAX_SEQ, self.max_number),
            msg,
            time: Renderings::new(OffsetDateTime::now_utc())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::SmallRng};

    use super::{Config, Syslog};
    use crate::{Options, family::Synthesizer};

    #[test]
    fn sample_is_fixed() {
        let syslog = Syslog::new(&Config::default(), None, 4, 4, None);
        let data = syslog.sample().unwrap();
        assert_eq!(data.pri, "<165>");
        assert_eq!(data.host, "localhost");
        assert_eq!(data, syslog.sample().unwrap());
    }

    #[test]
    fn random_priority_is_consistent() {
        let syslog = Syslog::new(&Config::default(), Some(1), 4, 4, Some(50));
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..1_000 {
            let data = syslog.random(&mut rng, &Options::default()).unwrap();
            assert!(data.facility < 24);
            assert!(data.severity < 8);
            let pri = u16::from(data.facility) * 8 + u16::from(data.severity);
            assert_eq!(data.pri, format!("<{pri}>"));
            assert!((1..=50).contains(&data.pid));
            assert!((1..=50).contains(&data.seq));
        }
    }

    #[test]
    fn empty_pools_fall_back() {
        let syslog = Syslog::new(&Config::default(), Some(1), 0, 0, None);
        let mut rng = SmallRng::seed_from_u64(5);
        let data = syslog.random(&mut rng, &Options::default()).unwrap();
        assert_eq!(data.host, "host");
        assert_eq!(data.app_name, "app");
    }

    #[test]
    fn seeded_pools_match() {
        let a = Syslog::new(&Config::default(), Some(99), 8, 8, None);
        let b = Syslog::new(&Config::default(), Some(99), 8, 8, None);
        let mut ra = SmallRng::seed_from_u64(0);
        let mut rb = SmallRng::seed_from_u64(0);
        for _ in 0..32 {
            assert_eq!(a.hosts.choose(&mut ra), b.hosts.choose(&mut rb));
        }
    }
}
