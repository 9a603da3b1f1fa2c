//! Web server access logs.

use std::net::Ipv4Addr;

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, macros::format_description};

use super::{EventData, Synthesizer, bounded};
use crate::{
    Error, Options,
    timestamp::{SAMPLE_TIME, TimeFormat, unix_nanos},
    weighted::Weighted,
};

const METHODS: [&str; 3] = ["GET", "POST", "PUT"];
const PATHS: [&str; 4] = ["/", "/blog", "/index.html", "/products"];
const STATUS_CODES: [(u16, u32); 5] = [(200, 7), (404, 3), (503, 1), (302, 2), (403, 2)];
const AGENTS: [&str; 6] = [
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "curl/8.8.0",
    "Wget/1.24.5",
    "Go-http-client/1.1",
];

const SAMPLE_PATH: &str = "/loggen/loggen/loggen/loggen/loggen/loggen/loggen";
const SAMPLE_AGENT: &str =
    "golang/generator PPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPPP";
const MIN_SIZE: u32 = 100;
const MAX_SIZE: u32 = 25_000;

fn default_time_format() -> TimeFormat {
    TimeFormat::compiled(
        "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]",
        format_description!(
            "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
        ),
    )
}

/// Configuration for [`Web`]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Format of the request timestamp
    #[serde(default = "default_time_format")]
    pub time_format: TimeFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
        }
    }
}

/// Fields of one access log line.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Data {
    /// Client address
    pub remote: String,
    /// Virtual host
    pub host: String,
    /// Authenticated user
    pub user: String,
    /// Request time, in the configured format
    pub time: String,
    /// Request time as unix nanoseconds
    pub timestamp: i64,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Response status
    pub code: u16,
    /// Response size in bytes
    pub size: u32,
    /// Referer header
    pub referer: String,
    /// User agent header
    pub agent: String,
    /// Forwarded-for header
    pub http_x_forwarded_for: String,
}

impl EventData for Data {
    fn severity(&self) -> String {
        self.code.to_string()
    }
}

/// Synthesizer for web access logs.
#[derive(Debug)]
pub struct Web {
    time_format: TimeFormat,
    status_codes: Weighted<u16>,
    max_number: Option<u32>,
}

impl Web {
    /// Create a new [`Web`].
    ///
    /// # Errors
    ///
    /// Never fails in practice; the status code weights are fixed.
    pub fn new(config: &Config, max_number: Option<u32>) -> Result<Self, Error> {
        Ok(Self {
            time_format: config.time_format.clone(),
            status_codes: Weighted::new(STATUS_CODES)?,
            max_number,
        })
    }
}

impl Synthesizer for Web {
    type Data = Data;

    fn kind(&self) -> &'static str {
        "web"
    }

    fn sample(&self) -> Result<Data, Error> {
        Ok(Data {
            remote: "127.0.0.1".to_string(),
            host: "-".to_string(),
            user: "-".to_string(),
            time: self.time_format.format(SAMPLE_TIME)?,
            timestamp: unix_nanos(SAMPLE_TIME),
            method: "GET".to_string(),
            path: SAMPLE_PATH.to_string(),
            code: 200,
            size: 650,
            referer: "-".to_string(),
            agent: SAMPLE_AGENT.to_string(),
            http_x_forwarded_for: "-".to_string(),
        })
    }

    fn random<R>(&self, rng: &mut R, _options: &Options) -> Result<Data, Error>
    where
        R: Rng + ?Sized,
    {
        let now = OffsetDateTime::now_utc();
        Ok(Data {
            remote: Ipv4Addr::from(rng.random::<u32>()).to_string(),
            host: "-".to_string(),
            user: "-".to_string(),
            time: self.time_format.format(now)?,
            timestamp: unix_nanos(now),
            method: (*METHODS.choose(rng).unwrap_or(&"GET")).to_string(),
            path: (*PATHS.choose(rng).unwrap_or(&"/")).to_string(),
            code: *self.status_codes.choose(rng),
            size: bounded(rng, MIN_SIZE, MAX_SIZE, self.max_number),
            referer: "-".to_string(),
            agent: (*AGENTS.choose(rng).unwrap_or(&SAMPLE_AGENT)).to_string(),
            http_x_forwarded_for: "-".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::SmallRng};

    use super::{Config, Web};
    use crate::{
        Options,
        family::Synthesizer,
        timestamp::{SAMPLE_TIME, TimeFormat},
    };

    #[test]
    fn sample_is_fixed() {
        let web = Web::new(&Config::default(), None).unwrap();
        let a = web.sample().unwrap();
        let b = web.sample().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.time, "25/Jun/2011:20:00:04 +0000");
    }

    #[test]
    fn compiled_default_matches_its_description() {
        let compiled = Config::default().time_format;
        let parsed = TimeFormat::new(compiled.description()).unwrap();
        assert_eq!(
            parsed.format(SAMPLE_TIME).unwrap(),
            compiled.format(SAMPLE_TIME).unwrap()
        );
    }

    #[test]
    fn random_fields_stay_in_range() {
        let web = Web::new(&Config::default(), Some(500)).unwrap();
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..1_000 {
            let data = web.random(&mut rng, &Options::default()).unwrap();
            assert!([200, 404, 503, 302, 403].contains(&data.code));
            assert!((100..=500).contains(&data.size), "size {}", data.size);
            assert!(["GET", "POST", "PUT"].contains(&data.method.as_str()));
        }
    }
}
