//! Timestamp rendering.
//!
//! Formats are written in the `time` crate format description syntax, for
//! example `[year]-[month]-[day]`.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::{
    OffsetDateTime,
    format_description::{BorrowedFormatItem, OwnedFormatItem, well_known::Rfc3339},
    macros::{datetime, format_description},
};

/// Fixed instant used by sample data.
pub const SAMPLE_TIME: OffsetDateTime = datetime!(2011-06-25 20:00:04 UTC);

/// Errors related to timestamps
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The format description could not be parsed
    #[error("Invalid time format {description:?}: {source}")]
    Description {
        /// The offending description
        description: String,
        /// Underlying parse error
        source: time::error::InvalidFormatDescription,
    },
    /// The timestamp could not be rendered
    #[error("Unable to format timestamp: {0}")]
    Format(String),
    /// The timestamp is out of range
    #[error("Timestamp out of range: {0}")]
    Range(#[from] time::error::ComponentRange),
}

impl From<time::error::Format> for Error {
    fn from(err: time::error::Format) -> Self {
        Error::Format(err.to_string())
    }
}

/// A validated, reusable time format.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeFormat {
    description: String,
    items: OwnedFormatItem,
}

impl TimeFormat {
    /// Parse a format description.
    ///
    /// # Errors
    ///
    /// Fails if `description` is not a valid format description.
    pub fn new(description: &str) -> Result<Self, Error> {
        let items = time::format_description::parse_owned::<2>(description).map_err(|source| {
            Error::Description {
                description: description.to_string(),
                source,
            }
        })?;
        Ok(Self {
            description: description.to_string(),
            items,
        })
    }

    /// Wrap a format compiled with the `format_description!` macro.
    /// `description` must be the text the macro was given.
    #[must_use]
    pub fn compiled(description: &str, items: &[BorrowedFormatItem<'_>]) -> Self {
        Self {
            description: description.to_string(),
            items: OwnedFormatItem::from(items),
        }
    }

    /// Render `instant` in this format.
    ///
    /// # Errors
    ///
    /// Fails if the format asks for a component `instant` cannot supply.
    pub fn format(&self, instant: OffsetDateTime) -> Result<String, Error> {
        Ok(instant.format(&self.items)?)
    }

    /// The description this format was parsed from.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for TimeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TimeFormat").field(&self.description).finish()
    }
}

impl PartialEq for TimeFormat {
    fn eq(&self, other: &Self) -> bool {
        self.description == other.description
    }
}

impl Eq for TimeFormat {}

impl TryFrom<String> for TimeFormat {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TimeFormat> for String {
    fn from(format: TimeFormat) -> Self {
        format.description
    }
}

/// Unix nanoseconds, saturating at the bounds of `i64`.
#[must_use]
pub fn unix_nanos(instant: OffsetDateTime) -> i64 {
    let nanos = instant.unix_timestamp_nanos();
    i64::try_from(nanos).unwrap_or(if nanos < 0 { i64::MIN } else { i64::MAX })
}

/// Render a unix nanosecond timestamp with an ad-hoc format description.
///
/// # Errors
///
/// Fails if the description is invalid or the timestamp is out of range.
pub fn format_nanos(timestamp: i64, description: &str) -> Result<String, Error> {
    let instant = OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp))?;
    TimeFormat::new(description)?.format(instant)
}

/// Every rendering of one instant that syslog style templates may reference.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Renderings {
    /// RFC 3339 at second precision, `2011-06-25T20:00:04Z`
    pub iso_date_time: String,
    /// Date half of `iso_date_time`
    pub iso_date: String,
    /// Time half of `iso_date_time`, including the offset
    pub iso_time: String,
    /// BSD syslog stamp, `Jun 25 20:00:04`
    pub bsd_date_time: String,
    /// Seconds since the epoch
    pub unix_time: String,
    /// Milliseconds since the epoch
    pub unix_time_milli: String,
    /// Microseconds since the epoch
    pub unix_time_micro: String,
    /// Seconds since the epoch with six fractional digits
    pub unix_time_micro_fraction: String,
    /// Nanoseconds since the epoch
    pub unix_time_nano: String,
    /// RFC 3339 at full precision
    pub rfc3339_nano_date_time: String,
    /// Nanoseconds since the epoch, as a number
    pub timestamp: i64,
}

impl Renderings {
    /// Render `instant` every supported way.
    ///
    /// # Errors
    ///
    /// Fails only if `instant` cannot be represented in RFC 3339.
    pub fn new(instant: OffsetDateTime) -> Result<Self, Error> {
        let iso_date_time = instant.replace_nanosecond(0)?.format(&Rfc3339)?;
        let (iso_date, iso_time) = iso_date_time
            .split_once('T')
            .map(|(d, t)| (d.to_string(), t.to_string()))
            .unwrap_or_default();
        let bsd_date_time = instant.format(format_description!(
            "[month repr:short] [day padding:space] [hour]:[minute]:[second]"
        ))?;
        let nanos = instant.unix_timestamp_nanos();
        let seconds = instant.unix_timestamp();
        let micros = nanos / 1_000;

        Ok(Self {
            iso_date_time,
            iso_date,
            iso_time,
            bsd_date_time,
            unix_time: seconds.to_string(),
            unix_time_milli: (nanos / 1_000_000).to_string(),
            unix_time_micro: micros.to_string(),
            unix_time_micro_fraction: format!("{seconds}.{:06}", micros.rem_euclid(1_000_000)),
            unix_time_nano: nanos.to_string(),
            rfc3339_nano_date_time: instant.format(&Rfc3339)?,
            timestamp: unix_nanos(instant),
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{Renderings, SAMPLE_TIME, TimeFormat, format_nanos, unix_nanos};

    #[test]
    fn renderings_of_sample_time() {
        let r = Renderings::new(SAMPLE_TIME).unwrap();
        assert_eq!(r.iso_date_time, "2011-06-25T20:00:04Z");
        assert_eq!(r.iso_date, "2011-06-25");
        assert_eq!(r.iso_time, "20:00:04Z");
        assert_eq!(r.bsd_date_time, "Jun 25 20:00:04");
        assert_eq!(r.unix_time, "1309032004");
        assert_eq!(r.unix_time_milli, "1309032004000");
        assert_eq!(r.unix_time_micro_fraction, "1309032004.000000");
    }

    #[test]
    fn bsd_day_is_space_padded() {
        let r = Renderings::new(datetime!(2024-03-05 01:02:03.123_456_789 UTC)).unwrap();
        assert_eq!(r.bsd_date_time, "Mar  5 01:02:03");
        assert_eq!(r.iso_date_time, "2024-03-05T01:02:03Z");
        assert_eq!(r.unix_time_micro_fraction, "1709600523.123456");
        assert_eq!(r.rfc3339_nano_date_time, "2024-03-05T01:02:03.123456789Z");
    }

    #[test]
    fn web_server_format() {
        let format = TimeFormat::new(
            "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]",
        )
        .unwrap();
        assert_eq!(format.format(SAMPLE_TIME).unwrap(), "25/Jun/2011:20:00:04 +0000");
    }

    #[test]
    fn invalid_descriptions_are_rejected() {
        assert!(TimeFormat::new("[not_a_component]").is_err());
        assert!(serde_yaml::from_str::<TimeFormat>("\"[year\"").is_err());
    }

    #[test]
    fn ad_hoc_nanos() {
        let nanos = unix_nanos(SAMPLE_TIME);
        assert_eq!(format_nanos(nanos, "[year]-[month]").unwrap(), "2011-06");
    }
}
