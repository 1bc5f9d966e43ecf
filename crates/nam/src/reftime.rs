//! Reference-time resolution and URL templating.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, Offset, Timelike, Utc};

use crate::config::SourceConfig;
use crate::error::{NamError, Result};

/// Accepted text forms, tried in order.
const TEXT_FORMATS: &[&str] = &["%Y%m%d %H%M", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H%M"];

/// Where the raw files of a run are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSource {
    Production,
    /// Archive of runs before the cutoff, published as GRIB1
    Grib1Archive,
    Archive,
}

impl RemoteSource {
    pub fn template(self, source: &SourceConfig) -> &str {
        match self {
            Self::Production => &source.production_url,
            Self::Grib1Archive => &source.archive_url,
            Self::Archive => &source.archive_grib2_url,
        }
    }

    /// Whether the files are GRIB2 and can be decoded.
    pub fn is_grib2(self) -> bool {
        self != Self::Grib1Archive
    }
}

/// The nominal start of one NAM run: a UTC instant on a 6-hour boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceTime(DateTime<Utc>);

impl ReferenceTime {
    /// Floor an instant to the previous model run.
    pub fn resolve(instant: DateTime<Utc>) -> Self {
        let hour = instant.hour() - instant.hour() % 6;
        let floored = instant
            .date_naive()
            .and_hms_opt(hour, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(instant);
        Self(floored)
    }

    /// The most recent run at the current time.
    pub fn now() -> Self {
        Self::resolve(Utc::now())
    }

    /// Parse text as UTC in one of the accepted forms, then floor it.
    ///
    /// ```
    /// use nam::ReferenceTime;
    ///
    /// let t = ReferenceTime::parse("20200301 1300").unwrap();
    /// assert_eq!(t.to_string(), "20200301 1200");
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        TEXT_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .map(|naive| Self::resolve(naive.and_utc()))
            .ok_or_else(|| NamError::InvalidTimeFormat {
                input: text.to_string(),
            })
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Run hour: 0, 6, 12 or 18.
    pub fn cycle(&self) -> u32 {
        self.0.hour()
    }

    /// YYYYMMDD
    pub fn date_string(&self) -> String {
        format!("{:04}{:02}{:02}", self.0.year(), self.0.month(), self.0.day())
    }

    /// The same instant in another fixed offset.
    pub fn in_timezone(&self, tz: &FixedOffset) -> DateTime<FixedOffset> {
        self.0.with_timezone(tz)
    }

    /// The next run.
    pub fn next(&self) -> Self {
        Self(self.0 + Duration::hours(6))
    }

    /// The previous run.
    pub fn previous(&self) -> Self {
        Self(self.0 - Duration::hours(6))
    }

    /// Pick the remote source for this run.
    ///
    /// Runs at most `production_retention_days` whole days old come from
    /// production. Older runs come from the archive, which switched from
    /// GRIB1 to GRIB2 at the archive cutoff.
    pub fn source(&self, source: &SourceConfig, now: DateTime<Utc>) -> RemoteSource {
        if (now - self.0).num_days() <= source.production_retention_days {
            RemoteSource::Production
        } else if self.0 < source.archive_cutoff {
            RemoteSource::Grib1Archive
        } else {
            RemoteSource::Archive
        }
    }

    /// The remote URL template for this run.
    pub fn url_template<'a>(&self, source: &'a SourceConfig, now: DateTime<Utc>) -> &'a str {
        self.source(source, now).template(source)
    }

    /// Substitute the template placeholders for this run and a forecast
    /// offset.
    pub fn format(&self, template: &str, forecast: u32) -> String {
        template
            .replace("{date}", &self.date_string())
            .replace(
                "{yearmonth}",
                &format!("{:04}{:02}", self.0.year(), self.0.month()),
            )
            .replace("{cycle:02}", &format!("{:02}", self.cycle()))
            .replace("{forecast:02}", &format!("{:02}", forecast))
            .replace("{forecast:03}", &format!("{:03}", forecast))
    }
}

impl fmt::Display for ReferenceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TEXT_FORMATS[0]))
    }
}

impl FromStr for ReferenceTime {
    type Err = NamError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<DateTime<Utc>> for ReferenceTime {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::resolve(instant)
    }
}

/// US Eastern standard time (UTC-5), the default display zone.
pub fn us_eastern() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).unwrap_or_else(|| Utc.fix())
}
