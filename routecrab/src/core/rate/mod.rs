//! Formatted rate rules
//!
//! Backends declare limits as short strings: `"<limit>-<period>"`, where the
//! period is one of `S` (second), `M` (minute), `H` (hour) or `D` (day). The
//! letter is case-insensitive. `"100-M"` means 100 requests per minute.
//!
//! The original string is kept verbatim because it is part of the counter keys
//! the gateway builds, so two spellings of the same rate are tracked apart.

use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;


const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86400);

/// A parsed rate rule: `limit` requests per `period`
///
/// # Examples
///
/// ```
/// use routecrab::RateRule;
/// use std::time::Duration;
///
/// let rule: RateRule = "100-M".parse().unwrap();
/// assert_eq!(rule.limit(), 100);
/// assert_eq!(rule.period(), Duration::from_secs(60));
/// assert_eq!(rule.formatted(), "100-M");
///
/// // The period letter is case-insensitive
/// let rule = RateRule::parse("5-h").unwrap();
/// assert_eq!(rule.period(), Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateRule {
    limit: u64,
    period: Duration,
    formatted: String,
}

/// Reasons a formatted rate rule is rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// The string is not of the form `<limit>-<period>`
    Format(String),
    /// The limit is not a positive integer
    Limit(String),
    /// The period letter is not one of S, M, H, D
    Period(String),
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::Format(s) => write!(f, "incorrect rate format '{s}'"),
            RuleError::Limit(s) => write!(f, "incorrect rate limit '{s}'"),
            RuleError::Period(s) => write!(f, "incorrect rate period '{s}'"),
        }
    }
}

impl Error for RuleError {}

impl RateRule {
    /// Parse a formatted rule such as `"100-M"`
    pub fn parse(formatted: &str) -> Result<Self, RuleError> {
        let mut parts = formatted.split('-');
        let (Some(limit), Some(period), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(RuleError::Format(formatted.to_string()));
        };

        let period = match period.trim().to_ascii_uppercase().as_str() {
            "S" => SECOND,
            "M" => MINUTE,
            "H" => HOUR,
            "D" => DAY,
            _ => return Err(RuleError::Period(period.to_string())),
        };

        let limit = match limit.trim().parse::<u64>() {
            Ok(n) if n > 0 && n <= i64::MAX as u64 => n,
            _ => return Err(RuleError::Limit(limit.to_string())),
        };

        Ok(RateRule {
            limit,
            period,
            formatted: formatted.to_string(),
        })
    }

    /// `n` requests per second
    pub fn per_second(n: u64) -> Self {
        Self::from_parts(n, SECOND, 'S')
    }

    /// `n` requests per minute
    pub fn per_minute(n: u64) -> Self {
        Self::from_parts(n, MINUTE, 'M')
    }

    /// `n` requests per hour
    pub fn per_hour(n: u64) -> Self {
        Self::from_parts(n, HOUR, 'H')
    }

    /// `n` requests per day
    pub fn per_day(n: u64) -> Self {
        Self::from_parts(n, DAY, 'D')
    }

    fn from_parts(n: u64, period: Duration, letter: char) -> Self {
        let limit = n.clamp(1, i64::MAX as u64);
        RateRule {
            limit,
            period,
            formatted: format!("{limit}-{letter}"),
        }
    }

    /// Requests allowed per period
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of the period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// The rule exactly as it was declared
    pub fn formatted(&self) -> &str {
        &self.formatted
    }

    /// Time between two token emissions (`period / limit`)
    ///
    /// ```
    /// use routecrab::RateRule;
    /// use std::time::Duration;
    ///
    /// assert_eq!(RateRule::per_second(10).emission_interval(), Duration::from_millis(100));
    /// assert_eq!(RateRule::per_minute(2).emission_interval(), Duration::from_secs(30));
    /// ```
    pub fn emission_interval(&self) -> Duration {
        let nanos = self.period.as_nanos() / self.limit as u128;
        Duration::from_nanos(nanos.max(1) as u64)
    }
}

impl FromStr for RateRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RateRule::parse(s)
    }
}

impl fmt::Display for RateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted)
    }
}
