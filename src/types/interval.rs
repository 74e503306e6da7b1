//! INTERVAL values
//!
//! Two flavours exist, matching the SQL types: `INTERVAL YEAR TO MONTH` and
//! `INTERVAL DAY TO SECOND`. Both are stored as a signed total so that
//! normalization and comparison are trivial.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::error::{Error, Result};

const NANOS_PER_SECOND: i64 = 1_000_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

/// Flavour of an [`Interval`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalKind {
    /// INTERVAL YEAR TO MONTH
    YearToMonth,
    /// INTERVAL DAY TO SECOND
    DayToSecond,
}

/// An INTERVAL value
///
/// ```rust
/// use ocibind::types::Interval;
///
/// let i = Interval::day_second(1, 2, 3, 4, 500_000_000);
/// assert_eq!(i.to_string(), "+01 02:03:04.500000000");
/// assert_eq!("+01 02:03:04.500000000".parse::<Interval>().unwrap(), i);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    kind: IntervalKind,
    // months for YearToMonth, nanoseconds for DayToSecond
    total: i64,
}

impl Interval {
    /// Year to month interval; the sign of `years` applies to `months` too
    ///
    /// Values beyond the representable range saturate. Use
    /// [`Interval::try_year_month`] to reject them instead.
    pub fn year_month(years: i32, months: i32) -> Self {
        Self::try_year_month(years, months).unwrap_or_else(|_| {
            let limit = i64::from(i32::MAX) * 12 + 11;
            Self {
                kind: IntervalKind::YearToMonth,
                total: if years < 0 || months < 0 { -limit } else { limit },
            }
        })
    }

    /// Year to month interval, failing when the total number of years does
    /// not fit an `i32`
    pub fn try_year_month(years: i32, months: i32) -> Result<Self> {
        let negative = years < 0 || months < 0;
        let total = i64::from(years.unsigned_abs()) * 12 + i64::from(months.unsigned_abs());
        if total / 12 > i64::from(i32::MAX) {
            return Err(Error::InvalidArgument(format!(
                "interval of {} years {} months is out of range",
                years, months
            )));
        }
        Ok(Self {
            kind: IntervalKind::YearToMonth,
            total: if negative { -total } else { total },
        })
    }

    /// Day to second interval; a negative component makes the whole value negative
    ///
    /// Values beyond the representable range saturate. Use
    /// [`Interval::try_day_second`] to reject them instead.
    pub fn day_second(days: i32, hours: i32, minutes: i32, seconds: i32, nanos: i32) -> Self {
        Self::try_day_second(days, hours, minutes, seconds, nanos).unwrap_or_else(|_| {
            let negative = days < 0 || hours < 0 || minutes < 0 || seconds < 0 || nanos < 0;
            Self {
                kind: IntervalKind::DayToSecond,
                total: if negative { -i64::MAX } else { i64::MAX },
            }
        })
    }

    /// Day to second interval, failing when the total does not fit in
    /// nanoseconds
    pub fn try_day_second(days: i32, hours: i32, minutes: i32, seconds: i32, nanos: i32) -> Result<Self> {
        let negative = days < 0 || hours < 0 || minutes < 0 || seconds < 0 || nanos < 0;
        let secs = i128::from(days.unsigned_abs()) * i128::from(SECONDS_PER_DAY)
            + i128::from(hours.unsigned_abs()) * 3600
            + i128::from(minutes.unsigned_abs()) * 60
            + i128::from(seconds.unsigned_abs());
        let total = secs * i128::from(NANOS_PER_SECOND) + i128::from(nanos.unsigned_abs());
        let total = i64::try_from(total).map_err(|_| {
            Error::InvalidArgument(format!(
                "interval of {} days {:02}:{:02}:{:02}.{:09} is out of range",
                days, hours, minutes, seconds, nanos
            ))
        })?;
        Ok(Self {
            kind: IntervalKind::DayToSecond,
            total: if negative { -total } else { total },
        })
    }

    /// Day to second interval from a duration
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            kind: IntervalKind::DayToSecond,
            total: duration.num_nanoseconds().unwrap_or(i64::MAX),
        }
    }

    /// Flavour of the interval
    pub fn kind(&self) -> IntervalKind {
        self.kind
    }

    /// Check for a negative interval
    pub fn is_negative(&self) -> bool {
        self.total < 0
    }

    /// Total number of months (year to month only, 0 otherwise)
    pub fn total_months(&self) -> i64 {
        match self.kind {
            IntervalKind::YearToMonth => self.total,
            IntervalKind::DayToSecond => 0,
        }
    }

    /// Years component
    pub fn years(&self) -> i32 {
        match self.kind {
            IntervalKind::YearToMonth => (self.total / 12) as i32,
            IntervalKind::DayToSecond => 0,
        }
    }

    /// Months component
    pub fn months(&self) -> i32 {
        match self.kind {
            IntervalKind::YearToMonth => (self.total % 12) as i32,
            IntervalKind::DayToSecond => 0,
        }
    }

    /// Days component
    pub fn days(&self) -> i32 {
        self.seconds_part(SECONDS_PER_DAY, i64::MAX)
    }

    /// Hours component
    pub fn hours(&self) -> i32 {
        self.seconds_part(3600, 24)
    }

    /// Minutes component
    pub fn minutes(&self) -> i32 {
        self.seconds_part(60, 60)
    }

    /// Seconds component
    pub fn seconds(&self) -> i32 {
        self.seconds_part(1, 60)
    }

    /// Fractional seconds in nanoseconds
    pub fn nanoseconds(&self) -> i32 {
        match self.kind {
            IntervalKind::DayToSecond => (self.total % NANOS_PER_SECOND) as i32,
            IntervalKind::YearToMonth => 0,
        }
    }

    /// Day to second interval as a duration
    pub fn to_duration(&self) -> Option<Duration> {
        match self.kind {
            IntervalKind::DayToSecond => Some(Duration::nanoseconds(self.total)),
            IntervalKind::YearToMonth => None,
        }
    }

    fn seconds_part(&self, unit: i64, modulo: i64) -> i32 {
        match self.kind {
            IntervalKind::DayToSecond => {
                let secs = self.total / NANOS_PER_SECOND;
                ((secs / unit) % modulo) as i32
            }
            IntervalKind::YearToMonth => 0,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { '-' } else { '+' };
        match self.kind {
            IntervalKind::YearToMonth => {
                write!(f, "{}{:02}-{:02}", sign, self.years().abs(), self.months().abs())
            }
            IntervalKind::DayToSecond => write!(
                f,
                "{}{:02} {:02}:{:02}:{:02}.{:09}",
                sign,
                self.days().abs(),
                self.hours().abs(),
                self.minutes().abs(),
                self.seconds().abs(),
                self.nanoseconds().abs()
            ),
        }
    }
}

impl FromStr for Interval {
    type Err = Error;

    /// Parse `[+-]YY-MM` or `[+-]DD HH:MI:SS[.FFFFFFFFF]`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("invalid interval literal '{}'", s));
        let s = s.trim();
        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let number = |part: &str| part.trim().parse::<i32>().map_err(|_| invalid());

        let interval = if let Some((days, time)) = body.split_once(' ') {
            let mut parts = time.splitn(3, ':');
            let hours = number(parts.next().ok_or_else(invalid)?)?;
            let minutes = number(parts.next().ok_or_else(invalid)?)?;
            let seconds_text = parts.next().ok_or_else(invalid)?;
            let (seconds, nanos) = match seconds_text.split_once('.') {
                Some((secs, frac)) => {
                    if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(invalid());
                    }
                    let padded = format!("{:0<9}", frac);
                    (number(secs)?, number(&padded)?)
                }
                None => (number(seconds_text)?, 0),
            };
            Interval::try_day_second(number(days)?, hours, minutes, seconds, nanos)?
        } else if let Some((years, months)) = body.split_once('-') {
            Interval::try_year_month(number(years)?, number(months)?)?
        } else {
            return Err(invalid());
        };

        Ok(if negative {
            Interval {
                total: -interval.total,
                ..interval
            }
        } else {
            interval
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_month_components() {
        let i = Interval::year_month(2, 14);
        assert_eq!(i.kind(), IntervalKind::YearToMonth);
        assert_eq!(i.years(), 3);
        assert_eq!(i.months(), 2);
        assert_eq!(i.total_months(), 38);
        assert_eq!(i.to_string(), "+03-02");
        assert!(i.to_duration().is_none());
    }

    #[test]
    fn test_negative_year_month() {
        let i = Interval::year_month(-1, 6);
        assert!(i.is_negative());
        assert_eq!(i.to_string(), "-01-06");
        assert_eq!("-01-06".parse::<Interval>().unwrap(), i);
    }

    #[test]
    fn test_day_second_components() {
        let i = Interval::day_second(3, 25, 61, 5, 1);
        assert_eq!(i.days(), 4);
        assert_eq!(i.hours(), 2);
        assert_eq!(i.minutes(), 1);
        assert_eq!(i.seconds(), 5);
        assert_eq!(i.nanoseconds(), 1);
    }

    #[test]
    fn test_duration_conversion() {
        let i = Interval::from_duration(Duration::seconds(90));
        assert_eq!(i.minutes(), 1);
        assert_eq!(i.seconds(), 30);
        assert_eq!(i.to_duration(), Some(Duration::seconds(90)));
    }

    #[test]
    fn test_parse_fraction_padding() {
        let i: Interval = "00 00:00:01.5".parse().unwrap();
        assert_eq!(i.nanoseconds(), 500_000_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("abc".parse::<Interval>().is_err());
        assert!("1 2:3".parse::<Interval>().is_err());
        assert!("1 2:3:4.x".parse::<Interval>().is_err());
    }

    #[test]
    fn test_parse_out_of_range() {
        let err = "+999999999 00:00:00".parse::<Interval>().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!("-2147483647-11".parse::<Interval>().is_ok());
        assert!(Interval::try_day_second(i32::MAX, 0, 0, 0, 0).is_err());
        assert!(Interval::try_year_month(i32::MAX, 12).is_err());
    }

    #[test]
    fn test_out_of_range_saturates() {
        let i = Interval::year_month(i32::MIN, 0);
        assert!(i.is_negative());
        assert_eq!(i.years(), -i32::MAX);

        let i = Interval::day_second(999_999_999, 0, 0, 0, 0);
        assert!(!i.is_negative());
        assert_eq!(i.to_duration(), Some(Duration::nanoseconds(i64::MAX)));

        let i = Interval::try_year_month(i32::MIN + 1, 0).unwrap();
        assert_eq!(i.years(), i32::MIN + 1);
    }
}
