//! Model cycles, identified by their initialization time.

use std::{fmt, str::FromStr};

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::errors::GribArchiveErr;

/// A single model run, identified by the UTC date and hour of initialization.
///
/// The textual form is always exactly 10 digits, `YYYYMMDDHH`, so ordering the strings and
/// ordering the times agree. That is what the index relies on for retention sweeps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Cycle(NaiveDateTime);

impl Cycle {
    const FORMAT: &'static str = "%Y%m%d%H";

    /// Create a cycle from a date and an initialization hour.
    pub fn new(date: NaiveDate, hour: u32) -> Result<Self, GribArchiveErr> {
        date.and_hms_opt(hour, 0, 0).map(Cycle).ok_or_else(|| {
            GribArchiveErr::InvalidCycle(format!("{}{:02}", date.format("%Y%m%d"), hour))
        })
    }

    /// The cycle containing this time, i.e. the time truncated to the hour.
    pub fn containing(time: NaiveDateTime) -> Self {
        Cycle(time.date().and_time(Default::default()) + Duration::hours(i64::from(time.hour())))
    }

    /// The initialization time.
    pub fn init_time(self) -> NaiveDateTime {
        self.0
    }

    /// The date part, formatted `YYYYMMDD`.
    pub fn date_str(self) -> String {
        self.0.format("%Y%m%d").to_string()
    }

    /// The initialization hour of the day.
    pub fn hour(self) -> u32 {
        self.0.hour()
    }

    /// The cycle `hours` after (or before, if negative) this one.
    pub fn offset_hours(self, hours: i64) -> Self {
        Cycle(self.0 + Duration::hours(hours))
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl FromStr for Cycle {
    type Err = GribArchiveErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GribArchiveErr::InvalidCycle(s.to_owned());

        if s.len() != 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let date = NaiveDate::parse_from_str(&s[..8], "%Y%m%d").map_err(|_| invalid())?;
        let hour: u32 = s[8..].parse().map_err(|_| invalid())?;

        date.and_hms_opt(hour, 0, 0).map(Cycle).ok_or_else(invalid)
    }
}

impl ToSql for Cycle {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Cycle {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Cycle::from_str(text).map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

/*--------------------------------------------------------------------------------------------------
                                          Unit Tests
--------------------------------------------------------------------------------------------------*/
