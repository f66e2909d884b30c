//! Spending limit models
//!
//! Periods are calendar-aligned UTC windows anchored at query time:
//!
//! | Period | Window start                         |
//! |--------|--------------------------------------|
//! | Day    | today 00:00 UTC                      |
//! | Week   | Monday 00:00 UTC (ISO week)          |
//! | Month  | 1st of the month 00:00 UTC           |
//! | Year   | January 1st 00:00 UTC                |
//!
//! This matches PostgreSQL `date_trunc(period, now AT TIME ZONE 'UTC')`,
//! which is what the durable aggregation uses.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::AccountAddress;
use crate::money::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum Period {
    Day = 1,
    Week = 2,
    Month = 3,
    Year = 4,
}

impl Period {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Period::Day),
            2 => Some(Period::Week),
            3 => Some(Period::Month),
            4 => Some(Period::Year),
            _ => None,
        }
    }

    /// `date_trunc` field name
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// Start of the window containing `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let start: NaiveDate = match self {
            Period::Day => today,
            Period::Week => {
                today - chrono::Duration::days(today.weekday().num_days_from_monday() as i64)
            }
            Period::Month => today.with_day(1).unwrap_or(today),
            Period::Year => today.with_ordinal(1).unwrap_or(today),
        };
        Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0).unwrap_or_default())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            other => Err(format!("unknown period '{}'", other)),
        }
    }
}

/// At most one per account; upserts replace the previous pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingLimit {
    pub address: AccountAddress,
    pub period: Period,
    pub cap: Amount,
}

/// Limit to enforce atomically with a transaction insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitWindow {
    pub period: Period,
    pub cap: Amount,
}
