//! Weekly and monthly time-series points.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::parcel::{IndexType, ParcelId};

/// Aggregation period. Weeks run Monday to Sunday; months are calendar months.
/// Both are UTC dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Week,
    Month,
}

impl PeriodType {
    pub const ALL: [PeriodType; 2] = [PeriodType::Week, PeriodType::Month];

    /// The period containing `date`.
    pub fn period_containing(&self, date: NaiveDate) -> Period {
        match self {
            Self::Week => {
                let start = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                Period {
                    start,
                    end: start + Duration::days(6),
                }
            }
            Self::Month => {
                let start = date - Duration::days(i64::from(date.day0()));
                let end = start
                    .checked_add_months(Months::new(1))
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(NaiveDate::MAX);
                Period { start, end }
            }
        }
    }

    /// Every period overlapping `[from, to]`, in order.
    pub fn periods_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<Period> {
        let mut periods = Vec::new();
        if from > to {
            return periods;
        }
        let mut current = self.period_containing(from);
        loop {
            periods.push(current);
            if current.end >= to {
                break;
            }
            match current.end.succ_opt() {
                Some(next) => current = self.period_containing(next),
                None => break,
            }
        }
        periods
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

/// Inclusive date span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Identity of a time-series point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub parcel_id: ParcelId,
    pub index_type: IndexType,
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
}

/// Period-aggregated summary for one parcel and index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub parcel_id: ParcelId,
    pub index_type: IndexType,
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Unweighted mean of the per-day means in the period.
    pub avg_value: f64,
    /// Number of contributing days.
    pub sample_count: u32,
    /// Percent change against the previous period of the same type.
    pub change_from_previous: Option<f64>,
    pub is_anomaly: bool,
}

impl TimeSeriesPoint {
    pub fn key(&self) -> SeriesKey {
        SeriesKey {
            parcel_id: self.parcel_id,
            index_type: self.index_type,
            period_type: self.period_type,
            period_start: self.period_start,
        }
    }

    pub fn period(&self) -> Period {
        Period {
            start: self.period_start,
            end: self.period_end,
        }
    }
}
