//! Raw per-date observations.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::parcel::{IndexType, ParcelId};
use crate::stats::Statistics;

/// One parcel's statistical summary for a single acquisition date.
///
/// Append-only. A re-fetch of the same date produces a new observation that
/// logically supersedes the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub parcel_id: ParcelId,
    pub index_type: IndexType,
    pub acquisition_date: NaiveDate,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub valid_pixel_count: u64,
    pub fetched_at: DateTime<Utc>,
}

impl RawObservation {
    pub fn from_statistics(
        parcel_id: ParcelId,
        index_type: IndexType,
        acquisition_date: NaiveDate,
        stats: &Statistics,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            parcel_id,
            index_type,
            acquisition_date,
            mean: stats.mean,
            min: stats.min,
            max: stats.max,
            std_dev: stats.std_dev,
            valid_pixel_count: stats.count,
            fetched_at,
        }
    }
}

/// Collapses observations to the latest one per acquisition date, ordered by date.
///
/// The latest is the one with the greatest `fetched_at`; among equal
/// timestamps the one appearing later in `observations` wins.
pub fn latest_per_date(observations: &[RawObservation]) -> Vec<RawObservation> {
    let mut by_date: BTreeMap<NaiveDate, &RawObservation> = BTreeMap::new();

    for obs in observations {
        match by_date.get(&obs.acquisition_date) {
            Some(existing) if existing.fetched_at > obs.fetched_at => {}
            _ => {
                by_date.insert(obs.acquisition_date, obs);
            }
        }
    }

    by_date.into_values().cloned().collect()
}
