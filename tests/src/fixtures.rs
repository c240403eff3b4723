//! Test fixtures and data generators.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use gateway::RawValues;
use monitor_core::{Boundary, IndexType, Parcel, ParcelId, RawObservation};

/// Small square field.
pub fn square_boundary() -> Boundary {
    Boundary::new(vec![
        [5.10, 52.10],
        [5.10, 52.11],
        [5.11, 52.11],
        [5.11, 52.10],
        [5.10, 52.10],
    ])
}

/// Active daily NDVI parcel.
pub fn parcel(name: &str) -> Parcel {
    Parcel::new(name, square_boundary())
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Provider response whose valid pixels average to `mean`, with a masked
/// pixel and an out-of-range pixel mixed in.
pub fn values(mean: f64) -> RawValues {
    let mut pixels = Vec::with_capacity(18);
    for i in 0..8 {
        let offset = 0.01 * f64::from(i % 2) * 2.0 - 0.01;
        pixels.push(mean + offset);
        pixels.push(mean - offset);
    }
    pixels.push(f64::NAN);
    pixels.push(9.0);
    RawValues::new(pixels)
}

/// Daily means alternating between 0.66 and 0.64 for `days` days.
pub fn steady_means(start: NaiveDate, days: u32) -> Vec<(NaiveDate, f64)> {
    start
        .iter_days()
        .take(days as usize)
        .enumerate()
        .map(|(i, d)| (d, if i % 2 == 0 { 0.66 } else { 0.64 }))
        .collect()
}

pub fn observation(
    parcel_id: ParcelId,
    acquisition_date: NaiveDate,
    mean: f64,
    fetched_at: DateTime<Utc>,
) -> RawObservation {
    RawObservation {
        parcel_id,
        index_type: IndexType::Ndvi,
        acquisition_date,
        mean,
        min: mean - 0.05,
        max: mean + 0.05,
        std_dev: 0.02,
        valid_pixel_count: 64,
        fetched_at,
    }
}
