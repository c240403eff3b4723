//! Parcel registration types.
//!
//! Parcels are registered by an external subsystem. The pipeline only reads
//! them; the cadence is the one field expected to change while running.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::stats::ValidRange;

/// Parcel identifier.
pub type ParcelId = Uuid;

/// Vegetation or stress index computed from spectral bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexType {
    Ndvi,
    Ndmi,
    Evi,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ndvi => "NDVI",
            Self::Ndmi => "NDMI",
            Self::Evi => "EVI",
        }
    }

    /// Range of values the sensor can legitimately produce for this index.
    pub fn valid_range(&self) -> ValidRange {
        match self {
            Self::Ndvi | Self::Ndmi => ValidRange::new(-1.0, 1.0),
            Self::Evi => ValidRange::new(-1.0, 2.5),
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a parcel should be ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    #[default]
    Daily,
    Weekly,
    EveryDays(u32),
}

impl Cadence {
    /// Interval between two successful ingestions.
    pub fn interval(&self) -> Duration {
        match self {
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
            Self::EveryDays(n) => Duration::days(i64::from((*n).max(1))),
        }
    }
}

/// Polygon boundary as a closed exterior ring of `[lon, lat]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub exterior: Vec<[f64; 2]>,
}

impl Boundary {
    pub fn new(exterior: Vec<[f64; 2]>) -> Self {
        Self { exterior }
    }

    /// GeoJSON `Polygon` geometry for provider requests.
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [self.exterior],
        })
    }
}

fn validate_boundary(boundary: &Boundary) -> Result<(), ValidationError> {
    let ring = &boundary.exterior;
    if ring.len() < 4 {
        return Err(ValidationError::new("ring_too_short"));
    }
    if ring.first() != ring.last() {
        return Err(ValidationError::new("ring_not_closed"));
    }
    let in_bounds = ring.iter().all(|[lon, lat]| {
        lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(lon)
            && (-90.0..=90.0).contains(lat)
    });
    if !in_bounds {
        return Err(ValidationError::new("coordinate_out_of_range"));
    }
    Ok(())
}

fn default_index_types() -> Vec<IndexType> {
    vec![IndexType::Ndvi]
}

fn default_active() -> bool {
    true
}

/// A registered parcel monitored for vegetation health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Parcel {
    pub id: ParcelId,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(custom(function = "validate_boundary"))]
    pub boundary: Boundary,
    #[serde(default)]
    pub cadence: Cadence,
    #[serde(default = "default_index_types")]
    #[validate(length(min = 1))]
    pub index_types: Vec<IndexType>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Parcel {
    /// Creates an active, daily NDVI parcel.
    pub fn new(name: impl Into<String>, boundary: Boundary) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            boundary,
            cadence: Cadence::Daily,
            index_types: default_index_types(),
            active: true,
        }
    }

    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_index_types(mut self, index_types: Vec<IndexType>) -> Self {
        self.index_types = index_types;
        self
    }
}
