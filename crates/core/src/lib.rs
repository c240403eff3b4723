//! Core types, statistics, and validation for the vegetation monitor.

pub mod alert;
pub mod error;
pub mod observation;
pub mod parcel;
pub mod run_state;
pub mod series;
pub mod stats;

pub use alert::*;
pub use error::{Error, Result};
pub use observation::*;
pub use parcel::*;
pub use run_state::*;
pub use series::*;
pub use stats::{reduce, Statistics, ValidRange};
