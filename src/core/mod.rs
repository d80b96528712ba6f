//! Core computations for a flux analysis run.
//!
//! This module contains:
//! - Unit, geometry and water-density normalization
//! - Centered smoothing of channel series
//! - Timestamp indexing and flux extraction
//! - Per-event statistics and the flux table

pub mod density;
pub mod extractor;
pub mod smoothing;
pub mod stats;
pub mod table;
pub mod timestamps;
pub mod units;

// Re-export commonly used types
pub use density::{is_within_kell_range, water_density};
pub use extractor::{flux_lmh, FluxCell, FluxError, FluxExtractor, FluxMatrix};
pub use smoothing::SmoothedSeries;
pub use stats::{aggregate, event_statistics, EventStatistics};
pub use table::{FluxRow, FluxTable, TableError, FLUX_TABLE_FILE};
pub use timestamps::{parse_event_time, parse_label_time, MatchPolicy, TimestampIndex};
pub use units::{MembraneGeometry, MembraneType, PressureUnit, SurfaceArea};
