//! Raw input series for a flux analysis run.
//!
//! This module holds the per-load-cell channel series and the scheduled test
//! events, plus the loaders that read them from the lab's CSV exports.

pub mod loader;
pub mod types;

use std::path::PathBuf;
use thiserror::Error;

// Re-export commonly used types
pub use loader::{
    channel_path, load_channel, load_channels, load_test_events, read_channel, read_test_events,
    DATA_DIR, TEST_CONDITIONS_FILE,
};
pub use types::{ChannelSeries, TestEvent};

/// Errors raised while loading or preparing input series.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("could not open {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{name}: {source}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },

    #[error("{name}: line {line} has no column {column}")]
    MissingColumn {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("{name}: line {line} has an invalid reading '{value}'")]
    InvalidReading {
        name: String,
        line: usize,
        value: String,
    },

    #[error("Channel_{channel} contains no samples")]
    EmptyChannel { channel: usize },

    #[error("Channel_{channel} has {labels} timestamps but {readings} readings")]
    LengthMismatch {
        channel: usize,
        labels: usize,
        readings: usize,
    },

    #[error("Channel_{channel} has already been smoothed")]
    AlreadySmoothed { channel: usize },

    #[error("Channel_{channel}: smoothed series has {found} samples, expected {expected}")]
    SmoothedLengthMismatch {
        channel: usize,
        expected: usize,
        found: usize,
    },

    #[error("{name} contains no test events")]
    NoTestEvents { name: String },
}
