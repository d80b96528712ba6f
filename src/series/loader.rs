//! CSV loaders for channel exports and test conditions.
//!
//! Channel files are `data/Channel_{i}.csv` with a header row, the timestamp
//! label in the first column and the reading in the second.

use crate::series::types::{ChannelSeries, TestEvent};
use crate::series::SeriesError;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sub-directory of the input directory holding channel exports.
pub const DATA_DIR: &str = "data";

/// Test-condition schedule inside the input directory.
pub const TEST_CONDITIONS_FILE: &str = "test_conditions.csv";

/// Path of the export for load cell `index`.
pub fn channel_path(input_dir: &Path, index: usize) -> PathBuf {
    input_dir.join(DATA_DIR).join(format!("Channel_{index}.csv"))
}

fn open(path: &Path) -> Result<BufReader<File>, SeriesError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| SeriesError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Read one channel export.
pub fn read_channel<R: Read>(reader: R, index: usize, name: &str) -> Result<ChannelSeries, SeriesError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut labels = Vec::new();
    let mut readings = Vec::new();

    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|source| SeriesError::Csv {
            name: name.to_string(),
            source,
        })?;
        // header is line 1
        let line = i + 2;

        let missing = |column| SeriesError::MissingColumn {
            name: name.to_string(),
            line,
            column,
        };
        let label = record.get(0).ok_or_else(|| missing(0))?;
        let value = record.get(1).ok_or_else(|| missing(1))?;

        let reading: f64 = value.parse().map_err(|_| SeriesError::InvalidReading {
            name: name.to_string(),
            line,
            value: value.to_string(),
        })?;

        labels.push(label.to_string());
        readings.push(reading);
    }

    debug!(channel = index, samples = readings.len(), "Read channel export");
    ChannelSeries::new(index, labels, readings)
}

/// Load one channel export from disk.
pub fn load_channel(path: &Path, index: usize) -> Result<ChannelSeries, SeriesError> {
    read_channel(open(path)?, index, &path.display().to_string())
}

/// Load `Channel_0.csv` .. `Channel_{count-1}.csv` from an input directory.
pub fn load_channels(input_dir: &Path, count: usize) -> Result<Vec<ChannelSeries>, SeriesError> {
    let channels = (0..count)
        .map(|i| load_channel(&channel_path(input_dir, i), i))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        channels = channels.len(),
        samples = channels.iter().map(ChannelSeries::len).sum::<usize>(),
        "Loaded channel series"
    );
    Ok(channels)
}

/// Read the test-condition schedule.
pub fn read_test_events<R: Read>(reader: R, name: &str) -> Result<Vec<TestEvent>, SeriesError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let events = reader
        .deserialize()
        .collect::<Result<Vec<TestEvent>, _>>()
        .map_err(|source| SeriesError::Csv {
            name: name.to_string(),
            source,
        })?;

    if events.is_empty() {
        return Err(SeriesError::NoTestEvents {
            name: name.to_string(),
        });
    }

    Ok(events)
}

/// Load the test-condition schedule from disk.
pub fn load_test_events(path: &Path) -> Result<Vec<TestEvent>, SeriesError> {
    let events = read_test_events(open(path)?, &path.display().to_string())?;
    info!(events = events.len(), "Loaded test conditions");
    Ok(events)
}
