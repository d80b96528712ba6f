//! The flux table: one row per test event.
//!
//! This is the artifact written as `flux_values.csv` and the only input of
//! the downstream models, which can also load it back from disk.

use crate::core::extractor::FluxMatrix;
use crate::core::stats::{aggregate, EventStatistics};
use crate::core::units::PressureUnit;
use crate::series::TestEvent;
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// File name of the flux table inside the output directory.
pub const FLUX_TABLE_FILE: &str = "flux_values.csv";

const START_TIME_COLUMN: &str = "Measurement Start time (24hr time)";
const PRESSURE_COLUMN: &str = "Pressure (bar)";
const AVERAGE_COLUMN: &str = "Average Flux (LMH)";
const STD_COLUMN: &str = "Standard Deviation (LMH)";
const SE_COLUMN: &str = "Standard Error (%)";

fn channel_column(index: usize) -> String {
    format!("Flux {index} (LMH)")
}

/// One test event with its per-channel flux and statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxRow {
    pub start_time: String,
    pub pressure_bar: f64,
    /// Flux per channel (LMH), missing samples as zero
    pub flux: Vec<f64>,
    pub stats: EventStatistics,
}

/// Flux values and statistics for every event of a run, in event order.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxTable {
    channel_count: usize,
    rows: Vec<FluxRow>,
}

impl FluxTable {
    /// Assemble the table from the schedule and the extracted matrix.
    pub fn build(
        events: &[TestEvent],
        unit: PressureUnit,
        matrix: &FluxMatrix,
    ) -> Result<Self, TableError> {
        if events.len() != matrix.event_count() {
            return Err(TableError::EventCountMismatch {
                events: events.len(),
                columns: matrix.event_count(),
            });
        }

        let rows = events
            .iter()
            .zip(aggregate(matrix))
            .enumerate()
            .map(|(i, (event, stats))| FluxRow {
                start_time: event.start_time.clone(),
                pressure_bar: event.pressure_bar(unit),
                flux: matrix.event_column(i),
                stats,
            })
            .collect();

        Ok(Self {
            channel_count: matrix.channel_count(),
            rows,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[FluxRow] {
        &self.rows
    }

    pub fn start_times(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.start_time.as_str()).collect()
    }

    pub fn pressures_bar(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.pressure_bar).collect()
    }

    pub fn average_flux(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.stats.average).collect()
    }

    pub fn std_flux(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.stats.std_dev).collect()
    }

    /// Flux of one channel across all events.
    pub fn channel_flux(&self, channel: usize) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| r.flux.get(channel).copied().unwrap_or(0.0))
            .collect()
    }

    fn headers(&self) -> Vec<String> {
        let mut headers = vec![START_TIME_COLUMN.to_string(), PRESSURE_COLUMN.to_string()];
        headers.extend((0..self.channel_count).map(channel_column));
        headers.extend([AVERAGE_COLUMN, STD_COLUMN, SE_COLUMN].map(String::from));
        headers
    }

    /// Write the table as CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut writer = WriterBuilder::new().from_writer(writer);
        writer.write_record(self.headers())?;

        for row in &self.rows {
            let mut record = vec![row.start_time.clone(), row.pressure_bar.to_string()];
            record.extend(row.flux.iter().map(f64::to_string));
            record.extend(
                [row.stats.average, row.stats.std_dev, row.stats.se_percent].map(|v| v.to_string()),
            );
            writer.write_record(&record)?;
        }

        writer.flush().map_err(|source| TableError::Io {
            path: PathBuf::from(FLUX_TABLE_FILE),
            source,
        })
    }

    /// Write the table to `path`, creating parent directories.
    pub fn save_csv(&self, path: &Path) -> Result<(), TableError> {
        let io_error = |source| TableError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let file = File::create(path).map_err(io_error)?;
        self.write_csv(file)?;

        info!(path = %path.display(), rows = self.len(), "Saved flux table");
        Ok(())
    }

    /// Read a table previously written by [`FluxTable::write_csv`].
    pub fn read_csv<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let position = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| TableError::MissingColumn(name.to_string()))
        };

        let start_col = position(START_TIME_COLUMN)?;
        let pressure_col = position(PRESSURE_COLUMN)?;
        let average_col = position(AVERAGE_COLUMN)?;
        let std_col = position(STD_COLUMN)?;
        let se_col = position(SE_COLUMN)?;

        let channel_cols: Vec<usize> = (0..)
            .map_while(|i| headers.iter().position(|h| h == channel_column(i)))
            .collect();

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let line = i + 2;
            let number = |col: usize| parse_number(&record, &headers, col, line);

            rows.push(FluxRow {
                start_time: record
                    .get(start_col)
                    .ok_or(TableError::RaggedRow { line })?
                    .to_string(),
                pressure_bar: number(pressure_col)?,
                flux: channel_cols
                    .iter()
                    .map(|&col| number(col))
                    .collect::<Result<_, _>>()?,
                stats: EventStatistics {
                    average: number(average_col)?,
                    std_dev: number(std_col)?,
                    se_percent: number(se_col)?,
                },
            });
        }

        Ok(Self {
            channel_count: channel_cols.len(),
            rows,
        })
    }

    /// Load a flux table from disk.
    pub fn load_csv(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_csv(file)
    }
}

fn parse_number(
    record: &StringRecord,
    headers: &StringRecord,
    col: usize,
    line: usize,
) -> Result<f64, TableError> {
    let value = record.get(col).ok_or(TableError::RaggedRow { line })?;
    value.parse().map_err(|_| TableError::InvalidNumber {
        line,
        column: headers.get(col).unwrap_or_default().to_string(),
        value: value.to_string(),
    })
}

/// Errors raised while building, writing or reading a flux table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("could not access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("flux table is missing column '{0}'")]
    MissingColumn(String),

    #[error("line {line}: column '{column}' has an invalid number '{value}'")]
    InvalidNumber {
        line: usize,
        column: String,
        value: String,
    },

    #[error("line {line} has fewer columns than the header")]
    RaggedRow { line: usize },

    #[error("{events} test events but the flux matrix has {columns} event columns")]
    EventCountMismatch { events: usize, columns: usize },
}
