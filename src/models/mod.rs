//! Downstream models fitted to a finished flux table.
//!
//! Both models only borrow the [`FluxTable`](crate::core::FluxTable); a
//! failure in one of them does not affect the other.

pub mod decline;
pub mod permeance;

use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Re-export commonly used types
pub use decline::{
    elapsed_minutes, fit_exponential_decay, DeclineFitOptions, ExponentialFitResult,
    ExponentialParams, FitError, FluxDeclineModel, DECLINE_DIR,
};
pub use permeance::{
    fit_permeance, linear_regression, LinearFit, PermeanceError, PermeanceFitResult,
    PERMEANCE_DIR, PERMEANCE_FILE,
};

/// Errors raised while writing model outputs.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("could not write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Write a CSV file with a header row, creating parent directories.
pub(crate) fn write_csv_rows<I>(path: &Path, headers: &[&str], rows: I) -> Result<(), OutputError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let io_error = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };
    let csv_error = |source| OutputError::Csv {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut writer = csv::Writer::from_writer(File::create(path).map_err(io_error)?);
    writer.write_record(headers).map_err(csv_error)?;
    for row in rows {
        writer.write_record(&row).map_err(csv_error)?;
    }
    writer.flush().map_err(io_error)
}
