//! Permeance model: per-channel linear regression of flux on pressure.

use crate::core::table::FluxTable;
use crate::models::{write_csv_rows, OutputError};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Sub-directory of the output directory for permeance results.
pub const PERMEANCE_DIR: &str = "permeance";

/// Permeance table inside [`PERMEANCE_DIR`].
pub const PERMEANCE_FILE: &str = "permeance_values.csv";

/// Ordinary least-squares line `flux = slope * pressure + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    /// Permeance (LMH/bar)
    pub slope: f64,
    /// Flux at zero pressure (LMH)
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn evaluate(&self, pressure_bar: f64) -> f64 {
        self.slope * pressure_bar + self.intercept
    }

    /// Trend-line values at each pressure, for plotting.
    pub fn trend_line(&self, pressures_bar: &[f64]) -> Vec<f64> {
        pressures_bar.iter().map(|&p| self.evaluate(p)).collect()
    }
}

fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

/// Least-squares fit of `y` on `x`.
///
/// Returns `None` when `x` has no variance. When `y` has no variance the
/// correlation is taken as zero.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let var_x = x.iter().population_variance();
    let var_y = y.iter().population_variance();
    if !(var_x.is_finite() && var_x > 0.0) {
        return None;
    }
    let cov = x.iter().population_covariance(y.iter());

    let slope = cov / var_x;
    let intercept = y.iter().mean() - slope * x.iter().mean();
    let r = if var_y == 0.0 {
        0.0
    } else {
        (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared: r * r,
    })
}

/// Per-channel permeance with the mean and population standard deviation across channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermeanceFitResult {
    pub channels: Vec<LinearFit>,
    pub mean: LinearFit,
    pub std_dev: LinearFit,
}

impl PermeanceFitResult {
    fn summarize(channels: Vec<LinearFit>) -> Self {
        let column = |f: fn(&LinearFit) -> f64| channels.iter().map(f).collect::<Vec<_>>();
        let slopes = column(|c| c.slope);
        let intercepts = column(|c| c.intercept);
        let r_squared = column(|c| c.r_squared);

        let mean = LinearFit {
            slope: slopes.iter().mean(),
            intercept: intercepts.iter().mean(),
            r_squared: r_squared.iter().mean(),
        };
        let std_dev = LinearFit {
            slope: slopes.iter().population_std_dev(),
            intercept: intercepts.iter().population_std_dev(),
            r_squared: r_squared.iter().population_std_dev(),
        };

        Self {
            channels,
            mean,
            std_dev,
        }
    }

    /// Write `permeance_values.csv` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), OutputError> {
        let row = |label: String, fit: &LinearFit| {
            vec![
                label,
                fit.slope.to_string(),
                fit.intercept.to_string(),
                fit.r_squared.to_string(),
            ]
        };

        let rows = self
            .channels
            .iter()
            .enumerate()
            .map(|(i, fit)| row((i + 1).to_string(), fit))
            .chain([
                row("Mean".to_string(), &self.mean),
                row("Standard Deviation".to_string(), &self.std_dev),
            ]);

        let path = dir.join(PERMEANCE_FILE);
        write_csv_rows(
            &path,
            &["Specimen", "Permeance (LMH/bar)", "Intercept (LMH)", "r^2"],
            rows,
        )?;

        info!(path = %path.display(), "Saved permeance values");
        Ok(())
    }
}

/// Fit the permeance of every channel in `table`.
pub fn fit_permeance(table: &FluxTable) -> Result<PermeanceFitResult, PermeanceError> {
    if table.channel_count() == 0 {
        return Err(PermeanceError::NoChannels);
    }

    let pressures = table.pressures_bar();
    let distinct = distinct_count(&pressures);

    let channels = (0..table.channel_count())
        .map(|j| {
            linear_regression(&pressures, &table.channel_flux(j))
                .ok_or(PermeanceError::InsufficientData {
                    channel: j,
                    distinct,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let result = PermeanceFitResult::summarize(channels);
    info!(
        permeance = result.mean.slope,
        std_dev = result.std_dev.slope,
        "Fitted permeance model"
    );
    Ok(result)
}

/// Errors raised by the permeance model. They stop only this model.
#[derive(Debug, Error)]
pub enum PermeanceError {
    #[error(
        "Channel_{channel}: permeance needs at least 2 distinct pressures, got {distinct}"
    )]
    InsufficientData { channel: usize, distinct: usize },

    #[error("flux table has no channels")]
    NoChannels,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::{FluxCell, FluxMatrix};
    use crate::core::units::PressureUnit;
    use crate::series::TestEvent;
    use approx::assert_relative_eq;

    fn table(pressures: &[f64], slopes: &[f64]) -> FluxTable {
        let events: Vec<TestEvent> = pressures
            .iter()
            .enumerate()
            .map(|(i, &p)| TestEvent::new(format!("10:{:02}:00", i * 10), p))
            .collect();
        let mut matrix = FluxMatrix::new(slopes.len(), events.len());
        for (j, &slope) in slopes.iter().enumerate() {
            for (i, &p) in pressures.iter().enumerate() {
                matrix
                    .record(j, i, FluxCell::Measured(slope * p + 5.0))
                    .unwrap();
            }
        }
        FluxTable::build(&events, PressureUnit::Bar, &matrix).unwrap()
    }

    #[test]
    fn test_noise_free_regression() {
        let fit = linear_regression(&[1.0, 2.0, 3.0, 4.0], &[12.0, 22.0, 32.0, 42.0]).unwrap();
        assert_relative_eq!(fit.slope, 10.0, epsilon = 1e-9);
        assert_relative_eq!(fit.intercept, 2.0, epsilon = 1e-9);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.evaluate(5.0), 52.0, epsilon = 1e-9);
    }

    #[test]
    fn test_constant_flux_has_zero_r() {
        let fit = linear_regression(&[1.0, 2.0, 3.0], &[7.0, 7.0, 7.0]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.r_squared, 0.0);
    }

    #[test]
    fn test_fit_permeance_summary() {
        let result = fit_permeance(&table(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0])).unwrap();

        assert_eq!(result.channels.len(), 3);
        assert_relative_eq!(result.channels[1].slope, 20.0, epsilon = 1e-9);
        assert_relative_eq!(result.mean.slope, 20.0, epsilon = 1e-9);
        assert_relative_eq!(result.std_dev.slope, (200.0f64 / 3.0).sqrt(), epsilon = 1e-9);
        assert_relative_eq!(result.mean.intercept, 5.0, epsilon = 1e-9);
        assert_relative_eq!(result.mean.r_squared, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_pressure_is_insufficient() {
        let err = fit_permeance(&table(&[2.0, 2.0, 2.0], &[10.0])).unwrap_err();
        assert!(matches!(
            err,
            PermeanceError::InsufficientData {
                channel: 0,
                distinct: 1
            }
        ));
    }

    #[test]
    fn test_save_rows() {
        let dir = std::env::temp_dir()
            .join(format!("mfa-permeance-{}", uuid::Uuid::new_v4()))
            .join(PERMEANCE_DIR);
        let result = fit_permeance(&table(&[1.0, 2.0], &[10.0, 10.0])).unwrap();
        result.save(&dir).unwrap();

        let content = std::fs::read_to_string(dir.join(PERMEANCE_FILE)).unwrap();
        let specimens: Vec<&str> = content
            .lines()
            .map(|line| line.split(',').next().unwrap_or_default())
            .collect();
        assert_eq!(
            specimens,
            vec!["Specimen", "1", "2", "Mean", "Standard Deviation"]
        );

        if let Some(parent) = dir.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
