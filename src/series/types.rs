//! Load-cell channel series and test events.

use crate::core::smoothing::SmoothedSeries;
use crate::core::timestamps::TimestampIndex;
use crate::core::units::PressureUnit;
use crate::series::SeriesError;
use serde::{Deserialize, Serialize};

/// Raw readings from one load cell.
///
/// Loaded once; the only later change is attaching the smoothed sequence.
#[derive(Debug, Clone)]
pub struct ChannelSeries {
    /// Load-cell index (matches `Channel_{index}.csv`)
    index: usize,
    /// Timestamp labels as written by the logger
    labels: Vec<String>,
    /// Mass (g) or volume (mL) readings
    readings: Vec<f64>,
    /// Smoothed volume, attached once before flux extraction
    smoothed: Option<SmoothedSeries>,
}

impl ChannelSeries {
    pub fn new(index: usize, labels: Vec<String>, readings: Vec<f64>) -> Result<Self, SeriesError> {
        if labels.len() != readings.len() {
            return Err(SeriesError::LengthMismatch {
                channel: index,
                labels: labels.len(),
                readings: readings.len(),
            });
        }
        if labels.is_empty() {
            return Err(SeriesError::EmptyChannel { channel: index });
        }

        Ok(Self {
            index,
            labels,
            readings,
            smoothed: None,
        })
    }

    /// Build a series from `(label, reading)` pairs.
    pub fn from_samples<I, S>(index: usize, samples: I) -> Result<Self, SeriesError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let (labels, readings) = samples
            .into_iter()
            .map(|(label, reading)| (label.into(), reading))
            .unzip();
        Self::new(index, labels, readings)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn readings(&self) -> &[f64] {
        &self.readings
    }

    /// Readings converted to millilitres.
    pub fn volumes(&self, density_factor: f64) -> Vec<f64> {
        self.readings.iter().map(|&r| r / density_factor).collect()
    }

    /// Attach a smoothed sequence of the same length.
    pub fn attach_smoothed(&mut self, smoothed: SmoothedSeries) -> Result<(), SeriesError> {
        if self.smoothed.is_some() {
            return Err(SeriesError::AlreadySmoothed {
                channel: self.index,
            });
        }
        if smoothed.len() != self.len() {
            return Err(SeriesError::SmoothedLengthMismatch {
                channel: self.index,
                expected: self.len(),
                found: smoothed.len(),
            });
        }

        self.smoothed = Some(smoothed);
        Ok(())
    }

    /// Convert to volume, smooth with a centered window and attach the result.
    pub fn smooth(&mut self, window: usize, density_factor: f64) -> Result<(), SeriesError> {
        let smoothed = SmoothedSeries::centered(&self.volumes(density_factor), window);
        self.attach_smoothed(smoothed)
    }

    pub fn smoothed(&self) -> Option<&SmoothedSeries> {
        self.smoothed.as_ref()
    }

    /// Index from parsed label time to row.
    pub fn timestamp_index(&self) -> TimestampIndex {
        TimestampIndex::build(self.labels.iter().map(String::as_str))
    }
}

/// A scheduled flux measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEvent {
    /// Start time label (HH:MM:SS)
    #[serde(rename = "Measurement Start time (24hr time)", alias = "start_time")]
    pub start_time: String,
    /// Applied pressure in the configured unit
    #[serde(rename = "Pressure", alias = "pressure")]
    pub pressure: f64,
}

impl TestEvent {
    pub fn new(start_time: impl Into<String>, pressure: f64) -> Self {
        Self {
            start_time: start_time.into(),
            pressure,
        }
    }

    pub fn pressure_bar(&self, unit: PressureUnit) -> f64 {
        unit.to_bar(self.pressure)
    }
}
