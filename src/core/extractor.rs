//! Flux extraction from smoothed channel series.
//!
//! For every (channel, event) pair the event start time is located in the
//! channel's timestamp index, and the smoothed volume gained over the test
//! duration is turned into a flux in litres per m² per hour (LMH).

use crate::config::RunParameters;
use crate::core::timestamps::parse_event_time;
use crate::core::units::SurfaceArea;
use crate::diagnostics::RunLog;
use crate::series::{ChannelSeries, TestEvent};
use chrono::NaiveTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One extracted flux value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FluxCell {
    /// Flux computed from data, in LMH
    Measured(f64),
    /// No sample matched the event start time
    Missing,
}

impl FluxCell {
    /// Flux in LMH; a missing cell reads as zero.
    pub fn lmh(self) -> f64 {
        match self {
            FluxCell::Measured(value) => value,
            FluxCell::Missing => 0.0,
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, FluxCell::Missing)
    }
}

/// Flux cells indexed by (channel, event). Each cell is written once.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxMatrix {
    channels: usize,
    events: usize,
    cells: Vec<Option<FluxCell>>,
}

impl FluxMatrix {
    pub fn new(channels: usize, events: usize) -> Self {
        Self {
            channels,
            events,
            cells: vec![None; channels * events],
        }
    }

    fn offset(&self, channel: usize, event: usize) -> Result<usize, FluxError> {
        if channel >= self.channels || event >= self.events {
            return Err(FluxError::CellOutOfBounds { channel, event });
        }
        Ok(channel * self.events + event)
    }

    /// Write a cell. Writing the same cell twice is an error.
    pub fn record(
        &mut self,
        channel: usize,
        event: usize,
        cell: FluxCell,
    ) -> Result<(), FluxError> {
        let offset = self.offset(channel, event)?;
        let slot = &mut self.cells[offset];
        if slot.is_some() {
            return Err(FluxError::CellAlreadyWritten { channel, event });
        }
        *slot = Some(cell);
        Ok(())
    }

    /// The cell at (channel, event), if written.
    pub fn cell(&self, channel: usize, event: usize) -> Option<FluxCell> {
        self.offset(channel, event)
            .ok()
            .and_then(|offset| self.cells[offset])
    }

    /// Flux in LMH at (channel, event); missing or unwritten cells read as zero.
    pub fn flux(&self, channel: usize, event: usize) -> f64 {
        self.cell(channel, event).map_or(0.0, FluxCell::lmh)
    }

    /// Flux of every channel for one event.
    pub fn event_column(&self, event: usize) -> Vec<f64> {
        (0..self.channels).map(|j| self.flux(j, event)).collect()
    }

    /// Flux of one channel across all events.
    pub fn channel_row(&self, channel: usize) -> Vec<f64> {
        (0..self.events).map(|i| self.flux(channel, i)).collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Whether every cell has been written.
    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    pub fn missing_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| matches!(cell, Some(FluxCell::Missing)))
            .count()
    }
}

/// Flux in LMH for a smoothed volume gain in millilitres.
pub fn flux_lmh(delta_ml: f64, area: SurfaceArea, duration_s: f64) -> f64 {
    let litres = delta_ml / 1000.0;
    let hours = duration_s / 3600.0;
    litres / area.m2() / hours
}

/// Computes the flux matrix for one run.
pub struct FluxExtractor<'a> {
    params: &'a RunParameters,
}

impl<'a> FluxExtractor<'a> {
    pub fn new(params: &'a RunParameters) -> Self {
        Self { params }
    }

    /// Extract one flux cell per (channel, event).
    ///
    /// Every channel must already carry its smoothed series. Events with no
    /// matching sample become [`FluxCell::Missing`] and are recorded in `log`.
    pub fn extract(
        &self,
        channels: &[ChannelSeries],
        events: &[TestEvent],
        log: &mut RunLog,
    ) -> Result<FluxMatrix, FluxError> {
        if channels.len() != self.params.channel_count {
            return Err(FluxError::ChannelCountMismatch {
                expected: self.params.channel_count,
                found: channels.len(),
            });
        }

        let event_times = events
            .iter()
            .enumerate()
            .map(|(i, event)| {
                parse_event_time(&event.start_time).ok_or_else(|| FluxError::InvalidEventTime {
                    event: i,
                    label: event.start_time.clone(),
                })
            })
            .collect::<Result<Vec<NaiveTime>, _>>()?;

        let mut matrix = FluxMatrix::new(channels.len(), events.len());

        for (j, channel) in channels.iter().enumerate() {
            self.extract_channel(j, channel, events, &event_times, &mut matrix, log)?;
        }

        info!(
            channels = matrix.channel_count(),
            events = matrix.event_count(),
            missing = matrix.missing_count(),
            "Extracted flux matrix"
        );
        Ok(matrix)
    }

    fn extract_channel(
        &self,
        j: usize,
        channel: &ChannelSeries,
        events: &[TestEvent],
        event_times: &[NaiveTime],
        matrix: &mut FluxMatrix,
        log: &mut RunLog,
    ) -> Result<(), FluxError> {
        let smoothed = channel
            .smoothed()
            .ok_or(FluxError::NotSmoothed { channel: j })?;
        let valid = smoothed.valid_range();

        let index = channel.timestamp_index();
        if index.unparsed_count() > 0 {
            warn!(
                channel = j,
                unparsed = index.unparsed_count(),
                "Skipped timestamp labels with no recognizable time"
            );
            log.record_unparsed_labels(index.unparsed_count());
        }

        for (i, (event, &time)) in events.iter().zip(event_times).enumerate() {
            let Some(t0) = index.lookup(time, self.params.match_policy) else {
                warn!(channel = j, start_time = %event.start_time, "No sample matches event start time");
                log.record_missing_sample(j, &event.start_time);
                matrix.record(j, i, FluxCell::Missing)?;
                continue;
            };

            if t0 < valid.start {
                return Err(FluxError::EventInSmoothingMargin {
                    channel: j,
                    start_time: event.start_time.clone(),
                    index: t0,
                    margin: valid.start,
                });
            }

            let t1 = t0 + self.params.offset_samples;
            let out_of_range = || FluxError::DurationOutOfRange {
                channel: j,
                start_time: event.start_time.clone(),
                index: t1,
                available: valid.end,
            };
            if t1 >= valid.end {
                return Err(out_of_range());
            }
            let (Some(start), Some(end)) = (smoothed.get(t0), smoothed.get(t1)) else {
                return Err(out_of_range());
            };

            let flux = flux_lmh(end - start, self.params.surface_area, self.params.duration_s);
            debug!(channel = j, event = i, t0, t1, flux, "Flux cell");

            matrix.record(j, i, FluxCell::Measured(flux))?;
            log.record_measured_cell();
        }

        Ok(())
    }
}

/// Errors raised while extracting flux.
#[derive(Debug, Error)]
pub enum FluxError {
    #[error(
        "Channel_{channel}, event at {start_time}: bracket end index {index} is past the last smoothed sample ({available} available); shorten the test duration or record longer"
    )]
    DurationOutOfRange {
        channel: usize,
        start_time: String,
        index: usize,
        available: usize,
    },

    #[error(
        "Channel_{channel}, event at {start_time}: start index {index} falls inside the leading smoothing margin of {margin} samples"
    )]
    EventInSmoothingMargin {
        channel: usize,
        start_time: String,
        index: usize,
        margin: usize,
    },

    #[error("event {event} has an invalid start time '{label}'")]
    InvalidEventTime { event: usize, label: String },

    #[error("flux cell (Channel_{channel}, event {event}) was already written")]
    CellAlreadyWritten { channel: usize, event: usize },

    #[error("flux cell (Channel_{channel}, event {event}) is out of bounds")]
    CellOutOfBounds { channel: usize, event: usize },

    #[error("expected {expected} channel series, found {found}")]
    ChannelCountMismatch { expected: usize, found: usize },

    #[error("Channel_{channel} has not been smoothed")]
    NotSmoothed { channel: usize },
}
