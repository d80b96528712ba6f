//! Centered rolling mean over a channel's raw series.
//!
//! Each interior element is the unweighted mean of the `window` samples
//! centered on it. The first and last `window / 2` elements have no value.

use std::ops::Range;

/// A smoothed series of the same length as its source.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedSeries {
    values: Vec<Option<f64>>,
    window: usize,
}

impl SmoothedSeries {
    /// Smooth `raw` with a centered window of `window` samples.
    ///
    /// `window` is expected to be odd; an empty window or a series shorter
    /// than the window yields no defined values.
    pub fn centered(raw: &[f64], window: usize) -> Self {
        debug_assert!(window % 2 == 1, "smoothing window must be odd");

        Self {
            values: rolling_mean_centered(raw, window),
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of undefined samples at each boundary.
    pub fn half_width(&self) -> usize {
        self.window / 2
    }

    /// Smoothed value at `index`, or `None` inside the boundary margin or past the end.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    /// Index range holding defined values.
    pub fn valid_range(&self) -> Range<usize> {
        let half = self.half_width();
        if self.window == 0 || self.values.len() < self.window {
            return 0..0;
        }
        half..self.values.len() - half
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }
}

/// Centered rolling mean; boundary elements are `None`.
pub fn rolling_mean_centered(raw: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 || raw.len() < window {
        return vec![None; raw.len()];
    }

    let half = window / 2;
    let width = window as f64;

    let mut smoothed = Vec::with_capacity(raw.len());
    smoothed.extend(std::iter::repeat(None).take(half));
    smoothed.extend(
        raw.windows(window)
            .map(|w| Some(w.iter().sum::<f64>() / width)),
    );
    smoothed.resize(raw.len(), None);
    smoothed
}
