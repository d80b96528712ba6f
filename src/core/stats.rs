//! Per-event flux statistics across channels.

use crate::core::extractor::FluxMatrix;
use serde::Serialize;
use statrs::statistics::Statistics;

/// Mean, population standard deviation and relative standard error of one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EventStatistics {
    /// Mean flux across channels (LMH)
    pub average: f64,
    /// Population standard deviation (LMH)
    pub std_dev: f64,
    /// `std_dev / average * 100`; NaN when the average is zero
    pub se_percent: f64,
}

/// Statistics over the flux values of one event.
pub fn event_statistics(values: &[f64]) -> EventStatistics {
    let average = values.iter().mean();
    let std_dev = values.iter().population_std_dev();
    let se_percent = if average == 0.0 {
        f64::NAN
    } else {
        std_dev / average * 100.0
    };

    EventStatistics {
        average,
        std_dev,
        se_percent,
    }
}

/// Statistics for every event column of the matrix, in event order.
pub fn aggregate(matrix: &FluxMatrix) -> Vec<EventStatistics> {
    (0..matrix.event_count())
        .map(|i| event_statistics(&matrix.event_column(i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::FluxCell;
    use approx::assert_relative_eq;

    #[test]
    fn test_population_std() {
        let stats = event_statistics(&[10.0, 20.0, 30.0]);
        assert_relative_eq!(stats.average, 20.0, epsilon = 1e-12);
        // divisor N, not N - 1
        assert_relative_eq!(stats.std_dev, (200.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(stats.se_percent, stats.std_dev / 20.0 * 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_identical_channels() {
        let stats = event_statistics(&[42.0, 42.0, 42.0]);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.se_percent, 0.0);
    }

    #[test]
    fn test_zero_average_gives_nan_se() {
        let stats = event_statistics(&[0.0, 0.0]);
        assert_eq!(stats.average, 0.0);
        assert!(stats.se_percent.is_nan());
    }

    #[test]
    fn test_aggregate_counts_missing_as_zero() {
        let mut matrix = FluxMatrix::new(2, 1);
        matrix.record(0, 0, FluxCell::Measured(30.0)).unwrap();
        matrix.record(1, 0, FluxCell::Missing).unwrap();

        let stats = aggregate(&matrix);
        assert_eq!(stats.len(), 1);
        assert_relative_eq!(stats[0].average, 15.0, epsilon = 1e-12);
        assert_relative_eq!(stats[0].std_dev, 15.0, epsilon = 1e-12);
    }
}
