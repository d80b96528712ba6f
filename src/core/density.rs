//! Density of water as a function of temperature (Kell, 1975).

use std::ops::RangeInclusive;

/// Temperature range, in °C, over which Kell's correlation is fitted.
pub const KELL_VALID_RANGE_C: RangeInclusive<f64> = 0.0..=100.0;

/// Density of air-free water in g/mL at `temperature_c` degrees Celsius.
pub fn water_density(temperature_c: f64) -> f64 {
    let t = temperature_c;
    let numerator = 999.83952 + 16.945176 * t - 7.9870401e-3 * t.powi(2)
        - 46.170461e-6 * t.powi(3)
        + 105.56302e-9 * t.powi(4)
        - 280.54253e-12 * t.powi(5);
    let denominator = 1.0 + 16.879850e-3 * t;

    // kg/m³ -> g/mL
    numerator / denominator / 1000.0
}

pub fn is_within_kell_range(temperature_c: f64) -> bool {
    KELL_VALID_RANGE_C.contains(&temperature_c)
}
