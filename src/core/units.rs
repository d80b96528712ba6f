//! Pressure-unit conversion and membrane surface-area derivation.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Bar per PSI.
pub const PSI_TO_BAR: f64 = 0.0689476;

/// Bar per MPa.
pub const MPA_TO_BAR: f64 = 10.0;

/// Unit the applied pressures were recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PressureUnit {
    Bar,
    Psi,
    MPa,
}

impl PressureUnit {
    /// Multiplier that converts a value in this unit to bar.
    pub fn bar_factor(self) -> f64 {
        match self {
            PressureUnit::Bar => 1.0,
            PressureUnit::Psi => PSI_TO_BAR,
            PressureUnit::MPa => MPA_TO_BAR,
        }
    }

    /// Convert a pressure in this unit to bar.
    pub fn to_bar(self, value: f64) -> f64 {
        value * self.bar_factor()
    }

    /// Convert a pressure in bar back to this unit.
    pub fn from_bar(self, bar: f64) -> f64 {
        bar / self.bar_factor()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PressureUnit::Bar => "bar",
            PressureUnit::Psi => "PSI",
            PressureUnit::MPa => "MPa",
        }
    }
}

impl FromStr for PressureUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(PressureUnit::Bar),
            "psi" => Ok(PressureUnit::Psi),
            "mpa" => Ok(PressureUnit::MPa),
            _ => Err(ConfigError::InvalidPressureUnit(s.to_string())),
        }
    }
}

impl TryFrom<String> for PressureUnit {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PressureUnit> for String {
    fn from(unit: PressureUnit) -> Self {
        unit.as_str().to_string()
    }
}

impl fmt::Display for PressureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a sequence of pressures to bar.
pub fn convert_pressures(unit: PressureUnit, values: &[f64]) -> Vec<f64> {
    values.iter().map(|&v| unit.to_bar(v)).collect()
}

/// Membrane format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MembraneType {
    FlatSheet,
    HollowFiber,
}

impl MembraneType {
    /// Short code used in lab configuration sheets.
    pub fn code(self) -> &'static str {
        match self {
            MembraneType::FlatSheet => "FS",
            MembraneType::HollowFiber => "HF",
        }
    }
}

impl FromStr for MembraneType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fs" | "flat_sheet" | "flat-sheet" => Ok(MembraneType::FlatSheet),
            "hf" | "hollow_fiber" | "hollow-fiber" => Ok(MembraneType::HollowFiber),
            _ => Err(ConfigError::InvalidMembraneType(s.to_string())),
        }
    }
}

impl TryFrom<String> for MembraneType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MembraneType> for String {
    fn from(kind: MembraneType) -> Self {
        kind.code().to_string()
    }
}

impl fmt::Display for MembraneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembraneType::FlatSheet => f.write_str("flat-sheet"),
            MembraneType::HollowFiber => f.write_str("hollow-fiber"),
        }
    }
}

/// Typed membrane geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MembraneGeometry {
    FlatSheet {
        unit_area_m2: f64,
        unit_count: u32,
    },
    HollowFiber {
        fiber_length_cm: f64,
        fiber_diameter_mm: f64,
        fiber_count: u32,
    },
}

impl MembraneGeometry {
    pub fn membrane_type(&self) -> MembraneType {
        match self {
            MembraneGeometry::FlatSheet { .. } => MembraneType::FlatSheet,
            MembraneGeometry::HollowFiber { .. } => MembraneType::HollowFiber,
        }
    }

    /// Active membrane area per load cell.
    ///
    /// Hollow fibers use the outer lateral surface, π·d·L, with the diameter
    /// given in millimetres and the length in centimetres.
    pub fn surface_area(&self) -> Result<SurfaceArea, ConfigError> {
        let area = match *self {
            MembraneGeometry::FlatSheet {
                unit_area_m2,
                unit_count,
            } => {
                positive("flat_sheet_area_m2", unit_area_m2)?;
                positive("units", f64::from(unit_count))?;
                unit_area_m2 * f64::from(unit_count)
            }
            MembraneGeometry::HollowFiber {
                fiber_length_cm,
                fiber_diameter_mm,
                fiber_count,
            } => {
                positive("fiber_length_cm", fiber_length_cm)?;
                positive("fiber_diameter_mm", fiber_diameter_mm)?;
                positive("units", f64::from(fiber_count))?;
                PI * (fiber_diameter_mm / 1000.0) * (fiber_length_cm / 100.0) * f64::from(fiber_count)
            }
        };

        SurfaceArea::new(area)
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositiveGeometry { field, value })
    }
}

/// Strictly positive membrane area in m².
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct SurfaceArea(f64);

impl SurfaceArea {
    pub fn new(m2: f64) -> Result<Self, ConfigError> {
        positive("surface_area_m2", m2)?;
        Ok(Self(m2))
    }

    pub fn m2(self) -> f64 {
        self.0
    }
}

impl fmt::Display for SurfaceArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} m²", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pressure_conversion_constants() {
        assert_relative_eq!(PressureUnit::Psi.to_bar(14.5038), 1.0, epsilon = 1e-5);
        assert_relative_eq!(PressureUnit::MPa.to_bar(0.1), 1.0, epsilon = 1e-12);
        assert_relative_eq!(PressureUnit::Bar.to_bar(3.5), 3.5);
    }

    #[test]
    fn test_pressure_conversion_inverts() {
        for unit in [PressureUnit::Bar, PressureUnit::Psi, PressureUnit::MPa] {
            for value in [0.0, 0.5, 1.0, 14.5038, 100.0] {
                assert_relative_eq!(unit.from_bar(unit.to_bar(value)), value, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_convert_pressures() {
        let bar = convert_pressures(PressureUnit::Psi, &[10.0, 20.0]);
        assert_relative_eq!(bar[0], 0.689476, epsilon = 1e-12);
        assert_relative_eq!(bar[1], 1.378952, epsilon = 1e-12);
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("PSI".parse::<PressureUnit>().unwrap(), PressureUnit::Psi);
        assert_eq!(" mpa ".parse::<PressureUnit>().unwrap(), PressureUnit::MPa);
        assert!(matches!(
            "kPa".parse::<PressureUnit>(),
            Err(ConfigError::InvalidPressureUnit(_))
        ));

        assert_eq!("HF".parse::<MembraneType>().unwrap(), MembraneType::HollowFiber);
        assert_eq!("flat-sheet".parse::<MembraneType>().unwrap(), MembraneType::FlatSheet);
        assert!(matches!(
            "spiral".parse::<MembraneType>(),
            Err(ConfigError::InvalidMembraneType(_))
        ));
    }

    #[test]
    fn test_flat_sheet_area() {
        let geometry = MembraneGeometry::FlatSheet {
            unit_area_m2: 0.0138,
            unit_count: 3,
        };
        assert_relative_eq!(geometry.surface_area().unwrap().m2(), 0.0414, epsilon = 1e-12);
    }

    #[test]
    fn test_hollow_fiber_area() {
        let geometry = MembraneGeometry::HollowFiber {
            fiber_length_cm: 25.0,
            fiber_diameter_mm: 1.0,
            fiber_count: 4,
        };
        assert_relative_eq!(
            geometry.surface_area().unwrap().m2(),
            PI * 0.001 * 0.25 * 4.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_non_positive_geometry_rejected() {
        let geometry = MembraneGeometry::HollowFiber {
            fiber_length_cm: -1.0,
            fiber_diameter_mm: 1.0,
            fiber_count: 4,
        };
        assert!(matches!(
            geometry.surface_area(),
            Err(ConfigError::NonPositiveGeometry {
                field: "fiber_length_cm",
                ..
            })
        ));
        assert!(SurfaceArea::new(0.0).is_err());
        assert!(SurfaceArea::new(f64::NAN).is_err());
    }
}
