use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::chemistry::constants::{MAX_NEUTRON_MASS_DEFECT, MIN_NEUTRON_MASS_DEFECT};

/// Mass tolerance given as a relative (ppm) and an absolute (Da) part.
///
/// The effective tolerance at a given mass is the larger of both parts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassDeviation {
    pub ppm: f64,
    pub absolute: f64,
}

impl MassDeviation {
    pub fn new(ppm: f64, absolute: f64) -> Self {
        MassDeviation { ppm, absolute }
    }

    /// Absolute tolerance in Da at the given mass.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msprep::chemistry::deviation::MassDeviation;
    /// let dev = MassDeviation::new(10.0, 0.002);
    /// assert!((dev.absolute_for(100.0) - 0.002).abs() < 1e-12);
    /// assert!((dev.absolute_for(1000.0) - 0.01).abs() < 1e-12);
    /// ```
    pub fn absolute_for(&self, mass: f64) -> f64 {
        (self.ppm * mass * 1e-6).max(self.absolute)
    }

    /// Whether `value` lies within the tolerance around `center`.
    pub fn in_error_window(&self, center: f64, value: f64) -> bool {
        (center - value).abs() <= self.absolute_for(center)
    }

    /// Scales both parts of the deviation.
    pub fn multiply(&self, factor: f64) -> Self {
        MassDeviation::new(self.ppm * factor, self.absolute * factor)
    }

    pub fn is_valid(&self) -> bool {
        self.ppm.is_finite() && self.absolute.is_finite() && self.ppm >= 0.0 && self.absolute >= 0.0
    }
}

impl Display for MassDeviation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ppm ({} m/z)", self.ppm, self.absolute)
    }
}

/// Bounds of the per-neutron mass defect of an element alphabet.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MassDefectBounds {
    pub min_defect: f64,
    pub max_defect: f64,
}

impl Default for MassDefectBounds {
    fn default() -> Self {
        MassDefectBounds {
            min_defect: MIN_NEUTRON_MASS_DEFECT,
            max_defect: MAX_NEUTRON_MASS_DEFECT,
        }
    }
}

impl MassDefectBounds {
    /// Mass range in which the `isotope`-th isotope peak of `mono_mz` is expected.
    ///
    /// # Arguments
    ///
    /// * `mono_mz` - m/z of the monoisotopic peak
    /// * `isotope` - isotope offset (1 = first isotope peak)
    /// * `deviation` - measurement deviation added on both sides
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msprep::chemistry::deviation::{MassDefectBounds, MassDeviation};
    /// let bounds = MassDefectBounds::default();
    /// let (low, high) = bounds.isotopic_mass_window(300.0, 1, &MassDeviation::new(0.0, 0.0));
    /// assert!(low < 301.003355 && 301.003355 < high);
    /// ```
    pub fn isotopic_mass_window(&self, mono_mz: f64, isotope: usize, deviation: &MassDeviation) -> (f64, f64) {
        let k = isotope as f64;
        let low = mono_mz + k + self.min_defect * k;
        let high = mono_mz + k + self.max_defect * k;
        (low - deviation.absolute_for(low), high + deviation.absolute_for(high))
    }
}
