use std::cmp::Ordering;

use crate::algorithm::isotope::IsotopeEnvelopePair;

/// Rounds to the nearest multiple of 0.5.
///
/// # Example
///
/// ```rust
/// # use msprep::algorithm::pattern::round_half;
/// assert_eq!(round_half(0.26), 0.5);
/// assert_eq!(round_half(-1.1), -1.0);
/// assert_eq!(round_half(1.003), 1.0);
/// ```
pub fn round_half(value: f64) -> f64 {
    (value * 2.0).round() / 2.0
}

/// An MS1/MS2 envelope pair aligned relative to the precursor and scaled for comparison.
#[derive(Clone, Debug)]
pub struct NormalizedPattern {
    /// Index of the source experiment in the dataset.
    pub experiment: usize,
    pub ion_mass: f64,
    pub ms1_mz: Vec<f64>,
    pub ms1_intensity: Vec<f64>,
    pub ms2_mz: Vec<f64>,
    pub ms2_intensity: Vec<f64>,
    pub charge: u8,
    /// Position of the monoisotopic peak relative to the precursor, rounded to 0.5.
    pub mono_position: f64,
    /// Isotope at which MS1 and MS2 are scaled to each other.
    pub normalization_index: usize,
    /// MS1 to MS2 intensity ratio at the normalization index.
    pub scale_ratio: f64,
    /// Transmission ratio of the normalization isotope, once resolved.
    pub normalization_constant: Option<f64>,
}

impl NormalizedPattern {
    /// Normalizes an envelope pair. Returns `None` if the pair is too short to be compared.
    pub fn new(experiment: usize, ion_mass: f64, pair: &IsotopeEnvelopePair) -> Option<Self> {
        let length = pair.len();
        if length <= 1 {
            return None;
        }

        let ms1_mz: Vec<f64> = pair.ms1.spectrum.mz[..length].to_vec();
        let ms1_intensity: Vec<f64> = pair.ms1.spectrum.intensity[..length].to_vec();
        let ms2_mz: Vec<f64> = pair.ms2.spectrum.mz[..length].to_vec();
        let ms2_intensity: Vec<f64> = pair.ms2.spectrum.intensity[..length].to_vec();

        let mono_position = round_half(ms1_mz[0] - ion_mass);
        // the monoisotopic peak left of the precursor may be clipped by the window
        let normalization_index = if mono_position < 0.0 { 1 } else { 0 };
        if length <= normalization_index {
            return None;
        }

        let scale_ratio = ms1_intensity[normalization_index] / ms2_intensity[normalization_index];
        if !scale_ratio.is_finite() || scale_ratio <= 0.0 {
            return None;
        }

        Some(NormalizedPattern {
            experiment,
            ion_mass,
            ms1_mz,
            ms1_intensity,
            ms2_mz,
            ms2_intensity,
            charge: pair.charge(),
            mono_position,
            normalization_index,
            scale_ratio,
            normalization_constant: None,
        })
    }

    pub fn len(&self) -> usize {
        self.ms1_mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ms1_mz.is_empty()
    }

    /// Bucket of the isotope at `index`: its MS1 m/z relative to the precursor, rounded to 0.5.
    pub fn bucket(&self, index: usize) -> f64 {
        round_half(self.ms1_mz[index] - self.ion_mass)
    }

    /// MS2 to MS1 intensity ratio at `index`, rescaled by the pattern's scale ratio.
    ///
    /// Equals 1 at the normalization index.
    pub fn relative_ratio(&self, index: usize) -> f64 {
        self.ms2_intensity[index] / self.ms1_intensity[index] * self.scale_ratio
    }

    /// Mean of the MS1 and MS2 m/z at `index`, relative to the precursor.
    pub fn corrected_mz(&self, index: usize) -> f64 {
        (self.ms1_mz[index] + self.ms2_mz[index]) / 2.0 - self.ion_mass
    }

    /// Processing order: closest to the precursor first, right before left, longer first.
    pub fn processing_order(a: &NormalizedPattern, b: &NormalizedPattern) -> Ordering {
        a.mono_position.abs().total_cmp(&b.mono_position.abs())
            .then_with(|| b.mono_position.total_cmp(&a.mono_position))
            .then_with(|| b.len().cmp(&a.len()))
    }
}
