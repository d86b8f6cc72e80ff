use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algorithm::quadrupole::{DEFAULT_MIN_WINDOW_SIZE, DEFAULT_RIM_WIDTH};
use crate::chemistry::decomposer::FormulaConstraints;
use crate::chemistry::deviation::MassDeviation;
use crate::errors::{PreprocessingError, Result};

/// Configuration of the dataset preprocessing.
///
/// Missing fields in a JSON file fall back to the defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Deviation for matching isotope peaks (default: 10 ppm, 0.002 m/z)
    pub allowed_deviation: MassDeviation,
    /// Deviation for finding the precursor peak in MS1 and MS2 (default: 100 ppm, 0.1 m/z)
    pub find_ms1_peak_deviation: MassDeviation,
    /// Deviation of mass differences between peaks of one spectrum (default: 2.5 ppm, 0.001 m/z)
    pub mass_difference_deviation: MassDeviation,
    /// Nominal isolation window width, if known
    pub isolation_window_width: Option<f64>,
    /// Region searched for co-isolated envelopes when the width is unknown (default: 10.0)
    pub max_window_size: f64,
    /// Lower bound for the estimated window size (default: 1.0)
    pub min_window_size: f64,
    /// Linear decay width past the outermost control points (default: 0.5)
    pub rim_width: f64,
    /// Minimum number of MS2 peaks above noise (default: 5)
    pub min_number_of_peaks: usize,
    /// Precursor intensity relative to the MS1 base peak below which a compound is flagged (default: 0.01)
    pub low_intensity_relative: f64,
    /// Absolute precursor intensity below which a compound is flagged (default: 0.0)
    pub low_intensity_absolute: f64,
    /// Maximum filtered intensity of a single contaminant relative to the precursor (default: 0.33)
    pub chimeric_max_single_ratio: f64,
    /// Maximum summed filtered intensity of all contaminants relative to the precursor (default: 1.0)
    pub chimeric_max_summed_ratio: f64,
    /// Whether isotope peaks are removed from MS1 before the chimeric check (default: true)
    pub chimeric_remove_isotopes: bool,
    /// Element constraints used when no per-experiment prediction is available
    pub default_constraints: FormulaConstraints,
    /// Worker threads, 0 uses the rayon default (default: 0)
    pub num_threads: usize,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        PreprocessingConfig {
            allowed_deviation: MassDeviation::new(10.0, 0.002),
            find_ms1_peak_deviation: MassDeviation::new(100.0, 0.1),
            mass_difference_deviation: MassDeviation::new(2.5, 0.001),
            isolation_window_width: None,
            max_window_size: 10.0,
            min_window_size: DEFAULT_MIN_WINDOW_SIZE,
            rim_width: DEFAULT_RIM_WIDTH,
            min_number_of_peaks: 5,
            low_intensity_relative: 0.01,
            low_intensity_absolute: 0.0,
            chimeric_max_single_ratio: 0.33,
            chimeric_max_summed_ratio: 1.0,
            chimeric_remove_isotopes: true,
            default_constraints: FormulaConstraints::default(),
            num_threads: 0,
        }
    }
}

impl PreprocessingConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PreprocessingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects negative or non-finite mass deviations.
    pub fn validate(&self) -> Result<()> {
        let deviations = [
            ("allowed_deviation", &self.allowed_deviation),
            ("find_ms1_peak_deviation", &self.find_ms1_peak_deviation),
            ("mass_difference_deviation", &self.mass_difference_deviation),
        ];
        match deviations.iter().find(|(_, deviation)| !deviation.is_valid()) {
            Some((name, _)) => Err(PreprocessingError::InvalidDeviation(*name)),
            None => Ok(()),
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Window size the estimation and the chimeric check search in.
    pub fn search_window_size(&self, known_width: Option<f64>) -> f64 {
        known_width.or(self.isolation_window_width).unwrap_or(self.max_window_size)
    }
}
