use rayon::prelude::*;
use tracing::{info, instrument};

use crate::algorithm::aggregation::{IsotopeRatioInformation, RatioAggregator, REFERENCE_BUCKET};
use crate::algorithm::isotope::IsotopePatternExtractor;
use crate::algorithm::pattern::NormalizedPattern;
use crate::algorithm::quadrupole::EstimatedIsolationWindow;
use crate::chemistry::deviation::MassDeviation;
use crate::data::experiment::Experiment;
use crate::errors::{PreprocessingError, Result};

/// Minimum share of experiments with MS1 data that must contribute to the reference bucket.
pub const MIN_REFERENCE_COVERAGE: f64 = 0.05;

/// Fits an [`EstimatedIsolationWindow`] from the isotope patterns of a dataset.
#[derive(Clone, Debug)]
pub struct IsolationWindowEstimator {
    pub find_ms1_peak_deviation: MassDeviation,
    pub allowed_deviation: MassDeviation,
    pub max_window_size: f64,
    pub min_window_size: f64,
    pub rim_width: f64,
}

impl IsolationWindowEstimator {
    /// Extracts, normalizes and aggregates all patterns and builds the window curve.
    ///
    /// # Arguments
    ///
    /// * `experiments` - the dataset's experiments
    /// * `median_noise_intensity` - median MS2 noise intensity of the dataset
    ///
    /// # Errors
    ///
    /// `InsufficientData` if the reference bucket got no samples or too few experiments contributed to it.
    #[instrument(skip_all, level = "debug")]
    pub fn estimate(&self, experiments: &[Experiment], median_noise_intensity: f64) -> Result<(EstimatedIsolationWindow, IsotopeRatioInformation)> {
        let extractor = IsotopePatternExtractor::new(
            self.find_ms1_peak_deviation,
            self.allowed_deviation,
            self.max_window_size,
            median_noise_intensity,
        );

        let mut patterns: Vec<NormalizedPattern> = experiments
            .par_iter()
            .enumerate()
            .flat_map_iter(|(index, experiment)| {
                extractor.extract(experiment)
                    .into_iter()
                    .filter_map(move |pair| NormalizedPattern::new(index, experiment.ion_mass, &pair))
            })
            .collect();

        info!("Aggregating {} isotope patterns", patterns.len());
        let information = RatioAggregator::new().aggregate(&mut patterns);

        let with_ms1 = experiments.iter().filter(|e| e.has_ms1()).count();
        if information.reference_sample_count() == 0 {
            return Err(PreprocessingError::InsufficientData("no isotope pattern reached the precursor bucket".to_string()));
        }
        if (information.reference_contributors as f64) < MIN_REFERENCE_COVERAGE * with_ms1 as f64 {
            return Err(PreprocessingError::InsufficientData(format!(
                "only {} of {} experiments contributed to the precursor bucket",
                information.reference_contributors, with_ms1
            )));
        }

        let window = EstimatedIsolationWindow::new(
            control_points(&information),
            self.max_window_size,
            self.min_window_size,
            self.rim_width,
        )?;
        Ok((window, information))
    }
}

/// Control points of the window curve: corrected m/z and clamped ratio of every resolved bucket.
///
/// The reference bucket is pinned to 0. Points that would break the strict ordering are skipped.
pub fn control_points(information: &IsotopeRatioInformation) -> Vec<(f64, f64)> {
    let mut points: Vec<(f64, f64)> = Vec::new();
    for (bucket, mz, ratio) in information.resolved() {
        let x = if bucket == REFERENCE_BUCKET { 0.0 } else { mz };
        let ratio = ratio.clamp(0.0, 1.0);
        match points.last() {
            Some(&(last, _)) if x <= last => continue,
            _ => points.push((x, ratio)),
        }
    }
    points
}
