use bincode::{Decode, Encode};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::{debug, info, instrument};

use crate::chemistry::decomposer::{DecomposabilityOracle, FormulaConstraints};
use crate::chemistry::deviation::{MassDefectBounds, MassDeviation};
use crate::chemistry::ionization::IonType;
use crate::data::experiment::Experiment;
use crate::data::spectrum::MzSpectrum;

/// Widening of the allowed deviation for decomposability checks.
pub const DECOMPOSITION_DEVIATION_FACTOR: f64 = 4.0;
/// Peaks this far above the precursor m/z are checked as a group.
pub const HIGH_MASS_MARGIN: f64 = 5.0;
/// Isotope positions of an explained peak that are also treated as signal.
pub const MAX_SATELLITE_ISOTOPES: usize = 5;

/// Accumulates intensity statistics during one pass over a dataset.
///
/// Median and percentiles are computed lazily and invalidated by further additions.
#[derive(Clone, Debug, Default)]
pub struct DatasetStatistics {
    min_ms1_intensities: Vec<f64>,
    max_ms1_intensities: Vec<f64>,
    min_ms2_intensities: Vec<f64>,
    max_ms2_intensities: Vec<f64>,
    noise_intensities: Vec<f64>,
    sorted_noise: Option<Vec<f64>>,
}

impl DatasetStatistics {
    pub fn new() -> Self {
        DatasetStatistics::default()
    }

    pub fn add_ms1_spectrum(&mut self, spectrum: &MzSpectrum) {
        if spectrum.is_empty() {
            return;
        }
        self.min_ms1_intensities.push(spectrum.min_intensity());
        self.max_ms1_intensities.push(spectrum.max_intensity());
    }

    pub fn add_ms2_spectrum(&mut self, spectrum: &MzSpectrum) {
        if spectrum.is_empty() {
            return;
        }
        self.min_ms2_intensities.push(spectrum.min_intensity());
        self.max_ms2_intensities.push(spectrum.max_intensity());
    }

    pub fn add_noise_intensity(&mut self, intensity: f64) {
        self.noise_intensities.push(intensity);
        self.sorted_noise = None;
    }

    /// Appends all values of another accumulator.
    pub fn extend(&mut self, other: DatasetStatistics) {
        self.min_ms1_intensities.extend(other.min_ms1_intensities);
        self.max_ms1_intensities.extend(other.max_ms1_intensities);
        self.min_ms2_intensities.extend(other.min_ms2_intensities);
        self.max_ms2_intensities.extend(other.max_ms2_intensities);
        if !other.noise_intensities.is_empty() {
            self.noise_intensities.extend(other.noise_intensities);
            self.sorted_noise = None;
        }
    }

    fn sorted_noise(&mut self) -> &[f64] {
        let noise = &self.noise_intensities;
        self.sorted_noise.get_or_insert_with(|| {
            let mut sorted = noise.clone();
            sorted.sort_by(|a, b| a.total_cmp(b));
            sorted
        })
    }

    /// Median noise intensity, the element at index `n / 2` of the sorted samples.
    pub fn median_noise_intensity(&mut self) -> f64 {
        let sorted = self.sorted_noise();
        if sorted.is_empty() { 0.0 } else { sorted[sorted.len() / 2] }
    }

    pub fn noise_count(&self) -> usize {
        self.noise_intensities.len()
    }

    /// Freezes the accumulated values into an immutable snapshot.
    pub fn freeze(mut self) -> DatasetStatisticsSnapshot {
        let median_noise_intensity = self.median_noise_intensity();
        let sorted_noise = self.sorted_noise.take().unwrap_or_default();
        let mean_noise_intensity = if sorted_noise.is_empty() { 0.0 } else { sorted_noise.iter().mean() };

        DatasetStatisticsSnapshot {
            min_ms1_intensity: min_of(&self.min_ms1_intensities),
            max_ms1_intensity: max_of(&self.max_ms1_intensities),
            min_ms2_intensity: min_of(&self.min_ms2_intensities),
            max_ms2_intensity: max_of(&self.max_ms2_intensities),
            median_noise_intensity,
            mean_noise_intensity,
            noise_intensities: sorted_noise,
        }
    }
}

fn min_of(values: &[f64]) -> f64 {
    if values.is_empty() { 0.0 } else { values.iter().cloned().fold(f64::INFINITY, f64::min) }
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().cloned().fold(0.0, f64::max)
}

/// Frozen statistics of a dataset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct DatasetStatisticsSnapshot {
    pub min_ms1_intensity: f64,
    pub max_ms1_intensity: f64,
    pub min_ms2_intensity: f64,
    pub max_ms2_intensity: f64,
    pub median_noise_intensity: f64,
    pub mean_noise_intensity: f64,
    /// Sorted noise intensities.
    pub noise_intensities: Vec<f64>,
}

impl DatasetStatisticsSnapshot {
    pub fn max_noise_intensity(&self) -> f64 {
        self.noise_intensities.last().cloned().unwrap_or(0.0)
    }

    /// Noise intensity percentile, `tau` in 0..=100.
    pub fn noise_percentile(&self, tau: usize) -> f64 {
        if self.noise_intensities.is_empty() {
            return 0.0;
        }
        Data::new(self.noise_intensities.clone()).percentile(tau)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        let (snapshot, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(snapshot)
    }
}

/// Collects intensity extremes and separates noise from explainable MS2 peaks.
pub struct DatasetStatisticsCollector<'a> {
    oracle: &'a dyn DecomposabilityOracle,
    ionizations: Vec<IonType>,
    allowed_deviation: MassDeviation,
    mass_difference_deviation: MassDeviation,
    defect_bounds: MassDefectBounds,
    default_constraints: FormulaConstraints,
}

impl<'a> DatasetStatisticsCollector<'a> {
    pub fn new(
        oracle: &'a dyn DecomposabilityOracle,
        ionizations: Vec<IonType>,
        allowed_deviation: MassDeviation,
        mass_difference_deviation: MassDeviation,
        default_constraints: FormulaConstraints,
    ) -> Self {
        DatasetStatisticsCollector {
            oracle,
            ionizations,
            allowed_deviation,
            mass_difference_deviation,
            defect_bounds: MassDefectBounds::default(),
            default_constraints,
        }
    }

    /// One pass over all experiments. Per-experiment work runs in parallel.
    #[instrument(skip_all, level = "debug")]
    pub fn collect(&self, experiments: &[Experiment]) -> DatasetStatisticsSnapshot {
        let partials: Vec<DatasetStatistics> = experiments
            .par_iter()
            .map(|experiment| self.collect_experiment(experiment))
            .collect();

        let mut statistics = DatasetStatistics::new();
        for partial in partials {
            statistics.extend(partial);
        }

        let noise_peaks = statistics.noise_count();
        let snapshot = statistics.freeze();
        info!(
            "Collected {} noise peaks, median noise intensity {:.4}",
            noise_peaks,
            snapshot.median_noise_intensity
        );
        snapshot
    }

    fn collect_experiment(&self, experiment: &Experiment) -> DatasetStatistics {
        let mut statistics = DatasetStatistics::new();
        let constraints = experiment.formula_constraints().unwrap_or(&self.default_constraints);

        let mut ionizations = self.ionizations.clone();
        if let Some(own) = &experiment.ion_type {
            if !ionizations.iter().any(|ion| ion.name == own.name) {
                ionizations.push(own.clone());
            }
        }

        for spectrum in &experiment.ms1_spectra {
            statistics.add_ms1_spectrum(spectrum);
        }
        for spectrum in &experiment.ms2_spectra {
            statistics.add_ms2_spectrum(spectrum);
            let noise = self.noise_mask(spectrum, experiment.ion_mass, &ionizations, constraints);
            for (index, is_noise) in noise.into_iter().enumerate() {
                if is_noise {
                    statistics.add_noise_intensity(spectrum.intensity[index]);
                }
            }
        }

        statistics
    }

    /// Marks every peak as noise unless it or a lighter isotope parent is decomposable.
    ///
    /// Peaks more than [`HIGH_MASS_MARGIN`] above the precursor can only come from multiply
    /// charged ions or noise. If their unexplained intensity outweighs the explained one,
    /// all of them are noise.
    pub fn noise_mask(&self, spectrum: &MzSpectrum, ion_mass: f64, ionizations: &[IonType], constraints: &FormulaConstraints) -> Vec<bool> {
        let decomposition_deviation = self.allowed_deviation.multiply(DECOMPOSITION_DEVIATION_FACTOR);
        let mut is_noise = vec![true; spectrum.len()];
        let high_mass_limit = ion_mass + HIGH_MASS_MARGIN;

        let mut explained_above = 0.0;
        let mut unexplained_above = 0.0;

        for index in 0..spectrum.len() {
            let mz = spectrum.mz[index];
            let explainable = self.is_explainable(mz, ionizations, &decomposition_deviation, constraints);
            if mz > high_mass_limit {
                if explainable {
                    explained_above += spectrum.intensity[index];
                } else {
                    unexplained_above += spectrum.intensity[index];
                }
            }
            if explainable {
                is_noise[index] = false;
                self.mark_satellites(spectrum, index, &mut is_noise);
            }
        }

        if unexplained_above > explained_above {
            let start = spectrum.mz.partition_point(|&m| m < high_mass_limit);
            is_noise[start..].iter_mut().for_each(|flag| *flag = true);
        }

        is_noise
    }

    /// Clears the noise flag of isotope peaks following an explained peak.
    fn mark_satellites(&self, spectrum: &MzSpectrum, mono_index: usize, is_noise: &mut [bool]) {
        let mono_mz = spectrum.mz[mono_index];
        for isotope in 1..=MAX_SATELLITE_ISOTOPES {
            let (a, b) = self.defect_bounds.isotopic_mass_window(mono_mz, isotope, &self.allowed_deviation);
            let low = a - self.mass_difference_deviation.absolute_for(a);
            let high = b + self.mass_difference_deviation.absolute_for(b);
            let start = spectrum.mz.partition_point(|&m| m < low);
            let end = spectrum.mz.partition_point(|&m| m <= high);
            if start == end {
                break;
            }
            is_noise[start..end].iter_mut().for_each(|flag| *flag = false);
        }
    }

    fn is_explainable(&self, mz: f64, ionizations: &[IonType], deviation: &MassDeviation, constraints: &FormulaConstraints) -> bool {
        ionizations.iter().any(|ionization| {
            let neutral_mass = ionization.subtract_from_mass(mz);
            if neutral_mass <= 0.0 {
                return false;
            }
            match self.oracle.is_decomposable(neutral_mass, deviation, constraints) {
                Ok(decomposable) => decomposable,
                Err(e) => {
                    debug!("Decomposition of {:.4} failed, treating peak as noise: {}", neutral_mass, e);
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::ionization::standard_ionizations;
    use crate::errors::DecompositionError;

    #[test]
    fn test_lazy_median_is_invalidated() {
        let mut statistics = DatasetStatistics::new();
        for intensity in [5.0, 1.0, 3.0] {
            statistics.add_noise_intensity(intensity);
        }
        assert_eq!(statistics.median_noise_intensity(), 3.0);
        statistics.add_noise_intensity(10.0);
        statistics.add_noise_intensity(12.0);
        assert_eq!(statistics.median_noise_intensity(), 5.0);
    }

    #[test]
    fn test_snapshot() {
        let mut statistics = DatasetStatistics::new();
        statistics.add_ms1_spectrum(&MzSpectrum::new(vec![100.0, 200.0], vec![10.0, 1000.0]));
        statistics.add_ms1_spectrum(&MzSpectrum::new(vec![100.0], vec![20.0]));
        statistics.add_ms2_spectrum(&MzSpectrum::new(vec![100.0, 200.0], vec![2.0, 300.0]));
        for intensity in [1.0, 2.0, 3.0, 4.0] {
            statistics.add_noise_intensity(intensity);
        }
        assert_eq!(statistics.noise_count(), 4);
        let snapshot = statistics.freeze();

        assert_eq!(snapshot.min_ms1_intensity, 10.0);
        assert_eq!(snapshot.max_ms1_intensity, 1000.0);
        assert_eq!(snapshot.min_ms2_intensity, 2.0);
        assert_eq!(snapshot.max_ms2_intensity, 300.0);
        assert_eq!(snapshot.median_noise_intensity, 3.0);
        assert!((snapshot.mean_noise_intensity - 2.5).abs() < 1e-12);
        assert_eq!(snapshot.max_noise_intensity(), 4.0);
        assert!(snapshot.noise_percentile(100) >= 3.0);

        let restored = DatasetStatisticsSnapshot::from_bytes(&snapshot.to_bytes().unwrap()).unwrap();
        assert_eq!(snapshot, restored);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = DatasetStatistics::new().freeze();
        assert_eq!(snapshot.median_noise_intensity, 0.0);
        assert_eq!(snapshot.noise_percentile(95), 0.0);
    }

    #[test]
    fn test_noise_mask_marks_explained_peaks_and_isotopes() {
        // only neutral masses close to an integer of 250 are explainable
        let oracle = |mass: f64, _: &MassDeviation, _: &FormulaConstraints| -> Result<bool, DecompositionError> {
            Ok((mass - 250.0).abs() < 0.01)
        };
        let collector = DatasetStatisticsCollector::new(
            &oracle,
            standard_ionizations(1),
            MassDeviation::new(10.0, 0.002),
            MassDeviation::new(2.5, 0.001),
            FormulaConstraints::default(),
        );
        let precursor = 250.0 + crate::chemistry::constants::MASS_PROTON;
        let spectrum = MzSpectrum::new(
            vec![120.0, precursor, precursor + 1.00335, precursor + 2.0067, 400.0],
            vec![5.0, 100.0, 20.0, 4.0, 7.0],
        );

        let mask = collector.noise_mask(&spectrum, precursor, &standard_ionizations(1), &FormulaConstraints::default());
        assert_eq!(mask, vec![true, false, false, false, true]);
    }

    /// Oracle explaining exactly the protonated ions at the given m/z values.
    fn explains(targets: &'static [f64]) -> impl Fn(f64, &MassDeviation, &FormulaConstraints) -> Result<bool, DecompositionError> + Sync {
        move |mass, _, _| Ok(targets.iter().any(|t| (mass + crate::chemistry::constants::MASS_PROTON - t).abs() < 0.01))
    }

    fn collector(oracle: &dyn DecomposabilityOracle) -> DatasetStatisticsCollector<'_> {
        DatasetStatisticsCollector::new(
            oracle,
            standard_ionizations(1),
            MassDeviation::new(10.0, 0.002),
            MassDeviation::new(2.5, 0.001),
            FormulaConstraints::default(),
        )
    }

    #[test]
    fn test_unexplained_intensity_above_precursor_turns_region_into_noise() {
        let oracle = explains(&[150.0, 350.0]);
        let collector = collector(&oracle);
        let spectrum = MzSpectrum::new(vec![150.0, 350.0, 400.0, 420.0], vec![10.0, 5.0, 100.0, 100.0]);

        let mask = collector.noise_mask(&spectrum, 200.0, &standard_ionizations(1), &FormulaConstraints::default());
        assert_eq!(mask, vec![false, true, true, true]);

        let experiment = Experiment::new("e", 200.0).with_ms2(spectrum);
        let snapshot = collector.collect(&[experiment]);
        assert_eq!(snapshot.noise_intensities, vec![5.0, 100.0, 100.0]);
    }

    #[test]
    fn test_explained_intensity_above_precursor_is_kept() {
        let oracle = explains(&[150.0, 350.0]);
        let collector = collector(&oracle);
        let spectrum = MzSpectrum::new(vec![150.0, 350.0, 400.0, 420.0], vec![10.0, 300.0, 100.0, 100.0]);

        let mask = collector.noise_mask(&spectrum, 200.0, &standard_ionizations(1), &FormulaConstraints::default());
        assert_eq!(mask, vec![false, false, true, true]);
    }

    #[test]
    fn test_satellite_window_widened_by_mass_difference_deviation() {
        let oracle = explains(&[300.0]);
        let collector = collector(&oracle);
        // 301.0095 lies past the defect window widened by the allowed deviation alone
        let spectrum = MzSpectrum::new(vec![300.0, 301.0095, 301.02], vec![100.0, 30.0, 30.0]);

        let mask = collector.noise_mask(&spectrum, 300.0, &standard_ionizations(1), &FormulaConstraints::default());
        assert_eq!(mask, vec![false, false, true]);
    }

    #[test]
    fn test_oracle_errors_count_as_noise() {
        let oracle = |_: f64, _: &MassDeviation, _: &FormulaConstraints| -> Result<bool, DecompositionError> {
            Err(DecompositionError::EmptyAlphabet)
        };
        let collector = DatasetStatisticsCollector::new(
            &oracle,
            standard_ionizations(1),
            MassDeviation::new(10.0, 0.002),
            MassDeviation::new(2.5, 0.001),
            FormulaConstraints::default(),
        );
        let experiment = Experiment::new("e", 300.0)
            .with_ms2(MzSpectrum::new(vec![100.0, 200.0, 300.0], vec![1.0, 2.0, 3.0]));
        let snapshot = collector.collect(&[experiment]);
        assert_eq!(snapshot.noise_intensities, vec![1.0, 2.0, 3.0]);
        assert_eq!(snapshot.median_noise_intensity, 2.0);
    }
}
