use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{info, instrument, warn};

use crate::algorithm::aggregation::IsotopeRatioInformation;
use crate::algorithm::estimation::IsolationWindowEstimator;
use crate::algorithm::quadrupole::{IonTransmission, IsolationWindow, RectangularIsolationWindow};
use crate::chemistry::decomposer::{DecomposabilityOracle, ElementPredictor, FormulaConstraints};
use crate::chemistry::deviation::MassDefectBounds;
use crate::chemistry::ionization::standard_ionizations;
use crate::config::PreprocessingConfig;
use crate::data::experiment::{Experiment, Ms2Dataset};
use crate::data::spectrum::MzSpectrum;
use crate::errors::{PreprocessingError, Result};
use crate::quality::annotators::{
    AnnotationContext, ChimericAnnotator, FewPeaksAnnotator, LowIntensityAnnotator, NoMs1PeakAnnotator,
    NotMonoisotopicAnnotator, QualityAnnotator,
};
use crate::quality::compound_quality::{CompoundQuality, SpectrumProperty};
use crate::quality::statistics::DatasetStatisticsCollector;

/// Width of the rectangular window used when the window cannot be estimated and no width is known.
pub const FALLBACK_WINDOW_WIDTH: f64 = 1.0;

/// Summary of one preprocessing run.
#[derive(Clone, Debug, Default)]
pub struct PreprocessingReport {
    /// Names of experiments removed during validation.
    pub removed_experiments: Vec<String>,
    /// Aggregated isotope ratios, if the window was estimated in this run.
    pub ratio_information: Option<IsotopeRatioInformation>,
    /// Whether a rectangular fallback window was used.
    pub used_fallback_window: bool,
}

/// Sign of the precursor charges of a dataset, `+1` if no ion type is known.
///
/// # Errors
///
/// `MixedChargeSigns` if positive and negative ion types occur together.
pub fn dataset_charge_sign(experiments: &[Experiment]) -> Result<i32> {
    let mut sign = 0;
    for ion_type in experiments.iter().filter_map(|e| e.ion_type.as_ref()) {
        let current = ion_type.charge_sign();
        if sign != 0 && current != sign {
            return Err(PreprocessingError::MixedChargeSigns);
        }
        sign = current;
    }
    Ok(if sign == 0 { 1 } else { sign })
}

/// Removes empty spectra, drops experiments without MS2 and builds missing merged MS1 spectra.
///
/// Returns the names of the dropped experiments.
pub fn validate(dataset: &mut Ms2Dataset, config: &PreprocessingConfig) -> Vec<String> {
    let mut removed = Vec::new();
    dataset.experiments.retain_mut(|experiment| {
        experiment.ms1_spectra.retain(|s| !s.is_empty());
        experiment.ms2_spectra.retain(|s| !s.is_empty());
        if experiment.merged_ms1.as_ref().map_or(false, MzSpectrum::is_empty) {
            experiment.merged_ms1 = None;
        }

        if experiment.ms2_spectra.is_empty() {
            warn!("Removing {}: no MS2 spectrum", experiment.name);
            removed.push(experiment.name.clone());
            return false;
        }

        if experiment.merged_ms1.is_none() && !experiment.ms1_spectra.is_empty() {
            experiment.merged_ms1 = Some(MzSpectrum::merge_spectra(&experiment.ms1_spectra, &config.allowed_deviation));
        }
        true
    });
    removed
}

/// Runs statistics, quality checks and isolation window estimation on a dataset.
pub struct Ms2DatasetPreprocessor<'a> {
    config: PreprocessingConfig,
    oracle: &'a dyn DecomposabilityOracle,
    element_predictor: Option<&'a dyn ElementPredictor>,
}

impl<'a> Ms2DatasetPreprocessor<'a> {
    pub fn new(config: PreprocessingConfig, oracle: &'a dyn DecomposabilityOracle) -> Self {
        Ms2DatasetPreprocessor {
            config,
            oracle,
            element_predictor: None,
        }
    }

    pub fn with_element_predictor(mut self, predictor: &'a dyn ElementPredictor) -> Self {
        self.element_predictor = Some(predictor);
        self
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    /// Preprocesses the dataset in place on a dedicated thread pool.
    ///
    /// Statistics and the isolation window already attached to the dataset are reused,
    /// so running twice on an unchanged dataset yields the same flags.
    pub fn preprocess(&self, dataset: &mut Ms2Dataset) -> Result<PreprocessingReport> {
        self.config.validate()?;
        let mut builder = ThreadPoolBuilder::new();
        if self.config.num_threads > 0 {
            builder = builder.num_threads(self.config.num_threads);
        }
        let pool = builder.build()?;
        pool.install(|| self.run(dataset))
    }

    #[instrument(skip_all, level = "info")]
    fn run(&self, dataset: &mut Ms2Dataset) -> Result<PreprocessingReport> {
        let mut report = PreprocessingReport {
            removed_experiments: validate(dataset, &self.config),
            ..Default::default()
        };
        if dataset.is_empty() {
            return Err(PreprocessingError::EmptyDataset);
        }
        let charge_sign = dataset_charge_sign(&dataset.experiments)?;

        if dataset.isolation_window_width.is_none() {
            dataset.isolation_window_width = self.config.isolation_window_width;
        }

        self.predict_constraints(&mut dataset.experiments);

        let statistics = match dataset.statistics.take() {
            Some(statistics) => statistics,
            None => {
                let collector = DatasetStatisticsCollector::new(
                    self.oracle,
                    standard_ionizations(charge_sign),
                    self.config.allowed_deviation,
                    self.config.mass_difference_deviation,
                    self.config.default_constraints.clone(),
                );
                collector.collect(&dataset.experiments)
            }
        };

        let defect_bounds = MassDefectBounds::default();
        let chain: Vec<Box<dyn QualityAnnotator>> = vec![
            Box::new(NoMs1PeakAnnotator { deviation: self.config.find_ms1_peak_deviation }),
            Box::new(FewPeaksAnnotator {
                min_number_of_peaks: self.config.min_number_of_peaks,
                deviation: self.config.allowed_deviation,
                defect_bounds,
            }),
            Box::new(LowIntensityAnnotator {
                deviation: self.config.find_ms1_peak_deviation,
                relative_threshold: self.config.low_intensity_relative,
                absolute_threshold: self.config.low_intensity_absolute,
            }),
            Box::new(NotMonoisotopicAnnotator { deviation: self.config.allowed_deviation, defect_bounds }),
        ];

        {
            let context = AnnotationContext {
                statistics: &statistics,
                isolation_window: dataset.isolation_window.as_ref(),
                isolation_window_width: dataset.isolation_window_width,
            };
            for annotator in &chain {
                info!("Running {} annotator", annotator.name());
                annotator.annotate(&mut dataset.experiments, &context);
            }
        }

        if dataset.isolation_window.is_none() {
            let (window, information) = self.estimate_isolation_window(dataset, statistics.median_noise_intensity);
            report.used_fallback_window = !window.is_estimated();
            report.ratio_information = information;
            dataset.isolation_window = Some(window);
        }

        let search_window_size = self.config.search_window_size(dataset.isolation_window_width);
        if let Some(window) = dataset.isolation_window.as_ref() {
            dataset.experiments.par_iter_mut().for_each(|experiment| experiment.annotations.set(window.clone()));

            let chimeric = ChimericAnnotator {
                find_ms1_peak_deviation: self.config.find_ms1_peak_deviation,
                isotope_deviation: self.config.mass_difference_deviation.multiply(2.0),
                max_window_size: search_window_size,
                max_single_ratio: self.config.chimeric_max_single_ratio,
                max_summed_ratio: self.config.chimeric_max_summed_ratio,
                remove_isotopes: self.config.chimeric_remove_isotopes,
                defect_bounds,
            };
            let context = AnnotationContext {
                statistics: &statistics,
                isolation_window: Some(window),
                isolation_window_width: dataset.isolation_window_width,
            };
            info!("Running {} annotator", chimeric.name());
            chimeric.annotate(&mut dataset.experiments, &context);
        }

        mark_good(&mut dataset.experiments);
        dataset.statistics = Some(statistics);

        info!(
            "Preprocessed {} experiments, {} good, {} removed",
            dataset.len(),
            dataset.count_with_property(SpectrumProperty::Good),
            report.removed_experiments.len()
        );
        Ok(report)
    }

    fn predict_constraints(&self, experiments: &mut [Experiment]) {
        let default = &self.config.default_constraints;
        experiments
            .par_iter_mut()
            .filter(|experiment| !experiment.annotations.has::<FormulaConstraints>())
            .for_each(|experiment| {
                let constraints = self.element_predictor
                    .and_then(|predictor| predictor.predict_constraints(experiment, default))
                    .unwrap_or_else(|| default.clone());
                experiment.annotations.set(constraints);
            });
    }

    /// Fits the isolation window, falling back to a rectangle if there is too little data.
    fn estimate_isolation_window(&self, dataset: &mut Ms2Dataset, median_noise_intensity: f64) -> (IsolationWindow, Option<IsotopeRatioInformation>) {
        let estimator = IsolationWindowEstimator {
            find_ms1_peak_deviation: self.config.find_ms1_peak_deviation,
            allowed_deviation: self.config.allowed_deviation,
            max_window_size: self.config.search_window_size(dataset.isolation_window_width),
            min_window_size: self.config.min_window_size,
            rim_width: self.config.rim_width,
        };

        match estimator.estimate(&dataset.experiments, median_noise_intensity) {
            Ok((window, information)) => {
                let window = IsolationWindow::Estimated(window);
                info!("Estimated {}", window);
                if dataset.isolation_window_width.is_none() {
                    dataset.isolation_window_width = Some(window.estimated_window_size());
                }
                (window, Some(information))
            }
            Err(e) => {
                let window = match dataset.isolation_window_width {
                    Some(width) => {
                        warn!("Cannot estimate isolation window ({}). Fallback to rectangular isolation window with width {}Da.", e, width);
                        RectangularIsolationWindow::symmetric(width)
                    }
                    None => {
                        warn!("Cannot estimate isolation window ({}). Fallback to rectangular isolation window with width {}Da.", e, FALLBACK_WINDOW_WIDTH);
                        dataset.isolation_window_width = Some(FALLBACK_WINDOW_WIDTH);
                        RectangularIsolationWindow::symmetric(FALLBACK_WINDOW_WIDTH)
                    }
                };
                (IsolationWindow::Rectangular(window), None)
            }
        }
    }
}

/// Adds `Good` to every experiment without a disqualifying flag.
pub fn mark_good(experiments: &mut [Experiment]) {
    experiments.par_iter_mut().for_each(|experiment| {
        let quality = experiment.annotations.get_or_insert_default::<CompoundQuality>();
        if quality.is_not_bad() {
            quality.add(SpectrumProperty::Good);
        }
    });
}
