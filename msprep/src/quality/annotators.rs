use rayon::prelude::*;

use crate::algorithm::isotope::{filter_isotope_peaks, IsotopeFilterSettings, NOISE_INTENSITY_FACTOR};
use crate::algorithm::quadrupole::{IonTransmission, IsolationWindow};
use crate::chemistry::deviation::{MassDefectBounds, MassDeviation};
use crate::data::experiment::Experiment;
use crate::quality::compound_quality::SpectrumProperty;
use crate::quality::statistics::DatasetStatisticsSnapshot;

/// Isotope stripping before peak counting only applies to windows wider than this.
pub const NARROW_WINDOW_WIDTH: f64 = 1.0;

/// Dataset-level results available to the annotators.
#[derive(Clone, Copy, Debug)]
pub struct AnnotationContext<'a> {
    pub statistics: &'a DatasetStatisticsSnapshot,
    pub isolation_window: Option<&'a IsolationWindow>,
    /// Nominal isolation window width, if known.
    pub isolation_window_width: Option<f64>,
}

/// A per-experiment quality check adding flags to the experiment it inspects.
pub trait QualityAnnotator: Sync {
    fn name(&self) -> &'static str;

    fn annotate_experiment(&self, experiment: &mut Experiment, context: &AnnotationContext);

    /// Checks all experiments in parallel; each experiment only receives its own flags.
    fn annotate(&self, experiments: &mut [Experiment], context: &AnnotationContext) {
        experiments
            .par_iter_mut()
            .for_each(|experiment| self.annotate_experiment(experiment, context));
    }
}

/// Flags experiments without an MS1 peak near the precursor.
#[derive(Clone, Debug)]
pub struct NoMs1PeakAnnotator {
    pub deviation: MassDeviation,
}

impl QualityAnnotator for NoMs1PeakAnnotator {
    fn name(&self) -> &'static str {
        "NoMS1Peak"
    }

    fn annotate_experiment(&self, experiment: &mut Experiment, _context: &AnnotationContext) {
        let found = experiment.merged_ms1.as_ref()
            .and_then(|ms1| ms1.most_intense_near(experiment.ion_mass, &self.deviation))
            .is_some();
        if !found {
            experiment.add_property(SpectrumProperty::NoMS1Peak);
        }
    }
}

/// Flags experiments with too few MS2 peaks above the noise level.
#[derive(Clone, Debug)]
pub struct FewPeaksAnnotator {
    pub min_number_of_peaks: usize,
    pub deviation: MassDeviation,
    pub defect_bounds: MassDefectBounds,
}

impl QualityAnnotator for FewPeaksAnnotator {
    fn name(&self) -> &'static str {
        "FewPeaks"
    }

    fn annotate_experiment(&self, experiment: &mut Experiment, context: &AnnotationContext) {
        let mut ms2 = experiment.merged_ms2(&self.deviation);
        // isotope peaks of co-isolated compounds only inflate the count in wide windows
        let wide_window = context.isolation_window_width.map_or(true, |w| w > NARROW_WINDOW_WIDTH);
        if wide_window {
            ms2 = filter_isotope_peaks(&ms2, &self.deviation, &IsotopeFilterSettings::LENIENT, &self.defect_bounds);
        }

        let threshold = NOISE_INTENSITY_FACTOR * context.statistics.median_noise_intensity;
        let peaks_above_noise = ms2.intensity.iter().filter(|&&i| i > threshold).count();
        if peaks_above_noise < self.min_number_of_peaks {
            experiment.add_property(SpectrumProperty::FewPeaks);
        }
    }
}

/// Flags experiments whose precursor is weak compared to the MS1 base peak.
#[derive(Clone, Debug)]
pub struct LowIntensityAnnotator {
    pub deviation: MassDeviation,
    pub relative_threshold: f64,
    pub absolute_threshold: f64,
}

impl QualityAnnotator for LowIntensityAnnotator {
    fn name(&self) -> &'static str {
        "LowIntensity"
    }

    fn annotate_experiment(&self, experiment: &mut Experiment, _context: &AnnotationContext) {
        if experiment.has_property(SpectrumProperty::NoMS1Peak) {
            return;
        }
        let Some(ms1) = experiment.merged_ms1.as_ref() else { return };
        let Some(index) = ms1.most_intense_near(experiment.ion_mass, &self.deviation) else { return };

        let intensity = ms1.intensity[index];
        if intensity < self.relative_threshold * ms1.max_intensity() || intensity < self.absolute_threshold {
            experiment.add_property(SpectrumProperty::LowIntensity);
        }
    }
}

/// Flags experiments whose precursor looks like an isotope peak of a lighter compound.
#[derive(Clone, Debug)]
pub struct NotMonoisotopicAnnotator {
    pub deviation: MassDeviation,
    pub defect_bounds: MassDefectBounds,
}

impl QualityAnnotator for NotMonoisotopicAnnotator {
    fn name(&self) -> &'static str {
        "NotMonoisotopicPeak"
    }

    fn annotate_experiment(&self, experiment: &mut Experiment, _context: &AnnotationContext) {
        let ms2 = experiment.merged_ms2(&self.deviation);
        if ms2.most_intense_near(experiment.ion_mass, &self.deviation).is_none() {
            return;
        }
        let filtered = filter_isotope_peaks(&ms2, &self.deviation, &IsotopeFilterSettings::STRICT, &self.defect_bounds);
        if filtered.most_intense_near(experiment.ion_mass, &self.deviation).is_none() {
            experiment.add_property(SpectrumProperty::NotMonoisotopicPeak);
        }
    }
}

/// Flags experiments whose isolation window transmits other compounds with considerable intensity.
///
/// Needs the fitted isolation window and therefore runs last.
#[derive(Clone, Debug)]
pub struct ChimericAnnotator {
    pub find_ms1_peak_deviation: MassDeviation,
    pub isotope_deviation: MassDeviation,
    /// Region around the window center that is inspected.
    pub max_window_size: f64,
    pub max_single_ratio: f64,
    pub max_summed_ratio: f64,
    pub remove_isotopes: bool,
    pub defect_bounds: MassDefectBounds,
}

impl QualityAnnotator for ChimericAnnotator {
    fn name(&self) -> &'static str {
        "Chimeric"
    }

    fn annotate_experiment(&self, experiment: &mut Experiment, context: &AnnotationContext) {
        let Some(window) = context.isolation_window else { return };
        if experiment.has_property(SpectrumProperty::NoMS1Peak) {
            return;
        }

        let precursor = experiment.merged_ms1.as_ref().and_then(|ms1| {
            ms1.most_intense_near(experiment.ion_mass, &self.find_ms1_peak_deviation).map(|i| (ms1.clone(), ms1.peak(i)))
        });
        let Some((mut ms1, precursor)) = precursor else {
            experiment.add_property(SpectrumProperty::NoMS1Peak);
            return;
        };

        if self.remove_isotopes {
            ms1 = filter_isotope_peaks(&ms1, &self.isotope_deviation, &IsotopeFilterSettings::LENIENT, &self.defect_bounds);
            if ms1.binary_search(precursor.mz).is_err() {
                // an isotope precursor cannot be judged against its own parent
                if experiment.has_property(SpectrumProperty::NotMonoisotopicPeak) {
                    return;
                }
                ms1 = ms1.with_peak(precursor);
            }
        }

        let filtered_precursor = window.intensity(precursor.intensity, precursor.mz, precursor.mz);
        let center = precursor.mz + window.estimated_mass_shift();
        let in_window = ms1.filter_ranged(center - self.max_window_size / 2.0, center + self.max_window_size / 2.0, 0.0, f64::INFINITY);

        let mut summed = 0.0;
        let mut strongest: f64 = 0.0;
        for peak in in_window.peaks() {
            if peak == precursor {
                continue;
            }
            let filtered = window.intensity(peak.intensity, precursor.mz, peak.mz);
            summed += filtered;
            strongest = strongest.max(filtered);
        }

        if strongest >= self.max_single_ratio * filtered_precursor || summed >= self.max_summed_ratio * filtered_precursor {
            experiment.add_property(SpectrumProperty::Chimeric);
        }
    }
}
