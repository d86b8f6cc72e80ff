use tracing::warn;

use crate::chemistry::constants::ISOTOPE_MASS_DIFF;
use crate::chemistry::deviation::{MassDefectBounds, MassDeviation};
use crate::data::experiment::Experiment;
use crate::data::spectrum::{MzSpectrum, Peak};
use crate::quality::compound_quality::SpectrumProperty;

/// Charges tried when extracting isotope envelopes, in order of preference.
pub const CANDIDATE_CHARGES: [u8; 2] = [1, 2];
/// Peaks below this fraction of the spectrum's base peak are ignored.
pub const MIN_RELATIVE_INTENSITY: f64 = 0.02;
/// MS2 isotope peaks must exceed this multiple of the median MS2 noise intensity.
pub const NOISE_INTENSITY_FACTOR: f64 = 2.0;
/// Maximum intensity of an isotope relative to the monoisotopic peak, at m/z 0 and m/z 1000.
pub const ISOTOPE_DECAY_AT_ZERO: f64 = 0.2;
pub const ISOTOPE_DECAY_AT_1000: f64 = 0.55;
/// Monoisotopic peak plus five isotopes.
pub const MAX_ENVELOPE_LENGTH: usize = 6;

/// Isotope envelope with its inferred absolute charge.
#[derive(Clone, Debug)]
pub struct ChargedIsotopePattern {
    pub spectrum: MzSpectrum,
    pub charge: u8,
}

impl ChargedIsotopePattern {
    pub fn len(&self) -> usize {
        self.spectrum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectrum.is_empty()
    }
}

/// Matching MS1 and MS2 envelopes of the same compound, index by index.
#[derive(Clone, Debug)]
pub struct IsotopeEnvelopePair {
    pub ms1: ChargedIsotopePattern,
    pub ms2: ChargedIsotopePattern,
}

impl IsotopeEnvelopePair {
    pub fn len(&self) -> usize {
        self.ms1.len().min(self.ms2.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn charge(&self) -> u8 {
        self.ms1.charge
    }
}

/// Maximum isotope to monoisotope intensity ratio expected at a given m/z.
///
/// # Example
///
/// ```rust
/// # use msprep::algorithm::isotope::isotope_decay_bound;
/// assert!((isotope_decay_bound(0.0) - 0.2).abs() < 1e-12);
/// assert!((isotope_decay_bound(1000.0) - 0.55).abs() < 1e-12);
/// ```
pub fn isotope_decay_bound(mz: f64) -> f64 {
    ISOTOPE_DECAY_AT_ZERO + (ISOTOPE_DECAY_AT_1000 - ISOTOPE_DECAY_AT_ZERO) * mz / 1000.0
}

/// Finds isotope envelopes around the precursor in MS1 and follows them into MS2.
#[derive(Clone, Debug)]
pub struct IsotopePatternExtractor {
    /// Deviation used to locate the precursor peak.
    pub anchor_deviation: MassDeviation,
    /// Deviation used to match isotope peaks.
    pub isotope_deviation: MassDeviation,
    /// Size of the region around the precursor searched for envelopes.
    pub max_window_size: f64,
    /// Median MS2 noise intensity of the dataset.
    pub ms2_noise_intensity: f64,
}

impl IsotopePatternExtractor {
    pub fn new(anchor_deviation: MassDeviation, isotope_deviation: MassDeviation, max_window_size: f64, ms2_noise_intensity: f64) -> Self {
        IsotopePatternExtractor {
            anchor_deviation,
            isotope_deviation,
            max_window_size,
            ms2_noise_intensity,
        }
    }

    /// Extracts all charge-resolved MS1/MS2 envelope pairs of an experiment.
    ///
    /// Experiments flagged `Bad` or without an MS2 precursor peak yield nothing.
    pub fn extract(&self, experiment: &Experiment) -> Vec<IsotopeEnvelopePair> {
        if experiment.has_property(SpectrumProperty::Bad) {
            return Vec::new();
        }

        let ion_mass = experiment.ion_mass;
        let ms2 = experiment.merged_ms2(&self.isotope_deviation);
        if ms2.most_intense_near(ion_mass, &self.anchor_deviation).is_none() {
            return Vec::new();
        }

        let ms1 = match experiment.merged_ms1.as_ref() {
            Some(ms1) if ms1.most_intense_near(ion_mass, &self.anchor_deviation).is_some() => ms1,
            _ => {
                warn!("No MS1 peak found for {} at m/z {:.4}", experiment.name, ion_mass);
                return Vec::new();
            }
        };

        let ms1_max = ms1.max_intensity();
        let ms2_max = ms2.max_intensity();
        let half_window = self.max_window_size / 2.0;

        let mut pairs = Vec::new();
        for index in 0..ms1.len() {
            let peak = ms1.peak(index);
            if peak.mz < ion_mass - half_window || peak.mz > ion_mass + half_window {
                continue;
            }
            if peak.intensity < MIN_RELATIVE_INTENSITY * ms1_max {
                continue;
            }

            let mut best: Option<(Vec<Peak>, Vec<Peak>, u8)> = None;
            for charge in CANDIDATE_CHARGES {
                let (ms1_peaks, ms2_peaks) = self.extract_envelope(ms1, &ms2, index, charge);
                if ms2_peaks.is_empty() {
                    continue;
                }
                let longer = best.as_ref().map_or(true, |(b, _, _)| ms1_peaks.len() > b.len());
                if longer {
                    best = Some((ms1_peaks, ms2_peaks, charge));
                }
            }

            let Some((ms1_peaks, ms2_peaks, charge)) = best else { continue };
            let keep = self.trimmed_length(&ms1_peaks, &ms2_peaks, ms1_max, ms2_max);
            if keep <= 1 {
                continue;
            }

            pairs.push(IsotopeEnvelopePair {
                ms1: ChargedIsotopePattern { spectrum: MzSpectrum::from_peaks(ms1_peaks[..keep].to_vec()), charge },
                ms2: ChargedIsotopePattern { spectrum: MzSpectrum::from_peaks(ms2_peaks[..keep].to_vec()), charge },
            });
        }

        pairs
    }

    /// Follows the envelope starting at `mono_index` with the given charge.
    ///
    /// Stops at the first isotope missing in MS1 or MS2 and at the first isotope exceeding the decay bound.
    fn extract_envelope(&self, ms1: &MzSpectrum, ms2: &MzSpectrum, mono_index: usize, charge: u8) -> (Vec<Peak>, Vec<Peak>) {
        let mono = ms1.peak(mono_index);
        let step = ISOTOPE_MASS_DIFF / charge as f64;

        let mut ms1_peaks = vec![mono];
        let mut ms2_peaks = Vec::new();

        match ms2.closest_within(mono.mz, &self.isotope_deviation) {
            Some(i) => ms2_peaks.push(ms2.peak(i)),
            None => return (ms1_peaks, ms2_peaks),
        }

        let mut previous_mz = mono.mz;
        while ms1_peaks.len() < MAX_ENVELOPE_LENGTH {
            let target = previous_mz + step;
            let Some(i1) = ms1.most_intense_near(target, &self.isotope_deviation) else { break };
            let isotope = ms1.peak(i1);
            if isotope.intensity / mono.intensity > isotope_decay_bound(isotope.mz) {
                break;
            }
            let Some(i2) = ms2.closest_within(isotope.mz, &self.isotope_deviation) else { break };

            ms1_peaks.push(isotope);
            ms2_peaks.push(ms2.peak(i2));
            previous_mz = isotope.mz;
        }

        (ms1_peaks, ms2_peaks)
    }

    /// Length of the common prefix in which both envelopes are usable.
    fn trimmed_length(&self, ms1: &[Peak], ms2: &[Peak], ms1_max: f64, ms2_max: f64) -> usize {
        ms1.iter()
            .zip(ms2.iter())
            .take_while(|(p1, p2)| {
                p1.intensity >= p2.intensity
                    && p1.intensity >= MIN_RELATIVE_INTENSITY * ms1_max
                    && p2.intensity >= MIN_RELATIVE_INTENSITY * ms2_max
                    && p2.intensity >= NOISE_INTENSITY_FACTOR * self.ms2_noise_intensity
            })
            .count()
    }
}

/// Parameters of [`filter_isotope_peaks`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IsotopeFilterSettings {
    /// Highest isotope to parent intensity ratio at m/z 0.
    pub ratio_at_zero: f64,
    /// Highest isotope to parent intensity ratio at m/z 1000.
    pub ratio_at_1000: f64,
    pub max_isotopes: usize,
}

impl IsotopeFilterSettings {
    /// Conservative settings used to decide whether the precursor is monoisotopic.
    pub const STRICT: IsotopeFilterSettings = IsotopeFilterSettings { ratio_at_zero: 0.2, ratio_at_1000: 0.55, max_isotopes: 3 };
    /// Lenient settings used to thin out spectra before peak counting.
    pub const LENIENT: IsotopeFilterSettings = IsotopeFilterSettings { ratio_at_zero: 0.5, ratio_at_1000: 1.2, max_isotopes: 5 };

    fn max_ratio(&self, mz: f64) -> f64 {
        (self.ratio_at_1000 - self.ratio_at_zero) * mz / 1000.0 + self.ratio_at_zero
    }
}

/// Removes peaks that look like isotope satellites of a more intense, lighter peak.
///
/// Peaks are processed by descending intensity. For each surviving peak the isotope
/// positions 1, 2, ... are inspected; a peak in the expected mass window whose intensity
/// relative to the parent does not exceed the settings' bound is removed. The search for a
/// parent ends at the first isotope position without a removed peak.
///
/// # Example
///
/// ```rust
/// # use msprep::algorithm::isotope::{filter_isotope_peaks, IsotopeFilterSettings};
/// # use msprep::chemistry::deviation::{MassDefectBounds, MassDeviation};
/// # use msprep::data::spectrum::MzSpectrum;
/// let spectrum = MzSpectrum::new(vec![300.0, 301.00335, 302.0067, 350.0], vec![100.0, 20.0, 5.0, 80.0]);
/// let filtered = filter_isotope_peaks(&spectrum, &MassDeviation::new(10.0, 0.002), &IsotopeFilterSettings::STRICT, &MassDefectBounds::default());
/// assert_eq!(*filtered.mz, vec![300.0, 350.0]);
/// ```
pub fn filter_isotope_peaks(
    spectrum: &MzSpectrum,
    deviation: &MassDeviation,
    settings: &IsotopeFilterSettings,
    bounds: &MassDefectBounds,
) -> MzSpectrum {
    let n = spectrum.len();
    let mut is_isotope = vec![false; n];

    let mut by_intensity: Vec<usize> = (0..n).collect();
    by_intensity.sort_by(|&a, &b| spectrum.intensity[b].total_cmp(&spectrum.intensity[a]));

    for i in by_intensity {
        if is_isotope[i] {
            continue;
        }
        let parent = spectrum.peak(i);
        let max_ratio = settings.max_ratio(parent.mz);

        for offset in 1..=settings.max_isotopes {
            let (low, high) = bounds.isotopic_mass_window(parent.mz, offset, deviation);
            let mut found = false;

            let start = spectrum.mz.partition_point(|&mz| mz < low);
            for j in start..n {
                if spectrum.mz[j] > high {
                    break;
                }
                if j == i || is_isotope[j] {
                    continue;
                }
                if spectrum.intensity[j] / parent.intensity <= max_ratio {
                    is_isotope[j] = true;
                    found = true;
                }
            }

            if !found {
                break;
            }
        }
    }

    let keep: Vec<bool> = is_isotope.iter().map(|&iso| !iso).collect();
    spectrum.retain_mask(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> IsotopePatternExtractor {
        IsotopePatternExtractor::new(MassDeviation::new(100.0, 0.1), MassDeviation::new(10.0, 0.002), 10.0, 1.0)
    }

    fn experiment(ms1: MzSpectrum, ms2: MzSpectrum) -> Experiment {
        Experiment::new("test", 400.0).with_merged_ms1(ms1.clone()).with_ms1(ms1).with_ms2(ms2)
    }

    #[test]
    fn test_extracts_singly_charged_envelope() {
        let ms1 = MzSpectrum::new(vec![400.0, 401.00335, 402.0067], vec![1000.0, 250.0, 40.0]);
        let ms2 = MzSpectrum::new(vec![150.0, 400.0, 401.00335, 402.0067], vec![500.0, 900.0, 200.0, 30.0]);
        let pairs = extractor().extract(&experiment(ms1, ms2));

        // one envelope per qualifying MS1 peak: the precursor and its first isotope
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].len(), 3);
        assert_eq!(pairs[0].charge(), 1);
        assert_eq!(pairs[1].len(), 2);
    }

    #[test]
    fn test_prefers_doubly_charged_when_longer() {
        let ms1 = MzSpectrum::new(vec![400.0, 400.501675, 401.00335], vec![1000.0, 250.0, 40.0]);
        let ms2 = MzSpectrum::new(vec![400.0, 400.501675, 401.00335], vec![900.0, 200.0, 30.0]);
        let pairs = extractor().extract(&experiment(ms1, ms2));

        let envelope = pairs.iter().find(|p| (p.ms1.spectrum.mz[0] - 400.0).abs() < 1e-9).unwrap();
        assert_eq!(envelope.charge(), 2);
        assert_eq!(envelope.len(), 3);
    }

    #[test]
    fn test_decay_bound_truncates() {
        // the second peak is too intense to be an isotope of a compound at m/z 400
        let ms1 = MzSpectrum::new(vec![400.0, 401.00335], vec![1000.0, 900.0]);
        let ms2 = MzSpectrum::new(vec![400.0, 401.00335], vec![900.0, 800.0]);
        let pairs = extractor().extract(&experiment(ms1, ms2));
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_trims_when_ms2_exceeds_ms1() {
        let ms1 = MzSpectrum::new(vec![400.0, 401.00335, 402.0067], vec![1000.0, 250.0, 40.0]);
        let ms2 = MzSpectrum::new(vec![400.0, 401.00335, 402.0067], vec![900.0, 200.0, 60.0]);
        let pairs = extractor().extract(&experiment(ms1, ms2));
        assert_eq!(pairs[0].len(), 2);
    }

    #[test]
    fn test_missing_anchors() {
        let ms1 = MzSpectrum::new(vec![400.0, 401.00335], vec![1000.0, 250.0]);
        let no_precursor_ms2 = MzSpectrum::new(vec![150.0], vec![500.0]);
        assert!(extractor().extract(&experiment(ms1.clone(), no_precursor_ms2)).is_empty());

        let far_ms1 = MzSpectrum::new(vec![380.0], vec![1000.0]);
        let ms2 = MzSpectrum::new(vec![400.0, 401.00335], vec![900.0, 200.0]);
        assert!(extractor().extract(&experiment(far_ms1, ms2)).is_empty());
    }

    #[test]
    fn test_bad_experiments_are_skipped() {
        let ms1 = MzSpectrum::new(vec![400.0, 401.00335], vec![1000.0, 250.0]);
        let ms2 = MzSpectrum::new(vec![400.0, 401.00335], vec![900.0, 200.0]);
        let mut e = experiment(ms1, ms2);
        assert_eq!(extractor().extract(&e).len(), 1);
        e.add_property(SpectrumProperty::Bad);
        assert!(extractor().extract(&e).is_empty());
    }

    #[test]
    fn test_filter_keeps_intense_neighbours() {
        // the +1 peak is more intense than the bound allows, so it is no isotope
        let spectrum = MzSpectrum::new(vec![300.0, 301.00335], vec![100.0, 90.0]);
        let filtered = filter_isotope_peaks(&spectrum, &MassDeviation::new(10.0, 0.002), &IsotopeFilterSettings::STRICT, &MassDefectBounds::default());
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_filter_removes_precursor_as_isotope() {
        let spectrum = MzSpectrum::new(vec![299.0, 300.00335], vec![1000.0, 100.0]);
        let filtered = filter_isotope_peaks(&spectrum, &MassDeviation::new(10.0, 0.002), &IsotopeFilterSettings::STRICT, &MassDefectBounds::default());
        assert_eq!(*filtered.mz, vec![299.0]);
    }
}
