use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use msprep::algorithm::quadrupole::IonTransmission;
use msprep::chemistry::decomposer::FormulaConstraints;
use msprep::chemistry::deviation::MassDeviation;
use msprep::config::PreprocessingConfig;
use msprep::data::experiment::{Experiment, Ms2Dataset};
use msprep::data::spectrum::MzSpectrum;
use msprep::errors::DecompositionError;
use msprep::preprocessing::Ms2DatasetPreprocessor;
use msprep::quality::compound_quality::SpectrumProperty;

const ISOTOPE_STEP: f64 = 1.00335;

/// Oracle that explains nothing, so every MS2 peak counts as noise.
fn nothing_decomposes(_: f64, _: &MassDeviation, _: &FormulaConstraints) -> Result<bool, DecompositionError> {
    Ok(false)
}

fn noise_peaks(rng: &mut StdRng, count: usize, max_mz: f64, max_intensity: f64) -> (Vec<f64>, Vec<f64>) {
    let mz = (0..count).map(|_| rng.gen_range(20.0..max_mz)).collect();
    let intensity = (0..count).map(|_| rng.gen_range(1.0..max_intensity)).collect();
    (mz, intensity)
}

/// Precursor without isotopes, background far outside any window, fragments well above the noise.
fn isolated_experiment(rng: &mut StdRng, index: usize) -> Experiment {
    let ion = 150.0 + index as f64 * 6.3 + rng.gen_range(0.0..0.5);
    let ms1 = MzSpectrum::new(
        vec![ion - 40.0, ion, ion + 35.0],
        vec![rng.gen_range(100.0..2000.0), 10_000.0, rng.gen_range(100.0..2000.0)],
    );

    let (mut mz, mut intensity) = noise_peaks(rng, 20, ion - 2.0, 10.0);
    for k in 0..8 {
        mz.push(ion * (0.15 + 0.09 * k as f64) + rng.gen_range(0.0..0.2));
        intensity.push(rng.gen_range(200.0..1000.0));
    }
    mz.push(ion);
    intensity.push(rng.gen_range(8000.0..12_000.0));

    Experiment::new(&format!("isolated_{}", index), ion)
        .with_ms1(ms1)
        .with_ms2(MzSpectrum::new(mz, intensity))
}

fn isolated_corpus(size: usize) -> Ms2Dataset {
    let mut rng = StdRng::seed_from_u64(42);
    Ms2Dataset::new((0..size).map(|i| isolated_experiment(&mut rng, i)).collect())
}

/// Precursor with two isotopes; MS2 transmits the first isotope with half the efficiency.
fn isotope_experiment(rng: &mut StdRng, index: usize) -> Experiment {
    let ion = 300.0 + index as f64 * 7.0;
    let ms1 = MzSpectrum::new(
        vec![ion, ion + ISOTOPE_STEP, ion + 2.0 * ISOTOPE_STEP],
        vec![1000.0, 200.0, 40.0],
    );

    let (mut mz, mut intensity) = noise_peaks(rng, 10, ion - 10.0, 5.0);
    mz.extend([ion, ion + ISOTOPE_STEP, ion + 2.0 * ISOTOPE_STEP]);
    intensity.extend([500.0, 50.0, 12.0]);

    Experiment::new(&format!("isotopes_{}", index), ion)
        .with_ms1(ms1)
        .with_ms2(MzSpectrum::new(mz, intensity))
}

/// Corpus with a fitted window and one experiment co-isolating a second compound 0.3 Da above the precursor.
fn chimeric_corpus() -> Ms2Dataset {
    let mut rng = StdRng::seed_from_u64(7);
    let mut experiments: Vec<Experiment> = (0..10).map(|i| isotope_experiment(&mut rng, i)).collect();

    let ion = 500.05;
    let ms1 = MzSpectrum::new(vec![ion, ion + 0.3], vec![1000.0, 900.0]);
    let ms2 = MzSpectrum::new(vec![120.0, 210.0, 330.0, ion], vec![300.0, 250.0, 200.0, 500.0]);
    experiments.push(Experiment::new("chimeric", ion).with_ms1(ms1).with_ms2(ms2));

    Ms2Dataset::new(experiments)
}

fn flags(dataset: &Ms2Dataset) -> Vec<Vec<SpectrumProperty>> {
    dataset.experiments
        .iter()
        .map(|e| e.quality().map(|q| q.properties().collect()).unwrap_or_default())
        .collect()
}

fn find<'a>(dataset: &'a Ms2Dataset, name: &str) -> &'a Experiment {
    dataset.experiments.iter().find(|e| e.name == name).unwrap()
}

#[test]
fn isolated_precursors_yield_unit_window() {
    let preprocessor = Ms2DatasetPreprocessor::new(PreprocessingConfig::default(), &nothing_decomposes);
    let mut dataset = isolated_corpus(100);

    let report = preprocessor.preprocess(&mut dataset).unwrap();
    assert!(report.used_fallback_window);
    assert!(report.removed_experiments.is_empty());

    let window = dataset.isolation_window.as_ref().unwrap();
    assert!((window.estimated_window_size() - 1.0).abs() < 1e-9);
    assert!(window.estimated_mass_shift().abs() < 1e-9);
    assert_eq!(dataset.isolation_window_width, Some(1.0));

    let precursor = 400.0;
    for offset in [-0.4, -0.2, 0.0, 0.2, 0.4] {
        assert_eq!(window.intensity_ratio(precursor, precursor + offset), 1.0);
    }
    for offset in [-2.0, -0.6, 0.6, 1.0, 3.0] {
        assert_eq!(window.intensity_ratio(precursor, precursor + offset), 0.0);
    }

    assert_eq!(dataset.count_with_property(SpectrumProperty::Good), 100);
    assert_eq!(dataset.count_with_property(SpectrumProperty::Chimeric), 0);
}

#[test]
fn noise_only_ms2_is_flagged_few_peaks() {
    let preprocessor = Ms2DatasetPreprocessor::new(PreprocessingConfig::default(), &nothing_decomposes);
    let mut dataset = isolated_corpus(20);

    let ion = 612.3;
    dataset.experiments.push(
        Experiment::new("noise_only", ion)
            .with_ms1(MzSpectrum::new(vec![ion], vec![10_000.0]))
            .with_ms2(MzSpectrum::new(vec![88.1, 142.7, 233.0, 301.9, 455.2, ion], vec![3.0, 5.0, 2.0, 4.0, 6.0, 8.0])),
    );

    preprocessor.preprocess(&mut dataset).unwrap();

    let noisy = find(&dataset, "noise_only");
    assert!(noisy.has_property(SpectrumProperty::FewPeaks));
    assert!(!noisy.has_property(SpectrumProperty::Good));
    assert!(!find(&dataset, "isolated_3").has_property(SpectrumProperty::FewPeaks));
}

#[test]
fn missing_ms1_peak_skips_dependent_checks() {
    let preprocessor = Ms2DatasetPreprocessor::new(PreprocessingConfig::default(), &nothing_decomposes);
    let mut dataset = isolated_corpus(20);

    let mut rng = StdRng::seed_from_u64(3);
    let mut orphan = isolated_experiment(&mut rng, 50);
    orphan.name = "orphan".to_string();
    // the closest MS1 peak is far outside the 0.1 Da search radius
    orphan.ms1_spectra = vec![MzSpectrum::new(vec![orphan.ion_mass - 30.0, orphan.ion_mass + 0.25], vec![5000.0, 20.0])];
    dataset.experiments.push(orphan);

    preprocessor.preprocess(&mut dataset).unwrap();

    let orphan = find(&dataset, "orphan");
    assert!(orphan.has_property(SpectrumProperty::NoMS1Peak));
    assert!(!orphan.has_property(SpectrumProperty::LowIntensity));
    assert!(!orphan.has_property(SpectrumProperty::Chimeric));
    assert!(!orphan.has_property(SpectrumProperty::Good));
}

#[test]
fn co_isolated_compound_is_flagged_chimeric() {
    let preprocessor = Ms2DatasetPreprocessor::new(PreprocessingConfig::default(), &nothing_decomposes);
    let mut dataset = chimeric_corpus();

    let report = preprocessor.preprocess(&mut dataset).unwrap();
    assert!(!report.used_fallback_window);
    let information = report.ratio_information.unwrap();
    assert_eq!(information.reference_contributors, 10);

    let window = dataset.isolation_window.as_ref().unwrap();
    assert!(window.is_estimated());
    // the precursor itself is always fully transmitted
    assert!((window.intensity_ratio(500.05, 500.05) - 1.0).abs() < 1e-9);
    assert!(window.intensity_ratio(500.05, 500.35) > 0.5);

    assert!(find(&dataset, "chimeric").has_property(SpectrumProperty::Chimeric));
    for index in 0..10 {
        assert!(!find(&dataset, &format!("isotopes_{}", index)).has_property(SpectrumProperty::Chimeric));
    }
}

#[test]
fn estimated_width_is_recorded_on_dataset() {
    let preprocessor = Ms2DatasetPreprocessor::new(PreprocessingConfig::default(), &nothing_decomposes);
    let mut dataset = chimeric_corpus();
    assert_eq!(dataset.isolation_window_width, None);

    preprocessor.preprocess(&mut dataset).unwrap();

    let window = dataset.isolation_window.as_ref().unwrap();
    assert!(window.is_estimated());
    assert_eq!(dataset.isolation_window_width, Some(window.estimated_window_size()));
}

#[test]
fn reannotation_is_idempotent() {
    let preprocessor = Ms2DatasetPreprocessor::new(PreprocessingConfig::default(), &nothing_decomposes);
    let mut dataset = chimeric_corpus();

    preprocessor.preprocess(&mut dataset).unwrap();
    let first_flags = flags(&dataset);
    let first_window = dataset.isolation_window.clone();
    let first_statistics = dataset.statistics.clone();

    let report = preprocessor.preprocess(&mut dataset).unwrap();
    assert!(report.ratio_information.is_none());
    assert_eq!(flags(&dataset), first_flags);
    assert_eq!(dataset.isolation_window, first_window);
    assert_eq!(dataset.statistics, first_statistics);
}

#[test]
fn single_threaded_run_matches_default_pool() {
    let config = PreprocessingConfig { num_threads: 1, ..Default::default() };
    let single = Ms2DatasetPreprocessor::new(config, &nothing_decomposes);
    let parallel = Ms2DatasetPreprocessor::new(PreprocessingConfig::default(), &nothing_decomposes);

    let mut a = chimeric_corpus();
    let mut b = chimeric_corpus();
    single.preprocess(&mut a).unwrap();
    parallel.preprocess(&mut b).unwrap();

    assert_eq!(flags(&a), flags(&b));
    assert_eq!(a.isolation_window, b.isolation_window);
}
