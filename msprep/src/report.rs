use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use itertools::Itertools;

use crate::algorithm::quadrupole::{IonTransmission, IsolationWindow};
use crate::data::experiment::{Experiment, Ms2Dataset};
use crate::errors::Result;
use crate::quality::compound_quality::SpectrumProperty;

/// Spacing of the example transmission ratios in the dataset summary.
pub const RATIO_EXAMPLE_STEP: f64 = 0.5;

/// Writes one row per experiment: name, precursor m/z and a 0/1 column per quality flag.
///
/// # Arguments
///
/// * `experiments` - annotated experiments
/// * `writer` - target of the tab-separated table
///
/// # Example
///
/// ```
/// use msprep::data::experiment::Experiment;
/// use msprep::quality::compound_quality::SpectrumProperty;
/// use msprep::report::write_experiment_infos;
///
/// let mut experiment = Experiment::new("caffeine", 195.0877);
/// experiment.add_property(SpectrumProperty::Good);
///
/// let mut out = Vec::new();
/// write_experiment_infos(&[experiment], &mut out).unwrap();
/// let table = String::from_utf8(out).unwrap();
/// assert!(table.lines().nth(1).unwrap().starts_with("caffeine\t195.0877\t1\t0"));
/// ```
pub fn write_experiment_infos<W: Write>(experiments: &[Experiment], writer: &mut W) -> Result<()> {
    writeln!(writer, "name\tion_mass\t{}", SpectrumProperty::ALL.iter().join("\t"))?;
    for experiment in experiments {
        let flags = SpectrumProperty::ALL
            .iter()
            .map(|&property| if experiment.has_property(property) { "1" } else { "0" })
            .join("\t");
        writeln!(writer, "{}\t{}\t{}", experiment.name, experiment.ion_mass, flags)?;
    }
    Ok(())
}

/// Writes statistics and isolation window of a preprocessed dataset as `key\tvalue` lines.
///
/// Values that are unknown are written as `NA`. The summary ends with example transmission
/// ratios around the window, one line per offset.
pub fn write_dataset_summary<W: Write>(dataset: &Ms2Dataset, writer: &mut W) -> Result<()> {
    match &dataset.statistics {
        Some(statistics) => {
            writeln!(writer, "min_ms1_intensity\t{}", statistics.min_ms1_intensity)?;
            writeln!(writer, "max_ms1_intensity\t{}", statistics.max_ms1_intensity)?;
            writeln!(writer, "min_ms2_intensity\t{}", statistics.min_ms2_intensity)?;
            writeln!(writer, "max_ms2_intensity\t{}", statistics.max_ms2_intensity)?;
            writeln!(writer, "median_noise_intensity\t{}", statistics.median_noise_intensity)?;
            writeln!(writer, "max_noise_intensity\t{}", statistics.max_noise_intensity())?;
            writeln!(writer, "noise_intensity_80\t{}", statistics.noise_percentile(80))?;
            writeln!(writer, "noise_intensity_95\t{}", statistics.noise_percentile(95))?;
        }
        None => writeln!(writer, "statistics\tNA")?,
    }

    writeln!(writer, "experiments\t{}", dataset.len())?;
    writeln!(writer, "good_experiments\t{}", dataset.count_with_property(SpectrumProperty::Good))?;

    match &dataset.isolation_window {
        Some(window) => {
            writeln!(writer, "isolation_window\t{}", if window.is_estimated() { "estimated" } else { "rectangular" })?;
            writeln!(writer, "isolation_window_width\t{:.3}", window.estimated_window_size())?;
            writeln!(writer, "isolation_window_shift\t{:.3}", window.estimated_mass_shift())?;
            for (offset, ratio) in example_ratios(window) {
                writeln!(writer, "ratio_at\t{:.1}\t{:.3}", offset, ratio)?;
            }
        }
        None => writeln!(writer, "isolation_window\tNA")?,
    }
    Ok(())
}

/// Transmission ratios at every half Dalton from one Dalton left to one Dalton right of the window.
pub fn example_ratios(window: &IsolationWindow) -> Vec<(f64, f64)> {
    let half = window.estimated_window_size() / 2.0 + 1.0;
    let shift = window.estimated_mass_shift();
    let start = ((shift - half) / RATIO_EXAMPLE_STEP).floor() as i64;
    let end = ((shift + half) / RATIO_EXAMPLE_STEP).ceil() as i64;

    (start..=end)
        .map(|step| {
            let offset = step as f64 * RATIO_EXAMPLE_STEP;
            (offset, window.intensity_ratio(0.0, offset))
        })
        .collect()
}

/// Writes both reports next to each other into `directory`.
pub fn write_reports<P: AsRef<Path>>(dataset: &Ms2Dataset, directory: P) -> Result<()> {
    let directory = directory.as_ref();
    std::fs::create_dir_all(directory)?;

    let mut infos = BufWriter::new(File::create(directory.join("spectra_quality.tsv"))?);
    write_experiment_infos(&dataset.experiments, &mut infos)?;
    infos.flush()?;

    let mut summary = BufWriter::new(File::create(directory.join("dataset_summary.tsv"))?);
    write_dataset_summary(dataset, &mut summary)?;
    summary.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::quadrupole::RectangularIsolationWindow;
    use crate::quality::statistics::DatasetStatisticsSnapshot;

    #[test]
    fn test_experiment_infos_columns() {
        let mut chimeric = Experiment::new("b", 301.5);
        chimeric.add_property(SpectrumProperty::Chimeric);
        chimeric.add_property(SpectrumProperty::LowIntensity);

        let mut out = Vec::new();
        write_experiment_infos(&[Experiment::new("a", 200.0), chimeric], &mut out).unwrap();
        let table = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].split('\t').count(), 2 + SpectrumProperty::ALL.len());
        assert_eq!(lines[1], "a\t200\t0\t0\t0\t0\t0\t0\t0\t0\t0");
        assert_eq!(lines[2], "b\t301.5\t0\t0\t1\t0\t0\t0\t0\t1\t0");
    }

    #[test]
    fn test_example_ratios_of_rectangle() {
        let window = IsolationWindow::Rectangular(RectangularIsolationWindow::symmetric(1.0));
        let ratios = example_ratios(&window);

        assert_eq!(ratios.len(), 7);
        assert_eq!(ratios.first().unwrap(), &(-1.5, 0.0));
        assert_eq!(ratios[3], (0.0, 1.0));
        assert_eq!(ratios.last().unwrap(), &(1.5, 0.0));
    }

    #[test]
    fn test_dataset_summary() {
        let mut dataset = Ms2Dataset::new(vec![Experiment::new("a", 200.0)]);
        dataset.statistics = Some(DatasetStatisticsSnapshot {
            max_ms1_intensity: 1000.0,
            median_noise_intensity: 2.0,
            noise_intensities: vec![1.0, 2.0, 3.0],
            ..Default::default()
        });
        dataset.isolation_window = Some(IsolationWindow::Rectangular(RectangularIsolationWindow::symmetric(2.0)));

        let mut out = Vec::new();
        write_dataset_summary(&dataset, &mut out).unwrap();
        let summary = String::from_utf8(out).unwrap();

        assert!(summary.contains("max_ms1_intensity\t1000\n"));
        assert!(summary.contains("max_noise_intensity\t3\n"));
        assert!(summary.contains("isolation_window\trectangular\n"));
        assert!(summary.contains("isolation_window_width\t2.000\n"));
        assert!(summary.contains("ratio_at\t0.0\t1.000\n"));
        assert!(summary.contains("ratio_at\t-2.0\t0.000\n"));
    }

    #[test]
    fn test_summary_without_results() {
        let dataset = Ms2Dataset::new(Vec::new());
        let mut out = Vec::new();
        write_dataset_summary(&dataset, &mut out).unwrap();
        let summary = String::from_utf8(out).unwrap();
        assert!(summary.starts_with("statistics\tNA\n"));
        assert!(summary.ends_with("isolation_window\tNA\n"));
    }
}
