use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algorithm::pattern::NormalizedPattern;

/// Buckets with fewer samples must agree with their nearest resolved neighbour.
pub const MIN_TRUSTED_SAMPLES: usize = 4;
/// Largest accepted deviation factor between an untrusted median and its nearest resolved neighbour.
pub const MAX_NEIGHBOUR_DEVIATION: f64 = 1.5;
/// The reference bucket of the precursor itself.
pub const REFERENCE_BUCKET: f64 = 0.0;

type Bucket = OrderedFloat<f64>;

/// Median as the element at index `len / 2` of the sorted values.
///
/// # Example
///
/// ```rust
/// # use msprep::algorithm::aggregation::median;
/// assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(3.0));
/// assert_eq!(median(&[]), None);
/// ```
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(sorted[sorted.len() / 2])
}

/// Aggregated transmission ratios of one relative mass bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketRatios {
    pub ratio: Option<f64>,
    pub ratio_samples: Vec<f64>,
    pub mz: Option<f64>,
    pub mz_samples: Vec<f64>,
}

/// Result of the aggregation: transmission ratio per relative mass bucket.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IsotopeRatioInformation {
    pub buckets: BTreeMap<OrderedFloat<f64>, BucketRatios>,
    /// Number of distinct experiments that contributed samples to the reference bucket.
    pub reference_contributors: usize,
    /// Number of patterns that could be normalized and contributed samples.
    pub patterns_used: usize,
}

impl IsotopeRatioInformation {
    pub fn ratio(&self, bucket: f64) -> Option<f64> {
        self.buckets.get(&OrderedFloat(bucket)).and_then(|b| b.ratio)
    }

    pub fn reference_sample_count(&self) -> usize {
        self.buckets.get(&OrderedFloat(REFERENCE_BUCKET)).map_or(0, |b| b.ratio_samples.len())
    }

    /// Resolved buckets as `(bucket, corrected m/z, ratio)`, sorted by bucket.
    pub fn resolved(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.buckets.iter().filter_map(|(bucket, b)| {
            let ratio = b.ratio?;
            Some((bucket.0, b.mz.unwrap_or(bucket.0), ratio))
        })
    }

    /// Writes all raw ratio samples as tab-separated `bucket, ratio` rows.
    pub fn write_ratio_samples<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "relative_mz\tratio")?;
        for (bucket, b) in &self.buckets {
            for sample in &b.ratio_samples {
                writeln!(writer, "{}\t{}", bucket.0, sample)?;
            }
        }
        Ok(())
    }
}

/// Merges normalized patterns of a whole dataset into per-bucket transmission ratios.
///
/// Bucket resolution depends on previously resolved buckets, so patterns are consumed
/// sequentially in [`NormalizedPattern::processing_order`].
#[derive(Debug)]
pub struct RatioAggregator {
    resolved_ratio: BTreeMap<Bucket, f64>,
    ratio_samples: BTreeMap<Bucket, Vec<f64>>,
    mz_samples: BTreeMap<Bucket, Vec<f64>>,
    reference_contributors: BTreeSet<usize>,
    patterns_used: usize,
}

impl Default for RatioAggregator {
    fn default() -> Self {
        let mut resolved_ratio = BTreeMap::new();
        resolved_ratio.insert(OrderedFloat(REFERENCE_BUCKET), 1.0);
        RatioAggregator {
            resolved_ratio,
            ratio_samples: BTreeMap::new(),
            mz_samples: BTreeMap::new(),
            reference_contributors: BTreeSet::new(),
            patterns_used: 0,
        }
    }
}

impl RatioAggregator {
    pub fn new() -> Self {
        RatioAggregator::default()
    }

    /// Runs the aggregation over all patterns and returns the per-bucket ratios.
    ///
    /// Each pattern's resolved normalization constant is written back to it.
    pub fn aggregate(mut self, patterns: &mut [NormalizedPattern]) -> IsotopeRatioInformation {
        patterns.sort_by(NormalizedPattern::processing_order);

        let mut previous_position: Option<f64> = None;
        for (position, group) in &patterns.iter_mut().chunk_by(|p| OrderedFloat(p.mono_position)) {
            if let Some(previous) = previous_position {
                self.lock_in_band(previous);
            }
            for pattern in group {
                self.add_pattern(pattern);
            }
            previous_position = Some(position.0);
        }

        self.resolve_remaining();
        self.into_information()
    }

    /// Resolves the buckets within half a unit of `position` from their samples.
    fn lock_in_band(&mut self, position: f64) {
        let band: Vec<Bucket> = self.ratio_samples
            .range(OrderedFloat(position - 0.5)..=OrderedFloat(position + 0.5))
            .map(|(bucket, _)| *bucket)
            .filter(|bucket| !self.resolved_ratio.contains_key(bucket))
            .collect();

        for bucket in band {
            if let Some(value) = self.median_if_accepted(bucket) {
                self.resolved_ratio.insert(bucket, value);
            }
        }
    }

    fn add_pattern(&mut self, pattern: &mut NormalizedPattern) {
        let Some(constant) = self.normalization_constant(pattern) else {
            debug!("Dropping pattern of experiment {} at position {}", pattern.experiment, pattern.mono_position);
            return;
        };
        pattern.normalization_constant = Some(constant);

        for index in 0..pattern.len() {
            let bucket = OrderedFloat(pattern.bucket(index));
            let sample = pattern.relative_ratio(index) * constant;
            self.ratio_samples.entry(bucket).or_default().push(sample);
            self.mz_samples.entry(bucket).or_default().push(pattern.corrected_mz(index));
            if bucket.0 == REFERENCE_BUCKET {
                self.reference_contributors.insert(pattern.experiment);
            }
        }
        self.patterns_used += 1;
    }

    /// Transmission ratio of the pattern's normalization isotope.
    fn normalization_constant(&mut self, pattern: &NormalizedPattern) -> Option<f64> {
        let bucket = OrderedFloat(pattern.bucket(pattern.normalization_index));

        if let Some(&ratio) = self.resolved_ratio.get(&bucket) {
            return Some(ratio);
        }
        if let Some(value) = self.median_if_accepted(bucket) {
            return Some(value);
        }
        if let Some(value) = self.reanchor(pattern) {
            return Some(value);
        }
        let value = self.extrapolate(bucket.0)?;
        self.resolved_ratio.insert(bucket, value);
        Some(value)
    }

    /// Derives the normalization constant from another isotope of the pattern that falls into a resolved bucket.
    fn reanchor(&self, pattern: &NormalizedPattern) -> Option<f64> {
        let n = pattern.normalization_index;
        (0..pattern.len())
            .filter(|&i| i != n)
            .sorted_by_key(|&i| (i.abs_diff(n), i))
            .find_map(|i| {
                let resolved = *self.resolved_ratio.get(&OrderedFloat(pattern.bucket(i)))?;
                let relative = pattern.relative_ratio(i);
                (relative > 0.0 && relative.is_finite()).then(|| resolved / relative)
            })
    }

    /// Linear extrapolation from the two outermost resolved buckets on the side of `bucket`.
    fn extrapolate(&self, bucket: f64) -> Option<f64> {
        let same_side: Vec<(f64, f64)> = self.resolved_ratio.iter()
            .map(|(b, &r)| (b.0, r))
            .filter(|(b, _)| if bucket > 0.0 { *b >= 0.0 } else { *b <= 0.0 })
            .sorted_by(|a, b| b.0.abs().total_cmp(&a.0.abs()))
            .collect();

        if same_side.len() < 2 {
            return None;
        }
        let (outer, inner) = (same_side[0], same_side[1]);
        let slope = (outer.1 - inner.1) / (outer.0 - inner.0);
        let value = outer.1 + slope * (bucket - outer.0);
        (value > 0.0).then_some(value)
    }

    /// Linear interpolation between the nearest resolved buckets left and right of `bucket`.
    fn interpolate(&self, bucket: f64) -> Option<f64> {
        let key = OrderedFloat(bucket);
        let (left, &left_ratio) = self.resolved_ratio.range(..key).next_back()?;
        let (right, &right_ratio) = self.resolved_ratio.range(key..).find(|(b, _)| **b > key)?;
        let value = left_ratio + (right_ratio - left_ratio) * (bucket - left.0) / (right.0 - left.0);
        (value > 0.0).then_some(value)
    }

    /// Median of the bucket's samples, if trusted or consistent with its neighbourhood.
    fn median_if_accepted(&self, bucket: Bucket) -> Option<f64> {
        let samples = self.ratio_samples.get(&bucket)?;
        let value = median(samples)?;
        self.accepts(bucket.0, value, samples.len()).then_some(value)
    }

    fn accepts(&self, bucket: f64, value: f64, sample_count: usize) -> bool {
        if sample_count >= MIN_TRUSTED_SAMPLES {
            return true;
        }
        let nearest = self.resolved_ratio.iter()
            .filter(|(b, _)| b.0 != bucket)
            .min_by(|(a, _), (b, _)| {
                (a.0 - bucket).abs().total_cmp(&(b.0 - bucket).abs())
                    .then_with(|| a.0.abs().total_cmp(&b.0.abs()))
            });
        let Some((_, &neighbour)) = nearest else { return true };

        if value <= 0.0 || neighbour <= 0.0 {
            return false;
        }
        (value / neighbour).max(neighbour / value) <= MAX_NEIGHBOUR_DEVIATION
    }

    /// Resolves the sampled buckets left over after all patterns, closest to the reference first.
    fn resolve_remaining(&mut self) {
        let pending: Vec<Bucket> = self.ratio_samples.keys()
            .filter(|bucket| !self.resolved_ratio.contains_key(*bucket))
            .cloned()
            .sorted_by(|a, b| a.0.abs().total_cmp(&b.0.abs()).then_with(|| b.0.total_cmp(&a.0)))
            .collect();

        for bucket in pending {
            let value = self.median_if_accepted(bucket)
                .or_else(|| self.interpolate(bucket.0))
                .or_else(|| self.extrapolate(bucket.0));
            match value {
                Some(value) => {
                    self.resolved_ratio.insert(bucket, value);
                }
                None => debug!("Bucket {} stays unresolved", bucket.0),
            }
        }
    }

    fn into_information(self) -> IsotopeRatioInformation {
        let mut buckets: BTreeMap<Bucket, BucketRatios> = BTreeMap::new();
        for (bucket, samples) in self.ratio_samples {
            buckets.entry(bucket).or_default().ratio_samples = samples;
        }
        for (bucket, samples) in self.mz_samples {
            let entry = buckets.entry(bucket).or_default();
            entry.mz = median(&samples);
            entry.mz_samples = samples;
        }
        for (bucket, ratio) in self.resolved_ratio {
            let entry = buckets.entry(bucket).or_default();
            entry.ratio = Some(ratio);
            // bare buckets use their own position
            entry.mz.get_or_insert(bucket.0);
        }

        IsotopeRatioInformation {
            buckets,
            reference_contributors: self.reference_contributors.len(),
            patterns_used: self.patterns_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pattern with explicit relative positions and per-isotope MS2/MS1 ratios.
    fn pattern(experiment: usize, positions: &[f64], ratios: &[f64]) -> NormalizedPattern {
        let ion_mass = 500.0;
        let mono_position = crate::algorithm::pattern::round_half(positions[0]);
        let normalization_index = if mono_position < 0.0 { 1 } else { 0 };
        let ms1_intensity = vec![100.0; positions.len()];
        let ms2_intensity: Vec<f64> = ratios.iter().map(|r| r * 100.0).collect();
        let scale_ratio = ms1_intensity[normalization_index] / ms2_intensity[normalization_index];
        NormalizedPattern {
            experiment,
            ion_mass,
            ms1_mz: positions.iter().map(|p| ion_mass + p).collect(),
            ms1_intensity,
            ms2_mz: positions.iter().map(|p| ion_mass + p).collect(),
            ms2_intensity,
            charge: 1,
            mono_position,
            normalization_index,
            scale_ratio,
            normalization_constant: None,
        }
    }

    #[test]
    fn test_reference_bucket_is_seeded() {
        let info = RatioAggregator::new().aggregate(&mut []);
        assert_eq!(info.ratio(0.0), Some(1.0));
        assert_eq!(info.reference_sample_count(), 0);
        assert_eq!(info.reference_contributors, 0);
    }

    #[test]
    fn test_ratios_relative_to_reference() {
        let mut patterns: Vec<NormalizedPattern> = (0..6)
            .map(|e| pattern(e, &[0.0, 1.00335, 2.0067], &[0.9, 0.45, 0.09]))
            .collect();
        let info = RatioAggregator::new().aggregate(&mut patterns);

        assert_eq!(info.ratio(0.0), Some(1.0));
        assert!((info.ratio(1.0).unwrap() - 0.5).abs() < 1e-9);
        assert!((info.ratio(2.0).unwrap() - 0.1).abs() < 1e-9);
        assert_eq!(info.reference_contributors, 6);
        assert_eq!(info.patterns_used, 6);
        assert!(patterns.iter().all(|p| p.normalization_constant == Some(1.0)));
    }

    #[test]
    fn test_left_patterns_normalized_at_second_isotope() {
        let mut patterns = vec![
            pattern(0, &[0.0, 1.00335], &[1.0, 0.8]),
            pattern(1, &[0.0, 1.00335], &[1.0, 0.8]),
        ];
        patterns.extend((2..6).map(|e| pattern(e, &[-1.0, 0.00335], &[0.4, 1.0])));
        let info = RatioAggregator::new().aggregate(&mut patterns);

        // the second isotope of a left pattern falls into the reference bucket
        let left = patterns.iter().find(|p| p.mono_position == -1.0).unwrap();
        assert_eq!(left.normalization_index, 1);
        assert_eq!(left.normalization_constant, Some(1.0));
        assert!((info.ratio(-1.0).unwrap() - 0.4).abs() < 1e-9);
        assert!((info.ratio(1.0).unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(info.reference_contributors, 6);
    }

    #[test]
    fn test_band_locked_before_next_position_anchors_extrapolation() {
        let mut patterns = vec![
            pattern(0, &[0.0, 1.00335], &[1.0, 0.8]),
            pattern(1, &[0.0, 1.00335], &[1.0, 0.8]),
            pattern(2, &[1.0, 2.0], &[0.8, 0.4]),
            pattern(3, &[2.0, 3.0], &[0.9, 0.3]),
        ];
        let info = RatioAggregator::new().aggregate(&mut patterns);
        let constant = |experiment: usize| patterns.iter().find(|p| p.experiment == experiment).unwrap().normalization_constant;

        // bucket 1 has too few samples to be trusted but agrees with the reference
        assert!((constant(2).unwrap() - 0.8).abs() < 1e-9);
        assert!((info.ratio(1.0).unwrap() - 0.8).abs() < 1e-9);
        // bucket 1 was resolved before position 2, so bucket 2 extrapolates from buckets 0 and 1
        assert!((constant(3).unwrap() - 0.6).abs() < 1e-9);
        assert!((info.ratio(2.0).unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(info.patterns_used, 4);
    }

    #[test]
    fn test_lock_in_band_only_touches_neighbourhood() {
        let mut aggregator = RatioAggregator::new();
        aggregator.ratio_samples.insert(OrderedFloat(1.0), vec![0.9, 0.8]);
        aggregator.ratio_samples.insert(OrderedFloat(2.0), vec![0.7, 0.7, 0.7, 0.7]);

        aggregator.lock_in_band(1.0);
        assert_eq!(aggregator.resolved_ratio.get(&OrderedFloat(1.0)), Some(&0.9));
        assert!(!aggregator.resolved_ratio.contains_key(&OrderedFloat(2.0)));
    }

    #[test]
    fn test_pattern_without_anchor_on_its_side_is_dropped() {
        let mut patterns = vec![
            pattern(0, &[0.0, 1.00335], &[1.0, 0.5]),
            pattern(1, &[-3.0, -2.0], &[0.2, 0.3]),
        ];
        let info = RatioAggregator::new().aggregate(&mut patterns);

        // only the reference is resolved left of the precursor, bucket -2 cannot be extrapolated
        let dropped = patterns.iter().find(|p| p.experiment == 1).unwrap();
        assert_eq!(dropped.normalization_constant, None);
        assert_eq!(info.patterns_used, 1);
        assert!(!info.buckets.contains_key(&OrderedFloat(-2.0)));
        assert!(!info.buckets.contains_key(&OrderedFloat(-3.0)));
        assert_eq!(info.reference_sample_count(), 1);
    }

    #[test]
    fn test_reanchoring_from_peripheral_isotope() {
        let mut aggregator = RatioAggregator::new();
        aggregator.resolved_ratio.insert(OrderedFloat(1.0), 0.5);

        // neither isotope of this pattern lies in a resolved bucket
        let p = pattern(0, &[2.0, 3.0], &[0.5, 0.25]);
        assert_eq!(aggregator.reanchor(&p), None);

        // normalization bucket 2 is unknown, the neighbouring isotope sits in resolved bucket 1
        let q = pattern(0, &[1.0, 2.0], &[0.4, 0.2]);
        let q = NormalizedPattern { normalization_index: 1, scale_ratio: 100.0 / 20.0, ..q };
        // relative ratio at isotope 0 is 0.4 / 0.2 = 2, so the constant is 0.5 / 2
        assert!((aggregator.reanchor(&q).unwrap() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_untrusted_bucket_rejected_until_extrapolated() {
        let mut aggregator = RatioAggregator::new();
        aggregator.resolved_ratio.insert(OrderedFloat(1.0), 0.8);
        aggregator.resolved_ratio.insert(OrderedFloat(2.0), 0.6);
        aggregator.ratio_samples.insert(OrderedFloat(3.0), vec![0.1, 0.12]);

        // two samples far below the nearest resolved neighbour are not accepted directly
        assert_eq!(aggregator.median_if_accepted(OrderedFloat(3.0)), None);

        aggregator.resolve_remaining();
        // instead the bucket follows the slope of its resolved neighbours
        let resolved = aggregator.resolved_ratio[&OrderedFloat(3.0)];
        assert!((resolved - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_trusted_bucket_accepted_despite_deviation() {
        let mut aggregator = RatioAggregator::new();
        aggregator.resolved_ratio.insert(OrderedFloat(1.0), 0.8);
        aggregator.ratio_samples.insert(OrderedFloat(2.0), vec![0.1, 0.1, 0.12, 0.11]);
        assert_eq!(aggregator.median_if_accepted(OrderedFloat(2.0)), Some(0.11));
    }

    #[test]
    fn test_interpolation_between_neighbours() {
        let mut aggregator = RatioAggregator::new();
        aggregator.resolved_ratio.insert(OrderedFloat(2.0), 0.5);
        assert!((aggregator.interpolate(1.0).unwrap() - 0.75).abs() < 1e-9);
        assert_eq!(aggregator.interpolate(3.0), None);
    }

    #[test]
    fn test_extrapolation_needs_two_points_on_side() {
        let mut aggregator = RatioAggregator::new();
        assert_eq!(aggregator.extrapolate(-1.0), None);
        aggregator.resolved_ratio.insert(OrderedFloat(-1.0), 0.5);
        assert!((aggregator.extrapolate(-1.5).unwrap() - 0.25).abs() < 1e-9);
        // the slope reaches zero before -2
        assert_eq!(aggregator.extrapolate(-2.0), None);
    }

    #[test]
    fn test_diagnostics_export() {
        let mut patterns = vec![pattern(0, &[0.0, 1.00335], &[1.0, 0.5])];
        let info = RatioAggregator::new().aggregate(&mut patterns);
        let mut out = Vec::new();
        info.write_ratio_samples(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("relative_mz\tratio\n"));
        assert!(text.contains("0\t1\n"));
        assert!(text.contains("1\t0.5\n"));
    }
}
