use std::cmp::Ordering;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::chemistry::deviation::MassDeviation;

/// Tolerance used when comparing peaks for equality.
pub const PEAK_EQUALITY_TOLERANCE: f64 = 1e-8;

/// A single centroided peak.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Encode, Decode)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f64,
}

impl Peak {
    pub fn new(mz: f64, intensity: f64) -> Self {
        Peak { mz, intensity }
    }
}

impl PartialEq for Peak {
    fn eq(&self, other: &Self) -> bool {
        (self.mz - other.mz).abs() < PEAK_EQUALITY_TOLERANCE
            && (self.intensity - other.intensity).abs() < PEAK_EQUALITY_TOLERANCE
    }
}

/// Peaks are ordered by mass only.
impl PartialOrd for Peak {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.mz.partial_cmp(&other.mz)
    }
}

/// Represents a mass spectrum with associated m/z values and intensities.
///
/// Peaks are kept sorted by m/z. Uses Arc<Vec<T>> for efficient cloning - clone is O(1) instead of O(n).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MzSpectrum {
    pub mz: Arc<Vec<f64>>,
    pub intensity: Arc<Vec<f64>>,
}

// Manual bincode implementation for Arc compatibility
impl Encode for MzSpectrum {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&*self.mz, encoder)?;
        bincode::Encode::encode(&*self.intensity, encoder)?;
        Ok(())
    }
}

impl<Context> Decode<Context> for MzSpectrum {
    fn decode<D: bincode::de::Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        let mz: Vec<f64> = bincode::Decode::decode(decoder)?;
        let intensity: Vec<f64> = bincode::Decode::decode(decoder)?;
        Ok(MzSpectrum::new(mz, intensity))
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for MzSpectrum {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        let mz: Vec<f64> = bincode::BorrowDecode::borrow_decode(decoder)?;
        let intensity: Vec<f64> = bincode::BorrowDecode::borrow_decode(decoder)?;
        Ok(MzSpectrum::new(mz, intensity))
    }
}

impl MzSpectrum {
    /// Constructs a new `MzSpectrum`, sorting the peaks by m/z.
    ///
    /// # Arguments
    ///
    /// * `mz` - A vector of m/z values.
    /// * `intensity` - A vector of intensity values corresponding to the m/z values.
    ///
    /// Surplus values of the longer vector are dropped.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msprep::data::spectrum::MzSpectrum;
    /// let spectrum = MzSpectrum::new(vec![200.0, 100.0], vec![20.0, 10.0]);
    /// assert_eq!(*spectrum.mz, vec![100.0, 200.0]);
    /// assert_eq!(*spectrum.intensity, vec![10.0, 20.0]);
    /// ```
    pub fn new(mz: Vec<f64>, intensity: Vec<f64>) -> Self {
        let sorted = mz.windows(2).all(|w| w[0] <= w[1]);
        if sorted && mz.len() == intensity.len() {
            return MzSpectrum { mz: Arc::new(mz), intensity: Arc::new(intensity) };
        }
        let peaks = mz.into_iter().zip(intensity).map(|(mz, intensity)| Peak::new(mz, intensity)).collect();
        MzSpectrum::from_peaks(peaks)
    }

    pub fn from_peaks(mut peaks: Vec<Peak>) -> Self {
        peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        let (mz, intensity): (Vec<f64>, Vec<f64>) = peaks.into_iter().map(|p| (p.mz, p.intensity)).unzip();
        MzSpectrum { mz: Arc::new(mz), intensity: Arc::new(intensity) }
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    pub fn peak(&self, index: usize) -> Peak {
        Peak::new(self.mz[index], self.intensity[index])
    }

    pub fn peaks(&self) -> impl Iterator<Item = Peak> + '_ {
        self.mz.iter().zip(self.intensity.iter()).map(|(&mz, &intensity)| Peak::new(mz, intensity))
    }

    /// Binary search by mass: `Ok(index)` of an exactly matching peak, or `Err(insertion_point)`.
    pub fn binary_search(&self, mz: f64) -> Result<usize, usize> {
        self.mz.binary_search_by(|x| x.total_cmp(&mz))
    }

    /// Index of the lightest peak with `begin <= mz <= end`.
    pub fn index_of_first_within(&self, begin: f64, end: f64) -> Option<usize> {
        let index = self.mz.partition_point(|&mz| mz < begin);
        (index < self.len() && self.mz[index] <= end).then_some(index)
    }

    /// Index of the most intense peak with `begin <= mz <= end`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msprep::data::spectrum::MzSpectrum;
    /// let spectrum = MzSpectrum::new(vec![100.0, 100.5, 101.0, 102.0], vec![5.0, 50.0, 20.0, 80.0]);
    /// assert_eq!(spectrum.most_intense_within(99.0, 101.5), Some(1));
    /// assert_eq!(spectrum.most_intense_within(103.0, 104.0), None);
    /// ```
    pub fn most_intense_within(&self, begin: f64, end: f64) -> Option<usize> {
        let start = self.index_of_first_within(begin, end)?;
        let mut best = start;
        for index in start + 1..self.len() {
            if self.mz[index] > end {
                break;
            }
            if self.intensity[index] > self.intensity[best] {
                best = index;
            }
        }
        Some(best)
    }

    /// Most intense peak within the deviation around `mz`.
    pub fn most_intense_near(&self, mz: f64, deviation: &MassDeviation) -> Option<usize> {
        let tolerance = deviation.absolute_for(mz);
        self.most_intense_within(mz - tolerance, mz + tolerance)
    }

    /// Peak closest in mass to `mz` that lies within the deviation.
    pub fn closest_within(&self, mz: f64, deviation: &MassDeviation) -> Option<usize> {
        let tolerance = deviation.absolute_for(mz);
        let start = self.index_of_first_within(mz - tolerance, mz + tolerance)?;
        (start..self.len())
            .take_while(|&i| self.mz[i] <= mz + tolerance)
            .min_by(|&a, &b| (self.mz[a] - mz).abs().total_cmp(&(self.mz[b] - mz).abs()))
    }

    pub fn max_intensity(&self) -> f64 {
        self.intensity.iter().cloned().fold(0.0, f64::max)
    }

    pub fn min_intensity(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.intensity.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    pub fn filter_ranged(&self, mz_min: f64, mz_max: f64, intensity_min: f64, intensity_max: f64) -> Self {
        let mut mz_vec: Vec<f64> = Vec::new();
        let mut intensity_vec: Vec<f64> = Vec::new();

        for (mz, intensity) in self.mz.iter().zip(self.intensity.iter()) {
            if mz_min <= *mz && *mz <= mz_max && *intensity >= intensity_min && *intensity <= intensity_max {
                mz_vec.push(*mz);
                intensity_vec.push(*intensity);
            }
        }
        MzSpectrum { mz: Arc::new(mz_vec), intensity: Arc::new(intensity_vec) }
    }

    /// Keeps the peaks whose entry in `keep` is `true`.
    pub fn retain_mask(&self, keep: &[bool]) -> Self {
        let (mz, intensity): (Vec<f64>, Vec<f64>) = self.peaks()
            .zip(keep.iter())
            .filter(|(_, &k)| k)
            .map(|(p, _)| (p.mz, p.intensity))
            .unzip();
        MzSpectrum { mz: Arc::new(mz), intensity: Arc::new(intensity) }
    }

    /// Returns a copy of the spectrum with one more peak inserted at its mass position.
    pub fn with_peak(&self, peak: Peak) -> Self {
        let index = self.mz.partition_point(|&mz| mz < peak.mz);
        let mut mz = (*self.mz).clone();
        let mut intensity = (*self.intensity).clone();
        mz.insert(index, peak.mz);
        intensity.insert(index, peak.intensity);
        MzSpectrum { mz: Arc::new(mz), intensity: Arc::new(intensity) }
    }

    /// Merges several spectra into one.
    ///
    /// Peaks of all spectra are sorted by mass and chained while the next peak is within the
    /// deviation of the current group's intensity-weighted mass. Each group becomes one peak with the
    /// summed intensity at the weighted mass.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msprep::data::spectrum::MzSpectrum;
    /// # use msprep::chemistry::deviation::MassDeviation;
    /// let a = MzSpectrum::new(vec![100.0, 200.0], vec![10.0, 5.0]);
    /// let b = MzSpectrum::new(vec![100.001, 300.0], vec![30.0, 7.0]);
    /// let merged = MzSpectrum::merge_spectra(&[a, b], &MassDeviation::new(10.0, 0.002));
    /// assert_eq!(merged.len(), 3);
    /// assert!((merged.intensity[0] - 40.0).abs() < 1e-9);
    /// assert!((merged.mz[0] - 100.00075).abs() < 1e-9);
    /// ```
    pub fn merge_spectra(spectra: &[MzSpectrum], deviation: &MassDeviation) -> MzSpectrum {
        let mut peaks: Vec<Peak> = spectra.iter().flat_map(|s| s.peaks()).collect();
        peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));

        let mut mz_vec = Vec::new();
        let mut intensity_vec = Vec::new();

        let mut weighted_sum = 0.0;
        let mut intensity_sum = 0.0;
        let mut center: Option<f64> = None;

        for peak in peaks {
            if let Some(c) = center {
                if !deviation.in_error_window(c, peak.mz) {
                    mz_vec.push(c);
                    intensity_vec.push(intensity_sum);
                    weighted_sum = 0.0;
                    intensity_sum = 0.0;
                }
            }
            weighted_sum += peak.mz * peak.intensity;
            intensity_sum += peak.intensity;
            center = Some(if intensity_sum > 0.0 { weighted_sum / intensity_sum } else { peak.mz });
        }

        if let Some(c) = center {
            mz_vec.push(c);
            intensity_vec.push(intensity_sum);
        }

        MzSpectrum { mz: Arc::new(mz_vec), intensity: Arc::new(intensity_vec) }
    }
}

/// Formats the `MzSpectrum` for display.
impl Display for MzSpectrum {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let base_peak = self.peaks().max_by(|a, b| a.intensity.total_cmp(&b.intensity));
        match base_peak {
            Some(p) => write!(f, "MzSpectrum(data points: {}, max by intensity:({:.3}, {}))", self.len(), p.mz, p.intensity),
            None => write!(f, "MzSpectrum(data points: 0)"),
        }
    }
}
