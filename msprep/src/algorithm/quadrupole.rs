use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::data::spectrum::MzSpectrum;
use crate::errors::PreprocessingError;

/// Width over which the transmission decays linearly to zero past the outermost control point.
pub const DEFAULT_RIM_WIDTH: f64 = 0.5;
/// Lower bound for the estimated window size in Da.
pub const DEFAULT_MIN_WINDOW_SIZE: f64 = 1.0;

/// Transmission of ions through the precursor isolation filter.
///
/// All positions are given relative to the selected precursor m/z.
pub trait IonTransmission {
    /// Fraction of a target ion's intensity that passes the filter when `precursor_mz` is selected.
    fn intensity_ratio(&self, precursor_mz: f64, target_mz: f64) -> f64;

    /// Width of the window in Da.
    fn estimated_window_size(&self) -> f64;

    /// Offset of the window center from the selected precursor m/z.
    fn estimated_mass_shift(&self) -> f64;

    /// Filtered intensity of a target ion.
    fn intensity(&self, target_intensity: f64, precursor_mz: f64, target_mz: f64) -> f64 {
        target_intensity * self.intensity_ratio(precursor_mz, target_mz)
    }

    fn is_in_window(&self, precursor_mz: f64, target_mz: f64) -> bool {
        self.intensity_ratio(precursor_mz, target_mz) > 0.0
    }

    /// Applies the filter to a spectrum, dropping all peaks with a ratio below `min_ratio` (default: any positive ratio).
    fn transmit_spectrum(&self, precursor_mz: f64, spectrum: &MzSpectrum, min_ratio: Option<f64>) -> MzSpectrum {
        let mut filtered_mz = Vec::new();
        let mut filtered_intensity = Vec::new();

        for (&mz, &intensity) in spectrum.mz.iter().zip(spectrum.intensity.iter()) {
            let ratio = self.intensity_ratio(precursor_mz, mz);
            let keep = match min_ratio {
                Some(cutoff) => ratio >= cutoff,
                None => ratio > 0.0,
            };
            if keep {
                filtered_mz.push(mz);
                filtered_intensity.push(intensity * ratio);
            }
        }

        MzSpectrum::new(filtered_mz, filtered_intensity)
    }
}

/// Window with full transmission between two offsets and none outside.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct RectangularIsolationWindow {
    pub left: f64,
    pub right: f64,
}

impl RectangularIsolationWindow {
    pub fn new(left: f64, right: f64) -> Self {
        RectangularIsolationWindow { left, right }
    }

    /// Window of the given width centered on the precursor.
    pub fn symmetric(width: f64) -> Self {
        RectangularIsolationWindow::new(-width / 2.0, width / 2.0)
    }
}

impl IonTransmission for RectangularIsolationWindow {
    fn intensity_ratio(&self, precursor_mz: f64, target_mz: f64) -> f64 {
        let diff = target_mz - precursor_mz;
        if diff >= self.left && diff <= self.right { 1.0 } else { 0.0 }
    }

    fn estimated_window_size(&self) -> f64 {
        self.right - self.left
    }

    fn estimated_mass_shift(&self) -> f64 {
        (self.left + self.right) / 2.0
    }
}

/// Piecewise-linear transmission curve fitted from isotope ratios.
///
/// Control points are strictly increasing in relative m/z and carry ratios in `[0, 1]`.
/// Past the outermost control points the ratio decays linearly to zero over the rim width.
/// The curve is never changed after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode)]
#[serde(try_from = "EstimatedIsolationWindowData")]
pub struct EstimatedIsolationWindow {
    relative_mz: Vec<f64>,
    ratios: Vec<f64>,
    max_window_size: f64,
    min_window_size: f64,
    rim_width: f64,
}

impl EstimatedIsolationWindow {
    /// Builds the curve from `(relative m/z, ratio)` control points.
    ///
    /// # Arguments
    ///
    /// * `points` - control points, sorted by strictly increasing relative m/z
    /// * `max_window_size` - size of the region the curve was estimated in
    /// * `min_window_size` - lower bound reported by `estimated_window_size`
    /// * `rim_width` - width of the linear decay past the outermost control points
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msprep::algorithm::quadrupole::{EstimatedIsolationWindow, IonTransmission};
    /// let window = EstimatedIsolationWindow::new(vec![(-1.0, 0.5), (0.0, 1.0), (1.0, 0.8)], 10.0, 1.0, 0.5).unwrap();
    /// assert!((window.intensity_ratio(300.0, 300.0) - 1.0).abs() < 1e-12);
    /// assert!((window.intensity_ratio(300.0, 300.5) - 0.9).abs() < 1e-12);
    /// assert!((window.intensity_ratio(300.0, 301.25) - 0.4).abs() < 1e-12);
    /// assert_eq!(window.intensity_ratio(300.0, 302.0), 0.0);
    /// assert!((window.estimated_window_size() - 2.0).abs() < 1e-12);
    /// ```
    pub fn new(points: Vec<(f64, f64)>, max_window_size: f64, min_window_size: f64, rim_width: f64) -> Result<Self, PreprocessingError> {
        if points.is_empty() {
            return Err(PreprocessingError::InsufficientData("no control points".to_string()));
        }
        if points.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(PreprocessingError::InsufficientData("control points are not strictly increasing".to_string()));
        }
        let (relative_mz, ratios): (Vec<f64>, Vec<f64>) = points.into_iter()
            .map(|(x, r)| (x, r.clamp(0.0, 1.0)))
            .unzip();

        Ok(EstimatedIsolationWindow {
            relative_mz,
            ratios,
            max_window_size,
            min_window_size,
            rim_width,
        })
    }

    pub fn control_points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.relative_mz.iter().cloned().zip(self.ratios.iter().cloned())
    }

    pub fn max_window_size(&self) -> f64 {
        self.max_window_size
    }

    pub fn rim_width(&self) -> f64 {
        self.rim_width
    }

    fn left(&self) -> f64 {
        self.relative_mz[0]
    }

    fn right(&self) -> f64 {
        self.relative_mz[self.relative_mz.len() - 1]
    }

    fn rim_ratio(&self, edge_ratio: f64, distance: f64) -> f64 {
        if distance >= self.rim_width || self.rim_width <= 0.0 {
            0.0
        } else {
            edge_ratio * (1.0 - distance / self.rim_width)
        }
    }
}

/// Decoded fields of an [`EstimatedIsolationWindow`] before the control points are checked.
#[derive(Deserialize, Encode, Decode)]
struct EstimatedIsolationWindowData {
    relative_mz: Vec<f64>,
    ratios: Vec<f64>,
    max_window_size: f64,
    min_window_size: f64,
    rim_width: f64,
}

impl TryFrom<EstimatedIsolationWindowData> for EstimatedIsolationWindow {
    type Error = PreprocessingError;

    fn try_from(data: EstimatedIsolationWindowData) -> Result<Self, Self::Error> {
        if data.relative_mz.len() != data.ratios.len() {
            return Err(PreprocessingError::InsufficientData("control points without ratios".to_string()));
        }
        let points = data.relative_mz.into_iter().zip(data.ratios).collect();
        EstimatedIsolationWindow::new(points, data.max_window_size, data.min_window_size, data.rim_width)
    }
}

// Manual bincode implementation so decoded curves go through the same checks as `new`
impl<Context> Decode<Context> for EstimatedIsolationWindow {
    fn decode<D: bincode::de::Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        let data: EstimatedIsolationWindowData = Decode::decode(decoder)?;
        EstimatedIsolationWindow::try_from(data).map_err(|e| bincode::error::DecodeError::OtherString(e.to_string()))
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for EstimatedIsolationWindow {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        Decode::decode(decoder)
    }
}

impl IonTransmission for EstimatedIsolationWindow {
    fn intensity_ratio(&self, precursor_mz: f64, target_mz: f64) -> f64 {
        let diff = target_mz - precursor_mz;
        let last = self.relative_mz.len() - 1;

        if diff < self.left() {
            return self.rim_ratio(self.ratios[0], self.left() - diff);
        }
        if diff > self.right() {
            return self.rim_ratio(self.ratios[last], diff - self.right());
        }

        match self.relative_mz.binary_search_by(|x| x.total_cmp(&diff)) {
            Ok(index) => self.ratios[index],
            Err(index) => {
                // left() <= diff <= right() so both brackets exist
                let (x0, x1) = (self.relative_mz[index - 1], self.relative_mz[index]);
                let (r0, r1) = (self.ratios[index - 1], self.ratios[index]);
                r0 + (r1 - r0) * (diff - x0) / (x1 - x0)
            }
        }
    }

    fn estimated_window_size(&self) -> f64 {
        (self.right() - self.left()).max(self.min_window_size)
    }

    fn estimated_mass_shift(&self) -> f64 {
        (self.left() + self.right()) / 2.0
    }
}

/// Isolation window attached to a dataset: either fitted or a rectangular fallback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum IsolationWindow {
    Rectangular(RectangularIsolationWindow),
    Estimated(EstimatedIsolationWindow),
}

impl IsolationWindow {
    pub fn is_estimated(&self) -> bool {
        matches!(self, IsolationWindow::Estimated(_))
    }

    /// Serializes the window with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PreprocessingError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreprocessingError> {
        let (window, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(window)
    }
}

impl IonTransmission for IsolationWindow {
    fn intensity_ratio(&self, precursor_mz: f64, target_mz: f64) -> f64 {
        match self {
            IsolationWindow::Rectangular(window) => window.intensity_ratio(precursor_mz, target_mz),
            IsolationWindow::Estimated(window) => window.intensity_ratio(precursor_mz, target_mz),
        }
    }

    fn estimated_window_size(&self) -> f64 {
        match self {
            IsolationWindow::Rectangular(window) => window.estimated_window_size(),
            IsolationWindow::Estimated(window) => window.estimated_window_size(),
        }
    }

    fn estimated_mass_shift(&self) -> f64 {
        match self {
            IsolationWindow::Rectangular(window) => window.estimated_mass_shift(),
            IsolationWindow::Estimated(window) => window.estimated_mass_shift(),
        }
    }
}

impl Display for IsolationWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_estimated() { "Estimated" } else { "Rectangular" };
        write!(f, "{}IsolationWindow(size: {:.3}, shift: {:.3})", kind, self.estimated_window_size(), self.estimated_mass_shift())
    }
}
