// Purpose: To store constants that are used in the program
pub const MASS_PROTON: f64 = 1.007276466621; // Unified atomic mass unit
pub const MASS_ELECTRON: f64 = 0.00054857990946; // Unified atomic mass unit

// Adduct masses of the standard ionizations
pub const MASS_SODIUM: f64 = 22.989769282;
pub const MASS_POTASSIUM: f64 = 38.963706486;
pub const MASS_CHLORINE: f64 = 34.968852682;
pub const MASS_HYDROGEN: f64 = 1.00782503223;

/// Average mass difference between neighbouring isotope peaks of organic compounds
pub const ISOTOPE_MASS_DIFF: f64 = 1.00335;

// Mass defect per additional neutron for the CHNOPS alphabet, relative to 1 Da.
// The lightest shift is 15N - 14N, the heaviest 2H - 1H.
pub const MIN_NEUTRON_MASS_DEFECT: f64 = -0.002965;
pub const MAX_NEUTRON_MASS_DEFECT: f64 = 0.006277;
