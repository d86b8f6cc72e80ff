use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chemistry::constants::{MASS_CHLORINE, MASS_ELECTRON, MASS_HYDROGEN, MASS_POTASSIUM, MASS_SODIUM};
use crate::errors::PreprocessingError;

fn ion_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\[(\d*)M((?:[+-]\d*[A-Z][A-Za-z0-9]*)*)\](\d*)([+-])$").unwrap())
}

fn adduct_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([+-])(\d*)([A-Z][A-Za-z0-9]*)").unwrap())
}

/// Neutral mass of the adduct groups accepted in ion type notation.
fn adduct_mass(group: &str) -> Option<f64> {
    match group {
        "H" => Some(MASS_HYDROGEN),
        "Na" => Some(MASS_SODIUM),
        "K" => Some(MASS_POTASSIUM),
        "Cl" => Some(MASS_CHLORINE),
        "NH4" => Some(14.00307400443 + 4.0 * MASS_HYDROGEN),
        "H2O" => Some(15.99491461957 + 2.0 * MASS_HYDROGEN),
        "Li" => Some(7.0160034366),
        _ => None,
    }
}

/// Precursor ion type such as `[M+H]+` or `[M-H]-`.
///
/// The ion m/z is `(multimere * M + adduct - charge * e) / |charge|`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IonType {
    pub name: String,
    pub charge: i32,
    pub multimere: u32,
    /// Summed mass of the attached and lost groups in Da.
    pub adduct_mass: f64,
}

impl IonType {
    /// Parses an ion type from bracket notation.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use msprep::chemistry::ionization::IonType;
    /// let ion = IonType::parse("[M+Na]+").unwrap();
    /// assert_eq!(ion.charge, 1);
    /// assert!((ion.adduct_mass - 22.98977).abs() < 1e-4);
    /// assert!(IonType::parse("M+H").is_err());
    /// ```
    pub fn parse(notation: &str) -> Result<Self, PreprocessingError> {
        let notation = notation.trim();
        let invalid = || PreprocessingError::InvalidIonType(notation.to_string());
        let captures = ion_type_pattern().captures(notation).ok_or_else(invalid)?;

        let multimere = match &captures[1] {
            "" => 1,
            n => n.parse::<u32>().map_err(|_| invalid())?,
        };

        let mut adduct = 0.0;
        for group in adduct_pattern().captures_iter(&captures[2]) {
            let sign = if &group[1] == "-" { -1.0 } else { 1.0 };
            let count = match &group[2] {
                "" => 1.0,
                n => n.parse::<f64>().map_err(|_| invalid())?,
            };
            let mass = adduct_mass(&group[3]).ok_or_else(invalid)?;
            adduct += sign * count * mass;
        }

        let magnitude = match &captures[3] {
            "" => 1,
            n => n.parse::<i32>().map_err(|_| invalid())?,
        };
        let charge = if &captures[4] == "-" { -magnitude } else { magnitude };

        if multimere == 0 || charge == 0 {
            return Err(invalid());
        }

        Ok(IonType {
            name: notation.to_string(),
            charge,
            multimere,
            adduct_mass: adduct,
        })
    }

    /// Converts an observed ion m/z into the neutral compound mass.
    pub fn subtract_from_mass(&self, mz: f64) -> f64 {
        let ion_mass = mz * self.charge.abs() as f64 + self.charge as f64 * MASS_ELECTRON;
        (ion_mass - self.adduct_mass) / self.multimere as f64
    }

    /// Converts a neutral compound mass into the ion m/z.
    pub fn add_to_mass(&self, neutral_mass: f64) -> f64 {
        let ion_mass = neutral_mass * self.multimere as f64 + self.adduct_mass - self.charge as f64 * MASS_ELECTRON;
        ion_mass / self.charge.abs() as f64
    }

    pub fn charge_sign(&self) -> i32 {
        self.charge.signum()
    }
}

impl FromStr for IonType {
    type Err = PreprocessingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IonType::parse(s)
    }
}

impl Display for IonType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Ionizations tried when deciding whether a peak could be explained by a molecular formula.
///
/// # Arguments
///
/// * `charge_sign` - sign of the dataset's precursor charge (+1 or -1)
pub fn standard_ionizations(charge_sign: i32) -> Vec<IonType> {
    let names: &[&str] = if charge_sign < 0 {
        &["[M]-", "[M-H]-", "[M+Cl]-"]
    } else {
        &["[M]+", "[M+H]+", "[M+Na]+", "[M+K]+"]
    };
    names.iter().filter_map(|name| IonType::parse(name).ok()).collect()
}
