use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::chemistry::deviation::MassDeviation;
use crate::data::experiment::Experiment;
use crate::errors::DecompositionError;

/// Element alphabet with upper bounds on the number of atoms per element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormulaConstraints {
    pub upper_bounds: BTreeMap<String, u32>,
}

impl Default for FormulaConstraints {
    /// CHNOPS with unbounded C, H, N, O and at most 5 P and 3 S.
    fn default() -> Self {
        let upper_bounds = [("C", u32::MAX), ("H", u32::MAX), ("N", u32::MAX), ("O", u32::MAX), ("P", 5), ("S", 3)]
            .into_iter()
            .map(|(element, bound)| (element.to_string(), bound))
            .collect();
        FormulaConstraints { upper_bounds }
    }
}

impl FormulaConstraints {
    pub fn new(upper_bounds: BTreeMap<String, u32>) -> Self {
        FormulaConstraints { upper_bounds }
    }

    /// Elements that may occur at least once.
    pub fn alphabet(&self) -> Vec<&str> {
        self.upper_bounds.iter().filter(|(_, &bound)| bound > 0).map(|(element, _)| element.as_str()).collect()
    }

    pub fn with_element(mut self, element: &str, upper_bound: u32) -> Self {
        self.upper_bounds.insert(element.to_string(), upper_bound);
        self
    }
}

/// Decides whether a neutral mass can plausibly be explained by some molecular formula.
///
/// Only plausibility is needed, never the formulas themselves.
pub trait DecomposabilityOracle: Sync {
    fn is_decomposable(&self, neutral_mass: f64, deviation: &MassDeviation, constraints: &FormulaConstraints) -> Result<bool, DecompositionError>;
}

impl<F> DecomposabilityOracle for F
where
    F: Fn(f64, &MassDeviation, &FormulaConstraints) -> Result<bool, DecompositionError> + Sync,
{
    fn is_decomposable(&self, neutral_mass: f64, deviation: &MassDeviation, constraints: &FormulaConstraints) -> Result<bool, DecompositionError> {
        self(neutral_mass, deviation, constraints)
    }
}

/// Predicts per-experiment element constraints, e.g. from the MS1 isotope pattern.
///
/// Returning `None` keeps the dataset default.
pub trait ElementPredictor: Sync {
    fn predict_constraints(&self, experiment: &Experiment, default: &FormulaConstraints) -> Option<FormulaConstraints>;
}
