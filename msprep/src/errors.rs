use thiserror::Error;

/// Errors raised while preprocessing an MS/MS dataset.
#[derive(Debug, Error)]
pub enum PreprocessingError {
    /// Too few usable isotope patterns to fit an isolation window.
    #[error("Insufficient data to estimate the isolation window: {0}")]
    InsufficientData(String),

    #[error("Dataset contains both positive and negative ion types")]
    MixedChargeSigns,

    #[error("Cannot parse ion type '{0}'")]
    InvalidIonType(String),

    #[error("Dataset is empty after validation")]
    EmptyDataset,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid mass deviation for {0}")]
    InvalidDeviation(&'static str),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Cannot build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Errors reported by a [`DecomposabilityOracle`](crate::chemistry::decomposer::DecomposabilityOracle).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecompositionError {
    #[error("Element alphabet is empty")]
    EmptyAlphabet,

    #[error("Negative or non-finite mass: {0}")]
    InvalidMass(f64),

    #[error("Invalid mass deviation: {0}")]
    InvalidDeviation(String),
}

pub type Result<T> = std::result::Result<T, PreprocessingError>;
