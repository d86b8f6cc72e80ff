// chemistry module
pub mod chemistry {
    pub mod constants;
    pub mod deviation;
    pub mod ionization;
    pub mod decomposer;
}

// algorithm module
pub mod algorithm {
    pub mod isotope;
    pub mod pattern;
    pub mod aggregation;
    pub mod quadrupole;
    pub mod estimation;
}

// data module
pub mod data {
    pub mod spectrum;
    pub mod experiment;
}

// quality module
pub mod quality {
    pub mod compound_quality;
    pub mod statistics;
    pub mod annotators;
}

pub mod config;
pub mod errors;
pub mod preprocessing;
pub mod report;
