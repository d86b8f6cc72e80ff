use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// Quality flag of a single experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpectrumProperty {
    Good,
    Bad,
    LowIntensity,
    NoMS1Peak,
    Noisy,
    GrassPeaks,
    FewPeaks,
    Chimeric,
    NotMonoisotopicPeak,
}

impl SpectrumProperty {
    pub const ALL: [SpectrumProperty; 9] = [
        SpectrumProperty::Good,
        SpectrumProperty::Bad,
        SpectrumProperty::LowIntensity,
        SpectrumProperty::NoMS1Peak,
        SpectrumProperty::Noisy,
        SpectrumProperty::GrassPeaks,
        SpectrumProperty::FewPeaks,
        SpectrumProperty::Chimeric,
        SpectrumProperty::NotMonoisotopicPeak,
    ];
}

impl Display for SpectrumProperty {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpectrumProperty::Good => "Good",
            SpectrumProperty::Bad => "Bad",
            SpectrumProperty::LowIntensity => "LowIntensity",
            SpectrumProperty::NoMS1Peak => "NoMS1Peak",
            SpectrumProperty::Noisy => "Noisy",
            SpectrumProperty::GrassPeaks => "GrassPeaks",
            SpectrumProperty::FewPeaks => "FewPeaks",
            SpectrumProperty::Chimeric => "Chimeric",
            SpectrumProperty::NotMonoisotopicPeak => "NotMonoisotopicPeak",
        };
        write!(f, "{}", name)
    }
}

/// Set of quality flags of one experiment. Flags are only ever added.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompoundQuality {
    properties: BTreeSet<SpectrumProperty>,
}

impl CompoundQuality {
    pub fn new() -> Self {
        CompoundQuality::default()
    }

    pub fn add(&mut self, property: SpectrumProperty) {
        self.properties.insert(property);
    }

    pub fn has(&self, property: SpectrumProperty) -> bool {
        self.properties.contains(&property)
    }

    pub fn is_good(&self) -> bool {
        self.has(SpectrumProperty::Good)
    }

    /// True if no flag other than `Good` is present.
    pub fn is_not_bad(&self) -> bool {
        self.properties.iter().all(|&p| p == SpectrumProperty::Good)
    }

    pub fn properties(&self) -> impl Iterator<Item = SpectrumProperty> + '_ {
        self.properties.iter().copied()
    }
}

impl Display for CompoundQuality {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.properties.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}
