use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::algorithm::quadrupole::IsolationWindow;
use crate::chemistry::decomposer::FormulaConstraints;
use crate::chemistry::deviation::MassDeviation;
use crate::chemistry::ionization::IonType;
use crate::data::spectrum::MzSpectrum;
use crate::quality::compound_quality::{CompoundQuality, SpectrumProperty};
use crate::quality::statistics::DatasetStatisticsSnapshot;

/// Tag of the values an [`Annotations`] store can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnnotationKey {
    CompoundQuality,
    FormulaConstraints,
    IsolationWindow,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Annotation {
    CompoundQuality(CompoundQuality),
    FormulaConstraints(FormulaConstraints),
    IsolationWindow(IsolationWindow),
}

impl Annotation {
    pub fn key(&self) -> AnnotationKey {
        match self {
            Annotation::CompoundQuality(_) => AnnotationKey::CompoundQuality,
            Annotation::FormulaConstraints(_) => AnnotationKey::FormulaConstraints,
            Annotation::IsolationWindow(_) => AnnotationKey::IsolationWindow,
        }
    }
}

/// A type that can be stored in an [`Annotations`] store.
pub trait Annotated: Sized {
    const KEY: AnnotationKey;

    fn into_annotation(self) -> Annotation;
    fn from_annotation(annotation: &Annotation) -> Option<&Self>;
    fn from_annotation_mut(annotation: &mut Annotation) -> Option<&mut Self>;
}

macro_rules! impl_annotated {
    ($ty:ident) => {
        impl Annotated for $ty {
            const KEY: AnnotationKey = AnnotationKey::$ty;

            fn into_annotation(self) -> Annotation {
                Annotation::$ty(self)
            }

            fn from_annotation(annotation: &Annotation) -> Option<&Self> {
                match annotation {
                    Annotation::$ty(value) => Some(value),
                    _ => None,
                }
            }

            fn from_annotation_mut(annotation: &mut Annotation) -> Option<&mut Self> {
                match annotation {
                    Annotation::$ty(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

impl_annotated!(CompoundQuality);
impl_annotated!(FormulaConstraints);
impl_annotated!(IsolationWindow);

/// Typed store of per-experiment results, at most one value per [`AnnotationKey`].
///
/// # Example
///
/// ```rust
/// # use msprep::data::experiment::Annotations;
/// # use msprep::quality::compound_quality::{CompoundQuality, SpectrumProperty};
/// let mut annotations = Annotations::default();
/// assert!(!annotations.has::<CompoundQuality>());
/// annotations.get_or_insert_default::<CompoundQuality>().add(SpectrumProperty::FewPeaks);
/// assert!(annotations.get::<CompoundQuality>().unwrap().has(SpectrumProperty::FewPeaks));
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Annotations {
    entries: BTreeMap<AnnotationKey, Annotation>,
}

impl Annotations {
    pub fn get<T: Annotated>(&self) -> Option<&T> {
        self.entries.get(&T::KEY).and_then(T::from_annotation)
    }

    pub fn get_mut<T: Annotated>(&mut self) -> Option<&mut T> {
        self.entries.get_mut(&T::KEY).and_then(T::from_annotation_mut)
    }

    /// Stores `value`, replacing a previous value of the same type.
    pub fn set<T: Annotated>(&mut self, value: T) {
        let annotation = value.into_annotation();
        self.entries.insert(annotation.key(), annotation);
    }

    pub fn has<T: Annotated>(&self) -> bool {
        self.get::<T>().is_some()
    }

    pub fn remove<T: Annotated>(&mut self) -> bool {
        self.entries.remove(&T::KEY).is_some()
    }

    pub fn get_or_insert_default<T: Annotated + Default>(&mut self) -> &mut T {
        if !self.has::<T>() {
            self.set(T::default());
        }
        match self.entries.get_mut(&T::KEY).and_then(T::from_annotation_mut) {
            Some(value) => value,
            None => unreachable!("annotation stored under a foreign key"),
        }
    }
}

/// One compound measurement: the precursor, its MS1 context and the MS2 spectra.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    /// Precursor ion m/z.
    pub ion_mass: f64,
    pub ion_type: Option<IonType>,
    pub ms1_spectra: Vec<MzSpectrum>,
    pub merged_ms1: Option<MzSpectrum>,
    pub ms2_spectra: Vec<MzSpectrum>,
    pub annotations: Annotations,
}

impl Experiment {
    pub fn new(name: &str, ion_mass: f64) -> Self {
        Experiment {
            name: name.to_string(),
            ion_mass,
            ..Default::default()
        }
    }

    pub fn with_ion_type(mut self, ion_type: IonType) -> Self {
        self.ion_type = Some(ion_type);
        self
    }

    pub fn with_ms1(mut self, spectrum: MzSpectrum) -> Self {
        self.ms1_spectra.push(spectrum);
        self
    }

    pub fn with_merged_ms1(mut self, spectrum: MzSpectrum) -> Self {
        self.merged_ms1 = Some(spectrum);
        self
    }

    pub fn with_ms2(mut self, spectrum: MzSpectrum) -> Self {
        self.ms2_spectra.push(spectrum);
        self
    }

    pub fn has_ms1(&self) -> bool {
        self.merged_ms1.as_ref().map_or(false, |s| !s.is_empty()) || self.ms1_spectra.iter().any(|s| !s.is_empty())
    }

    /// All MS2 spectra merged into one.
    pub fn merged_ms2(&self, deviation: &MassDeviation) -> MzSpectrum {
        match self.ms2_spectra.as_slice() {
            [single] => single.clone(),
            spectra => MzSpectrum::merge_spectra(spectra, deviation),
        }
    }

    pub fn quality(&self) -> Option<&CompoundQuality> {
        self.annotations.get::<CompoundQuality>()
    }

    pub fn has_property(&self, property: SpectrumProperty) -> bool {
        self.quality().map_or(false, |q| q.has(property))
    }

    pub fn add_property(&mut self, property: SpectrumProperty) {
        self.annotations.get_or_insert_default::<CompoundQuality>().add(property);
    }

    pub fn formula_constraints(&self) -> Option<&FormulaConstraints> {
        self.annotations.get::<FormulaConstraints>()
    }
}

/// A corpus of experiments plus the corpus-level results computed from them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ms2Dataset {
    pub experiments: Vec<Experiment>,
    pub isolation_window: Option<IsolationWindow>,
    /// Nominal isolation window width in Da, if known.
    pub isolation_window_width: Option<f64>,
    pub statistics: Option<DatasetStatisticsSnapshot>,
}

impl Ms2Dataset {
    pub fn new(experiments: Vec<Experiment>) -> Self {
        Ms2Dataset {
            experiments,
            ..Default::default()
        }
    }

    pub fn with_isolation_window_width(mut self, width: f64) -> Self {
        self.isolation_window_width = Some(width);
        self
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    pub fn count_with_property(&self, property: SpectrumProperty) -> usize {
        self.experiments.iter().filter(|e| e.has_property(property)).count()
    }
}
