use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RamanError, Result};

// ---------------------------------------------------------------------------
// MetadataValue – a single metadata cell
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value (units, CAS numbers, sample columns…).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum – wavenumber / intensity pairs
// ---------------------------------------------------------------------------

/// A single spectrum, sorted by strictly increasing wavenumber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSpectrum", into = "RawSpectrum")]
pub struct Spectrum {
    /// Wavenumber axis (x), cm⁻¹.
    x: Vec<f64>,
    /// Intensity axis (y) – same length as `x`.
    y: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct RawSpectrum {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl TryFrom<RawSpectrum> for Spectrum {
    type Error = RamanError;

    fn try_from(raw: RawSpectrum) -> Result<Self> {
        Spectrum::new(raw.x, raw.y)
    }
}

impl From<Spectrum> for RawSpectrum {
    fn from(sp: Spectrum) -> Self {
        RawSpectrum { x: sp.x, y: sp.y }
    }
}

impl Spectrum {
    /// Build a spectrum from raw axes in any order.
    ///
    /// Samples are sorted ascending by wavenumber (descending calibration
    /// exports are common) and repeated wavenumbers are collapsed, keeping the
    /// first sample.
    ///
    /// # Errors
    ///
    /// [`RamanError::InvalidInput`] if the axes differ in length or contain
    /// non-finite values.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(RamanError::invalid_input(format!(
                "x has {} values but y has {}",
                x.len(),
                y.len()
            )));
        }
        if let Some(j) = x.iter().position(|v| !v.is_finite()) {
            return Err(RamanError::invalid_input(format!("x[{j}] is not finite")));
        }
        if let Some(j) = y.iter().position(|v| !v.is_finite()) {
            return Err(RamanError::invalid_input(format!("y[{j}] is not finite")));
        }

        let already_sorted = x.windows(2).all(|w| w[0] < w[1]);
        if already_sorted {
            return Ok(Spectrum { x, y });
        }

        let mut pairs: Vec<(f64, f64)> = x.into_iter().zip(y).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        pairs.dedup_by(|later, earlier| later.0 == earlier.0);
        let (x, y) = pairs.into_iter().unzip();
        Ok(Spectrum { x, y })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Smallest and largest wavenumber, `None` for an empty spectrum.
    pub fn x_range(&self) -> Option<(f64, f64)> {
        Some((*self.x.first()?, *self.x.last()?))
    }

    /// Same wavenumbers, new intensities.
    pub fn with_intensities(&self, y: Vec<f64>) -> Result<Self> {
        if y.len() != self.x.len() {
            return Err(RamanError::invalid_input(format!(
                "expected {} intensities, got {}",
                self.x.len(),
                y.len()
            )));
        }
        Spectrum::new(self.x.clone(), y)
    }

    /// Min-max scale intensities into [0, 1]. A flat spectrum maps to zeros.
    pub fn normalized(&self) -> Self {
        let min = self.y.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;
        let y = if span > 0.0 {
            self.y.iter().map(|v| (v - min) / span).collect()
        } else {
            vec![0.0; self.y.len()]
        };
        Spectrum {
            x: self.x.clone(),
            y,
        }
    }
}

// ---------------------------------------------------------------------------
// Peaks
// ---------------------------------------------------------------------------

/// A candidate peak position, before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedPeak {
    pub wavenumber: f64,
    pub intensity: f64,
    /// Sample index of the maximum in the source spectrum.
    pub index: usize,
    pub prominence: f64,
}

/// One Lorentzian component of a fitted model.
///
/// `fwhm = 2·sigma` and `height = amplitude / (π·sigma)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FittedPeak {
    pub center: f64,
    pub sigma: f64,
    pub amplitude: f64,
    pub fwhm: f64,
    pub height: f64,
}

impl FittedPeak {
    /// Build a component from its shape parameters, deriving the rest.
    pub fn from_height(center: f64, sigma: f64, height: f64) -> Self {
        FittedPeak {
            center,
            sigma,
            amplitude: PI * sigma * height,
            fwhm: 2.0 * sigma,
            height,
        }
    }

    /// Value of this component at wavenumber `x`.
    pub fn value_at(&self, x: f64) -> f64 {
        let dx = x - self.center;
        let s2 = self.sigma * self.sigma;
        if s2 == 0.0 {
            return if dx == 0.0 { self.height } else { 0.0 };
        }
        self.height * s2 / (dx * dx + s2)
    }
}

// ---------------------------------------------------------------------------
// Library entries
// ---------------------------------------------------------------------------

/// A known reference compound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundLibraryEntry {
    pub title: String,
    pub spectrum: Spectrum,
    /// Fitted peaks; `None` until the entry has been run through the fitter.
    #[serde(default)]
    pub peaks: Option<Vec<FittedPeak>>,
    /// Units, CAS number, source file…
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl CompoundLibraryEntry {
    pub fn new(title: impl Into<String>, spectrum: Spectrum) -> Self {
        CompoundLibraryEntry {
            title: title.into(),
            spectrum,
            peaks: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Centers of the cached peaks (empty when not fitted yet).
    pub fn peak_centers(&self) -> Vec<f64> {
        self.peaks
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|p| p.center)
            .collect()
    }
}

/// Immutable view of all known compounds, keyed by label.
pub type CompoundLibrary = BTreeMap<String, CompoundLibraryEntry>;

// ---------------------------------------------------------------------------
// SpectralDataset – spectra read from a multi-row file
// ---------------------------------------------------------------------------

/// One row of a loaded dataset.
#[derive(Debug, Clone)]
pub struct LabelledSpectrum {
    pub title: String,
    pub spectrum: Spectrum,
    /// Dynamic metadata columns: column_name → value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

/// The full parsed dataset with its metadata column names.
#[derive(Debug, Clone)]
pub struct SpectralDataset {
    pub spectra: Vec<LabelledSpectrum>,
    /// Ordered list of metadata column names (excludes x, y).
    pub column_names: Vec<String>,
}

impl SpectralDataset {
    pub fn from_spectra(spectra: Vec<LabelledSpectrum>) -> Self {
        let column_names: BTreeSet<String> = spectra
            .iter()
            .flat_map(|sp| sp.metadata.keys().cloned())
            .collect();
        SpectralDataset {
            spectra,
            column_names: column_names.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}
