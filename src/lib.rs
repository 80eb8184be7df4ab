//! Peak fitting and compound identification for Raman and IR spectra.
//!
//! A spectrum goes through baseline removal, peak detection and a composite
//! Lorentzian fit ([`analysis::pipeline::fit_spectrum`]); the fitted centers
//! are then matched against a library of reference compounds
//! ([`analysis::identify::identify`]).

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;

pub use analysis::identify::{identify, identify_against, Identification};
pub use analysis::pipeline::{fit_spectrum, PeakReport};
pub use config::AnalysisConfig;
pub use data::model::{CompoundLibrary, CompoundLibraryEntry, FittedPeak, Spectrum};
pub use data::store::SpectralLibrary;
pub use error::{RamanError, Result};
