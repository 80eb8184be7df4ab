use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{RamanError, Result};

// ---------------------------------------------------------------------------
// Analysis configuration
// ---------------------------------------------------------------------------

/// Every tunable of the baseline → detection → fit → match pipeline.
///
/// All sections default to the values that worked for normalised Raman/IR
/// reference spectra, so a partial JSON file only needs the fields it changes:
///
/// ```json
/// { "detection": { "height": 0.05 }, "matching": { "precision": 0.02 } }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub baseline: BaselineConfig,
    pub detection: DetectionConfig,
    pub fit: FitConfig,
    pub matching: MatchConfig,
    /// Min-max scale intensities before running the pipeline.
    pub normalize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Degree of the polynomial floor.
    pub degree: usize,
    pub max_iterations: usize,
    /// Relative coefficient change below which the iteration stops.
    pub tolerance: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            degree: 3,
            max_iterations: 200,
            tolerance: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum peak intensity.
    pub height: f64,
    /// Minimum prominence over the surrounding minima.
    pub prominence: f64,
    /// Minimum separation between peaks, in samples.
    pub distance: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            height: 0.1,
            prominence: 0.1,
            distance: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Each center may move this far (cm⁻¹) from its detected position.
    pub center_window: f64,
    pub height_min: f64,
    pub height_max: f64,
    pub sigma_min: f64,
    pub sigma_max: f64,
    pub solver: SolverConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            center_window: 10.0,
            height_min: 0.0,
            height_max: 1.0,
            sigma_min: 0.0,
            sigma_max: 500.0,
            solver: SolverConfig::default(),
        }
    }
}

/// Termination criteria of the Levenberg–Marquardt solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Upper bound on iterations; `0` means `200 * (n_params + 1)`.
    pub max_iterations: usize,
    /// Relative reduction of the sum of squares.
    pub ftol: f64,
    /// Relative step size.
    pub xtol: f64,
    /// Largest gradient component.
    pub gtol: f64,
    pub initial_lambda: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 0,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Relative tolerance between an unknown and a known peak center.
    pub precision: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self { precision: 0.03 }
    }
}

impl AnalysisConfig {
    /// Read a JSON configuration file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&text)?;
        debug!("loaded configuration from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(RamanError::invalid_input(msg));
        if self.baseline.max_iterations == 0 {
            return invalid("baseline.max_iterations must be at least 1");
        }
        if !(self.baseline.tolerance > 0.0) {
            return invalid("baseline.tolerance must be positive");
        }
        if self.detection.distance == 0 {
            return invalid("detection.distance must be at least 1 sample");
        }
        if !self.detection.height.is_finite() || !self.detection.prominence.is_finite() {
            return invalid("detection thresholds must be finite");
        }
        let fit = &self.fit;
        if !(fit.center_window > 0.0) {
            return invalid("fit.center_window must be positive");
        }
        if !(fit.height_min < fit.height_max) || !(fit.sigma_min < fit.sigma_max) {
            return invalid("fit bounds must satisfy min < max");
        }
        if fit.sigma_min < 0.0 {
            return invalid("fit.sigma_min must be non-negative");
        }
        if !(self.matching.precision > 0.0) || !self.matching.precision.is_finite() {
            return invalid("matching.precision must be a positive number");
        }
        Ok(())
    }
}
