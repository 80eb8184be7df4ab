use log::{debug, info};

use crate::analysis::baseline::subtract_baseline;
use crate::analysis::lorentz::{fit_lorentzians, FitResult};
use crate::analysis::peaks::detect_peaks;
use crate::config::AnalysisConfig;
use crate::data::model::{DetectedPeak, FittedPeak, Spectrum};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Baseline → detection → fit
// ---------------------------------------------------------------------------

/// Everything produced while fitting one spectrum.
#[derive(Debug, Clone)]
pub struct PeakReport {
    /// The spectrum after optional normalisation and baseline removal; this
    /// is what the peaks were detected in and fitted against.
    pub corrected: Spectrum,
    pub detected: Vec<DetectedPeak>,
    pub fit: FitResult,
    /// Wavenumber range of the input spectrum.
    pub x_range: Option<(f64, f64)>,
}

impl PeakReport {
    pub fn peaks(&self) -> &[FittedPeak] {
        &self.fit.peaks
    }

    pub fn centers(&self) -> Vec<f64> {
        self.fit.peaks.iter().map(|p| p.center).collect()
    }

    pub fn sigmas(&self) -> Vec<f64> {
        self.fit.peaks.iter().map(|p| p.sigma).collect()
    }

    pub fn amplitudes(&self) -> Vec<f64> {
        self.fit.peaks.iter().map(|p| p.amplitude).collect()
    }

    /// Composite model on the corrected spectrum's wavenumbers.
    pub fn best_fit(&self) -> Vec<f64> {
        self.fit.best_fit(self.corrected.x())
    }
}

/// Run the full peak pipeline on one spectrum.
pub fn fit_spectrum(spectrum: &Spectrum, config: &AnalysisConfig) -> Result<PeakReport> {
    let input = if config.normalize {
        spectrum.normalized()
    } else {
        spectrum.clone()
    };

    let y = subtract_baseline(input.y(), &config.baseline)?;
    let corrected = input.with_intensities(y)?;
    let detected = detect_peaks(corrected.x(), corrected.y(), &config.detection)?;
    debug!(
        "detected peaks at {:?}",
        detected.iter().map(|p| p.wavenumber).collect::<Vec<_>>()
    );
    let fit = fit_lorentzians(&corrected, &detected, &config.fit)?;
    info!(
        "fitted {} of {} detected peaks ({:?})",
        fit.peaks.len(),
        detected.len(),
        fit.status
    );

    Ok(PeakReport {
        corrected,
        detected,
        fit,
        x_range: spectrum.x_range(),
    })
}
