use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::analysis::solver::{Bounds, LeastSquaresProblem, LevenbergMarquardt, Termination};
use crate::config::FitConfig;
use crate::data::model::{DetectedPeak, FittedPeak, Spectrum};
use crate::error::{RamanError, Result};

// ---------------------------------------------------------------------------
// Composite Lorentzian model
// ---------------------------------------------------------------------------

/// Parameters per component, laid out as `[center, sigma, height]`.
const PARAMS_PER_PEAK: usize = 3;

/// Smallest width used when evaluating a component; keeps `sigma = 0` finite.
const SIGMA_FLOOR: f64 = 1e-9;

/// Sum of Lorentzians `h·σ² / ((x-c)² + σ²)` against a measured spectrum.
///
/// Components are parametrised by height rather than amplitude; the area
/// `amplitude = π·σ·h` is then non-negative whenever the height bound is.
struct CompositeLorentzian<'a> {
    x: &'a [f64],
    y: &'a [f64],
    n_peaks: usize,
}

impl CompositeLorentzian<'_> {
    fn component(params: &DVector<f64>, k: usize) -> (f64, f64, f64) {
        let base = k * PARAMS_PER_PEAK;
        (
            params[base],
            params[base + 1].max(SIGMA_FLOOR),
            params[base + 2],
        )
    }
}

impl LeastSquaresProblem for CompositeLorentzian<'_> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.x.len(),
            self.x.iter().zip(self.y).map(|(&x, &y)| {
                let model: f64 = (0..self.n_peaks)
                    .map(|k| {
                        let (c, s, h) = Self::component(params, k);
                        let dx = x - c;
                        h * s * s / (dx * dx + s * s)
                    })
                    .sum();
                model - y
            }),
        )
    }

    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.x.len(), self.n_peaks * PARAMS_PER_PEAK);
        for k in 0..self.n_peaks {
            let (c, s, h) = Self::component(params, k);
            let s2 = s * s;
            let col = k * PARAMS_PER_PEAK;
            for (i, &x) in self.x.iter().enumerate() {
                let dx = x - c;
                let d = dx * dx + s2;
                let d2 = d * d;
                jac[(i, col)] = 2.0 * h * s2 * dx / d2;
                jac[(i, col + 1)] = 2.0 * h * s * dx * dx / d2;
                jac[(i, col + 2)] = s2 / d;
            }
        }
        jac
    }
}

// ---------------------------------------------------------------------------
// Fit result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Converged,
    /// Iteration budget exhausted; peaks hold the last accepted estimate.
    MaxIterations,
    /// The solver produced non-finite values; no peaks are reported.
    Diverged,
    /// Nothing to fit.
    NoPeaks,
}

#[derive(Debug, Clone)]
pub struct FitResult {
    /// One record per detected peak, in detection order.
    pub peaks: Vec<FittedPeak>,
    pub status: FitStatus,
    pub sum_of_squares: f64,
    pub iterations: usize,
}

impl FitResult {
    fn empty(status: FitStatus) -> Self {
        FitResult {
            peaks: Vec::new(),
            status,
            sum_of_squares: f64::NAN,
            iterations: 0,
        }
    }

    /// Composite model evaluated at every wavenumber in `x`.
    pub fn best_fit(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .map(|&x| self.peaks.iter().map(|p| p.value_at(x)).sum())
            .collect()
    }

    /// A single component evaluated at every wavenumber in `x`.
    pub fn component(&self, index: usize, x: &[f64]) -> Option<Vec<f64>> {
        let peak = self.peaks.get(index)?;
        Some(x.iter().map(|&x| peak.value_at(x)).collect())
    }
}

// ---------------------------------------------------------------------------
// Fitting
// ---------------------------------------------------------------------------

/// Fit one Lorentzian per detected peak, all components jointly.
///
/// Starting values and constraints per component:
/// * center: detected wavenumber, within `± config.center_window`
/// * height: detected intensity, within `[height_min, height_max]`
/// * sigma: half width at half maximum read off the data, within
///   `[sigma_min, sigma_max]`
///
/// Starting values sitting on a bound are moved just inside it so the solver
/// can leave the boundary.
///
/// # Errors
///
/// [`RamanError::InvalidInput`] for non-finite detected peaks or inverted
/// bounds. A diverging solver is not an error: it yields an empty
/// [`FitResult`] with [`FitStatus::Diverged`].
pub fn fit_lorentzians(
    spectrum: &Spectrum,
    detected: &[DetectedPeak],
    config: &FitConfig,
) -> Result<FitResult> {
    if !(config.center_window > 0.0)
        || !(config.height_min < config.height_max)
        || !(config.sigma_min < config.sigma_max)
    {
        return Err(RamanError::invalid_input("fit bounds are empty or inverted"));
    }
    if detected
        .iter()
        .any(|p| !p.wavenumber.is_finite() || !p.intensity.is_finite())
    {
        return Err(RamanError::invalid_input("detected peak is not finite"));
    }
    if detected.is_empty() || spectrum.is_empty() {
        return Ok(FitResult::empty(FitStatus::NoPeaks));
    }

    let x = spectrum.x();
    let y = spectrum.y();
    let mut initial = Vec::with_capacity(detected.len() * PARAMS_PER_PEAK);
    let mut bounds = Vec::with_capacity(detected.len() * PARAMS_PER_PEAK);
    for peak in detected {
        let sigma = estimate_hwhm(x, y, peak);
        initial.push(peak.wavenumber);
        initial.push(inside(sigma, config.sigma_min, config.sigma_max));
        initial.push(inside(peak.intensity, config.height_min, config.height_max));
        bounds.push(Bounds::Range(
            peak.wavenumber - config.center_window,
            peak.wavenumber + config.center_window,
        ));
        bounds.push(Bounds::Range(config.sigma_min, config.sigma_max));
        bounds.push(Bounds::Range(config.height_min, config.height_max));
    }

    let problem = CompositeLorentzian {
        x,
        y,
        n_peaks: detected.len(),
    };
    let solution = LevenbergMarquardt::new(config.solver.clone()).minimize(
        &problem,
        &DVector::from_vec(initial),
        &bounds,
    );

    let status = match solution.termination {
        Termination::Converged => FitStatus::Converged,
        Termination::MaxIterations => FitStatus::MaxIterations,
        Termination::Diverged => FitStatus::Diverged,
    };
    if status == FitStatus::Diverged || solution.params.iter().any(|v| !v.is_finite()) {
        warn!("Lorentzian fit of {} peaks diverged", detected.len());
        return Ok(FitResult::empty(FitStatus::Diverged));
    }
    if status == FitStatus::MaxIterations {
        warn!(
            "Lorentzian fit of {} peaks stopped after {} iterations without converging",
            detected.len(),
            solution.iterations
        );
    }

    let peaks: Vec<FittedPeak> = solution
        .params
        .as_slice()
        .chunks_exact(PARAMS_PER_PEAK)
        .map(|p| FittedPeak::from_height(p[0], p[1], p[2]))
        .collect();
    debug!(
        "fitted {} Lorentzians in {} iterations, residual {:.4e}",
        peaks.len(),
        solution.iterations,
        solution.sum_of_squares
    );

    Ok(FitResult {
        peaks,
        status,
        sum_of_squares: solution.sum_of_squares,
        iterations: solution.iterations,
    })
}

/// Clamp `v` into the open interval `(lo, hi)`.
fn inside(v: f64, lo: f64, hi: f64) -> f64 {
    let margin = (hi - lo) * 1e-3;
    v.clamp(lo + margin, hi - margin)
}

/// Half width at half maximum around `peak`, from the first samples on each
/// side that fall below half of the peak intensity.
fn estimate_hwhm(x: &[f64], y: &[f64], peak: &DetectedPeak) -> f64 {
    let spacing = if x.len() > 1 {
        (x[x.len() - 1] - x[0]) / (x.len() - 1) as f64
    } else {
        1.0
    };
    let Some(i) = x.iter().position(|&v| v >= peak.wavenumber) else {
        return spacing;
    };
    let half = peak.intensity / 2.0;

    let left = (0..i).rev().find(|&j| y[j] < half).map(|j| x[i] - x[j]);
    let right = (i + 1..x.len()).find(|&j| y[j] < half).map(|j| x[j] - x[i]);
    let width = match (left, right) {
        (Some(l), Some(r)) => (l + r) / 2.0,
        (Some(w), None) | (None, Some(w)) => w,
        (None, None) => spacing,
    };
    width.max(spacing)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn synthetic(components: &[(f64, f64, f64)]) -> Spectrum {
        let x: Vec<f64> = (0..600).map(|i| 500.0 + 5.0 * i as f64).collect();
        let y = x
            .iter()
            .map(|&x| {
                components
                    .iter()
                    .map(|&(c, s, h)| FittedPeak::from_height(c, s, h).value_at(x))
                    .sum()
            })
            .collect();
        Spectrum::new(x, y).unwrap()
    }

    fn detected(wavenumber: f64, intensity: f64, spectrum: &Spectrum) -> DetectedPeak {
        let index = spectrum.x().iter().position(|&v| v >= wavenumber).unwrap();
        DetectedPeak {
            wavenumber,
            intensity,
            index,
            prominence: intensity,
        }
    }

    #[test]
    fn recovers_single_peak() {
        let spectrum = synthetic(&[(2000.0, 25.0, 0.9)]);
        let peaks = [detected(2005.0, 0.85, &spectrum)];
        let fit = fit_lorentzians(&spectrum, &peaks, &FitConfig::default()).unwrap();
        assert_eq!(fit.status, FitStatus::Converged);
        assert_eq!(fit.peaks.len(), 1);
        let p = fit.peaks[0];
        assert_abs_diff_eq!(p.center, 2000.0, epsilon = 1e-3);
        assert_abs_diff_eq!(p.sigma, 25.0, epsilon = 1e-3);
        assert_abs_diff_eq!(p.height, 0.9, epsilon = 1e-4);
        assert_abs_diff_eq!(p.fwhm, 2.0 * p.sigma);
        assert_abs_diff_eq!(p.amplitude, std::f64::consts::PI * p.sigma * p.height, epsilon = 1e-9);
    }

    #[test]
    fn overlapping_peaks_fit_jointly() {
        let spectrum = synthetic(&[(1500.0, 20.0, 0.8), (1560.0, 30.0, 0.5)]);
        let peaks = [detected(1500.0, 0.83, &spectrum), detected(1560.0, 0.58, &spectrum)];
        let fit = fit_lorentzians(&spectrum, &peaks, &FitConfig::default()).unwrap();
        assert_ne!(fit.status, FitStatus::Diverged);
        assert_eq!(fit.peaks.len(), 2);
        assert_abs_diff_eq!(fit.peaks[0].center, 1500.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.peaks[1].center, 1560.0, epsilon = 0.1);
        assert_abs_diff_eq!(fit.peaks[0].height, 0.8, epsilon = 1e-2);
        assert_abs_diff_eq!(fit.peaks[1].height, 0.5, epsilon = 1e-2);
        assert!(fit.sum_of_squares < 1e-6);
    }

    #[test]
    fn constraints_hold() {
        // The data peak is 40 cm⁻¹ away and taller than the height bound.
        let spectrum = synthetic(&[(2040.0, 15.0, 1.0)]);
        let mut config = FitConfig::default();
        config.height_max = 0.6;
        let peaks = [detected(2000.0, 0.3, &spectrum)];
        let fit = fit_lorentzians(&spectrum, &peaks, &config).unwrap();
        let p = fit.peaks[0];
        assert!(p.center >= 1990.0 && p.center <= 2010.0);
        assert!(p.height >= 0.0 && p.height <= 0.6);
        assert!(p.sigma >= 0.0 && p.sigma <= 500.0);
        assert!(p.amplitude >= 0.0);
    }

    #[test]
    fn no_peaks_is_empty() {
        let spectrum = synthetic(&[(2000.0, 25.0, 0.9)]);
        let fit = fit_lorentzians(&spectrum, &[], &FitConfig::default()).unwrap();
        assert!(fit.peaks.is_empty());
        assert_eq!(fit.status, FitStatus::NoPeaks);
    }

    #[test]
    fn repeated_fit_is_identical() {
        let spectrum = synthetic(&[(1200.0, 10.0, 0.6), (2500.0, 40.0, 0.4)]);
        let peaks = [detected(1202.0, 0.6, &spectrum), detected(2495.0, 0.4, &spectrum)];
        let a = fit_lorentzians(&spectrum, &peaks, &FitConfig::default()).unwrap();
        let b = fit_lorentzians(&spectrum, &peaks, &FitConfig::default()).unwrap();
        assert_eq!(a.peaks, b.peaks);
    }

    #[test]
    fn curves_for_plotting() {
        let spectrum = synthetic(&[(2000.0, 25.0, 0.9)]);
        let peaks = [detected(2000.0, 0.9, &spectrum)];
        let fit = fit_lorentzians(&spectrum, &peaks, &FitConfig::default()).unwrap();
        let curve = fit.best_fit(spectrum.x());
        assert_eq!(curve.len(), spectrum.len());
        for (a, b) in curve.iter().zip(spectrum.y()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
        assert_eq!(fit.component(0, spectrum.x()).unwrap(), curve);
        assert!(fit.component(1, spectrum.x()).is_none());
    }

    #[test]
    fn rejects_non_finite_peak() {
        let spectrum = synthetic(&[(2000.0, 25.0, 0.9)]);
        let peak = DetectedPeak {
            wavenumber: f64::NAN,
            intensity: 0.5,
            index: 0,
            prominence: 0.5,
        };
        assert!(fit_lorentzians(&spectrum, &[peak], &FitConfig::default()).is_err());
    }
}
