use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::config::BaselineConfig;
use crate::error::{RamanError, Result};

// ---------------------------------------------------------------------------
// Iterative polynomial baseline
// ---------------------------------------------------------------------------

/// Estimate the slowly varying floor under `y`.
///
/// A polynomial of `config.degree` is least-squares fitted to the data; the
/// data is then clipped to the fit from above and refitted, so peaks lose their
/// pull on the polynomial with every pass. Iteration stops once the relative
/// change of the coefficients drops below `config.tolerance`.
///
/// The abscissa is synthetic (`0 ..= max|y|^(1/(degree+1))`, evenly spaced)
/// which keeps the Vandermonde matrix well conditioned independent of the
/// wavenumber range.
pub fn polynomial_baseline(y: &[f64], config: &BaselineConfig) -> Result<Vec<f64>> {
    check_intensities(y)?;
    let n = y.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let order = config.degree + 1;
    let amax = y.iter().fold(0.0_f64, |a, v| a.max(v.abs()));
    if amax == 0.0 {
        return Ok(vec![0.0; n]);
    }
    let cond = amax.powf(1.0 / order as f64);
    let step = if n > 1 { cond / (n - 1) as f64 } else { 0.0 };

    let vander = DMatrix::from_fn(n, order, |i, j| (step * i as f64).powi(j as i32));
    let svd = vander.clone().svd(true, true);
    let smax = svd.singular_values.max();
    let pinv = svd
        .pseudo_inverse(smax * f64::EPSILON * n.max(order) as f64)
        .map_err(|e| RamanError::invalid_input(format!("baseline pseudo-inverse: {e}")))?;

    let mut work = DVector::from_column_slice(y);
    let mut coeffs = DVector::from_element(order, 1.0);
    let mut base = work.clone();

    for iteration in 0..config.max_iterations {
        let next = &pinv * &work;
        let norm = coeffs.norm();
        let change = (&next - &coeffs).norm();
        let relative = if norm > 0.0 { change / norm } else { change };
        if relative < config.tolerance {
            debug!("baseline converged after {iteration} iterations");
            break;
        }
        coeffs = next;
        base = &vander * &coeffs;
        work = work.zip_map(&base, f64::min);
    }

    Ok(base.iter().copied().collect())
}

/// Remove the polynomial floor from `y`.
///
/// Negative floor values are clamped to zero before subtraction so an
/// overshooting baseline never inflates the corrected signal. The output has
/// the same length as the input.
///
/// # Errors
///
/// [`RamanError::InvalidInput`] if `y` contains NaN or infinite values.
pub fn subtract_baseline(y: &[f64], config: &BaselineConfig) -> Result<Vec<f64>> {
    let base = polynomial_baseline(y, config)?;
    Ok(y.iter()
        .zip(&base)
        .map(|(v, b)| v - b.max(0.0))
        .collect())
}

fn check_intensities(y: &[f64]) -> Result<()> {
    match y.iter().position(|v| !v.is_finite()) {
        Some(j) => Err(RamanError::invalid_input(format!(
            "intensity[{j}] is not a finite number"
        ))),
        None => Ok(()),
    }
}
