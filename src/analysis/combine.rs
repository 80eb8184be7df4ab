use std::collections::BTreeMap;

use log::debug;

use crate::analysis::baseline::subtract_baseline;
use crate::config::BaselineConfig;
use crate::data::model::Spectrum;
use crate::error::{RamanError, Result};

// ---------------------------------------------------------------------------
// Natural cubic spline
// ---------------------------------------------------------------------------

/// Interpolating cubic spline with zero curvature at both ends.
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots.
    m: Vec<f64>,
}

impl CubicSpline {
    /// Build a spline through `(x, y)`; `x` must be strictly increasing.
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() || x.len() < 2 {
            return Err(RamanError::invalid_input(
                "spline needs at least two points and equal axis lengths",
            ));
        }
        if !x.windows(2).all(|w| w[0] < w[1]) {
            return Err(RamanError::invalid_input("spline abscissa must be strictly increasing"));
        }

        let n = x.len();
        let mut m = vec![0.0; n];
        if n > 2 {
            // Thomas algorithm on the interior knots.
            let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
            let mut diag = vec![0.0; n];
            let mut rhs = vec![0.0; n];
            for i in 1..n - 1 {
                diag[i] = 2.0 * (h[i - 1] + h[i]);
                rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
            }
            for i in 2..n - 1 {
                let w = h[i - 1] / diag[i - 1];
                diag[i] -= w * h[i - 1];
                rhs[i] -= w * rhs[i - 1];
            }
            m[n - 2] = rhs[n - 2] / diag[n - 2];
            for i in (1..n - 2).rev() {
                m[i] = (rhs[i] - h[i] * m[i + 1]) / diag[i];
            }
        }

        Ok(CubicSpline {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    /// Value at `t`; `None` outside the knot range.
    pub fn eval(&self, t: f64) -> Option<f64> {
        let last = self.x.len() - 1;
        if t < self.x[0] || t > self.x[last] {
            return None;
        }
        let i = match self.x.partition_point(|&v| v <= t) {
            0 => 0,
            p => (p - 1).min(last - 1),
        };
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - t) / h;
        let b = (t - self.x[i]) / h;
        Some(
            a * self.y[i]
                + b * self.y[i + 1]
                + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Spectrum combination
// ---------------------------------------------------------------------------

/// Resample onto the integer wavenumbers strictly inside the spectrum's range.
fn resample_integer_grid(spectrum: &Spectrum) -> Result<Vec<(i64, f64)>> {
    let spline = CubicSpline::new(spectrum.x(), spectrum.y())?;
    let Some((lo, hi)) = spectrum.x_range() else {
        return Ok(Vec::new());
    };
    let start = lo.floor() as i64 + 1;
    let end = hi.floor() as i64;
    Ok((start..end)
        .filter_map(|k| spline.eval(k as f64).map(|v| (k, v)))
        .collect())
}

/// Synthesise a mixture of two spectra.
///
/// Both inputs are baseline-corrected, interpolated onto a 1 cm⁻¹ grid and
/// summed where the grids overlap; outside the overlap each spectrum
/// contributes alone.
pub fn combine_spectra(a: &Spectrum, b: &Spectrum, config: &BaselineConfig) -> Result<Spectrum> {
    let a = a.with_intensities(subtract_baseline(a.y(), config)?)?;
    let b = b.with_intensities(subtract_baseline(b.y(), config)?)?;

    let mut summed: BTreeMap<i64, f64> = BTreeMap::new();
    for (k, v) in resample_integer_grid(&a)?
        .into_iter()
        .chain(resample_integer_grid(&b)?)
    {
        *summed.entry(k).or_insert(0.0) += v;
    }
    debug!("combined spectrum has {} grid points", summed.len());

    let (x, y) = summed.into_iter().map(|(k, v)| (k as f64, v)).unzip();
    Spectrum::new(x, y)
}
