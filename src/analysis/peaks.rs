use log::debug;

use crate::config::DetectionConfig;
use crate::data::model::DetectedPeak;
use crate::error::{RamanError, Result};

// ---------------------------------------------------------------------------
// Peak detection
// ---------------------------------------------------------------------------

/// Locate local maxima of `y` and keep those that pass every criterion.
///
/// Filters are applied in a fixed order:
/// 1. `height`: the sample value must be at least `config.height`.
/// 2. `distance`: peaks closer than `config.distance` samples to a higher
///    peak are dropped (highest peaks are kept first).
/// 3. `prominence`: the drop from the peak to the higher of its two
///    surrounding minima must be at least `config.prominence`.
///
/// Flat maxima (plateaus) are reported at their middle sample. The result is
/// sorted by wavenumber ascending; finding nothing is a valid empty result.
pub fn detect_peaks(x: &[f64], y: &[f64], config: &DetectionConfig) -> Result<Vec<DetectedPeak>> {
    if x.len() != y.len() {
        return Err(RamanError::invalid_input(format!(
            "wavenumbers have {} values but intensities have {}",
            x.len(),
            y.len()
        )));
    }
    if config.distance == 0 {
        return Err(RamanError::invalid_input("distance must be at least 1 sample"));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(RamanError::invalid_input("peak detection input contains NaN or infinity"));
    }

    let maxima = local_maxima(y);
    let above: Vec<usize> = maxima
        .into_iter()
        .filter(|&i| y[i] >= config.height)
        .collect();
    let spaced = select_by_distance(&above, y, config.distance);

    let mut peaks: Vec<DetectedPeak> = spaced
        .into_iter()
        .filter_map(|i| {
            let prominence = prominence(y, i);
            (prominence >= config.prominence).then_some(DetectedPeak {
                wavenumber: x[i],
                intensity: y[i],
                index: i,
                prominence,
            })
        })
        .collect();
    peaks.sort_by(|a, b| a.wavenumber.total_cmp(&b.wavenumber));

    debug!("detected {} peaks in {} samples", peaks.len(), y.len());
    Ok(peaks)
}

/// Indices of strict local maxima; plateaus report their middle sample.
fn local_maxima(y: &[f64]) -> Vec<usize> {
    let mut found = Vec::new();
    if y.len() < 3 {
        return found;
    }
    let last = y.len() - 1;
    let mut i = 1;
    while i < last {
        if y[i - 1] < y[i] {
            let mut ahead = i + 1;
            while ahead < last && y[ahead] == y[i] {
                ahead += 1;
            }
            if y[ahead] < y[i] {
                found.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    found
}

/// Drop peaks within `distance` samples of a higher one.
fn select_by_distance(peaks: &[usize], y: &[f64], distance: usize) -> Vec<usize> {
    if distance <= 1 || peaks.len() < 2 {
        return peaks.to_vec();
    }
    let mut keep = vec![true; peaks.len()];
    let mut priority: Vec<usize> = (0..peaks.len()).collect();
    priority.sort_by(|&a, &b| y[peaks[a]].total_cmp(&y[peaks[b]]));

    for &j in priority.iter().rev() {
        if !keep[j] {
            continue;
        }
        for k in (0..j).rev() {
            if peaks[j] - peaks[k] >= distance {
                break;
            }
            keep[k] = false;
        }
        for k in j + 1..peaks.len() {
            if peaks[k] - peaks[j] >= distance {
                break;
            }
            keep[k] = false;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// Vertical drop from `y[peak]` to the higher of the minima separating it
/// from a higher sample (or the signal edge) on each side.
fn prominence(y: &[f64], peak: usize) -> f64 {
    let top = y[peak];

    let mut left_min = top;
    for &v in y[..peak].iter().rev() {
        if v > top {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = top;
    for &v in &y[peak + 1..] {
        if v > top {
            break;
        }
        right_min = right_min.min(v);
    }

    top - left_min.max(right_min)
}
