//! Experimental distance-based peak correspondence.
//!
//! Every pair across two peak lists scores `1 / (distance + 1)`; pairs scoring
//! at or below [`SCORE_CUTOFF`] (peaks roughly 49 cm⁻¹ or more apart) are
//! dropped. Scores can be normalised by the k-th largest distinct raw score.
//! This is a ranking heuristic next to the fixed-tolerance matcher in
//! [`crate::analysis::identify`], not a replacement for it.

use serde::Serialize;

pub const SCORE_CUTOFF: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredPair {
    pub score: f64,
    pub a: f64,
    pub b: f64,
}

/// Reciprocal-distance scores of all close pairs, divided by `scoremax`.
///
/// Pairs are emitted row by row (`row_a` outer, `row_b` inner).
pub fn peak_1d_score(row_a: &[f64], row_b: &[f64], scoremax: f64) -> Vec<ScoredPair> {
    let mut pairs = Vec::new();
    for &a in row_a {
        for &b in row_b {
            let raw = 1.0 / ((a - b).abs() + 1.0);
            if raw > SCORE_CUTOFF {
                pairs.push(ScoredPair {
                    score: raw / scoremax,
                    a,
                    b,
                });
            }
        }
    }
    pairs
}

/// The normaliser used by [`score_max`]: the k-th largest distinct raw score.
///
/// `k = 0` wraps around to the smallest distinct score. `None` when the set of
/// scores is empty or has fewer than `k` distinct values.
pub fn kth_largest_score(row_a: &[f64], row_b: &[f64], k: usize) -> Option<f64> {
    let mut distinct: Vec<f64> = peak_1d_score(row_a, row_b, 1.0)
        .into_iter()
        .map(|p| p.score)
        .collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    match k {
        0 => distinct.first().copied(),
        k if k <= distinct.len() => Some(distinct[distinct.len() - k]),
        _ => None,
    }
}

/// Scores normalised by the k-th largest distinct raw score, falling back to
/// `scoremax = 1` (raw scores) when that score does not exist.
pub fn score_max(row_a: &[f64], row_b: &[f64], k: usize) -> Vec<ScoredPair> {
    let scoremax = kth_largest_score(row_a, row_b, k).unwrap_or(1.0);
    peak_1d_score(row_a, row_b, scoremax)
}

/// [`score_max`] ordered from best to worst pair.
pub fn score_sort(row_a: &[f64], row_b: &[f64], k: usize) -> Vec<ScoredPair> {
    let mut pairs = score_max(row_a, row_b, k);
    pairs.sort_by(|x, y| y.score.total_cmp(&x.score));
    pairs
}
