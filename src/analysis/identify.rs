//! Assign the peaks of an unknown spectrum to known compounds.
//!
//! An unknown peak `u` matches a known peak `k` when
//! `|u - k| <= precision · max(|u|, |k|)`, a relative test so the allowed
//! window widens with wavenumber.

use std::fmt;

use log::{debug, info};
use serde::Serialize;

use crate::analysis::pipeline::fit_spectrum;
use crate::config::AnalysisConfig;
use crate::data::model::{CompoundLibrary, CompoundLibraryEntry, FittedPeak, Spectrum};
use crate::error::{RamanError, Result};

/// Label of an unknown peak that no compound explains.
pub const UNASSIGNED: &str = "Unassigned";

/// Relative closeness of two peak positions.
pub fn peaks_match(unknown: f64, known: f64, precision: f64) -> bool {
    (unknown - known).abs() <= precision * unknown.abs().max(known.abs())
}

fn check_precision(precision: f64) -> Result<()> {
    if precision.is_finite() && precision > 0.0 {
        Ok(())
    } else {
        Err(RamanError::invalid_input(format!(
            "precision must be a positive number, got {precision}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Association matrix
// ---------------------------------------------------------------------------

/// Which peaks of one compound and of the unknown spectrum found a partner.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    /// One flag per unknown peak.
    pub unknown_hits: Vec<bool>,
    /// One flag per known peak of the compound.
    pub known_hits: Vec<bool>,
}

/// Compare the unknown peak positions with those of a single compound.
pub fn compare_unknown_to_known(unknown: &[f64], known: &[f64], precision: f64) -> Result<Association> {
    check_precision(precision)?;
    if unknown.iter().chain(known).any(|v| !v.is_finite()) {
        return Err(RamanError::invalid_input("peak positions must be finite"));
    }
    let unknown_hits = unknown
        .iter()
        .map(|&u| known.iter().any(|&k| peaks_match(u, k, precision)))
        .collect();
    let known_hits = known
        .iter()
        .map(|&k| unknown.iter().any(|&u| peaks_match(u, k, precision)))
        .collect();
    Ok(Association {
        unknown_hits,
        known_hits,
    })
}

/// Known peak positions of one compound, ready for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownPeaks {
    pub title: String,
    pub centers: Vec<f64>,
}

/// `(unknown peak, compound)` → matched, built once per query.
#[derive(Debug, Clone)]
pub struct AssignmentMatrix {
    titles: Vec<String>,
    associations: Vec<Association>,
}

impl AssignmentMatrix {
    pub fn build(unknown: &[f64], compounds: &[KnownPeaks], precision: f64) -> Result<Self> {
        check_precision(precision)?;
        let associations = compounds
            .iter()
            .map(|c| compare_unknown_to_known(unknown, &c.centers, precision))
            .collect::<Result<Vec<_>>>()?;
        Ok(AssignmentMatrix {
            titles: compounds.iter().map(|c| c.title.clone()).collect(),
            associations,
        })
    }

    pub fn get(&self, unknown_index: usize, compound_index: usize) -> bool {
        self.associations
            .get(compound_index)
            .and_then(|a| a.unknown_hits.get(unknown_index))
            .copied()
            .unwrap_or(false)
    }

    pub fn compound_count(&self) -> usize {
        self.titles.len()
    }
}

// ---------------------------------------------------------------------------
// Labels and coverage
// ---------------------------------------------------------------------------

/// The compounds explaining one unknown peak.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakAssignment {
    pub wavenumber: f64,
    pub compounds: Vec<String>,
}

impl PeakAssignment {
    pub fn is_unassigned(&self) -> bool {
        self.compounds.is_empty()
    }

    /// Compound titles, or `["Unassigned"]`.
    pub fn labels(&self) -> Vec<&str> {
        if self.compounds.is_empty() {
            vec![UNASSIGNED]
        } else {
            self.compounds.iter().map(String::as_str).collect()
        }
    }
}

impl fmt::Display for PeakAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}: {}", self.wavenumber, self.labels().join(", "))
    }
}

/// Turn the association matrix into one text assignment per unknown peak.
pub fn peak_position_comparisons(unknown: &[f64], matrix: &AssignmentMatrix) -> Vec<PeakAssignment> {
    unknown
        .iter()
        .enumerate()
        .map(|(i, &wavenumber)| PeakAssignment {
            wavenumber,
            compounds: (0..matrix.compound_count())
                .filter(|&j| matrix.get(i, j))
                .map(|j| matrix.titles[j].clone())
                .collect(),
        })
        .collect()
}

/// Share of a compound's own peaks found in the unknown spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompoundCoverage {
    pub title: String,
    pub matched: usize,
    pub total: usize,
    /// `matched / total · 100`; `0` for a compound without peaks.
    pub percent: f64,
}

pub fn percentage_of_peaks_found(matrix: &AssignmentMatrix) -> Vec<CompoundCoverage> {
    matrix
        .titles
        .iter()
        .zip(&matrix.associations)
        .map(|(title, assoc)| {
            let total = assoc.known_hits.len();
            let matched = assoc.known_hits.iter().filter(|&&hit| hit).count();
            let percent = if total == 0 {
                0.0
            } else {
                matched as f64 / total as f64 * 100.0
            };
            CompoundCoverage {
                title: title.clone(),
                matched,
                total,
                percent,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Identification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Identification {
    pub unknown_peaks: Vec<FittedPeak>,
    pub assignments: Vec<PeakAssignment>,
    pub coverage: Vec<CompoundCoverage>,
}

/// Match already fitted unknown peak positions against known compounds.
pub fn match_peaks(
    unknown: &[f64],
    compounds: &[KnownPeaks],
    precision: f64,
) -> Result<(Vec<PeakAssignment>, Vec<CompoundCoverage>)> {
    let matrix = AssignmentMatrix::build(unknown, compounds, precision)?;
    Ok((
        peak_position_comparisons(unknown, &matrix),
        percentage_of_peaks_found(&matrix),
    ))
}

/// Peaks of a library entry: the cached fit, or a fresh one.
fn known_peaks(entry: &CompoundLibraryEntry, config: &AnalysisConfig) -> Result<KnownPeaks> {
    let centers = match &entry.peaks {
        Some(peaks) => peaks.iter().map(|p| p.center).collect(),
        None => fit_spectrum(&entry.spectrum, config)?.centers(),
    };
    debug!("peaks of {}: {:?}", entry.title, centers);
    Ok(KnownPeaks {
        title: entry.title.clone(),
        centers,
    })
}

fn identify_entries<'a>(
    unknown: &Spectrum,
    entries: impl Iterator<Item = &'a CompoundLibraryEntry>,
    config: &AnalysisConfig,
) -> Result<Identification> {
    let report = fit_spectrum(unknown, config)?;
    let unknown_centers = report.centers();

    let compounds = entries
        .map(|entry| known_peaks(entry, config))
        .collect::<Result<Vec<_>>>()?;
    let (assignments, coverage) =
        match_peaks(&unknown_centers, &compounds, config.matching.precision)?;

    for c in &coverage {
        info!("{}: {:.1}% of peaks found ({}/{})", c.title, c.percent, c.matched, c.total);
    }
    Ok(Identification {
        unknown_peaks: report.fit.peaks,
        assignments,
        coverage,
    })
}

/// Identify `unknown` against every compound of the library snapshot.
pub fn identify(
    unknown: &Spectrum,
    library: &CompoundLibrary,
    config: &AnalysisConfig,
) -> Result<Identification> {
    identify_entries(unknown, library.values(), config)
}

/// Identify `unknown` against the named compounds only.
///
/// # Errors
///
/// [`RamanError::MissingReference`] if a label is not in the library.
pub fn identify_against(
    unknown: &Spectrum,
    library: &CompoundLibrary,
    labels: &[&str],
    config: &AnalysisConfig,
) -> Result<Identification> {
    let entries = labels
        .iter()
        .map(|&label| {
            library
                .get(label)
                .ok_or_else(|| RamanError::missing_reference(label))
        })
        .collect::<Result<Vec<_>>>()?;
    identify_entries(unknown, entries.into_iter(), config)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn known(title: &str, centers: &[f64]) -> KnownPeaks {
        KnownPeaks {
            title: title.to_string(),
            centers: centers.to_vec(),
        }
    }

    #[test]
    fn relative_tolerance() {
        assert!(peaks_match(100.0, 103.0, 0.03));
        assert!(!peaks_match(100.0, 104.0, 0.03));
        // The window scales with position.
        assert!(peaks_match(3000.0, 3080.0, 0.03));
        assert!(peaks_match(0.0, 0.0, 0.03));
    }

    #[test]
    fn self_comparison_finds_everything() {
        let peaks = [520.0, 1100.0, 1650.0, 3400.0];
        let assoc = compare_unknown_to_known(&peaks, &peaks, 0.03).unwrap();
        assert!(assoc.unknown_hits.iter().all(|&h| h));
        let (_, coverage) = match_peaks(&peaks, &[known("WATER", &peaks)], 0.03).unwrap();
        assert_abs_diff_eq!(coverage[0].percent, 100.0);
    }

    #[test]
    fn disjoint_sets_find_nothing() {
        let assoc = compare_unknown_to_known(&[1.0, 3.0, 6.0], &[1000.0, 2000.0, 5000.0], 0.03).unwrap();
        assert!(assoc.unknown_hits.iter().all(|&h| !h));
        let (assignments, coverage) =
            match_peaks(&[1.0, 3.0, 6.0], &[known("X", &[1000.0, 2000.0, 5000.0])], 0.03).unwrap();
        assert_eq!(coverage[0].percent, 0.0);
        assert!(assignments.iter().all(PeakAssignment::is_unassigned));
    }

    #[test]
    fn compound_without_peaks_has_zero_coverage() {
        let (_, coverage) = match_peaks(&[100.0], &[known("EMPTY", &[])], 0.03).unwrap();
        assert_eq!(coverage[0].total, 0);
        assert_eq!(coverage[0].percent, 0.0);
    }

    #[test]
    fn no_unknown_peaks() {
        let (assignments, coverage) = match_peaks(&[], &[known("A", &[100.0])], 0.03).unwrap();
        assert!(assignments.is_empty());
        assert_eq!(coverage[0].percent, 0.0);
    }

    #[test]
    fn scenario_partial_match() {
        let (assignments, coverage) =
            match_peaks(&[100.5, 199.0, 500.0], &[known("A", &[100.0, 200.0, 300.0])], 0.03).unwrap();
        assert_eq!(assignments[0].labels(), vec!["A"]);
        assert_eq!(assignments[1].labels(), vec!["A"]);
        assert_eq!(assignments[2].labels(), vec![UNASSIGNED]);
        assert_eq!(coverage[0].matched, 2);
        assert_abs_diff_eq!(coverage[0].percent, 200.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn several_compounds_share_a_peak() {
        let compounds = [known("WATER", &[1640.0, 3400.0]), known("ETHANOL", &[1650.0, 2970.0])];
        let matrix = AssignmentMatrix::build(&[1645.0, 2975.0], &compounds, 0.03).unwrap();
        assert!(matrix.get(0, 0) && matrix.get(0, 1));
        assert!(!matrix.get(1, 0) && matrix.get(1, 1));
        assert!(!matrix.get(5, 0));
        let labels = peak_position_comparisons(&[1645.0, 2975.0], &matrix);
        assert_eq!(labels[0].compounds, vec!["WATER", "ETHANOL"]);
        assert_eq!(labels[0].to_string(), "1645.0: WATER, ETHANOL");
    }

    #[test]
    fn coverage_never_exceeds_hundred() {
        // Two unknown peaks near the same known peak count it once.
        let (_, coverage) = match_peaks(&[99.0, 101.0], &[known("A", &[100.0])], 0.03).unwrap();
        assert_eq!(coverage[0].matched, 1);
        assert_eq!(coverage[0].percent, 100.0);
    }

    #[test]
    fn invalid_precision() {
        assert!(compare_unknown_to_known(&[1.0], &[1.0], 0.0).is_err());
        assert!(compare_unknown_to_known(&[1.0], &[1.0], f64::NAN).is_err());
        assert!(compare_unknown_to_known(&[f64::NAN], &[1.0], 0.03).is_err());
    }

    #[test]
    fn missing_reference_is_reported() {
        let library = CompoundLibrary::new();
        let spectrum = Spectrum::new(vec![1.0, 2.0, 3.0], vec![0.0, 1.0, 0.0]).unwrap();
        let err = identify_against(&spectrum, &library, &["WATER"], &AnalysisConfig::default())
            .unwrap_err();
        assert!(matches!(err, RamanError::MissingReference(label) if label == "WATER"));
    }
}
