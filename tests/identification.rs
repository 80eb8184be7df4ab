use approx::assert_abs_diff_eq;
use tempfile::tempdir;

use raman_peaks::analysis::combine::combine_spectra;
use raman_peaks::analysis::identify::UNASSIGNED;
use raman_peaks::{
    fit_spectrum, identify, identify_against, AnalysisConfig, RamanError, SpectralLibrary, Spectrum,
};

/// (center, sigma, height) of the synthetic reference compounds.
const ALPHA: [(f64, f64, f64); 2] = [(1000.0, 12.0, 0.8), (1600.0, 15.0, 0.6)];
const BETA: [(f64, f64, f64); 2] = [(2200.0, 15.0, 0.7), (2900.0, 20.0, 0.5)];
const GAMMA: [(f64, f64, f64); 2] = [(1300.0, 10.0, 0.6), (3300.0, 20.0, 0.7)];

fn lorentzians(peaks: &[(f64, f64, f64)]) -> Spectrum {
    let x: Vec<f64> = (0..1500).map(|i| 500.0 + 2.0 * i as f64).collect();
    let y = x
        .iter()
        .map(|&x| {
            peaks
                .iter()
                .map(|&(c, s, h)| h * s * s / ((x - c).powi(2) + s * s))
                .sum()
        })
        .collect();
    Spectrum::new(x, y).unwrap()
}

fn library(path: &std::path::Path) -> SpectralLibrary {
    let mut lib = SpectralLibrary::new(path);
    lib.save("ALPHA", lorentzians(&ALPHA), None);
    lib.save("BETA", lorentzians(&BETA), None);
    lib.save("GAMMA", lorentzians(&GAMMA), None);
    lib
}

fn coverage(result: &raman_peaks::Identification, title: &str) -> f64 {
    result
        .coverage
        .iter()
        .find(|c| c.title == title)
        .map(|c| c.percent)
        .unwrap()
}

#[test]
fn fitted_centers_recover_components() {
    let report = fit_spectrum(&lorentzians(&ALPHA), &AnalysisConfig::default()).unwrap();
    let centers = report.centers();
    assert_eq!(centers.len(), 2);
    assert_abs_diff_eq!(centers[0], 1000.0, epsilon = 2.0);
    assert_abs_diff_eq!(centers[1], 1600.0, epsilon = 2.0);
    for sigma in report.sigmas() {
        assert!(sigma > 0.0 && sigma <= 500.0);
    }
}

#[test]
fn mixture_is_explained_by_its_components() {
    let dir = tempdir().unwrap();
    let lib = library(&dir.path().join("lib.json"));
    let mixture = lorentzians(&[ALPHA, BETA].concat());

    let result = identify(&mixture, lib.snapshot(), &AnalysisConfig::default()).unwrap();
    assert_eq!(result.unknown_peaks.len(), 4);
    assert_eq!(result.assignments.len(), 4);
    assert_abs_diff_eq!(coverage(&result, "ALPHA"), 100.0);
    assert_abs_diff_eq!(coverage(&result, "BETA"), 100.0);
    assert_abs_diff_eq!(coverage(&result, "GAMMA"), 0.0);

    let labels: Vec<Vec<&str>> = result.assignments.iter().map(|a| a.labels()).collect();
    assert_eq!(labels, vec![vec!["ALPHA"], vec!["ALPHA"], vec!["BETA"], vec!["BETA"]]);
}

#[test]
fn foreign_peaks_stay_unassigned() {
    let dir = tempdir().unwrap();
    let lib = library(&dir.path().join("lib.json"));
    let unknown = lorentzians(&[(1000.0, 12.0, 0.8), (2500.0, 15.0, 0.6)]);

    let result = identify_against(
        &unknown,
        lib.snapshot(),
        &["ALPHA", "GAMMA"],
        &AnalysisConfig::default(),
    )
    .unwrap();
    assert_eq!(result.coverage.len(), 2);
    assert_abs_diff_eq!(coverage(&result, "ALPHA"), 50.0);
    assert_eq!(result.assignments[1].labels(), vec![UNASSIGNED]);
    assert!(result.assignments[1].is_unassigned());
}

#[test]
fn unknown_label_is_a_missing_reference() {
    let dir = tempdir().unwrap();
    let lib = library(&dir.path().join("lib.json"));
    let err = identify_against(
        &lorentzians(&ALPHA),
        lib.snapshot(),
        &["DELTA"],
        &AnalysisConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, RamanError::MissingReference(label) if label == "DELTA"));
}

#[test]
fn combined_references_identify_both() {
    let dir = tempdir().unwrap();
    let lib = library(&dir.path().join("lib.json"));
    let config = AnalysisConfig::default();
    let alpha = &lib.load("ALPHA").unwrap().spectrum;
    let gamma = &lib.load("GAMMA").unwrap().spectrum;
    let mixture = combine_spectra(alpha, gamma, &config.baseline).unwrap();

    let result = identify(&mixture, lib.snapshot(), &config).unwrap();
    assert_abs_diff_eq!(coverage(&result, "ALPHA"), 100.0);
    assert_abs_diff_eq!(coverage(&result, "GAMMA"), 100.0);
    assert_abs_diff_eq!(coverage(&result, "BETA"), 0.0);
}

#[test]
fn cached_peaks_survive_a_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lib.json");
    let mut lib = library(&path);
    let config = AnalysisConfig::default();
    assert_eq!(lib.ensure_fitted(&config).unwrap(), 3);
    lib.persist().unwrap();

    let reopened = SpectralLibrary::open(&path).unwrap();
    assert_eq!(reopened.labels(), vec!["ALPHA", "BETA", "GAMMA"]);
    let beta = reopened.load("BETA").unwrap();
    assert_eq!(beta.peak_centers().len(), 2);

    let unknown = lorentzians(&BETA);
    let fresh = identify(&unknown, lib.snapshot(), &config).unwrap();
    let cached = identify(&unknown, reopened.snapshot(), &config).unwrap();
    assert_eq!(fresh.coverage, cached.coverage);
    assert_abs_diff_eq!(coverage(&cached, "BETA"), 100.0);
}
