/// Numerical pipeline: everything between a loaded spectrum and a peak report.
///
/// ```text
///   Spectrum ─► baseline ─► peaks ─► lorentz (solver) ─► PeakReport
///                                                            │
///                           CompoundLibrary ─► identify ◄────┘
/// ```
///
/// `score` is an experimental alternative to the fixed-tolerance matcher and
/// `combine` synthesises mixtures from two references.

pub mod baseline;
pub mod combine;
pub mod identify;
pub mod lorentz;
pub mod peaks;
pub mod pipeline;
pub mod score;
pub mod solver;
