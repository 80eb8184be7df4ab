use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use clap::{Args, Parser, Subcommand};
use log::info;

use raman_peaks::analysis::identify::{identify, identify_against};
use raman_peaks::analysis::pipeline::fit_spectrum;
use raman_peaks::analysis::score::score_sort;
use raman_peaks::data::jcamp::read_jcamp;
use raman_peaks::data::loader::{load_file, load_two_column_csv};
use raman_peaks::data::model::{FittedPeak, LabelledSpectrum};
use raman_peaks::data::source::add_reference;
use raman_peaks::{AnalysisConfig, SpectralLibrary};

/// Peak fitting and compound identification for Raman/IR spectra.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON analysis configuration; defaults are used for missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fit the peaks of every spectrum in a file
    Fit {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        tuning: TuningArgs,
    },
    /// Assign the peaks of an unknown spectrum to library compounds
    Identify {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        tuning: TuningArgs,
        /// Compound library (JSON)
        #[arg(short, long)]
        library: PathBuf,
        /// Only compare against these compounds
        #[arg(long = "compound")]
        compounds: Vec<String>,
    },
    /// Add a JCAMP-DX reference spectrum to the library
    AddJdx {
        file: PathBuf,
        #[arg(short, long)]
        library: PathBuf,
        /// Store under this label instead of the upper-cased title
        #[arg(long)]
        label: Option<String>,
    },
    /// Add a two-column calibration measurement to the library
    AddCalibration {
        file: PathBuf,
        #[arg(short, long)]
        library: PathBuf,
        /// Store under this label instead of the file name
        #[arg(long)]
        label: Option<String>,
    },
    /// Download reference spectra from the NIST WebBook by CAS number
    #[cfg(feature = "nist")]
    Fetch {
        /// CAS registry numbers, with or without dashes
        cas: Vec<String>,
        #[arg(short, long)]
        library: PathBuf,
        /// Directory holding downloaded .jdx files
        #[arg(long, default_value = "raman_spectra")]
        cache: PathBuf,
        /// Label for a single fetched compound
        #[arg(long)]
        label: Option<String>,
        /// Fetch the seven-compound standard library
        #[arg(long)]
        standard: bool,
    },
    /// Rank peak pairs of two comma-separated peak lists by distance score
    Score {
        a: String,
        b: String,
        /// Normalise by the k-th largest distinct score
        #[arg(short, default_value_t = 1)]
        k: usize,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Spectrum file (.json, .csv, .parquet, .jdx)
    file: PathBuf,
    /// Read a header-less `wavenumber,intensity` CSV
    #[arg(long)]
    two_column: bool,
    /// Only process the spectrum at this row
    #[arg(long)]
    index: Option<usize>,
    /// Print JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TuningArgs {
    /// Minimum peak height
    #[arg(long)]
    height: Option<f64>,
    /// Minimum peak prominence
    #[arg(long)]
    prominence: Option<f64>,
    /// Relative matching tolerance
    #[arg(long)]
    precision: Option<f64>,
    /// Min-max scale intensities first
    #[arg(long)]
    normalize: bool,
}

impl TuningArgs {
    fn apply(&self, config: &mut AnalysisConfig) {
        if let Some(h) = self.height {
            config.detection.height = h;
        }
        if let Some(p) = self.prominence {
            config.detection.prominence = p;
        }
        if let Some(p) = self.precision {
            config.matching.precision = p;
        }
        config.normalize |= self.normalize;
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn load_config(path: Option<&Path>, tuning: Option<&TuningArgs>) -> Result<AnalysisConfig> {
    let mut config = match path {
        Some(p) => AnalysisConfig::from_file(p)
            .with_context(|| format!("reading configuration {}", p.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(t) = tuning {
        t.apply(&mut config);
    }
    config.validate()?;
    Ok(config)
}

fn load_spectra(input: &InputArgs) -> Result<Vec<LabelledSpectrum>> {
    let spectra = if input.two_column {
        let spectrum = load_two_column_csv(&input.file)?;
        let title = input
            .file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        vec![LabelledSpectrum {
            title,
            spectrum,
            metadata: Default::default(),
        }]
    } else {
        load_file(&input.file)?.spectra
    };
    match input.index {
        Some(i) if i >= spectra.len() => {
            bail!("--index {i} out of range ({} spectra)", spectra.len())
        }
        Some(i) => Ok(spectra.into_iter().skip(i).take(1).collect()),
        None => Ok(spectra),
    }
}

fn peak_table(peaks: &[FittedPeak]) -> Result<String> {
    let fields = ["center", "sigma", "fwhm", "amplitude", "height"];
    let getters: [fn(&FittedPeak) -> f64; 5] = [
        |p| p.center,
        |p| p.sigma,
        |p| p.fwhm,
        |p| p.amplitude,
        |p| p.height,
    ];
    let schema = Arc::new(Schema::new(
        fields
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false))
            .collect::<Vec<_>>(),
    ));
    let columns: Vec<ArrayRef> = getters
        .iter()
        .map(|get| Arc::new(Float64Array::from_iter_values(peaks.iter().map(get))) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(schema, columns)?;
    Ok(pretty_format_batches(&[batch])?.to_string())
}

fn run_fit(input: &InputArgs, config: &AnalysisConfig) -> Result<()> {
    for labelled in load_spectra(input)? {
        let report = fit_spectrum(&labelled.spectrum, config)
            .with_context(|| format!("fitting {}", labelled.title))?;
        if input.json {
            let doc = serde_json::json!({
                "title": labelled.title,
                "status": format!("{:?}", report.fit.status),
                "x_range": report.x_range,
                "peaks": report.peaks(),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        } else {
            println!("{} ({:?})", labelled.title, report.fit.status);
            println!("{}", peak_table(report.peaks())?);
        }
    }
    Ok(())
}

fn run_identify(
    input: &InputArgs,
    library: &Path,
    compounds: &[String],
    config: &AnalysisConfig,
) -> Result<()> {
    let library = SpectralLibrary::open(library)?;
    if library.is_empty() {
        bail!("library {} is empty", library.path().display());
    }
    let labels: Vec<&str> = compounds.iter().map(String::as_str).collect();

    for labelled in load_spectra(input)? {
        let result = if labels.is_empty() {
            identify(&labelled.spectrum, library.snapshot(), config)?
        } else {
            identify_against(&labelled.spectrum, library.snapshot(), &labels, config)?
        };
        if input.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            continue;
        }
        println!("{}", labelled.title);
        for assignment in &result.assignments {
            println!("  {assignment}");
        }
        for c in &result.coverage {
            println!(
                "  {}: {:.2}% of peaks found ({}/{})",
                c.title, c.percent, c.matched, c.total
            );
        }
    }
    Ok(())
}

/// Fit any entries still lacking peaks, then write the library back.
fn fit_and_persist(library: &mut SpectralLibrary, config: &AnalysisConfig) -> Result<()> {
    let fitted = library.ensure_fitted(config)?;
    info!("fitted {fitted} new library entries");
    library.persist()?;
    Ok(())
}

fn run_add_jdx(
    file: &Path,
    library: &Path,
    label: Option<&str>,
    config: &AnalysisConfig,
) -> Result<()> {
    let mut library = SpectralLibrary::open(library)?;
    let reference =
        read_jcamp(file).with_context(|| format!("reading {}", file.display()))?;
    let key = add_reference(&mut library, reference, label)?;
    fit_and_persist(&mut library, config)?;
    println!("{key} loaded into {}", library.path().display());
    Ok(())
}

fn calibration_label(file: &Path, label: Option<&str>) -> Result<String> {
    match label {
        Some(l) => Ok(l.to_string()),
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("cannot derive a label from {}", file.display())),
    }
}

fn run_add_calibration(
    file: &Path,
    library: &Path,
    label: Option<&str>,
    config: &AnalysisConfig,
) -> Result<()> {
    let label = calibration_label(file, label)?;
    let mut library = SpectralLibrary::open(library)?;
    let spectrum = load_two_column_csv(file)?;
    info!("calibration {label}: {} points", spectrum.len());
    library.save(&label, spectrum, None);
    fit_and_persist(&mut library, config)?;
    println!("{label} loaded into {}", library.path().display());
    Ok(())
}

#[cfg(feature = "nist")]
fn run_fetch(
    cas: &[String],
    library: &Path,
    cache: &Path,
    label: Option<&str>,
    standard: bool,
    config: &AnalysisConfig,
) -> Result<()> {
    use raman_peaks::data::source::{
        add_standard_library, JcampDirectory, NistWebBook, SpectrumSource,
    };

    if label.is_some() && cas.len() != 1 {
        bail!("--label needs exactly one CAS number");
    }
    let mut library = SpectralLibrary::open(library)?;
    let source = NistWebBook::new(JcampDirectory::new(cache))?;
    if standard {
        let keys = add_standard_library(&mut library, &source)?;
        println!("standard library: {}", keys.join(", "));
    }
    for number in cas {
        let key = add_reference(&mut library, source.fetch(number)?, label)?;
        println!("{key} loaded into {}", library.path().display());
    }
    fit_and_persist(&mut library, config)?;
    Ok(())
}

fn parse_peak_list(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .filter(|tok| !tok.trim().is_empty())
        .map(|tok| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("'{tok}' is not a number"))
        })
        .collect()
}

fn run_score(a: &str, b: &str, k: usize) -> Result<()> {
    let a = parse_peak_list(a)?;
    let b = parse_peak_list(b)?;
    for pair in score_sort(&a, &b, k) {
        println!("{:>8.4}  {:>10.2}  {:>10.2}", pair.score, pair.a, pair.b);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config_path = cli.config.as_deref();

    match &cli.command {
        Command::Fit { input, tuning } => {
            let config = load_config(config_path, Some(tuning))?;
            run_fit(input, &config)
        }
        Command::Identify {
            input,
            tuning,
            library,
            compounds,
        } => {
            let config = load_config(config_path, Some(tuning))?;
            run_identify(input, library, compounds, &config)
        }
        Command::AddJdx {
            file,
            library,
            label,
        } => run_add_jdx(file, library, label.as_deref(), &load_config(config_path, None)?),
        Command::AddCalibration {
            file,
            library,
            label,
        } => run_add_calibration(file, library, label.as_deref(), &load_config(config_path, None)?),
        #[cfg(feature = "nist")]
        Command::Fetch {
            cas,
            library,
            cache,
            label,
            standard,
        } => {
            let config = load_config(config_path, None)?;
            run_fetch(cas, library, cache, label.as_deref(), *standard, &config)
        }
        Command::Score { a, b, k } => run_score(a, b, *k),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, Builder};

    fn temp_with(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn tuning() -> TuningArgs {
        TuningArgs {
            height: None,
            prominence: None,
            precision: None,
            normalize: false,
        }
    }

    fn input(file: &Path, two_column: bool, index: Option<usize>) -> InputArgs {
        InputArgs {
            file: file.to_path_buf(),
            two_column,
            index,
            json: false,
        }
    }

    /// One Lorentzian band at 1000 1/cm as `wavenumber,intensity` rows.
    fn lorentzian_rows() -> Vec<(f64, f64)> {
        (0..600)
            .map(|i| {
                let x = 500.0 + 5.0 * i as f64;
                (x, 0.8 * 144.0 / ((x - 1000.0).powi(2) + 144.0))
            })
            .collect()
    }

    fn lorentzian_csv() -> String {
        lorentzian_rows()
            .iter()
            .map(|(x, y)| format!("{x},{y}\n"))
            .collect()
    }

    #[test]
    fn flags_override_the_config_file() {
        let file = temp_with(
            ".json",
            r#"{ "detection": { "height": 0.05 }, "matching": { "precision": 0.02 } }"#,
        );
        let from_file = load_config(Some(file.path()), None).unwrap();
        assert_eq!(from_file.detection.height, 0.05);

        let flags = TuningArgs {
            height: Some(0.2),
            normalize: true,
            ..tuning()
        };
        let config = load_config(Some(file.path()), Some(&flags)).unwrap();
        assert_eq!(config.detection.height, 0.2);
        assert_eq!(config.matching.precision, 0.02);
        assert_eq!(config.detection.prominence, 0.1);
        assert!(config.normalize);
    }

    #[test]
    fn invalid_flags_are_rejected() {
        let flags = TuningArgs {
            precision: Some(0.0),
            ..tuning()
        };
        assert!(load_config(None, Some(&flags)).is_err());
        let flags = TuningArgs {
            height: Some(f64::NAN),
            ..tuning()
        };
        assert!(load_config(None, Some(&flags)).is_err());
        assert!(load_config(Some(Path::new("/nonexistent/config.json")), None).is_err());
    }

    #[test]
    fn peak_lists() {
        assert_eq!(parse_peak_list("1.0, 2.5,,3").unwrap(), vec![1.0, 2.5, 3.0]);
        assert!(parse_peak_list("").unwrap().is_empty());
        assert!(parse_peak_list("1000,abc").is_err());
    }

    #[test]
    fn index_selects_one_spectrum() {
        let file = temp_with(
            ".json",
            r#"[{ "x": [1, 2, 3], "y": [0, 1, 0] }, { "x": [1, 2], "y": [5, 6] }]"#,
        );
        let all = load_spectra(&input(file.path(), false, None)).unwrap();
        assert_eq!(all.len(), 2);
        let second = load_spectra(&input(file.path(), false, Some(1))).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].spectrum.y(), &[5.0, 6.0]);

        let err = load_spectra(&input(file.path(), false, Some(2))).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn two_column_input_is_titled_by_file_name() {
        let file = temp_with(".csv", &lorentzian_csv());
        let spectra = load_spectra(&input(file.path(), true, None)).unwrap();
        assert_eq!(spectra.len(), 1);
        let stem = file.path().file_stem().unwrap().to_string_lossy();
        assert_eq!(spectra[0].title, stem);
        assert!(load_spectra(&input(file.path(), true, Some(1))).is_err());
    }

    #[test]
    fn calibration_is_stored_fitted_under_its_file_name() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("toluene_cal.csv");
        std::fs::write(&csv, lorentzian_csv()).unwrap();
        let library = dir.path().join("lib.json");

        run_add_calibration(&csv, &library, None, &AnalysisConfig::default()).unwrap();
        run_add_calibration(&csv, &library, Some("TOLUENE"), &AnalysisConfig::default()).unwrap();

        let reopened = SpectralLibrary::open(&library).unwrap();
        assert_eq!(reopened.labels(), vec!["TOLUENE", "toluene_cal"]);
        let entry = reopened.load("toluene_cal").unwrap();
        let peaks = entry.peaks.as_ref().unwrap();
        assert!(peaks.iter().any(|p| (p.center - 1000.0).abs() < 2.0));
        assert!(reopened.load("TOLUENE").unwrap().peaks.is_some());
    }

    #[test]
    fn jcamp_reference_is_stored_fitted() {
        let rows = lorentzian_rows();
        let mut text = format!(
            "##TITLE=Reference band\n##XUNITS=1/CM\n##YUNITS=ABSORBANCE\n\
             ##FIRSTX={}\n##LASTX={}\n##NPOINTS={}\n##XYDATA=(X++(Y..Y))\n",
            rows[0].0,
            rows[rows.len() - 1].0,
            rows.len()
        );
        for chunk in rows.chunks(8) {
            text.push_str(&format!("{}", chunk[0].0));
            for (_, y) in chunk {
                text.push_str(&format!(" {y}"));
            }
            text.push('\n');
        }
        text.push_str("##END=\n");

        let dir = tempdir().unwrap();
        let jdx = dir.path().join("band.jdx");
        std::fs::write(&jdx, text).unwrap();
        let library = dir.path().join("lib.json");

        run_add_jdx(&jdx, &library, None, &AnalysisConfig::default()).unwrap();
        let reopened = SpectralLibrary::open(&library).unwrap();
        let entry = reopened.load("REFERENCE BAND").unwrap();
        assert_eq!(entry.spectrum.len(), rows.len());
        assert!(entry.peaks.as_ref().is_some_and(|p| !p.is_empty()));
    }

    #[test]
    fn calibration_label_defaults_to_file_stem() {
        let path = Path::new("/data/ethanol.csv");
        assert_eq!(calibration_label(path, None).unwrap(), "ethanol");
        assert_eq!(calibration_label(path, Some("ETOH")).unwrap(), "ETOH");
        assert!(calibration_label(Path::new("/"), None).is_err());
    }
}
