use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeListArray, ListArray, StringArray,
};
use arrow::datatypes::DataType;
use log::{debug, warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{LabelledSpectrum, MetadataValue, SpectralDataset, Spectrum};

/// Metadata columns that name a spectrum, in order of preference.
const TITLE_COLUMNS: [&str; 3] = ["title", "label", "name"];

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a spectral dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – Parquet file with `x` and `y` list columns
/// * `.json`    – `[{ "x": [...], "y": [...], ...meta }, ...]`
/// * `.csv`     – columns `x` and `y` containing semicolon-separated floats
/// * `.jdx` / `.dx` – a single JCAMP-DX spectrum
///
/// Each spectrum is titled from a `title`, `label` or `name` column when
/// present, otherwise `spectrum_{row}`.
pub fn load_file(path: &Path) -> Result<SpectralDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path)?,
        "json" => load_json(path)?,
        "csv" => load_csv(path)?,
        "jdx" | "dx" | "jcamp" => {
            let reference = super::jcamp::read_jcamp(path)
                .with_context(|| format!("reading JCAMP-DX file {}", path.display()))?;
            SpectralDataset::from_spectra(vec![reference.into_labelled()])
        }
        other => bail!("Unsupported file extension: .{other}"),
    };
    debug!("loaded {} spectra from {}", dataset.len(), path.display());
    Ok(dataset)
}

/// Load a header-less two-column `wavenumber,intensity` CSV file, the layout
/// spectrometers export calibration measurements in. Descending files are
/// reordered ascending.
pub fn load_two_column_csv(path: &Path) -> Result<Spectrum> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut x = Vec::new();
    let mut y = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.len() < 2 {
            bail!("CSV row {row_no}: expected two columns, found {}", record.len());
        }
        let parse = |col: usize| -> Result<f64> {
            let tok = record.get(col).unwrap_or("");
            tok.parse::<f64>()
                .with_context(|| format!("Row {row_no}, column {col}: '{tok}' is not a number"))
        };
        x.push(parse(0)?);
        y.push(parse(1)?);
    }
    if x.is_empty() {
        bail!("{} contains no data rows", path.display());
    }
    Spectrum::new(x, y).with_context(|| format!("building spectrum from {}", path.display()))
}

fn labelled(
    row: usize,
    x: Vec<f64>,
    y: Vec<f64>,
    metadata: BTreeMap<String, MetadataValue>,
) -> Result<LabelledSpectrum> {
    let spectrum = Spectrum::new(x, y).with_context(|| format!("Row {row}"))?;
    let title = TITLE_COLUMNS
        .iter()
        .find_map(|col| metadata.get(*col).and_then(MetadataValue::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("spectrum_{row}"));
    Ok(LabelledSpectrum {
        title,
        spectrum,
        metadata,
    })
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, the default `df.to_json(orient='records')`):
///
/// ```json
/// [
///   {
///     "x": [4000.0, 3999.0, ...],
///     "y": [0.12,   0.14,  ...],
///     "title": "WATER",
///     "yunits": "ABSORBANCE"
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<SpectralDataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    let mut spectra = Vec::with_capacity(records.len());

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let x = json_array_to_f64(obj.get("x"), i, "x")?;
        let y = json_array_to_f64(obj.get("y"), i, "y")?;

        let mut metadata = BTreeMap::new();
        for (key, val) in obj {
            if key == "x" || key == "y" {
                continue;
            }
            metadata.insert(key.clone(), json_to_metadata(val));
        }

        spectra.push(labelled(i, x, y, metadata)?);
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names.
/// `x` and `y` columns contain semicolon-separated floats:
///   `"4000.0;3999.0;3998.0"`, `"0.12;0.14;0.11"`
/// All other columns are treated as metadata.
fn load_csv(path: &Path) -> Result<SpectralDataset> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let x_idx = headers
        .iter()
        .position(|h| h == "x")
        .context("CSV missing 'x' column")?;
    let y_idx = headers
        .iter()
        .position(|h| h == "y")
        .context("CSV missing 'y' column")?;

    let mut spectra = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let x = parse_semicolon_floats(record.get(x_idx).unwrap_or(""), row_no, "x")?;
        let y = parse_semicolon_floats(record.get(y_idx).unwrap_or(""), row_no, "y")?;

        let mut metadata = BTreeMap::new();
        for (col_idx, value) in record.iter().enumerate() {
            if col_idx == x_idx || col_idx == y_idx {
                continue;
            }
            let col_name = &headers[col_idx];
            metadata.insert(col_name.clone(), guess_metadata_type(value));
        }

        spectra.push(labelled(row_no, x, y, metadata)?);
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    if s == "true" || s == "false" {
        return MetadataValue::Bool(s == "true");
    }
    MetadataValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file containing spectral data.
///
/// Expected schema:
/// - `x`: List<Float64> or LargeList<Float64> – wavenumber arrays
/// - `y`: List<Float64> or LargeList<Float64> – intensity arrays
/// - Any other columns are treated as metadata (strings, ints, floats, bools)
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<SpectralDataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut spectra = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let n_rows = batch.num_rows();

        // Locate x and y columns
        let x_idx = schema
            .index_of("x")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'x' column"))?;
        let y_idx = schema
            .index_of("y")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'y' column"))?;

        let x_col = batch.column(x_idx);
        let y_col = batch.column(y_idx);

        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != x_idx && *i != y_idx)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..n_rows {
            let x = extract_f64_list(x_col, row)
                .with_context(|| format!("Row {row}: failed to read 'x'"))?;
            let y = extract_f64_list(y_col, row)
                .with_context(|| format!("Row {row}: failed to read 'y'"))?;

            let mut metadata = BTreeMap::new();
            for (col_idx, col_name) in &meta_cols {
                let col_array = batch.column(*col_idx);
                let value = extract_metadata_value(col_array, row);
                metadata.insert(col_name.clone(), value);
            }

            spectra.push(labelled(spectra.len(), x, y, metadata)?);
        }
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
/// Null list elements are rejected; spectra must be complete.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        f64_arr
            .iter()
            .enumerate()
            .map(|(j, v)| v.with_context(|| format!("null at position {j}")))
            .collect()
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        f32_arr
            .iter()
            .enumerate()
            .map(|(j, v)| {
                v.map(f64::from)
                    .with_context(|| format!("null at position {j}"))
            })
            .collect()
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    match col.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|s| MetadataValue::String(s.value(row).to_string()))
            .unwrap_or(MetadataValue::Null),
        DataType::LargeUtf8 => MetadataValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| MetadataValue::Integer(a.value(row) as i64))
            .unwrap_or(MetadataValue::Null),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| MetadataValue::Integer(a.value(row)))
            .unwrap_or(MetadataValue::Null),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map(|a| MetadataValue::Float(a.value(row) as f64))
            .unwrap_or(MetadataValue::Null),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| MetadataValue::Float(a.value(row)))
            .unwrap_or(MetadataValue::Null),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| MetadataValue::Bool(a.value(row)))
            .unwrap_or(MetadataValue::Null),
        other => {
            warn!("metadata column of type {other:?} stored as text");
            MetadataValue::String(format!("{other:?}"))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn temp_with(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn json_records_with_titles() {
        let file = temp_with(
            ".json",
            r#"[{"x":[3.0,2.0,1.0],"y":[0.3,0.2,0.1],"title":"WATER","cas":7732185},
                {"x":[1.0,2.0],"y":[1.0,2.0]}]"#,
        );
        let ds = load_file(file.path()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.spectra[0].title, "WATER");
        assert_eq!(ds.spectra[0].spectrum.x(), &[1.0, 2.0, 3.0]);
        assert_eq!(ds.spectra[0].metadata["cas"], MetadataValue::Integer(7732185));
        assert_eq!(ds.spectra[1].title, "spectrum_1");
        assert_eq!(ds.column_names, vec!["cas".to_string(), "title".to_string()]);
    }

    #[test]
    fn json_length_mismatch_fails() {
        let file = temp_with(".json", r#"[{"x":[1.0,2.0],"y":[1.0]}]"#);
        assert!(load_file(file.path()).is_err());
    }

    #[test]
    fn semicolon_csv() {
        let file = temp_with(".csv", "label,x,y,operator\nA,1;2;3,0.1;0.5;0.2,Bob\n");
        let ds = load_file(file.path()).unwrap();
        assert_eq!(ds.spectra[0].title, "A");
        assert_eq!(ds.spectra[0].spectrum.y(), &[0.1, 0.5, 0.2]);
        assert_eq!(ds.spectra[0].metadata["operator"], MetadataValue::from("Bob"));
    }

    #[test]
    fn two_column_descending_csv() {
        let file = temp_with(".csv", "3000.5, 0.1\n2000.0, 0.9\n1000.0, 0.2\n");
        let sp = load_two_column_csv(file.path()).unwrap();
        assert_eq!(sp.x(), &[1000.0, 2000.0, 3000.5]);
        assert_eq!(sp.y(), &[0.2, 0.9, 0.1]);
    }

    #[test]
    fn two_column_rejects_garbage() {
        let file = temp_with(".csv", "1000.0,abc\n");
        assert!(load_two_column_csv(file.path()).is_err());
        let empty = temp_with(".csv", "");
        assert!(load_two_column_csv(empty.path()).is_err());
    }

    #[test]
    fn unknown_extension() {
        let file = temp_with(".xlsx", "");
        assert!(load_file(file.path()).is_err());
    }

    #[test]
    fn metadata_type_guessing() {
        assert_eq!(guess_metadata_type(""), MetadataValue::Null);
        assert_eq!(guess_metadata_type("12"), MetadataValue::Integer(12));
        assert_eq!(guess_metadata_type("1.5"), MetadataValue::Float(1.5));
        assert_eq!(guess_metadata_type("true"), MetadataValue::Bool(true));
        assert_eq!(guess_metadata_type("ATR"), MetadataValue::from("ATR"));
    }
}
