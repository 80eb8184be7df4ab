use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use raman_peaks::FittedPeak;

/// Lorentzian components (center, sigma, height) of each synthetic compound.
const COMPOUNDS: [(&str, &[(f64, f64, f64)]); 3] = [
    ("COMPOUND_A", &[(1000.0, 12.0, 0.8), (1450.0, 18.0, 0.5), (2900.0, 25.0, 0.3)]),
    ("COMPOUND_B", &[(1100.0, 10.0, 0.6), (1600.0, 15.0, 0.7), (3300.0, 40.0, 0.4)]),
    ("COMPOUND_C", &[(800.0, 8.0, 0.9), (1450.0, 20.0, 0.4), (2200.0, 14.0, 0.5)]),
];

fn generate_spectrum(
    wavenumbers: &[f64],
    peaks: &[FittedPeak],
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavenumbers
        .iter()
        .map(|&wn| {
            let signal: f64 = peaks.iter().map(|p| p.value_at(wn)).sum();
            signal + rng.gauss(0.0, noise_level)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn list_column(rows: &[Vec<f64>]) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    builder.finish()
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);

    // Wavenumbers: 4000 → 402, step 2, descending like most instrument exports
    let wavenumbers: Vec<f64> = (0..1800).map(|i| 4000.0 - i as f64 * 2.0).collect();
    let mixing = [0.25, 0.5, 0.75];

    let mut titles = Vec::new();
    let mut all_x = Vec::new();
    let mut all_y = Vec::new();
    let mut fractions = Vec::new();
    let mut ids = Vec::new();

    let components: Vec<(&str, Vec<FittedPeak>)> = COMPOUNDS
        .iter()
        .map(|(name, peaks)| {
            let fitted = peaks
                .iter()
                .map(|&(c, s, h)| FittedPeak::from_height(c, s, h))
                .collect();
            (*name, fitted)
        })
        .collect();

    // Pure compounds, then every pairwise mixture at each fraction.
    let mut rows: Vec<(String, Vec<FittedPeak>, f64)> = components
        .iter()
        .map(|(name, peaks)| (name.to_string(), peaks.clone(), 1.0))
        .collect();
    for (i, (name_a, peaks_a)) in components.iter().enumerate() {
        for (name_b, peaks_b) in &components[i + 1..] {
            for &f in &mixing {
                let scaled = |peaks: &[FittedPeak], w: f64| -> Vec<FittedPeak> {
                    peaks
                        .iter()
                        .map(|p| FittedPeak::from_height(p.center, p.sigma, p.height * w))
                        .collect()
                };
                let mut mixed = scaled(peaks_a, f);
                mixed.extend(scaled(peaks_b, 1.0 - f));
                rows.push((format!("{name_a}+{name_b}"), mixed, f));
            }
        }
    }

    for (row_id, (title, peaks, fraction)) in rows.into_iter().enumerate() {
        all_y.push(generate_spectrum(&wavenumbers, &peaks, 0.005, &mut rng));
        all_x.push(wavenumbers.clone());
        titles.push(title);
        fractions.push(fraction);
        ids.push(row_id as i64);
    }

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("y", DataType::List(item), false),
        Field::new("title", DataType::Utf8, false),
        Field::new("fraction", DataType::Float64, false),
        Field::new("measurement_id", DataType::Int64, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(list_column(&all_x)),
            Arc::new(list_column(&all_y)),
            Arc::new(StringArray::from(titles)),
            Arc::new(Float64Array::from(fractions)),
            Arc::new(Int64Array::from(ids.clone())),
        ],
    )
    .context("building record batch")?;

    let output_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample_data.parquet".to_string());
    let file = std::fs::File::create(&output_path)
        .with_context(|| format!("creating {output_path}"))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;

    println!(
        "Wrote {} spectra ({} wavenumbers each) to {output_path}",
        ids.len(),
        wavenumbers.len()
    );
    Ok(())
}
