use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{BooleanArray, BooleanBuilder, Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// (centre channel, width in channels, amplitude in noise units); negative
/// amplitudes are absorption.
type Line = (f64, f64, f64);

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_spectrum(nchan: usize, level: f64, noise: f64, lines: &[Line], rng: &mut StdRng) -> Result<Vec<f64>> {
    let dist = Normal::new(0.0, noise).context("noise distribution")?;
    Ok((0..nchan)
        .map(|c| {
            let x = c as f64;
            let signal: f64 = lines
                .iter()
                .map(|&(mu, width, amp)| gaussian(x, mu, width, amp * noise))
                .sum();
            level + signal + dist.sample(rng)
        })
        .collect())
}

fn random_lines(nchan: usize, count: usize, rng: &mut StdRng) -> Vec<Line> {
    (0..count)
        .map(|_| {
            let centre = rng.gen_range(0.1..0.9) * nchan as f64;
            let width = rng.gen_range(2.0..0.04 * nchan as f64);
            let amp = rng.gen_range(5.0..60.0);
            let sign = if rng.gen_bool(0.2) { -1.0 } else { 1.0 };
            (centre, width, sign * amp)
        })
        .collect()
}

fn main() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);

    let setups = [("fdm", 1920usize, false), ("tdm", 128usize, true)];
    let sources = ["J1337-1257", "IRAS16293", "Orion_KL", "NGC253"];

    let mut all_y: Vec<Vec<f64>> = Vec::new();
    let mut all_mask: Vec<Vec<bool>> = Vec::new();
    let mut all_source: Vec<String> = Vec::new();
    let mut all_setup: Vec<String> = Vec::new();
    let mut all_tdm: Vec<bool> = Vec::new();
    let mut all_lines: Vec<i64> = Vec::new();

    for &(setup, nchan, tdm) in &setups {
        for &source in &sources {
            for line_count in 0..4usize {
                let lines = random_lines(nchan, line_count, &mut rng);
                let mut y = generate_spectrum(nchan, 1.0, 0.01, &lines, &mut rng)?;

                // Flagged edge channels repeat one value, like padded data.
                let flagged = nchan / 64;
                let (head, tail) = (y[flagged], y[nchan - flagged - 1]);
                for v in y.iter_mut().take(flagged) {
                    *v = head;
                }
                for v in y.iter_mut().skip(nchan - flagged) {
                    *v = tail;
                }
                let mask: Vec<bool> = (0..nchan).map(|c| c % 97 != 13).collect();

                all_y.push(y);
                all_mask.push(mask);
                all_source.push(source.to_string());
                all_setup.push(setup.to_string());
                all_tdm.push(tdm);
                all_lines.push(line_count as i64);
            }
        }
    }

    // Build Arrow arrays
    let mut y_builder = ListBuilder::new(Float64Builder::new());
    for row in &all_y {
        let values = y_builder.values();
        for &v in row {
            values.append_value(v);
        }
        y_builder.append(true);
    }
    let y_array = y_builder.finish();

    let mut mask_builder = ListBuilder::new(BooleanBuilder::new());
    for row in &all_mask {
        let values = mask_builder.values();
        for &v in row {
            values.append_value(v);
        }
        mask_builder.append(true);
    }
    let mask_array = mask_builder.finish();

    let source_array = StringArray::from(all_source.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    let setup_array = StringArray::from(all_setup.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    let tdm_array = BooleanArray::from(all_tdm);
    let lines_array = Int64Array::from(all_lines);

    let schema = Arc::new(Schema::new(vec![
        Field::new("y", DataType::List(Arc::new(Field::new("item", DataType::Float64, true))), false),
        Field::new("mask", DataType::List(Arc::new(Field::new("item", DataType::Boolean, true))), false),
        Field::new("source", DataType::Utf8, false),
        Field::new("setup", DataType::Utf8, false),
        Field::new("tdm", DataType::Boolean, false),
        Field::new("line_count", DataType::Int64, false),
    ]));

    let rows = all_y.len();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(y_array),
            Arc::new(mask_array),
            Arc::new(source_array),
            Arc::new(setup_array),
            Arc::new(tdm_array),
            Arc::new(lines_array),
        ],
    )
    .context("creating record batch")?;

    // Write Parquet
    let output_path = "sample_spectra.parquet";
    let file = std::fs::File::create(output_path).context("creating output file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing writer")?;

    println!("Wrote {rows} spectra to {output_path}");
    Ok(())
}
