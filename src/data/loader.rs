use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray,
    ListArray, StringArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{MetadataValue, SpectralDataset, SpectrumRecord};

/// Columns with a fixed meaning; everything else is metadata.
const RESERVED: [&str; 3] = ["x", "y", "mask"];

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a spectral dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – Parquet file with a `y` list column (recommended)
/// * `.json`    – `[{ "y": [...], "x": [...], "mask": [...], ...meta }, ...]`
/// * `.csv`     – a `y` column of semicolon-separated floats
///
/// `x` defaults to the channel index, `mask` to all channels usable.
pub fn load_file(path: &Path) -> Result<SpectralDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

fn channel_axis(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

fn check_lengths(row: usize, x: &[f64], y: &[f64], mask: Option<&Vec<bool>>) -> Result<()> {
    if x.len() != y.len() {
        bail!("Row {row}: x has {} values but y has {}", x.len(), y.len());
    }
    if let Some(m) = mask {
        if m.len() != y.len() {
            bail!("Row {row}: mask has {} values but y has {}", m.len(), y.len());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON (`df.to_json(orient='records')`):
///
/// ```json
/// [
///   {
///     "y": [0.12, 0.14, ...],
///     "mask": [true, true, ...],
///     "source": "J1337-1257",
///     "tdm": false
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<SpectralDataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut spectra = Vec::with_capacity(records.len());

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let y = json_array_to_f64(obj.get("y"), i, "y")?;
        let x = match obj.get("x") {
            Some(v) if !v.is_null() => json_array_to_f64(Some(v), i, "x")?,
            _ => channel_axis(y.len()),
        };
        let mask = match obj.get("mask") {
            Some(v) if !v.is_null() => Some(json_array_to_bool(v, i)?),
            _ => None,
        };
        check_lengths(i, &x, &y, mask.as_ref())?;

        let metadata = obj
            .iter()
            .filter(|(key, _)| !RESERVED.contains(&key.as_str()))
            .map(|(key, val)| (key.clone(), json_to_metadata(val)))
            .collect();

        spectra.push(SpectrumRecord { x, y, mask, metadata });
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

/// `null` entries become NaN (an invalid channel).
fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| match v {
            JsonValue::Null => Ok(f64::NAN),
            _ => v
                .as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number")),
        })
        .collect()
}

fn json_array_to_bool(val: &JsonValue, row: usize) -> Result<Vec<bool>> {
    let arr = val
        .as_array()
        .with_context(|| format!("Row {row}: 'mask' is not an array"))?;
    arr.iter()
        .enumerate()
        .map(|(j, v)| match v {
            JsonValue::Bool(b) => Ok(*b),
            JsonValue::Number(n) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
            _ => bail!("Row {row}, mask[{j}]: not a boolean"),
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

/// CSV layout: header row with column names.
/// `y` (and optional `x`) hold semicolon-separated floats:
///   `"0.12;0.14;0.11"`; an optional `mask` holds `1;1;0` or `true;true;false`.
/// All other columns are treated as metadata.
fn load_csv(path: &Path) -> Result<SpectralDataset> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let y_idx = headers
        .iter()
        .position(|h| h == "y")
        .context("CSV missing 'y' column")?;
    let x_idx = headers.iter().position(|h| h == "x");
    let mask_idx = headers.iter().position(|h| h == "mask");

    let mut spectra = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let y = parse_semicolon_floats(record.get(y_idx).unwrap_or(""), row_no, "y")?;
        let x = match x_idx.and_then(|i| record.get(i)).filter(|s| !s.is_empty()) {
            Some(s) => parse_semicolon_floats(s, row_no, "x")?,
            None => channel_axis(y.len()),
        };
        let mask = match mask_idx.and_then(|i| record.get(i)).filter(|s| !s.is_empty()) {
            Some(s) => Some(parse_semicolon_bools(s, row_no)?),
            None => None,
        };
        check_lengths(row_no, &x, &y, mask.as_ref())?;

        let metadata = record
            .iter()
            .enumerate()
            .filter(|(col_idx, _)| !RESERVED.contains(&headers[*col_idx].as_str()))
            .map(|(col_idx, value)| (headers[col_idx].clone(), guess_metadata_type(value)))
            .collect();

        spectra.push(SpectrumRecord { x, y, mask, metadata });
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            let tok = tok.trim();
            if tok.eq_ignore_ascii_case("nan") || tok.is_empty() {
                return Ok(f64::NAN);
            }
            tok.parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn parse_semicolon_bools(s: &str, row: usize) -> Result<Vec<bool>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| match tok.trim() {
            "1" | "true" | "True" => Ok(true),
            "0" | "false" | "False" => Ok(false),
            other => bail!("Row {row}, mask[{j}]: '{other}' is not a boolean"),
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
/// - `y`: List<Float64> or LargeList<Float64> – intensities
/// - `x`: optional List<Float64> – frequency axis
/// - `mask`: optional List<Boolean> – usable channels
/// - Any other columns are treated as metadata (strings, ints, floats, bools)
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<SpectralDataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut spectra = Vec::new();
    let mut row_base = 0usize;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let n_rows = batch.num_rows();

        let y_idx = schema
            .index_of("y")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'y' column"))?;
        let x_idx = schema.index_of("x").ok();
        let mask_idx = schema.index_of("mask").ok();

        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !RESERVED.contains(&f.name().as_str()))
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..n_rows {
            let label = row_base + row;
            let y = extract_f64_list(batch.column(y_idx), row)
                .with_context(|| format!("Row {label}: failed to read 'y'"))?;
            let x = match x_idx {
                Some(i) if !batch.column(i).is_null(row) => extract_f64_list(batch.column(i), row)
                    .with_context(|| format!("Row {label}: failed to read 'x'"))?,
                _ => channel_axis(y.len()),
            };
            let mask = match mask_idx {
                Some(i) if !batch.column(i).is_null(row) => Some(
                    extract_bool_list(batch.column(i), row)
                        .with_context(|| format!("Row {label}: failed to read 'mask'"))?,
                ),
                _ => None,
            };
            check_lengths(label, &x, &y, mask.as_ref())?;

            let metadata = meta_cols
                .iter()
                .map(|(col_idx, col_name)| (col_name.clone(), extract_metadata_value(batch.column(*col_idx), row)))
                .collect();

            spectra.push(SpectrumRecord { x, y, mask, metadata });
        }
        row_base += n_rows;
    }

    Ok(SpectralDataset::from_spectra(spectra))
}

// -- Parquet / Arrow helpers --

fn list_value(col: &Arc<dyn Array>, row: usize) -> Result<Arc<dyn Array>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }
    match col.data_type() {
        DataType::List(_) => Ok(col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row)),
        DataType::LargeList(_) => Ok(col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row)),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    }
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
/// Null entries become NaN.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    let values_array = list_value(col, row)?;

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Null entries are treated as unusable channels.
fn extract_bool_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<bool>> {
    let values_array = list_value(col, row)?;
    let arr = values_array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .with_context(|| format!("mask inner type is {:?}, expected Boolean", values_array.data_type()))?;
    Ok(arr.iter().map(|v| v.unwrap_or(false)).collect())
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    match col.data_type() {
        DataType::Utf8 => match any.downcast_ref::<StringArray>() {
            Some(s) => MetadataValue::String(s.value(row).to_string()),
            None => MetadataValue::Null,
        },
        DataType::LargeUtf8 => MetadataValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row) as i64)),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Bool(a.value(row))),
        _ => MetadataValue::String(format!("{:?}", col.data_type())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semicolon_lists_parse() {
        assert_eq!(parse_semicolon_floats("1;2.5; 3", 0, "y").unwrap(), vec![1.0, 2.5, 3.0]);
        assert!(parse_semicolon_floats("1;NaN", 0, "y").unwrap()[1].is_nan());
        assert!(parse_semicolon_floats("1;abc", 0, "y").is_err());
        assert_eq!(parse_semicolon_bools("1;0;true", 0).unwrap(), vec![true, false, true]);
        assert!(parse_semicolon_bools("1;2", 0).is_err());
    }

    #[test]
    fn metadata_types_are_guessed() {
        assert_eq!(guess_metadata_type("3"), MetadataValue::Integer(3));
        assert_eq!(guess_metadata_type("0.5"), MetadataValue::Float(0.5));
        assert_eq!(guess_metadata_type("true"), MetadataValue::Bool(true));
        assert_eq!(guess_metadata_type(""), MetadataValue::Null);
        assert_eq!(guess_metadata_type("spw25"), MetadataValue::String("spw25".into()));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(load_file(Path::new("spectra.fits")).is_err());
    }
}
