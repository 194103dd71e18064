use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use findcont::continuum::{find_continuum, ContinuumReport, FindContinuumConfig};
use findcont::data::loader::load_file;
use findcont::data::model::MetadataValue;

/// Find the line-free channels of every spectrum in a table and print one
/// JSON object per row.
#[derive(Parser)]
#[command(name = "findcont", version)]
struct Args {
    /// Spectra to process (.parquet, .json or .csv)
    data: PathBuf,
    /// JSON file overriding any subset of the finder configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

/// One output line per input spectrum.
#[derive(Serialize)]
struct Row<'a> {
    row: usize,
    metadata: &'a BTreeMap<String, MetadataValue>,
    /// Selected ranges in the file's own axis units.
    #[serde(skip_serializing_if = "Option::is_none")]
    axis_ranges: Option<Vec<[f64; 2]>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ContinuumReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn load_config(path: Option<&Path>) -> Result<FindContinuumConfig> {
    match path {
        None => Ok(FindContinuumConfig::default()),
        Some(p) => {
            let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            FindContinuumConfig::from_json(&text).with_context(|| format!("parsing {}", p.display()))
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let dataset = load_file(&args.data).with_context(|| format!("loading {}", args.data.display()))?;
    info!(
        "loaded {} spectra from {} (metadata: {})",
        dataset.len(),
        args.data.display(),
        dataset.column_names.join(", ")
    );

    for (i, rec) in dataset.spectra.iter().enumerate() {
        let result = rec
            .to_spectrum()
            .and_then(|sp| find_continuum(&sp, rec.flag("tdm"), &config));
        let row = match result {
            Ok(report) => {
                info!("row {i}: {} (sigma {:.2})", report.selection, report.sigma);
                Row {
                    row: i,
                    metadata: &rec.metadata,
                    axis_ranges: Some(rec.axis_ranges(&report.selection)),
                    report: Some(report),
                    error: None,
                }
            }
            Err(e) => {
                warn!("row {i}: {e}");
                Row {
                    row: i,
                    metadata: &rec.metadata,
                    axis_ranges: None,
                    report: None,
                    error: Some(e.to_string()),
                }
            }
        };
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}
