use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::continuum::{ChannelSelection, ContinuumResult, Spectrum};

// ---------------------------------------------------------------------------
// MetadataValue – a single cell in a metadata column
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value, echoed unchanged into the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

// ---------------------------------------------------------------------------
// SpectrumRecord – one row of the input table
// ---------------------------------------------------------------------------

/// One spectrum as loaded from disk.
#[derive(Debug, Clone)]
pub struct SpectrumRecord {
    /// Frequency / channel axis; the channel index when the file has none.
    pub x: Vec<f64>,
    /// Intensity per channel – same length as `x`.
    pub y: Vec<f64>,
    /// `true` = usable channel. Absent means all channels are usable.
    pub mask: Option<Vec<bool>>,
    /// Remaining columns: column_name → value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl SpectrumRecord {
    /// Validated core spectrum for this row.
    pub fn to_spectrum(&self) -> ContinuumResult<Spectrum> {
        match &self.mask {
            Some(mask) => Spectrum::with_mask(self.y.clone(), mask.clone()),
            None => Spectrum::new(self.y.clone()),
        }
    }

    /// `[x_lo, x_hi]` for every range of `selection`. Ranges past the end
    /// of the axis are skipped.
    pub fn axis_ranges(&self, selection: &ChannelSelection) -> Vec<[f64; 2]> {
        selection
            .ranges()
            .iter()
            .filter_map(|r| Some([*self.x.get(r.lo)?, *self.x.get(r.hi)?]))
            .collect()
    }

    /// Boolean metadata flag, `false` when absent or not a bool.
    pub fn flag(&self, column: &str) -> bool {
        matches!(self.metadata.get(column), Some(MetadataValue::Bool(true)))
    }
}

// ---------------------------------------------------------------------------
// SpectralDataset – the complete loaded dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SpectralDataset {
    pub spectra: Vec<SpectrumRecord>,
    /// Ordered list of metadata column names (excludes x, y, mask).
    pub column_names: Vec<String>,
}

impl SpectralDataset {
    pub fn from_spectra(spectra: Vec<SpectrumRecord>) -> Self {
        let column_names: BTreeSet<String> = spectra
            .iter()
            .flat_map(|sp| sp.metadata.keys().cloned())
            .collect();
        SpectralDataset {
            spectra,
            column_names: column_names.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_record_builds_masked_spectrum() {
        let rec = SpectrumRecord {
            x: vec![0.0, 1.0, 2.0],
            y: vec![1.0, 2.0, 3.0],
            mask: Some(vec![true, false, true]),
            metadata: BTreeMap::from([("tdm".to_string(), MetadataValue::Bool(true))]),
        };
        let sp = rec.to_spectrum().unwrap();
        assert_eq!(sp.valid_channels(), vec![0, 2]);
        assert!(rec.flag("tdm"));
        assert!(!rec.flag("atmospheric_issue"));
    }

    #[test]
    fn selection_maps_onto_the_axis() {
        let rec = SpectrumRecord {
            x: (0..10).map(|c| 230.0 + 0.5 * c as f64).collect(),
            y: vec![0.0; 10],
            mask: None,
            metadata: BTreeMap::new(),
        };
        let sel: ChannelSelection = "0~2;7~9".parse().unwrap();
        assert_eq!(rec.axis_ranges(&sel), vec![[230.0, 231.0], [233.5, 234.5]]);
        let past_end: ChannelSelection = "8~12".parse().unwrap();
        assert!(rec.axis_ranges(&past_end).is_empty());
    }

    #[test]
    fn column_names_are_sorted_and_unique() {
        let rec = |k: &str| SpectrumRecord {
            x: vec![],
            y: vec![],
            mask: None,
            metadata: BTreeMap::from([(k.to_string(), MetadataValue::Null)]),
        };
        let ds = SpectralDataset::from_spectra(vec![rec("b"), rec("a"), rec("b")]);
        assert_eq!(ds.column_names, vec!["a", "b"]);
        assert_eq!(ds.len(), 3);
    }
}
