//! Data layer: input records and loading.
//!
//! Architecture:
//! ```text
//!  .parquet / .json / .csv
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  parse file → SpectralDataset
//!   └──────────┘
//!        │
//!        ▼
//!   ┌────────────────┐
//!   │ SpectralDataset │  Vec<SpectrumRecord> → continuum::Spectrum
//!   └────────────────┘
//! ```

pub mod loader;
pub mod model;
