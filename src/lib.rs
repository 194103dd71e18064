//! Continuum channel finder for spectral-line data cubes.
//!
//! [`continuum`] holds the classification engine; [`data`] loads spectra
//! from Parquet, JSON or CSV for the batch driver.

pub mod continuum;
pub mod data;
