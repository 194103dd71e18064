use thiserror::Error;

// ---------------------------------------------------------------------------
// Core error type
// ---------------------------------------------------------------------------

/// Fatal conditions of the continuum finder.
///
/// Everything else (empty trims, empty intersections, missing diagnostics)
/// is recovered locally and never surfaces as an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContinuumError {
    /// The spectrum has no channels at all.
    #[error("spectrum has zero channels")]
    EmptySpectrum,

    /// Every channel is masked or NaN.
    #[error("spectrum has no valid channels")]
    NoValidChannels,

    /// Fewer than two baseline channels were requested or are available.
    #[error("need at least 2 baseline channels, got {requested} (valid channels: {available})")]
    TooFewBaselineChannels { requested: usize, available: usize },

    /// Channel mask and spectrum disagree in length.
    #[error("channel mask has {mask} entries but spectrum has {channels}")]
    MaskLengthMismatch { mask: usize, channels: usize },

    /// A `"lo~hi;lo~hi"` selection string could not be parsed.
    #[error("invalid channel selection '{0}'")]
    InvalidSelection(String),

    #[error("invalid four-letter code '{0}'")]
    InvalidCode(String),
}

pub type ContinuumResult<T> = std::result::Result<T, ContinuumError>;
