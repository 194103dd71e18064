//! Continuum channel finding.
//!
//! Architecture:
//! ```text
//!   Spectrum (+ channel mask)
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ baseline  │  low / high / middle subset → median, scaled MAD, corrections
//!   └──────────┘
//!        │
//!        ▼
//!   ┌────────────┐
//!   │ classifier │  thresholds → groups → trim → prune → narrow rejection
//!   └────────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  sigma    │  at most two corrective reruns, optional detrend
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐     measure / grow / synthesize     ┌───────────────┐
//!   │  amend    │ ◄─────────────────────────────────► │ Collaborators │
//!   └──────────┘   decision + code decide next stage  └───────────────┘
//!        │
//!        ▼
//!   ContinuumReport  ("lo~hi;lo~hi", sigma, stages, warnings)
//! ```

pub mod amend;
pub mod baseline;
pub mod classifier;
pub mod code;
pub mod config;
pub mod decision;
pub mod diagnostics;
pub mod error;
pub mod noise;
pub mod selection;
pub mod sigma;
pub mod spectrum;
pub mod stats;

pub use amend::{run, AmendmentInput, ContinuumReport, StageKind, StageOutcome, Warnings};
pub use baseline::{BaselineStatistics, SubsetMode};
pub use classifier::{classify, Classification};
pub use code::FourLetterCode;
pub use config::FindContinuumConfig;
pub use decision::{Decision, DecisionKind};
pub use diagnostics::{Collaborators, JointMask, MapSnapshot, NoCube, StageDiagnostics};
pub use error::{ContinuumError, ContinuumResult};
pub use selection::{ChannelRange, ChannelSelection};
pub use sigma::{find_continuum_channels, AdjustMode, Adjusted};
pub use spectrum::Spectrum;

/// Run the finder on a bare spectrum with no image behind it. Only the
/// `Original` stage can run.
pub fn find_continuum(spectrum: &Spectrum, tdm: bool, config: &FindContinuumConfig) -> ContinuumResult<ContinuumReport> {
    let input = AmendmentInput {
        spectrum,
        mask: JointMask::default(),
        tdm,
        atmospheric_issue: false,
    };
    run(&input, config, &mut NoCube)
}
