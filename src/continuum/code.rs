use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::diagnostics::MapSnapshot;
use super::error::ContinuumError;

/// Direction of change of one diagnostic dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    Higher,
    Lower,
    Same,
}

impl Trend {
    fn classify(before: f64, after: f64, threshold: f64) -> Self {
        let change = relative_change(before, after);
        if change > threshold {
            Trend::Higher
        } else if change < -threshold {
            Trend::Lower
        } else {
            Trend::Same
        }
    }

    fn letter(self) -> char {
        match self {
            Trend::Higher => 'H',
            Trend::Lower => 'L',
            Trend::Same => 'S',
        }
    }
}

fn relative_change(before: f64, after: f64) -> f64 {
    if before == after {
        0.0
    } else if before == 0.0 {
        (after - before).signum() * f64::INFINITY
    } else {
        (after - before) / before.abs()
    }
}

/// Peak-inside, peak-outside, pixel-sum and MAD trends between two
/// snapshots, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourLetterCode(pub [Trend; 4]);

impl FourLetterCode {
    /// Compare `after` against `before`. The MAD dimension uses twice the
    /// threshold.
    pub fn compare(before: &MapSnapshot, after: &MapSnapshot, threshold: f64) -> Self {
        Self([
            Trend::classify(before.peak_inside, after.peak_inside, threshold),
            Trend::classify(before.peak_outside, after.peak_outside, threshold),
            Trend::classify(before.pixel_sum, after.pixel_sum, threshold),
            Trend::classify(before.scaled_mad, after.scaled_mad, 2.0 * threshold),
        ])
    }

    pub fn is_in<S: AsRef<str>>(&self, set: &[S]) -> bool {
        let me = self.to_string();
        set.iter().any(|s| s.as_ref() == me)
    }
}

impl fmt::Display for FourLetterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in self.0 {
            write!(f, "{}", t.letter())?;
        }
        Ok(())
    }
}

impl FromStr for FourLetterCode {
    type Err = ContinuumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ContinuumError::InvalidCode(s.to_string());
        let letters: Vec<Trend> = s
            .chars()
            .map(|c| match c {
                'H' => Ok(Trend::Higher),
                'L' => Ok(Trend::Lower),
                'S' => Ok(Trend::Same),
                _ => Err(bad()),
            })
            .collect::<Result<_, _>>()?;
        let arr: [Trend; 4] = letters.try_into().map_err(|_| bad())?;
        Ok(Self(arr))
    }
}

impl Serialize for FourLetterCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
