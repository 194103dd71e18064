use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ContinuumError;

// ---------------------------------------------------------------------------
// ChannelRange – an inclusive [lo, hi] span of channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelRange {
    pub lo: usize,
    pub hi: usize,
}

impl ChannelRange {
    pub fn new(lo: usize, hi: usize) -> Self {
        debug_assert!(lo <= hi);
        Self { lo, hi }
    }

    pub fn width(&self) -> usize {
        self.hi - self.lo + 1
    }

    pub fn contains(&self, channel: usize) -> bool {
        self.lo <= channel && channel <= self.hi
    }
}

impl fmt::Display for ChannelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.lo, self.hi)
    }
}

// ---------------------------------------------------------------------------
// ChannelSelection – sorted, disjoint, non-adjacent channel ranges
// ---------------------------------------------------------------------------

/// An ordered set of disjoint channel ranges.
///
/// Invariant: ranges are sorted ascending, never overlap and never touch
/// (touching ranges are merged on construction).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChannelSelection {
    ranges: Vec<ChannelRange>,
}

impl ChannelSelection {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from arbitrary channel indices; duplicates are ignored.
    pub fn from_channels<I: IntoIterator<Item = usize>>(channels: I) -> Self {
        let mut chans: Vec<usize> = channels.into_iter().collect();
        chans.sort_unstable();
        chans.dedup();

        let mut ranges: Vec<ChannelRange> = Vec::new();
        for c in chans {
            match ranges.last_mut() {
                Some(r) if r.hi + 1 == c => r.hi = c,
                _ => ranges.push(ChannelRange::new(c, c)),
            }
        }
        Self { ranges }
    }

    /// Build from possibly overlapping / unsorted ranges.
    pub fn from_ranges<I: IntoIterator<Item = ChannelRange>>(ranges: I) -> Self {
        let mut rs: Vec<ChannelRange> = ranges.into_iter().collect();
        rs.sort();
        let mut merged: Vec<ChannelRange> = Vec::with_capacity(rs.len());
        for r in rs {
            match merged.last_mut() {
                Some(last) if r.lo <= last.hi + 1 => last.hi = last.hi.max(r.hi),
                _ => merged.push(r),
            }
        }
        Self { ranges: merged }
    }

    pub fn ranges(&self) -> &[ChannelRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of selected channels.
    pub fn channel_count(&self) -> usize {
        self.ranges.iter().map(|r| r.width()).sum()
    }

    pub fn contains(&self, channel: usize) -> bool {
        self.ranges
            .binary_search_by(|r| {
                if r.hi < channel {
                    std::cmp::Ordering::Less
                } else if r.lo > channel {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// All selected channel indices, ascending.
    pub fn channels(&self) -> Vec<usize> {
        self.ranges.iter().flat_map(|r| r.lo..=r.hi).collect()
    }

    /// Channels of `[0, n)` not in this selection.
    pub fn complement(&self, n: usize) -> ChannelSelection {
        ChannelSelection::from_channels((0..n).filter(|&c| !self.contains(c)))
    }

    pub fn intersect(&self, other: &ChannelSelection) -> ChannelSelection {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = self.ranges[i];
            let b = other.ranges[j];
            let lo = a.lo.max(b.lo);
            let hi = a.hi.min(b.hi);
            if lo <= hi {
                out.push(ChannelRange::new(lo, hi));
            }
            if a.hi < b.hi {
                i += 1;
            } else {
                j += 1;
            }
        }
        ChannelSelection::from_ranges(out)
    }

    pub fn union(&self, other: &ChannelSelection) -> ChannelSelection {
        ChannelSelection::from_ranges(self.ranges.iter().chain(other.ranges.iter()).copied())
    }

    /// First to last selected channel, inclusive; zero when empty.
    pub fn spread(&self) -> usize {
        match (self.ranges.first(), self.ranges.last()) {
            (Some(first), Some(last)) => last.hi - first.lo + 1,
            _ => 0,
        }
    }

    /// Mean index of the selected channels.
    pub fn centroid(&self) -> Option<f64> {
        let n = self.channel_count();
        if n == 0 {
            return None;
        }
        let sum: f64 = self
            .ranges
            .iter()
            .map(|r| (r.lo + r.hi) as f64 * r.width() as f64 / 2.0)
            .sum();
        Some(sum / n as f64)
    }
}

/// Intersect two stage selections. An empty intersection falls back to the
/// earlier selection; the flag reports whether that happened.
pub fn reconcile(earlier: &ChannelSelection, later: &ChannelSelection) -> (ChannelSelection, bool) {
    let both = earlier.intersect(later);
    if both.is_empty() && !earlier.is_empty() {
        (earlier.clone(), true)
    } else {
        (both, false)
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

impl FromStr for ChannelSelection {
    type Err = ContinuumError;

    /// Parse `"lo1~hi1;lo2~hi2"`; a bare `"c"` selects one channel.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ContinuumError::InvalidSelection(s.to_string());
        let mut ranges = Vec::new();
        for tok in s.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (lo, hi) = match tok.split_once('~') {
                Some((a, b)) => (
                    a.trim().parse::<usize>().map_err(|_| bad())?,
                    b.trim().parse::<usize>().map_err(|_| bad())?,
                ),
                None => {
                    let c = tok.parse::<usize>().map_err(|_| bad())?;
                    (c, c)
                }
            };
            if lo > hi {
                return Err(bad());
            }
            ranges.push(ChannelRange::new(lo, hi));
        }
        Ok(ChannelSelection::from_ranges(ranges))
    }
}

impl Serialize for ChannelSelection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelSelection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(s: &str) -> ChannelSelection {
        s.parse().unwrap()
    }

    #[test]
    fn channels_merge_into_ranges() {
        let s = ChannelSelection::from_channels([5, 1, 2, 3, 9, 8, 2]);
        assert_eq!(s.to_string(), "1~3;5~5;8~9");
        assert_eq!(s.channel_count(), 6);
    }

    #[test]
    fn parse_and_format() {
        let s = sel("40~60; 10~12");
        assert_eq!(s.to_string(), "10~12;40~60");
        assert!(s.contains(11));
        assert!(!s.contains(13));
        assert!("3~1".parse::<ChannelSelection>().is_err());
        assert!("a~b".parse::<ChannelSelection>().is_err());
        assert!(sel("").is_empty());
    }

    #[test]
    fn intersection_of_overlapping_stages() {
        let a = sel("10~50");
        let b = sel("5~12;40~60");
        assert_eq!(a.intersect(&b).to_string(), "10~12;40~50");
        let (kept, reverted) = reconcile(&a, &b);
        assert_eq!(kept, sel("10~12;40~50"));
        assert!(!reverted);
    }

    #[test]
    fn disjoint_stages_revert_to_earlier() {
        let a = sel("10~50");
        let b = sel("60~80");
        assert!(a.intersect(&b).is_empty());
        let (kept, reverted) = reconcile(&a, &b);
        assert_eq!(kept, a);
        assert!(reverted);
    }

    #[test]
    fn complement_spread_and_centroid() {
        let s = sel("0~2;7~9");
        assert_eq!(s.complement(10).to_string(), "3~6");
        assert_eq!(s.spread(), 10);
        assert_eq!(s.centroid(), Some(4.5));
        assert_eq!(ChannelSelection::empty().centroid(), None);
    }

    #[test]
    fn touching_ranges_merge() {
        let s = ChannelSelection::from_ranges([ChannelRange::new(4, 6), ChannelRange::new(0, 3)]);
        assert_eq!(s.to_string(), "0~6");
    }
}
