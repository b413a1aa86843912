//! Cycle ranges
//!
//! `cycles=1000` means `0..1000`; `cycles=10..20` means `10..20`. Either
//! bound may carry a decimal unit suffix: `K` (10^3), `M` (10^6),
//! `B` (10^9) or `T` (10^12), so `cycles=1M..2M` is accepted.

use crate::error::ParamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const EXPECTED: &str = "a cycle count such as 1000, 10K or 5..10M";

/// A half-open range of cycle numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleRange {
    start: i64,
    end: Option<i64>,
}

impl CycleRange {
    /// `start..end`
    ///
    /// # Errors
    /// Returns [`ParamError`] if `start` is negative or exceeds `end`.
    pub fn new(start: i64, end: i64) -> Result<Self, ParamError> {
        if start < 0 || start > end {
            return Err(ParamError::invalid("cycles", &format!("{start}..{end}"), EXPECTED));
        }
        Ok(Self {
            start,
            end: Some(end),
        })
    }

    /// Every cycle from `start` on
    #[must_use]
    pub fn unbounded(start: i64) -> Self {
        Self {
            start: start.max(0),
            end: None,
        }
    }

    /// First cycle
    #[inline]
    #[must_use]
    pub fn start(&self) -> i64 {
        self.start
    }

    /// One past the last cycle, `None` when unbounded
    #[inline]
    #[must_use]
    pub fn end(&self) -> Option<i64> {
        self.end
    }

    /// Number of cycles, `None` when unbounded
    #[must_use]
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.abs_diff(self.start))
    }

    /// Whether the range holds no cycle
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Whether `cycle` is in range
    #[must_use]
    pub fn contains(&self, cycle: i64) -> bool {
        cycle >= self.start && self.end.map_or(true, |end| cycle < end)
    }
}

impl Default for CycleRange {
    fn default() -> Self {
        Self::unbounded(0)
    }
}

impl fmt::Display for CycleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}..{end}", self.start),
            None => write!(f, "{}..", self.start),
        }
    }
}

impl FromStr for CycleRange {
    type Err = ParamError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        match text.split_once("..") {
            Some((start, "")) => Ok(Self::unbounded(parse_count(start, text)?)),
            Some((start, end)) => Self::new(parse_count(start, text)?, parse_count(end, text)?),
            None => Self::new(0, parse_count(text, text)?),
        }
    }
}

fn parse_count(part: &str, whole: &str) -> Result<i64, ParamError> {
    let part = part.trim().replace('_', "");
    let invalid = || ParamError::invalid("cycles", whole, EXPECTED);
    let (digits, scale) = match part.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&part[..part.len() - 1], 1_000_i64),
        Some('M') => (&part[..part.len() - 1], 1_000_000),
        Some('B') => (&part[..part.len() - 1], 1_000_000_000),
        Some('T') => (&part[..part.len() - 1], 1_000_000_000_000),
        Some(_) => (part.as_str(), 1),
        None => return Err(invalid()),
    };
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    if value < 0 {
        return Err(invalid());
    }
    value.checked_mul(scale).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_count() {
        let range: CycleRange = "1000".parse().unwrap();
        assert_eq!(range.start(), 0);
        assert_eq!(range.end(), Some(1000));
        assert_eq!(range.len(), Some(1000));
    }

    #[test]
    fn parse_interval_with_units() {
        let range: CycleRange = "1K..2k".parse().unwrap();
        assert_eq!((range.start(), range.end()), (1_000, Some(2_000)));
        let range: CycleRange = "5..1M".parse().unwrap();
        assert_eq!(range.len(), Some(999_995));
        let range: CycleRange = "1_000".parse().unwrap();
        assert_eq!(range.end(), Some(1_000));
    }

    #[test]
    fn parse_open_interval() {
        let range: CycleRange = "10..".parse().unwrap();
        assert_eq!(range.end(), None);
        assert!(range.contains(i64::MAX));
        assert_eq!(range.to_string(), "10..");
    }

    #[test]
    fn parse_rejects_bad_ranges() {
        assert!("20..10".parse::<CycleRange>().is_err());
        assert!("ten".parse::<CycleRange>().is_err());
        assert!("".parse::<CycleRange>().is_err());
        assert!("-5".parse::<CycleRange>().is_err());
        assert!("99999999T".parse::<CycleRange>().is_err());
    }

    #[test]
    fn empty_range() {
        let range: CycleRange = "5..5".parse().unwrap();
        assert!(range.is_empty());
        assert!(!range.contains(5));
    }
}
