//! Register address ranges and read planning
//!
//! An [`AddressRangeSet`] keeps inclusive ranges sorted, non-overlapping and
//! non-adjacent. [`AddressRangeSet::coalesce`] turns a sparse set of wanted
//! addresses into bounded spans suitable for one read request each.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RegisterError, Result};

/// Highest addressable register
pub const MAX_ADDRESS: u16 = u16::MAX;

/// Inclusive span of register addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct AddressRange {
    start: u16,
    end: u16,
}

#[derive(Deserialize)]
struct RawRange {
    start: u16,
    end: u16,
}

impl TryFrom<RawRange> for AddressRange {
    type Error = RegisterError;

    fn try_from(raw: RawRange) -> Result<Self> {
        Self::new(raw.start, raw.end)
    }
}

impl AddressRange {
    /// Create a range, rejecting `end < start`
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if end < start {
            return Err(RegisterError::invalid_range(start, end));
        }
        Ok(Self { start, end })
    }

    /// Range covering one address
    pub const fn single(address: u16) -> Self {
        Self {
            start: address,
            end: address,
        }
    }

    /// Range of `count` addresses beginning at `start`
    pub fn with_count(start: u16, count: usize) -> Result<Self> {
        let overflow = || RegisterError::invalid_range(start as u32, u32::MAX);
        let count = u32::try_from(count).map_err(|_| overflow())?;
        let end = (start as u32).checked_add(count).ok_or_else(overflow)?;
        if count == 0 || end - 1 > MAX_ADDRESS as u32 {
            return Err(RegisterError::invalid_range(start as u32, end.saturating_sub(1)));
        }
        Ok(Self {
            start,
            end: (end - 1) as u16,
        })
    }

    pub const fn start(&self) -> u16 {
        self.start
    }

    pub const fn end(&self) -> u16 {
        self.end
    }

    /// Number of addresses in the range (end - start + 1)
    pub const fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Always false; a range holds at least one address
    pub const fn is_empty(&self) -> bool {
        false
    }

    pub const fn contains(&self, address: u16) -> bool {
        address >= self.start && address <= self.end
    }

    pub fn addresses(&self) -> std::ops::RangeInclusive<u16> {
        self.start..=self.end
    }

    /// True when the two ranges overlap or touch with no gap between them
    fn touches(&self, other: &Self) -> bool {
        (self.start as u32) <= other.end as u32 + 1 && (other.start as u32) <= self.end as u32 + 1
    }

    /// Span of the smallest range covering both
    fn joined_span(&self, other: &Self) -> usize {
        let start = self.start.min(other.start);
        let end = self.end.max(other.end);
        (end - start) as usize + 1
    }

    fn join(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Ordered set of non-overlapping, non-adjacent address ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AddressRangeSet {
    ranges: Vec<AddressRange>,
}

impl AddressRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one address
    pub fn add(&mut self, address: u16) {
        self.add_range(AddressRange::single(address));
    }

    /// Insert a range, merging with every overlapping or adjacent range
    pub fn add_range(&mut self, range: AddressRange) {
        // First range that ends at or after range.start - 1 may touch the new one
        let first = self
            .ranges
            .partition_point(|r| (r.end as u32) + 1 < range.start as u32);

        let mut merged = range;
        let mut last = first;
        while last < self.ranges.len() && self.ranges[last].touches(&merged) {
            merged = merged.join(&self.ranges[last]);
            last += 1;
        }

        self.ranges.splice(first..last, std::iter::once(merged));
    }

    /// Merge of both sets
    pub fn union(&self, other: &Self) -> Self {
        let (mut base, extra) = if self.ranges.len() >= other.ranges.len() {
            (self.clone(), other)
        } else {
            (other.clone(), self)
        };
        for range in &extra.ranges {
            base.add_range(*range);
        }
        base
    }

    /// Read-only copy that can be shared across threads
    pub fn immutable_view(&self) -> Arc<AddressRangeSet> {
        Arc::new(self.clone())
    }

    /// Group ranges into read spans no wider than `max_span`
    ///
    /// Ranges are merged greedily in ascending order, gaps included, while the
    /// accumulated span stays within `max_span`. A single range already wider
    /// than `max_span` is emitted as-is. Coalescing a coalesced set again with
    /// the same limit returns an equal set.
    pub fn coalesce(&self, max_span: usize) -> Result<AddressRangeSet> {
        if max_span == 0 {
            return Err(RegisterError::InvalidSpan(max_span));
        }

        let mut out = Vec::with_capacity(self.ranges.len());
        let mut iter = self.ranges.iter();
        let Some(&first) = iter.next() else {
            return Ok(Self::new());
        };

        let mut acc = first;
        for range in iter {
            if acc.joined_span(range) <= max_span {
                acc = acc.join(range);
            } else {
                out.push(acc);
                acc = *range;
            }
        }
        out.push(acc);

        Ok(Self { ranges: out })
    }

    pub fn ranges(&self) -> &[AddressRange] {
        &self.ranges
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AddressRange> {
        self.ranges.iter()
    }

    /// Number of ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of addresses covered
    pub fn address_count(&self) -> usize {
        self.ranges.iter().map(AddressRange::len).sum()
    }

    pub fn contains(&self, address: u16) -> bool {
        let idx = self.ranges.partition_point(|r| r.end < address);
        self.ranges
            .get(idx)
            .is_some_and(|r| r.contains(address))
    }
}

impl FromIterator<u16> for AddressRangeSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<u16> for AddressRangeSet {
    fn extend<I: IntoIterator<Item = u16>>(&mut self, iter: I) {
        for address in iter {
            self.add(address);
        }
    }
}

impl FromIterator<AddressRange> for AddressRangeSet {
    fn from_iter<I: IntoIterator<Item = AddressRange>>(iter: I) -> Self {
        let mut set = Self::new();
        for range in iter {
            set.add_range(range);
        }
        set
    }
}

impl<'a> IntoIterator for &'a AddressRangeSet {
    type Item = &'a AddressRange;
    type IntoIter = std::slice::Iter<'a, AddressRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

impl fmt::Display for AddressRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{range}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn range(start: u16, end: u16) -> AddressRange {
        AddressRange::new(start, end).unwrap()
    }

    fn assert_invariant(set: &AddressRangeSet) {
        for pair in set.ranges().windows(2) {
            assert!(
                (pair[0].end() as u32) + 1 < pair[1].start() as u32,
                "ranges {} and {} overlap or touch",
                pair[0],
                pair[1]
            );
        }
    }

    // ========== AddressRange tests ==========

    #[test]
    fn test_range_rejects_end_before_start() {
        let err = AddressRange::new(10, 9).unwrap_err();
        assert!(matches!(
            err,
            RegisterError::InvalidRange { start: 10, end: 9 }
        ));
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = range(100, 109);
        assert_eq!(r.len(), 10);
        assert!(r.contains(100));
        assert!(r.contains(109));
        assert!(!r.contains(110));
        assert_eq!(AddressRange::single(65535).len(), 1);
    }

    #[test]
    fn test_range_with_count() {
        assert_eq!(AddressRange::with_count(30775, 2).unwrap(), range(30775, 30776));
        assert_eq!(
            AddressRange::with_count(65534, 2).unwrap(),
            range(65534, 65535)
        );
        assert!(AddressRange::with_count(65535, 2).is_err());
        assert!(AddressRange::with_count(0, 0).is_err());
    }

    #[test]
    fn test_range_with_huge_count() {
        assert!(AddressRange::with_count(0, 65536).is_ok());
        assert!(AddressRange::with_count(0, 65537).is_err());
        assert!(AddressRange::with_count(0, u32::MAX as usize).is_err());
        #[cfg(target_pointer_width = "64")]
        {
            assert!(matches!(
                AddressRange::with_count(0, (1 << 32) + 1),
                Err(RegisterError::InvalidRange { .. })
            ));
            assert!(AddressRange::with_count(5, usize::MAX).is_err());
        }
    }

    #[test]
    fn test_range_deserialize_validates() {
        let ok: AddressRange = serde_yaml::from_str("start: 1\nend: 4").unwrap();
        assert_eq!(ok, range(1, 4));

        let bad: std::result::Result<AddressRange, _> = serde_yaml::from_str("start: 4\nend: 1");
        assert!(bad.is_err());
    }

    // ========== add() / add_range() tests ==========

    #[test]
    fn test_add_merges_adjacent_addresses() {
        let set: AddressRangeSet = [3, 1, 2, 0].into_iter().collect();
        assert_eq!(set.ranges(), &[range(0, 3)]);
    }

    #[test]
    fn test_add_keeps_gaps_separate() {
        let set: AddressRangeSet = [0, 1, 2, 3, 12, 13, 102, 103].into_iter().collect();
        assert_eq!(set.ranges(), &[range(0, 3), range(12, 13), range(102, 103)]);
        assert_eq!(set.address_count(), 8);
        assert_invariant(&set);
    }

    #[test]
    fn test_add_range_bridges_several_ranges() {
        let mut set: AddressRangeSet = [1, 5, 9, 20].into_iter().collect();
        set.add_range(range(2, 8));
        assert_eq!(set.ranges(), &[range(1, 9), range(20, 20)]);
        assert_invariant(&set);
    }

    #[test]
    fn test_add_at_address_limits() {
        let mut set = AddressRangeSet::new();
        set.add(65535);
        set.add(0);
        set.add(65534);
        assert_eq!(set.ranges(), &[range(0, 0), range(65534, 65535)]);
        assert!(set.contains(65535));
        assert!(!set.contains(1));
    }

    #[test]
    fn test_add_duplicate_is_noop() {
        let mut set: AddressRangeSet = [10, 11].into_iter().collect();
        let before = set.clone();
        set.add(10);
        set.add_range(range(10, 11));
        assert_eq!(set, before);
    }

    // ========== union() / immutable_view() tests ==========

    #[test]
    fn test_union() {
        let a: AddressRangeSet = [0, 1, 10].into_iter().collect();
        let b: AddressRangeSet = [2, 9, 30].into_iter().collect();
        let u = a.union(&b);
        assert_eq!(u.ranges(), &[range(0, 2), range(9, 10), range(30, 30)]);
        assert_eq!(u, b.union(&a));
        assert_invariant(&u);
    }

    #[test]
    fn test_immutable_view_is_detached() {
        let mut set: AddressRangeSet = [1, 2].into_iter().collect();
        let view = set.immutable_view();
        set.add(50);

        let handle = std::thread::spawn(move || view.len());
        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(set.len(), 2);
    }

    // ========== coalesce() tests ==========

    #[test]
    fn test_coalesce_example() {
        let set: AddressRangeSet = [0, 1, 2, 3, 12, 13, 102, 103].into_iter().collect();
        let plan = set.coalesce(64).unwrap();
        assert_eq!(plan.ranges(), &[range(0, 13), range(102, 103)]);
    }

    #[test]
    fn test_coalesce_rejects_zero_span() {
        let set: AddressRangeSet = [1].into_iter().collect();
        assert!(matches!(
            set.coalesce(0),
            Err(RegisterError::InvalidSpan(0))
        ));
    }

    #[test]
    fn test_coalesce_empty() {
        assert!(AddressRangeSet::new().coalesce(10).unwrap().is_empty());
    }

    #[test]
    fn test_coalesce_oversized_range_passes_through() {
        let mut set = AddressRangeSet::new();
        set.add_range(range(0, 99));
        set.add(101);
        set.add(200);
        set.add(205);

        let plan = set.coalesce(10).unwrap();
        assert_eq!(
            plan.ranges(),
            &[range(0, 99), range(101, 101), range(200, 205)]
        );
    }

    #[test]
    fn test_coalesce_span_boundary() {
        let set: AddressRangeSet = [0, 9].into_iter().collect();
        assert_eq!(set.coalesce(10).unwrap().ranges(), &[range(0, 9)]);
        assert_eq!(
            set.coalesce(9).unwrap().ranges(),
            &[range(0, 0), range(9, 9)]
        );
    }

    #[test]
    fn test_coalesce_properties() {
        // Pseudo-random address sets from a fixed LCG seed
        let mut seed: u32 = 0x1234_5678;
        let mut next = || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            (seed >> 8) as u16
        };

        for cap in [1usize, 2, 7, 64, 125, 1000] {
            for _ in 0..20 {
                let mut set = AddressRangeSet::new();
                for _ in 0..50 {
                    let base = next() % 2000;
                    let width = next() % 20;
                    set.add_range(range(base, base + width));
                }

                let plan = set.coalesce(cap).unwrap();
                assert_invariant(&plan);

                for input in set.ranges() {
                    for address in input.addresses() {
                        assert!(plan.contains(address));
                    }
                }
                for out in plan.ranges() {
                    let passthrough = set.ranges().contains(out) && out.len() > cap;
                    assert!(out.len() <= cap || passthrough, "{out} exceeds {cap}");
                }

                assert_eq!(plan.coalesce(cap).unwrap(), plan);
            }
        }
    }

    #[test]
    fn test_display() {
        let set: AddressRangeSet = [0, 1, 2, 3, 12, 13, 102, 103].into_iter().collect();
        assert_eq!(
            set.coalesce(64).unwrap().to_string(),
            "[0-13, 102-103]"
        );
    }
}
