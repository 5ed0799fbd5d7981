use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/** An inclusive interval over a single dimension
*/
pub trait Span1D {
    type DimType: PartialOrd + Copy;

    fn start(&self) -> Self::DimType;
    fn end(&self) -> Self::DimType;

    fn contains(&self, i: Self::DimType) -> bool {
        self.start() <= i && i <= self.end()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleInterval<V: PartialOrd + Copy> {
    pub start: V,
    pub end: V,
}

impl<V: PartialOrd + Copy> SimpleInterval<V> {
    pub fn new(start: V, end: V) -> SimpleInterval<V> {
        SimpleInterval { start, end }
    }
}

impl<V: PartialOrd + Copy> Span1D for SimpleInterval<V> {
    type DimType = V;

    fn start(&self) -> Self::DimType {
        self.start
    }

    fn end(&self) -> Self::DimType {
        self.end
    }
}

pub fn intervals_containing_point<V: PartialOrd + Copy, T: Span1D<DimType = V>>(
    intervals: &[T],
    value: V,
) -> Vec<&T> {
    let mut result = Vec::new();
    for i in intervals.iter() {
        if i.contains(value) {
            result.push(i);
        }
    }
    result
}

/// A contiguous, inclusive run of scan numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub start: u32,
    pub end: u32,
}

impl ScanRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The smallest range covering every scan number in `scans`, or `None`
    /// if it is empty.
    pub fn covering<I: IntoIterator<Item = u32>>(scans: I) -> Option<Self> {
        scans.into_iter().fold(None, |acc, scan| match acc {
            None => Some(Self::new(scan, scan)),
            Some(range) => Some(Self::new(range.start.min(scan), range.end.max(scan))),
        })
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The position of `scan` within the range
    pub fn offset_of(&self, scan: u32) -> Option<usize> {
        if self.contains(scan) {
            Some((scan - self.start) as usize)
        } else {
            None
        }
    }

    pub fn iter(&self) -> RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl Span1D for ScanRange {
    type DimType = u32;

    fn start(&self) -> Self::DimType {
        self.start
    }

    fn end(&self) -> Self::DimType {
        self.end
    }
}

impl IntoIterator for ScanRange {
    type Item = u32;

    type IntoIter = RangeInclusive<u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
