//! Id ranges
//!
//! A half-open `[start, bound)` interval of entity ids. The walker derives
//! per-level spans from it and trims the first and last word with masks, so
//! partial ranges need no special cases mid-stream.

use std::ops::Range;

use crate::bitmap::{BitmapError, BitmapResult, LEAF_SHIFT, LEAF_WORDS, MID_LEAVES, MID_SHIFT, WORD_SHIFT};

/// Half-open interval of entity ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    start: u64,
    bound: u64,
}

impl IdRange {
    /// `[start, bound)`; `start > bound` is a usage error
    pub fn new(start: u64, bound: u64) -> BitmapResult<Self> {
        if start > bound {
            return Err(BitmapError::usage(format!(
                "range start {} is past its bound {}",
                start, bound
            )));
        }
        Ok(Self { start, bound })
    }

    /// `[0, bound)`
    pub fn up_to(bound: u64) -> Self {
        Self { start: 0, bound }
    }

    /// First id
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end
    pub fn bound(&self) -> u64 {
        self.bound
    }

    /// Whether the range holds no id
    pub fn is_empty(&self) -> bool {
        self.start >= self.bound
    }

    /// Number of ids in the range
    pub fn len(&self) -> u64 {
        self.bound.saturating_sub(self.start)
    }

    /// Whether `id` lies in the range
    pub fn contains(&self, id: u64) -> bool {
        self.start <= id && id < self.bound
    }

    /// Intersection with another range
    pub fn intersect(&self, other: &IdRange) -> IdRange {
        let start = self.start.max(other.start);
        let bound = self.bound.min(other.bound).max(start);
        IdRange { start, bound }
    }

    /// Ids covered by mid segment `top`
    pub fn of_mid(top: usize) -> IdRange {
        let start = (top as u64) << MID_SHIFT;
        IdRange {
            start,
            bound: start + (1 << MID_SHIFT),
        }
    }

    fn last(&self) -> u64 {
        self.bound - 1
    }

    /// First and last mid segment, inclusive. Empty ranges have none.
    pub(crate) fn top_span(&self) -> Option<(usize, usize)> {
        if self.is_empty() {
            return None;
        }
        Some(((self.start >> MID_SHIFT) as usize, (self.last() >> MID_SHIFT) as usize))
    }

    /// First and last leaf of mid segment `top`, inclusive
    pub(crate) fn leaf_span(&self, top: usize) -> (usize, usize) {
        let first = if (self.start >> MID_SHIFT) as usize == top {
            ((self.start >> LEAF_SHIFT) as usize) & (MID_LEAVES - 1)
        } else {
            0
        };
        let last = if (self.last() >> MID_SHIFT) as usize == top {
            ((self.last() >> LEAF_SHIFT) as usize) & (MID_LEAVES - 1)
        } else {
            MID_LEAVES - 1
        };
        (first, last)
    }

    /// First and last word of a leaf, inclusive
    pub(crate) fn word_span(&self, top: usize, leaf: usize) -> (usize, usize) {
        let leaf_id = ((top as u64) << (MID_SHIFT - LEAF_SHIFT)) | leaf as u64;
        let first = if self.start >> LEAF_SHIFT == leaf_id {
            ((self.start >> WORD_SHIFT) as usize) & (LEAF_WORDS - 1)
        } else {
            0
        };
        let last = if self.last() >> LEAF_SHIFT == leaf_id {
            ((self.last() >> WORD_SHIFT) as usize) & (LEAF_WORDS - 1)
        } else {
            LEAF_WORDS - 1
        };
        (first, last)
    }

    /// Mask of the bits of the word starting at `base` that lie in range
    pub(crate) fn word_mask(&self, base: u64) -> u64 {
        let mut mask = u64::MAX;
        if base < self.start {
            mask <<= self.start - base;
        }
        let end = base + 64;
        if end > self.bound {
            mask &= u64::MAX >> (end - self.bound);
        }
        mask
    }
}

impl From<Range<u64>> for IdRange {
    fn from(range: Range<u64>) -> Self {
        IdRange {
            start: range.start,
            bound: range.end.max(range.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::BitmapErrorCode;

    #[test]
    fn test_invalid_range() {
        let err = IdRange::new(10, 5).unwrap_err();
        assert_eq!(err.code(), BitmapErrorCode::UsageViolation);
        assert!(IdRange::new(5, 5).unwrap().is_empty());
        assert_eq!(IdRange::from(9..3).len(), 0);
    }

    #[test]
    fn test_spans() {
        let range = IdRange::new(4096 + 130, 1_048_576 + 4096 * 3 + 5).unwrap();
        assert_eq!(range.top_span(), Some((0, 1)));
        assert_eq!(range.leaf_span(0), (1, 255));
        assert_eq!(range.leaf_span(1), (0, 3));
        assert_eq!(range.word_span(0, 1), (2, 63));
        assert_eq!(range.word_span(0, 2), (0, 63));
        assert_eq!(range.word_span(1, 3), (0, 0));
        assert_eq!(IdRange::up_to(0).top_span(), None);
    }

    #[test]
    fn test_word_mask() {
        let range = IdRange::new(3, 130).unwrap();
        assert_eq!(range.word_mask(0), !0b111);
        assert_eq!(range.word_mask(64), u64::MAX);
        assert_eq!(range.word_mask(128), 0b11);

        let inner = IdRange::new(65, 66).unwrap();
        assert_eq!(inner.word_mask(64), 0b10);
    }

    #[test]
    fn test_intersect() {
        let a = IdRange::new(0, 100).unwrap();
        let b = IdRange::new(50, 200).unwrap();
        assert_eq!(a.intersect(&b), IdRange::new(50, 100).unwrap());

        let c = IdRange::new(300, 400).unwrap();
        assert!(a.intersect(&c).is_empty());
        assert_eq!(IdRange::of_mid(2).start(), 2 << 20);
    }
}
