//! Hierarchy walker
//!
//! Walks the three levels of every operand in lock-step and intersects the
//! operands word by word. States:
//!
//! ```text
//! EnterTop -> EnterLeaf -> Word -> (next word | next leaf | next top) -> Exhausted
//! ```
//!
//! At each level every operand is positioned on the new index. If any
//! operand reports the region absent, the whole region is skipped without
//! reading a single word.

use std::ops::ControlFlow;

use crate::algebra::{ResultCursor, ResultNode};
use crate::bitmap::word_base_id;

use super::range::IdRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    EnterTop,
    EnterLeaf,
    Word,
    Exhausted,
}

/// One non-zero word produced by the walker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWord {
    /// Entity id of bit 0
    pub base: u64,
    /// Matching ids, already trimmed to the range
    pub bits: u64,
}

impl SegmentWord {
    /// Number of matching ids
    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }
}

/// Cooperative, single-threaded walker over an intersection of operands
#[derive(Debug, Clone)]
pub struct HierarchyWalker {
    operands: Vec<ResultCursor>,
    range: IdRange,
    state: WalkState,
    top: usize,
    last_top: usize,
    leaf: usize,
    last_leaf: usize,
    word: usize,
    last_word: usize,
    /// Unconsumed bits of the current word
    pending: u64,
    base: u64,
}

impl HierarchyWalker {
    /// Walker over the conjunction operands of `node`, bounded to `range`
    pub fn new(node: &ResultNode, range: IdRange) -> Self {
        let operands = node.split_conjunction().iter().map(ResultCursor::new).collect();
        Self::from_cursors(operands, range)
    }

    /// Walker over an explicit operand list. An empty list matches nothing.
    pub fn from_cursors(operands: Vec<ResultCursor>, range: IdRange) -> Self {
        let mut walker = Self {
            operands,
            range,
            state: WalkState::Exhausted,
            top: 0,
            last_top: 0,
            leaf: 0,
            last_leaf: 0,
            word: 0,
            last_word: 0,
            pending: 0,
            base: 0,
        };
        walker.restart(range);
        walker
    }

    /// Range being walked
    pub fn range(&self) -> IdRange {
        self.range
    }

    /// Reposition on a new range, keeping the operands
    pub fn restart(&mut self, range: IdRange) {
        self.range = range;
        self.pending = 0;
        match range.top_span() {
            Some((first, last)) if !self.operands.is_empty() => {
                self.top = first;
                self.last_top = last;
                self.state = WalkState::EnterTop;
            }
            _ => self.state = WalkState::Exhausted,
        }
    }

    /// Stop permanently. Every later call yields nothing.
    pub fn close(&mut self) {
        self.state = WalkState::Exhausted;
        self.pending = 0;
    }

    /// Whether the walker can produce nothing more
    pub fn is_exhausted(&self) -> bool {
        self.state == WalkState::Exhausted && self.pending == 0
    }

    fn enter_top(&mut self, top: usize) -> bool {
        self.operands.iter_mut().all(|op| op.enter_top(top))
    }

    fn enter_leaf(&mut self, leaf: usize) -> bool {
        self.operands.iter_mut().all(|op| op.enter_leaf(leaf))
    }

    fn word_value(&self, word: usize) -> u64 {
        let mut acc = u64::MAX;
        for op in &self.operands {
            acc &= op.word_at(word);
            if acc == 0 {
                break;
            }
        }
        acc
    }

    /// Advance to the next non-zero word, discarding unconsumed bits of the
    /// current one
    pub fn next_word(&mut self) -> Option<SegmentWord> {
        loop {
            match self.state {
                WalkState::Exhausted => return None,
                WalkState::EnterTop => {
                    if self.top > self.last_top {
                        self.state = WalkState::Exhausted;
                    } else if self.enter_top(self.top) {
                        let (first, last) = self.range.leaf_span(self.top);
                        self.leaf = first;
                        self.last_leaf = last;
                        self.state = WalkState::EnterLeaf;
                    } else {
                        self.top += 1;
                    }
                }
                WalkState::EnterLeaf => {
                    if self.leaf > self.last_leaf {
                        self.top += 1;
                        self.state = WalkState::EnterTop;
                    } else if self.enter_leaf(self.leaf) {
                        let (first, last) = self.range.word_span(self.top, self.leaf);
                        self.word = first;
                        self.last_word = last;
                        self.state = WalkState::Word;
                    } else {
                        self.leaf += 1;
                    }
                }
                WalkState::Word => {
                    if self.word > self.last_word {
                        self.leaf += 1;
                        self.state = WalkState::EnterLeaf;
                        continue;
                    }
                    let word = self.word;
                    self.word += 1;
                    let base = word_base_id(self.top, self.leaf, word);
                    let bits = self.word_value(word) & self.range.word_mask(base);
                    if bits != 0 {
                        return Some(SegmentWord { base, bits });
                    }
                }
            }
        }
    }

    /// Next matching id, ascending
    pub fn next_id(&mut self) -> Option<u64> {
        while self.pending == 0 {
            let word = self.next_word()?;
            self.pending = word.bits;
            self.base = word.base;
        }
        let bit = self.pending.trailing_zeros();
        self.pending &= self.pending - 1;
        Some(self.base + bit as u64)
    }

    /// Push every remaining id into `f` until it breaks
    pub fn walk<F>(&mut self, mut f: F) -> ControlFlow<()>
    where
        F: FnMut(u64) -> ControlFlow<()>,
    {
        while let Some(id) = self.next_id() {
            if f(id).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Count the remaining ids without visiting them one by one
    pub fn count_remaining(&mut self) -> u64 {
        let mut total = self.pending.count_ones() as u64;
        self.pending = 0;
        while let Some(word) = self.next_word() {
            total += word.count() as u64;
        }
        total
    }
}
