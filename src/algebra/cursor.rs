//! Result cursors
//!
//! Every node of a result tree walks the hierarchy through a cursor:
//!
//! - `enter_top(t)` positions on mid segment `t` and reports whether the
//!   subtree can hold a set bit there
//! - `enter_leaf(j)` positions on leaf `j` of the current mid segment
//! - `word_at(w)` returns word `w` of the current leaf
//!
//! Callers only descend after a `true` answer. Cursors are cheap to clone;
//! clones share the underlying bitmaps and own their position.

use std::sync::Arc;

use crate::bitmap::codec;
use crate::bitmap::{LeafView, LeafWords, TopLevel, LEAF_WORDS};

use super::node::ResultNode;

/// Cursor over one result node
#[derive(Debug, Clone)]
pub enum ResultCursor {
    /// Never matches
    Empty,
    /// Reads one bitmap
    Bitmap(BitmapCursor),
    /// Complements its child
    Not(NotCursor),
    /// Intersects its children
    And(AndCursor),
    /// Unites its children
    Or(OrCursor),
}

impl ResultCursor {
    /// Build a cursor tree mirroring the node tree
    pub fn new(node: &ResultNode) -> Self {
        match node {
            ResultNode::Empty => ResultCursor::Empty,
            ResultNode::Bitmap { top, .. } => ResultCursor::Bitmap(BitmapCursor::new(Arc::clone(top))),
            ResultNode::Not(child) => ResultCursor::Not(NotCursor::new(ResultCursor::new(child))),
            ResultNode::And { children, .. } => ResultCursor::And(AndCursor {
                children: children.iter().map(ResultCursor::new).collect(),
            }),
            ResultNode::Or { children, .. } => ResultCursor::Or(OrCursor::new(
                children.iter().map(ResultCursor::new).collect(),
            )),
        }
    }

    /// Position on mid segment `top`
    pub fn enter_top(&mut self, top: usize) -> bool {
        match self {
            ResultCursor::Empty => false,
            ResultCursor::Bitmap(c) => c.enter_top(top),
            ResultCursor::Not(c) => c.enter_top(top),
            ResultCursor::And(c) => c.enter_top(top),
            ResultCursor::Or(c) => c.enter_top(top),
        }
    }

    /// Position on leaf `leaf` of the current mid segment
    pub fn enter_leaf(&mut self, leaf: usize) -> bool {
        match self {
            ResultCursor::Empty => false,
            ResultCursor::Bitmap(c) => c.enter_leaf(leaf),
            ResultCursor::Not(c) => c.enter_leaf(leaf),
            ResultCursor::And(c) => c.enter_leaf(leaf),
            ResultCursor::Or(c) => c.enter_leaf(leaf),
        }
    }

    /// Word `word` of the current leaf
    pub fn word_at(&self, word: usize) -> u64 {
        match self {
            ResultCursor::Empty => 0,
            ResultCursor::Bitmap(c) => c.word_at(word),
            ResultCursor::Not(c) => c.word_at(word),
            ResultCursor::And(c) => c.word_at(word),
            ResultCursor::Or(c) => c.word_at(word),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafState {
    Absent,
    Full,
    Words,
}

/// Cursor over one key's bitmap
#[derive(Debug, Clone)]
pub struct BitmapCursor {
    top: Arc<TopLevel>,
    mid: Option<usize>,
    state: LeafState,
    /// Decoded copy of the current leaf
    scratch: Box<LeafWords>,
}

impl BitmapCursor {
    fn new(top: Arc<TopLevel>) -> Self {
        Self {
            top,
            mid: None,
            state: LeafState::Absent,
            scratch: Box::new([0u64; LEAF_WORDS]),
        }
    }

    fn enter_top(&mut self, top: usize) -> bool {
        self.state = LeafState::Absent;
        self.mid = self.top.mid(top).map(|_| top);
        self.mid.is_some()
    }

    fn enter_leaf(&mut self, leaf: usize) -> bool {
        let Some(mid) = self.mid.and_then(|t| self.top.mid(t)) else {
            self.state = LeafState::Absent;
            return false;
        };
        self.state = match mid.leaf(leaf) {
            LeafView::Empty => LeafState::Absent,
            LeafView::Full => LeafState::Full,
            LeafView::Packed(stream) => {
                codec::expand_stored(stream, &mut self.scratch);
                LeafState::Words
            }
            LeafView::Raw(words) => {
                self.scratch.copy_from_slice(words);
                LeafState::Words
            }
        };
        self.state != LeafState::Absent
    }

    fn word_at(&self, word: usize) -> u64 {
        match self.state {
            LeafState::Absent => 0,
            LeafState::Full => u64::MAX,
            LeafState::Words => self.scratch[word],
        }
    }
}

/// Complement cursor. Never prunes: an absent child region is all ones here.
#[derive(Debug, Clone)]
pub struct NotCursor {
    child: Box<ResultCursor>,
    top_active: bool,
    leaf_active: bool,
}

impl NotCursor {
    fn new(child: ResultCursor) -> Self {
        Self {
            child: Box::new(child),
            top_active: false,
            leaf_active: false,
        }
    }

    fn enter_top(&mut self, top: usize) -> bool {
        self.top_active = self.child.enter_top(top);
        self.leaf_active = false;
        true
    }

    fn enter_leaf(&mut self, leaf: usize) -> bool {
        self.leaf_active = self.top_active && self.child.enter_leaf(leaf);
        true
    }

    fn word_at(&self, word: usize) -> u64 {
        if self.leaf_active {
            !self.child.word_at(word)
        } else {
            u64::MAX
        }
    }
}

/// Intersection cursor; children are ordered cheapest first
#[derive(Debug, Clone)]
pub struct AndCursor {
    children: Vec<ResultCursor>,
}

impl AndCursor {
    fn enter_top(&mut self, top: usize) -> bool {
        self.children.iter_mut().all(|c| c.enter_top(top))
    }

    fn enter_leaf(&mut self, leaf: usize) -> bool {
        self.children.iter_mut().all(|c| c.enter_leaf(leaf))
    }

    fn word_at(&self, word: usize) -> u64 {
        let mut acc = u64::MAX;
        for child in &self.children {
            acc &= child.word_at(word);
            if acc == 0 {
                break;
            }
        }
        acc
    }
}

/// Union cursor. Remembers which children are positioned so that a child
/// pruned at the top level is never asked for a leaf or a word.
#[derive(Debug, Clone)]
pub struct OrCursor {
    children: Vec<ResultCursor>,
    top_active: Vec<bool>,
    leaf_active: Vec<bool>,
}

impl OrCursor {
    fn new(children: Vec<ResultCursor>) -> Self {
        let n = children.len();
        Self {
            children,
            top_active: vec![false; n],
            leaf_active: vec![false; n],
        }
    }

    fn enter_top(&mut self, top: usize) -> bool {
        let mut any = false;
        for (child, active) in self.children.iter_mut().zip(self.top_active.iter_mut()) {
            *active = child.enter_top(top);
            any |= *active;
        }
        self.leaf_active.iter_mut().for_each(|a| *a = false);
        any
    }

    fn enter_leaf(&mut self, leaf: usize) -> bool {
        let mut any = false;
        for (i, child) in self.children.iter_mut().enumerate() {
            self.leaf_active[i] = self.top_active[i] && child.enter_leaf(leaf);
            any |= self.leaf_active[i];
        }
        any
    }

    fn word_at(&self, word: usize) -> u64 {
        let mut acc = 0u64;
        for (child, &active) in self.children.iter().zip(&self.leaf_active) {
            if !active {
                continue;
            }
            acc |= child.word_at(word);
            if acc == u64::MAX {
                break;
            }
        }
        acc
    }
}
