//! Result trees
//!
//! A `ResultNode` is an immutable, lazily evaluated boolean combination of
//! per-key bitmaps. Building a node never touches leaf data; only its
//! cursors do.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use crate::bitmap::{BitAddress, TopLevel};

use super::cursor::ResultCursor;

/// Lazily evaluated boolean combination of bitmaps
#[derive(Clone)]
pub enum ResultNode {
    /// Matches nothing; prunes every enclosing AND
    Empty,
    /// One key's bitmap
    Bitmap {
        /// Shared, read-only top level
        top: Arc<TopLevel>,
        /// Non-trivial leaf count at construction time
        cost: u64,
    },
    /// Complement of the child over the whole id space
    Not(Box<ResultNode>),
    /// Intersection, children ascending by cost
    And {
        /// Flattened operands
        children: Vec<ResultNode>,
        /// Cheapest child's cost
        cost: u64,
    },
    /// Union, children descending by cost
    Or {
        /// Flattened operands
        children: Vec<ResultNode>,
        /// Sum of the children's costs
        cost: u64,
    },
}

impl ResultNode {
    /// A node matching nothing
    pub fn empty() -> Self {
        ResultNode::Empty
    }

    /// Leaf node over one key's bitmap
    pub fn bitmap(top: Arc<TopLevel>) -> Self {
        let cost = top.segment_count();
        ResultNode::Bitmap { top, cost }
    }

    /// Complement. `not(not(x))` reduces to `x`.
    pub fn not(node: ResultNode) -> Self {
        match node {
            ResultNode::Not(inner) => *inner,
            other => ResultNode::Not(Box::new(other)),
        }
    }

    /// Intersection of every operand. Nested ANDs are flattened; no operand
    /// yields `Empty` and a single operand is returned as is.
    pub fn and(operands: impl IntoIterator<Item = ResultNode>) -> Self {
        let mut children = Vec::new();
        for node in operands {
            match node {
                ResultNode::And { children: nested, .. } => children.extend(nested),
                other => children.push(other),
            }
        }
        match children.len() {
            0 => ResultNode::Empty,
            1 => children.remove(0),
            _ => {
                children.sort_by_key(ResultNode::cost);
                let cost = children.iter().map(ResultNode::cost).min().unwrap_or(0);
                ResultNode::And { children, cost }
            }
        }
    }

    /// Union of every operand, flattened like `and`
    pub fn or(operands: impl IntoIterator<Item = ResultNode>) -> Self {
        let mut children = Vec::new();
        for node in operands {
            match node {
                ResultNode::Or { children: nested, .. } => children.extend(nested),
                other => children.push(other),
            }
        }
        match children.len() {
            0 => ResultNode::Empty,
            1 => children.remove(0),
            _ => {
                children.sort_by_key(|c| Reverse(c.cost()));
                let cost = children.iter().fold(0u64, |acc, c| acc.saturating_add(c.cost()));
                ResultNode::Or { children, cost }
            }
        }
    }

    /// Estimated non-trivial leaf volume, used only for operand ordering.
    ///
    /// A complement can never prune, so it costs more than any operand that
    /// can; a sparser child makes a denser complement.
    pub fn cost(&self) -> u64 {
        match self {
            ResultNode::Empty => 0,
            ResultNode::Bitmap { cost, .. } => *cost,
            ResultNode::Not(child) => u64::MAX - child.cost(),
            ResultNode::And { cost, .. } | ResultNode::Or { cost, .. } => *cost,
        }
    }

    /// Whether this is the `Empty` node
    pub fn is_empty_node(&self) -> bool {
        matches!(self, ResultNode::Empty)
    }

    /// Operands of a top-level AND, or the node itself.
    ///
    /// The iteration engine intersects these directly instead of wrapping
    /// them in another chain cursor.
    pub fn split_conjunction(&self) -> &[ResultNode] {
        match self {
            ResultNode::And { children, .. } => children,
            other => std::slice::from_ref(other),
        }
    }

    /// A fresh cursor positioned before the first top index
    pub fn cursor(&self) -> ResultCursor {
        ResultCursor::new(self)
    }

    /// Evaluate a single id
    pub fn contains(&self, id: u64) -> bool {
        let addr = BitAddress::of(id);
        let mut cursor = self.cursor();
        cursor.enter_top(addr.top)
            && cursor.enter_leaf(addr.leaf)
            && cursor.word_at(addr.word) & (1u64 << addr.bit) != 0
    }
}

impl fmt::Debug for ResultNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultNode::Empty => write!(f, "Empty"),
            ResultNode::Bitmap { cost, .. } => write!(f, "Bitmap(cost={})", cost),
            ResultNode::Not(child) => write!(f, "Not({:?})", child),
            ResultNode::And { children, .. } => f.debug_tuple("And").field(children).finish(),
            ResultNode::Or { children, .. } => f.debug_tuple("Or").field(children).finish(),
        }
    }
}

impl std::ops::Not for ResultNode {
    type Output = ResultNode;

    fn not(self) -> ResultNode {
        ResultNode::not(self)
    }
}

impl std::ops::BitAnd for ResultNode {
    type Output = ResultNode;

    fn bitand(self, rhs: ResultNode) -> ResultNode {
        ResultNode::and([self, rhs])
    }
}

impl std::ops::BitOr for ResultNode {
    type Output = ResultNode;

    fn bitor(self, rhs: ResultNode) -> ResultNode {
        ResultNode::or([self, rhs])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::LEAF_BITS;

    fn bitmap_of(ids: impl IntoIterator<Item = u64>) -> ResultNode {
        let mut top = TopLevel::new();
        for id in ids {
            top.set_bit(id);
        }
        ResultNode::bitmap(Arc::new(top))
    }

    /// One id in each of `leaves` distinct leaves
    fn spread(leaves: u64) -> ResultNode {
        bitmap_of((0..leaves).map(|l| l * LEAF_BITS as u64))
    }

    #[test]
    fn test_bitmap_cost_is_segment_count() {
        assert_eq!(spread(3).cost(), 3);
        assert_eq!(ResultNode::empty().cost(), 0);
    }

    #[test]
    fn test_and_sorts_ascending_and_takes_min() {
        let node = ResultNode::and([spread(5), spread(1), spread(3)]);
        match &node {
            ResultNode::And { children, cost } => {
                let costs: Vec<u64> = children.iter().map(ResultNode::cost).collect();
                assert_eq!(costs, vec![1, 3, 5]);
                assert_eq!(*cost, 1);
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_or_sorts_descending_and_sums() {
        let node = ResultNode::or([spread(1), spread(5), spread(3)]);
        match &node {
            ResultNode::Or { children, cost } => {
                let costs: Vec<u64> = children.iter().map(ResultNode::cost).collect();
                assert_eq!(costs, vec![5, 3, 1]);
                assert_eq!(*cost, 9);
            }
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_not_sorts_after_pruning_operands() {
        let node = ResultNode::and([!spread(1), spread(5), ResultNode::empty(), spread(3)]);
        let children = node.split_conjunction();
        assert!(children[0].is_empty_node());
        assert_eq!(children[1].cost(), 3);
        assert_eq!(children[2].cost(), 5);
        assert!(matches!(children[3], ResultNode::Not(_)));

        // A complement of a sparse key is denser than one of a dense key
        assert!((!spread(1)).cost() > (!spread(4)).cost());
        // Sums saturate instead of overflowing
        assert_eq!(ResultNode::or([!spread(1), !spread(2)]).cost(), u64::MAX);
    }

    #[test]
    fn test_chains_flatten() {
        let inner = ResultNode::and([spread(1), spread(2)]);
        let outer = ResultNode::and([inner, spread(3)]);
        assert_eq!(outer.split_conjunction().len(), 3);

        let inner = spread(1) | spread(2);
        let outer = inner | spread(3);
        match outer {
            ResultNode::Or { children, .. } => assert_eq!(children.len(), 3),
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_chains() {
        assert!(ResultNode::and([]).is_empty_node());
        assert!(ResultNode::or([]).is_empty_node());
        assert!(matches!(ResultNode::and([spread(2)]), ResultNode::Bitmap { .. }));
    }

    #[test]
    fn test_double_negation() {
        let node = !!spread(2);
        assert!(matches!(node, ResultNode::Bitmap { .. }));
    }

    #[test]
    fn test_split_conjunction_of_non_and() {
        let node = spread(2);
        assert_eq!(node.split_conjunction().len(), 1);
    }

    #[test]
    fn test_contains() {
        let a = bitmap_of([1, 5000]);
        let b = bitmap_of([5000, 7]);
        let and = a.clone() & b.clone();
        assert!(and.contains(5000));
        assert!(!and.contains(1));

        let or = a.clone() | b;
        assert!(or.contains(7));
        assert!(!or.contains(8));

        let not = !a;
        assert!(not.contains(2));
        assert!(!not.contains(1));
        assert!(!ResultNode::empty().contains(0));
    }
}
