//! Result algebra
//!
//! Composable AND / OR / NOT combinators over per-key bitmaps.
//!
//! # Pruning
//!
//! - AND reports a region as absent as soon as one operand does, so the
//!   remaining operands are never touched for that region. Operands are
//!   ordered by ascending cost.
//! - OR must consult every operand; operands are ordered by descending cost.
//! - NOT never prunes. It can surface ids that were never assigned or were
//!   removed; resolving iterators skip them.
//! - EMPTY prunes everything it is intersected with.

mod cursor;
mod node;

pub use cursor::{AndCursor, BitmapCursor, NotCursor, OrCursor, ResultCursor};
pub use node::ResultNode;
