//! bitdex - lazily loaded hierarchical bitmap indexes
//!
//! Every (field, key) pair of an entity collection owns a three-level
//! bitmap of entity ids. Leaves are compressed into compact chunk streams,
//! queries combine bitmaps lazily through AND/OR/NOT result trees, and
//! iterators enumerate matching ids without materializing any bitmap.
//!
//! - `bitmap`: leaf codec, mid and top levels, segment persistence
//! - `algebra`: result trees and their per-level cursors
//! - `iterate`: sequential and parallel id iterators
//! - `index`: per-field indexes, access coordination, snapshots
//! - `observability`: structured logging, events, counters
//! - `cli`: the `bitdex` binary

pub mod algebra;
pub mod bitmap;
pub mod cli;
pub mod index;
pub mod iterate;
pub mod observability;
