//! Index layer for bitdex
//!
//! Maps the values of indexed fields to bitmaps of entity ids and exposes
//! them to queries.
//!
//! # Design Principles
//!
//! - One bitmap per (field, key); entries appear on first insert and vanish
//!   with their last id
//! - Writers exclude readers through one `AccessCoordinator` per manager
//! - Result trees share bitmaps; writers copy only what a live tree still
//!   references
//!
//! # Invariants
//!
//! - Ids are below the configured `id_ceiling`
//! - Default iteration stops at the high-water mark (max inserted id + 1)
//! - A snapshot only carries mid segments changed since the previous one

mod bitmap_index;
mod config;
mod coordinator;
mod errors;
mod key;
mod manager;
mod resolver;
mod snapshot;
mod view;

pub use bitmap_index::{BitmapIndex, ChangeEffect, Entry, FieldStats};
pub use config::{ConfigError, ConfigResult, IndexConfig, MAX_ID_CEILING};
pub use coordinator::{AccessCoordinator, ReadToken, WriteGuard};
pub use errors::{IndexError, IndexResult};
pub use key::IndexKey;
pub use manager::{IndexManager, IndexStats};
pub use resolver::{from_fn, EntityResolver, FromFn};
pub use snapshot::{FieldSnapshot, IndexSnapshot, KeySnapshot};
pub use view::ReadView;
