//! Entity resolution
//!
//! Bitmaps only hold ids. The entity store maps an id back to its entity
//! and must answer `None` for ids that were never assigned or were removed:
//! negated queries routinely produce such ids.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Maps entity ids to entities
pub trait EntityResolver {
    /// Resolved entity type
    type Entity;

    /// Look up an id; absent ids are not an error
    fn resolve(&self, id: u64) -> Option<Self::Entity>;
}

impl<E: Clone> EntityResolver for BTreeMap<u64, E> {
    type Entity = E;

    fn resolve(&self, id: u64) -> Option<E> {
        self.get(&id).cloned()
    }
}

impl<E: Clone, S: std::hash::BuildHasher> EntityResolver for HashMap<u64, E, S> {
    type Entity = E;

    fn resolve(&self, id: u64) -> Option<E> {
        self.get(&id).cloned()
    }
}

/// Dense store indexed by id; `None` marks a removed entity
impl<E: Clone> EntityResolver for Vec<Option<E>> {
    type Entity = E;

    fn resolve(&self, id: u64) -> Option<E> {
        usize::try_from(id).ok().and_then(|i| self.get(i)).and_then(Option::clone)
    }
}

impl<R: EntityResolver + ?Sized> EntityResolver for &R {
    type Entity = R::Entity;

    fn resolve(&self, id: u64) -> Option<R::Entity> {
        (**self).resolve(id)
    }
}

impl<R: EntityResolver + ?Sized> EntityResolver for Arc<R> {
    type Entity = R::Entity;

    fn resolve(&self, id: u64) -> Option<R::Entity> {
        (**self).resolve(id)
    }
}

/// Resolver backed by a closure
#[derive(Debug, Clone)]
pub struct FromFn<F>(F);

/// Wrap a closure as a resolver
pub fn from_fn<E, F: Fn(u64) -> Option<E>>(f: F) -> FromFn<F> {
    FromFn(f)
}

impl<E, F: Fn(u64) -> Option<E>> EntityResolver for FromFn<F> {
    type Entity = E;

    fn resolve(&self, id: u64) -> Option<E> {
        (self.0)(id)
    }
}
