//! A named collection: owns one [`HnswIndex`], the bidirectional
//! user-id/internal-id mapping, and a verbatim copy of every inserted
//! vector.

use crate::distance::DistanceMetric;
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::{Error, Result};
use std::collections::HashMap;

/// Immutable configuration for a [`Collection`], persisted alongside it.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub name: String,
    pub dim: usize,
    pub metric: DistanceMetric,
    pub m: usize,
    pub ef_construction: usize,
}

/// Owns one HNSW index, the id bijection, and the original vectors.
///
/// `get(user_id)` always returns the bytes the caller passed to `insert`,
/// independent of whatever internal representation the index keeps —
/// the two stores are deliberately separate (see `DESIGN.md`).
pub struct Collection {
    pub(crate) config: CollectionConfig,
    pub(crate) index: HnswIndex,
    pub(crate) user_to_internal: HashMap<u64, i64>,
    pub(crate) internal_to_user: HashMap<i64, u64>,
    pub(crate) vectors: HashMap<u64, Vec<f32>>,
    pub(crate) next_internal_id: i64,
}

impl Collection {
    /// Creates a new, empty collection.
    pub fn new(
        name: impl Into<String>,
        dim: usize,
        metric: DistanceMetric,
        m: usize,
        ef_construction: usize,
    ) -> Result<Self> {
        let index = HnswIndex::new(dim, metric, HnswConfig::new(m, ef_construction))?;
        Ok(Self {
            config: CollectionConfig {
                name: name.into(),
                dim,
                metric,
                m,
                ef_construction,
            },
            index,
            user_to_internal: HashMap::new(),
            internal_to_user: HashMap::new(),
            vectors: HashMap::new(),
            next_internal_id: 0,
        })
    }

    /// Reconstructs a collection from its persisted parts. Used only by
    /// the persistence layer when loading from disk.
    pub(crate) fn from_parts(
        config: CollectionConfig,
        index: HnswIndex,
        user_to_internal: HashMap<u64, i64>,
        internal_to_user: HashMap<i64, u64>,
        vectors: HashMap<u64, Vec<f32>>,
        next_internal_id: i64,
    ) -> Self {
        Self {
            config,
            index,
            user_to_internal,
            internal_to_user,
            vectors,
            next_internal_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn dim(&self) -> usize {
        self.config.dim
    }

    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    pub fn m(&self) -> usize {
        self.config.m
    }

    pub fn ef_construction(&self) -> usize {
        self.config.ef_construction
    }

    /// Inserts a new vector under `user_id`. Rejects a dimension mismatch
    /// or a `user_id` that is already live; never updates in place —
    /// callers wanting an update issue `delete` then `insert`, which gets
    /// a fresh internal id.
    pub fn insert(&mut self, user_id: u64, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.config.dim {
            return Err(Error::DimensionMismatch {
                expected: self.config.dim,
                actual: vector.len(),
            });
        }
        if self.user_to_internal.contains_key(&user_id) {
            return Err(Error::DuplicateId(user_id));
        }

        let internal_id = self.next_internal_id;
        self.index.add(internal_id, &vector)?;

        self.next_internal_id += 1;
        self.user_to_internal.insert(user_id, internal_id);
        self.internal_to_user.insert(internal_id, user_id);
        self.vectors.insert(user_id, vector);

        tracing::debug!(collection = %self.config.name, user_id, internal_id, "inserted vector");
        Ok(())
    }

    /// Approximate k-NN search, translated back to user ids.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.config.dim {
            return Err(Error::DimensionMismatch {
                expected: self.config.dim,
                actual: query.len(),
            });
        }

        let raw = self.index.search(query, k, ef_search)?;
        Ok(raw
            .into_iter()
            // Defensive: every live internal id should have a user id by
            // the bijection invariant; silently drop any that don't
            // rather than surface an inconsistency to the caller.
            .filter_map(|(internal_id, distance)| {
                self.internal_to_user.get(&internal_id).map(|&user_id| (user_id, distance))
            })
            .take(k)
            .collect())
    }

    /// Returns the vector previously inserted under `user_id`, verbatim.
    pub fn get(&self, user_id: u64) -> Option<&[f32]> {
        self.vectors.get(&user_id).map(Vec::as_slice)
    }

    pub fn contains(&self, user_id: u64) -> bool {
        self.user_to_internal.contains_key(&user_id)
    }

    pub fn count(&self) -> usize {
        self.user_to_internal.len()
    }

    /// Removes `user_id`, freeing both mapping directions and the stored
    /// vector. Returns whether it was present.
    pub fn delete(&mut self, user_id: u64) -> bool {
        let Some(internal_id) = self.user_to_internal.remove(&user_id) else {
            return false;
        };
        self.internal_to_user.remove(&internal_id);
        self.vectors.remove(&user_id);
        self.index.remove(internal_id);
        tracing::debug!(collection = %self.config.name, user_id, internal_id, "deleted vector");
        true
    }
}
