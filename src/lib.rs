//! Embeddable HNSW vector database.
//!
//! This crate is the core of a vector database: fixed-dimension `f32`
//! vectors organized into named [`Collection`]s, answered by an
//! approximate k-nearest-neighbor [`hnsw::HnswIndex`], with durable
//! on-disk state managed by [`persistence::Persistence`].
//!
//! A database façade (collection registry, context-managed save-on-close)
//! and any CLI/notebook entry points are expected to sit on top of this
//! crate; they are not part of it.
//!
//! # Example
//!
//! ```
//! use hnswdb::{Collection, DistanceMetric};
//!
//! let mut collection = Collection::new("demo", 3, DistanceMetric::L2, 16, 200).unwrap();
//! collection.insert(1, vec![1.0, 0.0, 0.0]).unwrap();
//! collection.insert(2, vec![0.0, 1.0, 0.0]).unwrap();
//!
//! let results = collection.search(&[0.9, 0.1, 0.0], 1, 50).unwrap();
//! assert_eq!(results[0].0, 1);
//! ```

mod collection;
mod distance;
mod hnsw;
mod persistence;

pub use collection::{Collection, CollectionConfig};
pub use distance::DistanceMetric;
pub use hnsw::{HnswConfig, HnswIndex};
pub use persistence::Persistence;

/// Errors that can occur anywhere in the database core.
///
/// Every fallible operation in this crate returns one of these variants so
/// a caller can catch broadly or match on the specific failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("duplicate id: {0}")]
    DuplicateId(u64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
