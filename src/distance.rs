//! Distance kernels for vector similarity.
//!
//! These are called in the innermost loop of HNSW construction and search,
//! so each is a tight per-dimension loop rather than an iterator chain of
//! combinators. All three assume `a.len() == b.len()`; callers validate
//! dimension before reaching these.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Euclidean (L2) distance. Non-negative; zero iff `a == b`.
#[inline]
pub fn l2(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0f32;
    for i in 0..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum.sqrt()
}

/// Cosine distance, `1 - cos(a, b)`, clamped to `[0, 2]`.
///
/// Returns `1.0` rather than `NaN` when either vector has zero norm.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let cos = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    (1.0 - cos).clamp(0.0, 2.0)
}

/// Negative inner product, so that minimizing distance maximizes similarity.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0f32;
    for i in 0..a.len() {
        sum += a[i] * b[i];
    }
    -sum
}

/// Distance metric selectable per collection.
///
/// Smaller distances are always preferred, regardless of which metric is
/// in use — `Dot` negates the inner product for exactly this reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    L2,
    Cosine,
    Dot,
}

impl DistanceMetric {
    /// Computes the distance between two vectors under this metric.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => l2(a, b),
            DistanceMetric::Cosine => cosine(a, b),
            DistanceMetric::Dot => dot(a, b),
        }
    }

    /// The wire/config name for this metric (used by the HNSW codec header
    /// and collection metadata).
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
        }
    }

    /// Parses a metric name, the inverse of [`DistanceMetric::name`].
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "l2" => Ok(DistanceMetric::L2),
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot" => Ok(DistanceMetric::Dot),
            other => Err(Error::InvalidArgument(format!("unknown metric: {other}"))),
        }
    }
}
