//! HNSW (Hierarchical Navigable Small World) index.
//!
//! HNSW is a multi-layer proximity graph: layer 0 holds every node, and
//! each higher layer holds a geometrically shrinking subset, so search
//! can descend from a sparse top layer down to the dense base layer in
//! roughly logarithmic steps.
//!
//! The graph itself lives in this module; the binary on-disk
//! representation is in [`codec`].

mod codec;

use crate::distance::DistanceMetric;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Level assignment seeds from this constant so graphs are reproducible
/// across runs; a production caller that wants entropy-seeded graphs
/// should use [`HnswIndex::with_seed`].
const DEFAULT_SEED: u64 = 0x5EED_1E7E_1357_2468;

/// Tunable parameters for an [`HnswIndex`].
#[derive(Debug, Clone, Copy)]
pub struct HnswConfig {
    /// Maximum neighbors per node at levels >= 1.
    pub m: usize,
    /// Maximum neighbors per node at level 0, conventionally `2 * m`.
    pub m_max0: usize,
    /// Candidate-list capacity used while building the graph.
    pub ef_construction: usize,
}

impl HnswConfig {
    pub fn new(m: usize, ef_construction: usize) -> Self {
        Self {
            m,
            m_max0: m * 2,
            ef_construction,
        }
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::new(16, 200)
    }
}

#[derive(Debug, Clone)]
struct Node {
    vector: Vec<f32>,
    level: usize,
    /// `neighbors[l]` is the adjacency list at layer `l`, for `l` in `0..=level`.
    neighbors: Vec<Vec<i64>>,
}

/// A scored candidate during graph search.
///
/// Orders by distance ascending, then by id ascending — the spec's
/// tie-break rule ("the smaller internal id is preferred") lives here,
/// once, and every heap/sort in this module reuses it. NaN distances sort
/// as worse than any finite distance.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: i64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_distance(self.distance, other.distance).then_with(|| self.id.cmp(&other.id))
    }
}

fn cmp_distance(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap(),
    }
}

/// Reverses [`Candidate`] ordering so a `BinaryHeap<Reverse<Candidate>>`
/// behaves as a min-heap (closest, smallest-id first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MinCandidate(Candidate);

impl PartialOrd for MinCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

/// Multi-layer proximity graph supporting insertion, approximate k-NN
/// search, and lazy deletion, with a self-describing binary codec.
#[derive(Debug)]
pub struct HnswIndex {
    dim: usize,
    metric: DistanceMetric,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    level_multiplier: f64,
    nodes: HashMap<i64, Node>,
    deleted: HashSet<i64>,
    entry_point: Option<i64>,
    max_level: usize,
    rng: StdRng,
}

impl HnswIndex {
    /// Creates an empty index, seeded deterministically.
    pub fn new(dim: usize, metric: DistanceMetric, config: HnswConfig) -> Result<Self> {
        Self::with_seed(dim, metric, config, DEFAULT_SEED)
    }

    /// Creates an empty index with an explicit level-assignment seed.
    pub fn with_seed(dim: usize, metric: DistanceMetric, config: HnswConfig, seed: u64) -> Result<Self> {
        if dim < 1 {
            return Err(Error::InvalidArgument("dimension must be >= 1".into()));
        }
        if config.m < 1 {
            return Err(Error::InvalidArgument("m must be >= 1".into()));
        }
        Ok(Self {
            dim,
            metric,
            m: config.m,
            m_max0: config.m_max0,
            ef_construction: config.ef_construction,
            level_multiplier: 1.0 / (config.m as f64).ln(),
            nodes: HashMap::new(),
            deleted: HashSet::new(),
            entry_point: None,
            max_level: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Number of live (non-tombstoned) nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn distance_to(&self, query: &[f32], id: i64) -> f32 {
        self.metric.distance(query, &self.nodes[&id].vector)
    }

    /// Floor(-ln(U) / ln(M)) with U uniform on (0, 1]; negative results
    /// clamp to zero.
    fn random_level(&mut self) -> usize {
        let u: f64 = 1.0 - self.rng.random::<f64>(); // (0, 1]
        let level = (-u.ln() * self.level_multiplier).floor();
        if level < 0.0 {
            0
        } else {
            level as usize
        }
    }

    /// Bounded best-first search over a single layer: the primitive shared
    /// by greedy descent (`ef == 1`) and candidate collection during
    /// insertion/query (`ef == ef_construction` / `ef_search`).
    ///
    /// Tombstoned nodes are not filtered here — the graph must stay
    /// navigable through them. Returned candidates are sorted ascending.
    fn search_layer(&self, query: &[f32], entry_points: &[i64], ef: usize, level: usize) -> Vec<Candidate> {
        let mut visited: HashSet<i64> = HashSet::new();
        let mut frontier: BinaryHeap<MinCandidate> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let candidate = Candidate {
                    distance: self.distance_to(query, ep),
                    id: ep,
                };
                frontier.push(MinCandidate(candidate));
                results.push(candidate);
            }
        }

        while let Some(MinCandidate(current)) = frontier.pop() {
            if let Some(&worst) = results.peek() {
                if cmp_distance(current.distance, worst.distance) == Ordering::Greater {
                    break;
                }
            }

            let Some(node) = self.nodes.get(&current.id) else {
                continue;
            };
            if level >= node.neighbors.len() {
                continue;
            }

            for &neighbor_id in &node.neighbors[level] {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let candidate = Candidate {
                    distance: self.distance_to(query, neighbor_id),
                    id: neighbor_id,
                };
                let has_room = results.len() < ef;
                let better_than_worst = results.peek().is_some_and(|&worst| candidate < worst);
                if has_room || better_than_worst {
                    frontier.push(MinCandidate(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_vec();
        out.sort();
        out
    }

    /// Selects the closest `cap` candidates from an already-sorted list.
    fn select_closest(candidates: &[Candidate], cap: usize) -> Vec<Candidate> {
        candidates.iter().copied().take(cap).collect()
    }

    fn cap_for_level(&self, level: usize) -> usize {
        if level == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    /// Inserts a new node into the graph.
    pub fn add(&mut self, id: i64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateId(id as u64));
        }

        let level = self.random_level();
        let mut node = Node {
            vector: vector.to_vec(),
            level,
            neighbors: vec![Vec::new(); level + 1],
        };

        let Some(entry_id) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            self.nodes.insert(id, node);
            return Ok(());
        };

        // Greedy descent: one best-improvement walk per layer above `level`.
        let mut current = entry_id;
        for lc in (level + 1..=self.max_level).rev() {
            if let Some(best) = self.search_layer(vector, &[current], 1, lc).into_iter().next() {
                current = best.id;
            }
        }

        // Bounded best-first construction from `level` down to 0.
        let mut entry_points = vec![current];
        for lc in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(vector, &entry_points, self.ef_construction, lc);
            let cap = self.cap_for_level(lc);
            let selected = Self::select_closest(&candidates, cap);

            for candidate in &selected {
                node.neighbors[lc].push(candidate.id);
            }

            for candidate in &selected {
                self.link_back(id, candidate.id, lc);
            }

            if let Some(closest) = candidates.first() {
                entry_points = vec![closest.id];
                current = closest.id;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }

        self.nodes.insert(id, node);
        Ok(())
    }

    /// Adds the reciprocal edge `neighbor_id -> id` at `level`, pruning
    /// `neighbor_id`'s adjacency at that level back down to its cap if the
    /// new edge pushed it over.
    fn link_back(&mut self, id: i64, neighbor_id: i64, level: usize) {
        let Some(neighbor) = self.nodes.get_mut(&neighbor_id) else {
            return;
        };
        if level >= neighbor.neighbors.len() || neighbor.neighbors[level].contains(&id) {
            return;
        }
        neighbor.neighbors[level].push(id);

        let cap = self.cap_for_level(level);
        if self.nodes[&neighbor_id].neighbors[level].len() <= cap {
            return;
        }

        let neighbor_vector = self.nodes[&neighbor_id].vector.clone();
        let neighbor_adjacency = self.nodes[&neighbor_id].neighbors[level].clone();
        let mut rescored: Vec<Candidate> = neighbor_adjacency
            .iter()
            .map(|&nid| Candidate {
                distance: self.distance_to(&neighbor_vector, nid),
                id: nid,
            })
            .collect();
        rescored.sort();
        let kept: Vec<i64> = rescored.into_iter().take(cap).map(|c| c.id).collect();

        if let Some(neighbor) = self.nodes.get_mut(&neighbor_id) {
            neighbor.neighbors[level] = kept;
        }
    }

    /// Approximate k-NN search. Excludes tombstoned ids. Returns at most
    /// `k` pairs of `(internal_id, distance)` sorted by distance ascending.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(i64, f32)>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k < 1 {
            return Err(Error::InvalidArgument("k must be >= 1".into()));
        }

        let Some(entry_id) = self.entry_point else {
            return Ok(Vec::new());
        };

        let mut current = entry_id;
        for lc in (1..=self.max_level).rev() {
            if let Some(best) = self.search_layer(query, &[current], 1, lc).into_iter().next() {
                current = best.id;
            }
        }

        let ef = ef_search.max(k);
        let candidates = self.search_layer(query, &[current], ef, 0);

        Ok(candidates
            .into_iter()
            .filter(|c| !self.deleted.contains(&c.id))
            .take(k)
            .map(|c| (c.id, c.distance))
            .collect())
    }

    /// Marks `id` as deleted. Idempotent; returns whether it was live
    /// before the call. The node stays in the graph as a routing vertex.
    pub fn remove(&mut self, id: i64) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }
        self.deleted.insert(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(metric: DistanceMetric) -> HnswIndex {
        HnswIndex::new(3, metric, HnswConfig::new(16, 200)).unwrap()
    }

    #[test]
    fn empty_index_search_returns_empty() {
        let idx = index(DistanceMetric::L2);
        assert_eq!(idx.search(&[0.0, 0.0, 0.0], 5, 50).unwrap(), Vec::new());
    }

    #[test]
    fn insert_then_search_finds_exact_match_first_under_l2() {
        let mut idx = index(DistanceMetric::L2);
        idx.add(1, &[1.0, 0.0, 0.0]).unwrap();
        idx.add(2, &[0.0, 1.0, 0.0]).unwrap();
        idx.add(3, &[0.0, 0.0, 1.0]).unwrap();

        let results = idx.search(&[1.0, 0.0, 0.0], 1, 50).unwrap();
        assert_eq!(results[0], (1, 0.0));
    }

    #[test]
    fn insert_rejects_wrong_dimension() {
        let mut idx = index(DistanceMetric::L2);
        let err = idx.add(1, &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn insert_rejects_duplicate_internal_id() {
        let mut idx = index(DistanceMetric::L2);
        idx.add(1, &[1.0, 0.0, 0.0]).unwrap();
        let err = idx.add(1, &[0.0, 1.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(1)));
    }

    #[test]
    fn search_rejects_k_zero() {
        let mut idx = index(DistanceMetric::L2);
        idx.add(1, &[1.0, 0.0, 0.0]).unwrap();
        let err = idx.search(&[1.0, 0.0, 0.0], 0, 50).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn remove_is_idempotent_and_filters_search() {
        let mut idx = index(DistanceMetric::L2);
        for i in 1..=10i64 {
            idx.add(i, &[i as f32, 0.0, 0.0]).unwrap();
        }
        assert!(idx.remove(1));
        assert!(!idx.remove(1));
        assert_eq!(idx.len(), 9);

        let results = idx.search(&[1.0, 0.0, 0.0], 10, 200).unwrap();
        assert!(results.iter().all(|(id, _)| *id != 1));
    }

    #[test]
    fn search_results_sorted_ascending_with_no_duplicates() {
        let mut idx = index(DistanceMetric::L2);
        for i in 0..50i64 {
            idx.add(i, &[i as f32, (i % 7) as f32, (i % 3) as f32]).unwrap();
        }
        let results = idx.search(&[10.0, 2.0, 1.0], 10, 100).unwrap();
        assert!(results.len() <= 10);
        for w in results.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
        let mut ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
    }

    #[test]
    fn recall_against_brute_force_is_high_on_random_unit_vectors() {
        let mut rng = StdRng::seed_from_u64(42);
        let dim = 128;
        let n = 1000;
        let mut vectors = Vec::with_capacity(n);
        for _ in 0..n {
            let mut v: Vec<f32> = (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            for x in v.iter_mut() {
                *x /= norm;
            }
            vectors.push(v);
        }

        let mut idx = HnswIndex::new(dim, DistanceMetric::L2, HnswConfig::new(16, 200)).unwrap();
        for (i, v) in vectors.iter().enumerate() {
            idx.add(i as i64, v).unwrap();
        }

        let query = &vectors[0];
        let approx: HashSet<i64> = idx.search(query, 10, 50).unwrap().into_iter().map(|(id, _)| id).collect();

        let mut brute: Vec<(i64, f32)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64, DistanceMetric::L2.distance(query, v)))
            .collect();
        brute.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let truth: HashSet<i64> = brute.into_iter().take(10).map(|(id, _)| id).collect();

        let hits = approx.intersection(&truth).count();
        assert!(hits as f32 / 10.0 >= 0.95, "recall too low: {hits}/10");
    }

    #[test]
    fn serialize_deserialize_round_trips_queries() {
        let mut idx = index(DistanceMetric::Cosine);
        for i in 0..30i64 {
            idx.add(i, &[i as f32, (i * 2) as f32, 1.0]).unwrap();
        }
        idx.remove(5);

        let bytes = idx.serialize();
        let restored = HnswIndex::deserialize(&bytes).unwrap();

        let query = [3.0, 5.0, 1.0];
        assert_eq!(
            idx.search(&query, 10, 50).unwrap(),
            restored.search(&query, 10, 50).unwrap()
        );
        assert_eq!(idx.len(), restored.len());
    }
}
