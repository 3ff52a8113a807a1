//! Self-describing, versioned little-endian binary format for [`super::HnswIndex`].
//!
//! Header: `u32 version`, `u64 dim`, `u32 metric_len`, `metric_len` bytes of
//! UTF-8 metric name, `u64 m`, `u64 ef_construction`, `i64 entry_point`
//! (`-1` if empty), `i32 max_level`, `u64 node_count`. Then `node_count`
//! records of: `i64 internal_id`, `i32 top_level`, `dim * f32` vector,
//! `u8 tombstone_flag`, then for each level `0..=top_level`:
//! `u32 neighbor_count`, `neighbor_count * i64` neighbor ids.

use super::{HnswIndex, Node};
use crate::distance::DistanceMetric;
use crate::{Error, Result};
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};

const VERSION: u32 = 1;

/// Bounds-checked little-endian reader; any attempt to read past the end
/// of the buffer becomes `Error::Deserialization` instead of a panic.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Deserialization("unexpected end of data".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

impl HnswIndex {
    /// Serializes this index to the binary format documented above.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.dim as u64).to_le_bytes());
        let metric_name = self.metric.name().as_bytes();
        buf.extend_from_slice(&(metric_name.len() as u32).to_le_bytes());
        buf.extend_from_slice(metric_name);
        buf.extend_from_slice(&(self.m as u64).to_le_bytes());
        buf.extend_from_slice(&(self.ef_construction as u64).to_le_bytes());
        buf.extend_from_slice(&self.entry_point.unwrap_or(-1).to_le_bytes());
        buf.extend_from_slice(&(self.max_level as i32).to_le_bytes());
        buf.extend_from_slice(&(self.nodes.len() as u64).to_le_bytes());

        // Sorted by id for a deterministic, diffable byte stream.
        let mut ids: Vec<&i64> = self.nodes.keys().collect();
        ids.sort();

        for &id in ids {
            let node = &self.nodes[id];
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&(node.level as i32).to_le_bytes());
            for &x in &node.vector {
                buf.extend_from_slice(&x.to_le_bytes());
            }
            buf.push(u8::from(self.deleted.contains(id)));
            for level_neighbors in &node.neighbors {
                buf.extend_from_slice(&(level_neighbors.len() as u32).to_le_bytes());
                for neighbor_id in level_neighbors {
                    buf.extend_from_slice(&neighbor_id.to_le_bytes());
                }
            }
        }

        buf
    }

    /// Deserializes an index previously produced by [`HnswIndex::serialize`].
    ///
    /// Fails with `Error::Deserialization` on truncation, an unknown
    /// version, an unknown metric name, or a node whose stored vector
    /// length disagrees with the header's dimension.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);

        let version = r.u32()?;
        if version != VERSION {
            return Err(Error::Deserialization(format!(
                "unsupported hnsw index version: {version}"
            )));
        }

        let dim = r.u64()? as usize;
        let metric_len = r.u32()? as usize;
        let metric_name =
            std::str::from_utf8(r.take(metric_len)?).map_err(|e| Error::Deserialization(e.to_string()))?;
        let metric = DistanceMetric::parse(metric_name)
            .map_err(|_| Error::Deserialization(format!("unknown metric: {metric_name}")))?;
        let m = r.u64()? as usize;
        let ef_construction = r.u64()? as usize;
        let entry_point_raw = r.i64()?;
        let entry_point = if entry_point_raw < 0 {
            None
        } else {
            Some(entry_point_raw)
        };
        let max_level = r.i32()? as usize;
        let node_count = r.u64()? as usize;

        // `node_count`/`dim`/per-level `count` below come straight off the
        // wire. Never pre-size a collection from them: a corrupted header
        // can claim an arbitrarily large count with nothing backing it,
        // which would turn into a capacity-overflow panic or allocator
        // abort instead of a clean `Deserialization` error. Growing as
        // `Reader::take` keeps succeeding bounds every allocation against
        // the bytes actually present.
        let mut nodes = HashMap::new();
        let mut deleted = HashSet::new();

        for _ in 0..node_count {
            let id = r.i64()?;
            let level = r.i32()? as usize;

            let mut vector = Vec::new();
            for _ in 0..dim {
                vector.push(r.f32()?);
            }
            if vector.len() != dim {
                return Err(Error::Deserialization("node vector length disagrees with header dimension".into()));
            }

            if r.u8()? != 0 {
                deleted.insert(id);
            }

            let mut neighbors = Vec::new();
            for _ in 0..=level {
                let count = r.u32()? as usize;
                let mut level_neighbors = Vec::new();
                for _ in 0..count {
                    level_neighbors.push(r.i64()?);
                }
                neighbors.push(level_neighbors);
            }

            nodes.insert(id, Node { vector, level, neighbors });
        }

        Ok(HnswIndex {
            dim,
            metric,
            m,
            m_max0: m * 2,
            ef_construction,
            level_multiplier: 1.0 / (m as f64).ln(),
            nodes,
            deleted,
            entry_point,
            max_level,
            rng: rand::rngs::StdRng::seed_from_u64(super::DEFAULT_SEED),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::HnswConfig;
    use crate::distance::DistanceMetric;
    use crate::hnsw::HnswIndex;
    use crate::Error;

    #[test]
    fn round_trips_empty_index() {
        let idx = HnswIndex::new(4, DistanceMetric::L2, HnswConfig::new(16, 200)).unwrap();
        let restored = HnswIndex::deserialize(&idx.serialize()).unwrap();
        assert_eq!(restored.len(), 0);
        assert!(restored.search(&[0.0, 0.0, 0.0, 0.0], 1, 10).unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_version() {
        let idx = HnswIndex::new(4, DistanceMetric::L2, HnswConfig::new(16, 200)).unwrap();
        let mut bytes = idx.serialize();
        bytes[0..4].copy_from_slice(&2u32.to_le_bytes());
        let err = HnswIndex::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn rejects_truncated_buffer() {
        let mut idx = HnswIndex::new(4, DistanceMetric::L2, HnswConfig::new(16, 200)).unwrap();
        idx.add(1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let bytes = idx.serialize();
        for cut in 0..bytes.len() {
            let truncated = &bytes[..cut];
            // Every prefix short of the full buffer must either fail
            // cleanly or (for very small cuts that only clip header
            // fields we don't read that far into) still be caught by a
            // later bounds check; it must never panic.
            let _ = HnswIndex::deserialize(truncated);
        }
    }

    #[test]
    fn rejects_forged_huge_node_count_without_panicking() {
        // A header that lies about `node_count` (here claiming u64::MAX
        // nodes follow, with nothing actually after the header) must not
        // drive a pre-sized allocation — it must fail with
        // `Deserialization` the moment the first record can't be read.
        let idx = HnswIndex::new(4, DistanceMetric::L2, HnswConfig::new(16, 200)).unwrap();
        let mut bytes = idx.serialize();
        let node_count_offset = bytes.len() - 8;
        bytes[node_count_offset..].copy_from_slice(&u64::MAX.to_le_bytes());
        let err = HnswIndex::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn preserves_tombstones_across_round_trip() {
        let mut idx = HnswIndex::new(3, DistanceMetric::L2, HnswConfig::new(16, 200)).unwrap();
        for i in 0..5i64 {
            idx.add(i, &[i as f32, 0.0, 0.0]).unwrap();
        }
        idx.remove(2);
        let restored = HnswIndex::deserialize(&idx.serialize()).unwrap();
        assert_eq!(restored.len(), 4);
        let results = restored.search(&[2.0, 0.0, 0.0], 5, 50).unwrap();
        assert!(results.iter().all(|(id, _)| *id != 2));
    }

    #[test]
    fn config_default_matches_documented_values() {
        let cfg = HnswConfig::default();
        assert_eq!(cfg.m, 16);
        assert_eq!(cfg.m_max0, 32);
        assert_eq!(cfg.ef_construction, 200);
    }
}
