//! Directory layout, atomic writes, and collection load/save/list/delete.
//!
//! ```text
//! <root>/
//!   metadata.json
//!   collections/
//!     <name>.meta       structured text: version, name, dim, metric, ...
//!     <name>.hnsw       bytes produced by the HNSW binary codec
//!     <name>.vectors    packed binary: header + (user_id, internal_id, vector) records
//! ```
//!
//! Every file this module writes goes through [`write_atomic`]: write a
//! sibling `<file>.tmp`, `fsync` it, then rename it over the target. The
//! rename is the single commit point, so an interruption anywhere else
//! leaves either the previous snapshot or nothing — never a partial file.

use crate::collection::{Collection, CollectionConfig};
use crate::distance::DistanceMetric;
use crate::hnsw::HnswIndex;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const VECTORS_FILE_VERSION: u32 = 1;
const METADATA_VERSION: u32 = 1;
const COLLECTION_META_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct DatabaseMetadata {
    version: u32,
    collections: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionMeta {
    version: u32,
    name: String,
    dim: usize,
    metric: String,
    count: usize,
    next_internal_id: i64,
    m: usize,
    ef_construction: usize,
}

/// Owns a root directory and performs all on-disk I/O for collections.
pub struct Persistence {
    root: PathBuf,
}

impl Persistence {
    /// Opens (creating if necessary) the `collections/` directory under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("collections"))?;
        Ok(Self { root })
    }

    fn collections_dir(&self) -> PathBuf {
        self.root.join("collections")
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.collections_dir().join(format!("{name}.meta"))
    }

    fn hnsw_path(&self, name: &str) -> PathBuf {
        self.collections_dir().join(format!("{name}.hnsw"))
    }

    fn vectors_path(&self, name: &str) -> PathBuf {
        self.collections_dir().join(format!("{name}.vectors"))
    }

    /// Writes `bytes` to `path` via a sibling `.tmp` file, `fsync`, then
    /// `rename` — the sole atomic-write primitive this module uses.
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => format!("{name}.tmp"),
            None => return Err(Error::InvalidArgument("path has no file name".into())),
        };
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Writes `metadata.json`, `<name>.meta`, `<name>.hnsw`, and
    /// `<name>.vectors` for `collection`. Each file commits independently
    /// via its own atomic rename.
    pub fn save_collection(&self, collection: &Collection) -> Result<()> {
        let meta = CollectionMeta {
            version: COLLECTION_META_VERSION,
            name: collection.name().to_string(),
            dim: collection.dim(),
            metric: collection.metric().name().to_string(),
            count: collection.count(),
            next_internal_id: collection.next_internal_id,
            m: collection.m(),
            ef_construction: collection.ef_construction(),
        };

        let meta_json = serde_json::to_vec_pretty(&meta).map_err(|e| Error::Deserialization(e.to_string()))?;
        Self::write_atomic(&self.meta_path(&meta.name), &meta_json)?;

        let hnsw_bytes = collection.index.serialize();
        Self::write_atomic(&self.hnsw_path(&meta.name), &hnsw_bytes)?;

        let vectors_bytes = encode_vectors(collection);
        Self::write_atomic(&self.vectors_path(&meta.name), &vectors_bytes)?;

        tracing::debug!(collection = %meta.name, count = meta.count, "saved collection");
        Ok(())
    }

    /// Loads a collection previously written by [`Persistence::save_collection`].
    ///
    /// Returns `Ok(None)` if the collection's directory or any of its
    /// three files is missing. Returns `Error::Deserialization` for a
    /// corrupt file or a count/dimension mismatch across the three files.
    pub fn load_collection(&self, name: &str) -> Result<Option<Collection>> {
        let meta_path = self.meta_path(name);
        let hnsw_path = self.hnsw_path(name);
        let vectors_path = self.vectors_path(name);

        if !meta_path.exists() || !hnsw_path.exists() || !vectors_path.exists() {
            return Ok(None);
        }

        let meta_bytes = std::fs::read(&meta_path)?;
        let meta: CollectionMeta =
            serde_json::from_slice(&meta_bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
        if meta.version != COLLECTION_META_VERSION {
            return Err(Error::Deserialization(format!(
                "unsupported collection metadata version: {}",
                meta.version
            )));
        }

        let hnsw_bytes = std::fs::read(&hnsw_path)?;
        let index = HnswIndex::deserialize(&hnsw_bytes)?;

        let vectors_bytes = std::fs::read(&vectors_path)?;
        let decoded = decode_vectors(&vectors_bytes, meta.dim)?;

        if decoded.count != meta.count {
            return Err(Error::Deserialization(
                "vector count disagrees between .meta and .vectors".into(),
            ));
        }
        if index.len() != meta.count {
            return Err(Error::Deserialization(
                "vector count disagrees between .meta and .hnsw".into(),
            ));
        }

        let metric = DistanceMetric::parse(&meta.metric)?;
        let config = CollectionConfig {
            name: meta.name,
            dim: meta.dim,
            metric,
            m: meta.m,
            ef_construction: meta.ef_construction,
        };

        Ok(Some(Collection::from_parts(
            config,
            index,
            decoded.user_to_internal,
            decoded.internal_to_user,
            decoded.vectors,
            meta.next_internal_id,
        )))
    }

    /// Removes a collection's three files. Returns whether any existed.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        let paths = [self.meta_path(name), self.hnsw_path(name), self.vectors_path(name)];
        let existed = paths.iter().any(|p| p.exists());
        for path in &paths {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        if existed {
            tracing::debug!(collection = name, "deleted collection");
        }
        Ok(existed)
    }

    /// Enumerates collection names by scanning `collections/` for `.meta` files.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let dir = self.collections_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "meta") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Atomically writes `metadata.json` listing the given collection names.
    pub fn save_metadata(&self, collections: &[String]) -> Result<()> {
        let meta = DatabaseMetadata {
            version: METADATA_VERSION,
            collections: collections.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&meta).map_err(|e| Error::Deserialization(e.to_string()))?;
        Self::write_atomic(&self.root.join("metadata.json"), &bytes)
    }

    /// Reads `metadata.json`, if present.
    pub fn load_metadata(&self) -> Result<Option<Vec<String>>> {
        let path = self.root.join("metadata.json");
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let meta: DatabaseMetadata =
            serde_json::from_slice(&bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
        Ok(Some(meta.collections))
    }
}

struct DecodedVectors {
    user_to_internal: HashMap<u64, i64>,
    internal_to_user: HashMap<i64, u64>,
    vectors: HashMap<u64, Vec<f32>>,
    count: usize,
}

fn encode_vectors(collection: &Collection) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&VECTORS_FILE_VERSION.to_le_bytes());
    buf.extend_from_slice(&(collection.count() as u64).to_le_bytes());
    buf.extend_from_slice(&(collection.dim() as u32).to_le_bytes());

    for (&user_id, &internal_id) in &collection.user_to_internal {
        buf.extend_from_slice(&user_id.to_le_bytes());
        buf.extend_from_slice(&internal_id.to_le_bytes());
        let vector = collection.get(user_id).expect("bijection invariant: live user id has a stored vector");
        for &x in vector {
            buf.extend_from_slice(&x.to_le_bytes());
        }
    }

    buf
}

fn decode_vectors(bytes: &[u8], expected_dim: usize) -> Result<DecodedVectors> {
    let mut pos = 0usize;
    let take = |bytes: &[u8], pos: &mut usize, n: usize| -> Result<&[u8]> {
        if *pos + n > bytes.len() {
            return Err(Error::Deserialization("unexpected end of .vectors data".into()));
        }
        let slice = &bytes[*pos..*pos + n];
        *pos += n;
        Ok(slice)
    };

    let version = u32::from_le_bytes(take(bytes, &mut pos, 4)?.try_into().unwrap());
    if version != VECTORS_FILE_VERSION {
        return Err(Error::Deserialization(format!("unsupported vectors file version: {version}")));
    }
    let count = u64::from_le_bytes(take(bytes, &mut pos, 8)?.try_into().unwrap()) as usize;
    let dim = u32::from_le_bytes(take(bytes, &mut pos, 4)?.try_into().unwrap()) as usize;
    if dim != expected_dim {
        return Err(Error::Deserialization(
            "dimension in .vectors disagrees with .meta".into(),
        ));
    }

    // `count`/`dim` are untrusted header fields from the file on disk.
    // Don't pre-size from them: a corrupted or truncated file can claim an
    // arbitrarily large count with nothing backing it, which would panic
    // with a capacity overflow instead of returning `Deserialization`.
    // `take` already bounds-checks every read against what's actually left.
    let mut user_to_internal = HashMap::new();
    let mut internal_to_user = HashMap::new();
    let mut vectors = HashMap::new();

    for _ in 0..count {
        let user_id = u64::from_le_bytes(take(bytes, &mut pos, 8)?.try_into().unwrap());
        let internal_id = i64::from_le_bytes(take(bytes, &mut pos, 8)?.try_into().unwrap());
        let mut vector = Vec::new();
        for _ in 0..dim {
            let raw = take(bytes, &mut pos, 4)?;
            vector.push(f32::from_le_bytes(raw.try_into().unwrap()));
        }
        user_to_internal.insert(user_id, internal_id);
        internal_to_user.insert(internal_id, user_id);
        vectors.insert(user_id, vector);
    }

    Ok(DecodedVectors {
        user_to_internal,
        internal_to_user,
        vectors,
        count,
    })
}
