//! Semantic vector store contract and the bundled flat store.
//!
//! [`FlatVectorStore`] keeps every vector in memory and answers queries by
//! exact nearest-neighbour search. It is persisted to a redb database in
//! the index directory; the database is only opened while loading or
//! persisting, so any number of in-memory copies can exist in one process.
//!
//! Binary format per vector entry:
//! - 4 bytes: dimension D (u32 LE)
//! - D * 4 bytes: f32 values

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    chunking::Chunk,
    embedding::Embedder,
    error::{Error, Result},
};

/// File name of the vector database inside the index directory.
pub const VECTOR_FILE_NAME: &str = "vectors.redb";

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const CHUNKS: TableDefinition<u64, &str> = TableDefinition::new("chunks");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// Operations the retrieval core needs from a semantic store.
pub trait VectorStore: Send + Sync {
    /// Embed and add chunks. Nothing is added if embedding fails.
    fn add(&mut self, chunks: Vec<Chunk>) -> Result<usize>;

    /// Remove every chunk of `source_id`; returns how many were removed.
    fn delete_source(&mut self, source_id: &str) -> usize;

    /// The `k` nearest chunks to `query` with their distances, nearest
    /// first.
    fn similarity_search(&self, query: &str, k: usize)
    -> Result<Vec<(Chunk, f32)>>;

    fn persist(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sources(&self) -> Vec<String>;

    fn model(&self) -> &str;
}

struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

pub struct FlatVectorStore {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    dimension: Option<usize>,
    entries: Vec<Entry>,
}

impl FlatVectorStore {
    /// An empty store bound to `dir` and the embedder's model.
    pub fn create(dir: &Path, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            embedder,
            dimension: None,
            entries: Vec::new(),
        }
    }

    pub fn db_path(dir: &Path) -> PathBuf {
        dir.join(VECTOR_FILE_NAME)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::db_path(dir).is_file()
    }

    /// Load a persisted store.
    ///
    /// Returns `None` if nothing is persisted, the file cannot be read, or
    /// it was written under a different embedding model.
    pub fn load(dir: &Path, embedder: Arc<dyn Embedder>) -> Option<Self> {
        let path = Self::db_path(dir);
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "no vector store on disk");
            return None;
        }
        match Self::read(dir, &path, embedder) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(path = %path.display(), "unreadable vector store: {e}");
                None
            }
        }
    }

    /// Delete every row of `source_id` from the database in `dir`, whatever
    /// model it was written under. Returns how many chunks were removed.
    pub fn purge_source(dir: &Path, source_id: &str) -> Result<usize> {
        let path = Self::db_path(dir);
        if !path.is_file() {
            return Ok(0);
        }
        let db = Database::open(&path)?;
        let txn = db.begin_write()?;
        let removed = {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut ids = Vec::new();
            for row in chunks.iter()? {
                let (id, json) = row?;
                let chunk: Chunk = serde_json::from_str(json.value())?;
                if chunk.source_id == source_id {
                    ids.push(id.value());
                }
            }

            let mut vectors = txn.open_table(VECTORS)?;
            for &id in &ids {
                chunks.remove(id)?;
                vectors.remove(id)?;
            }
            ids.len()
        };
        txn.commit()?;

        tracing::debug!(
            path = %path.display(),
            source_id,
            removed,
            "vector rows purged"
        );
        Ok(removed)
    }

    fn read(
        dir: &Path,
        path: &Path,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Option<Self>> {
        let db = Database::open(path)?;
        let txn = db.begin_read()?;

        let meta = txn.open_table(META)?;
        let stored_model = meta.get("model")?.map(|v| v.value().to_string());
        if stored_model.as_deref() != Some(embedder.model()) {
            tracing::warn!(
                stored = stored_model.as_deref().unwrap_or("<none>"),
                configured = embedder.model(),
                "vector store was built with a different embedding model"
            );
            return Ok(None);
        }
        let dimension = meta
            .get("dimension")?
            .and_then(|v| v.value().parse::<usize>().ok());

        let chunks = txn.open_table(CHUNKS)?;
        let vectors = txn.open_table(VECTORS)?;
        let mut entries = Vec::new();
        for row in chunks.iter()? {
            let (id, json) = row?;
            let chunk: Chunk = serde_json::from_str(json.value())?;
            let Some(bytes) = vectors.get(id.value())? else {
                return Err(corrupt(path, "chunk without vector"));
            };
            let vector = decode_vector(bytes.value())
                .ok_or_else(|| corrupt(path, "malformed vector entry"))?;
            if dimension.is_some_and(|d| d != vector.len()) {
                return Err(corrupt(path, "vector dimension mismatch"));
            }
            entries.push(Entry { chunk, vector });
        }

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "vector store loaded"
        );
        Ok(Some(Self {
            dir: dir.to_path_buf(),
            embedder,
            dimension,
            entries,
        }))
    }
}

fn corrupt(path: &Path, reason: &str) -> Error {
    Error::load(path, reason)
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + vector.len() * 4);
    bytes.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(vector));
    bytes
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != dimension * 4 {
        return None;
    }
    // Copy into an f32 buffer; the stored bytes need not be aligned.
    let mut vector = vec![0f32; dimension];
    bytemuck::cast_slice_mut::<f32, u8>(&mut vector).copy_from_slice(payload);
    Some(vector)
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl VectorStore for FlatVectorStore {
    fn add(&mut self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let dimension = match self.dimension {
            Some(d) => d,
            None => vectors.first().map(Vec::len).unwrap_or_default(),
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedding dimension {} does not match store dimension {dimension}",
                bad.len()
            )));
        }

        self.dimension = Some(dimension);
        let added = chunks.len();
        self.entries.extend(
            chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| Entry { chunk, vector }),
        );
        tracing::debug!(added, total = self.entries.len(), "vectors added");
        Ok(added)
    }

    fn delete_source(&mut self, source_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.chunk.source_id != source_id);
        before - self.entries.len()
    }

    fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Chunk, f32)>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed_query(query)?;
        if self.dimension.is_some_and(|d| d != query_vector.len()) {
            return Err(Error::EmbeddingUnavailable(format!(
                "query embedding has dimension {}",
                query_vector.len()
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, squared_l2(&query_vector, &e.vector)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, d)| (self.entries[i].chunk.clone(), d))
            .collect())
    }

    /// Rewrite the database file with the current contents.
    fn persist(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let db = Database::create(Self::db_path(&self.dir))?;

        let txn = db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(CHUNKS)?;
        {
            let mut meta = txn.open_table(META)?;
            meta.insert("model", self.embedder.model())?;
            let dimension =
                self.dimension.map(|d| d.to_string()).unwrap_or_default();
            meta.insert("dimension", dimension.as_str())?;

            let mut vectors = txn.open_table(VECTORS)?;
            let mut chunks = txn.open_table(CHUNKS)?;
            for (id, entry) in self.entries.iter().enumerate() {
                let json = serde_json::to_string(&entry.chunk)?;
                chunks.insert(id as u64, json.as_str())?;
                vectors.insert(id as u64, encode_vector(&entry.vector).as_slice())?;
            }
        }
        txn.commit()?;

        tracing::debug!(
            dir = %self.dir.display(),
            entries = self.entries.len(),
            "vector store persisted"
        );
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.chunk.source_id.as_str()))
            .map(|e| e.chunk.source_id.clone())
            .collect()
    }

    fn model(&self) -> &str {
        self.embedder.model()
    }
}

impl std::fmt::Debug for FlatVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatVectorStore")
            .field("dir", &self.dir)
            .field("model", &self.embedder.model())
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}
