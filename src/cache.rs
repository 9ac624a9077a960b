//! Cached retrieval state and its invalidation.
//!
//! A [`Snapshot`] bundles everything a query needs: the vector store, the
//! keyword index and the retriever built over them. Snapshots are
//! immutable and shared through `Arc`, so queries only hold a read lock
//! long enough to clone the pointer.
//!
//! A snapshot is valid while two things hold: the live configuration
//! fingerprint equals the one it was built under, and the cache generation
//! has not moved since. Every mutation of the on-disk indexes bumps the
//! generation; a configuration change shows up as fingerprint drift. Either
//! way the next query rebuilds every field from disk.
//!
//! Only one process may use an index directory at a time; nothing here
//! coordinates across processes.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::{
    chunking::{ChunkingConfig, RecursiveSplitter},
    config::{Fingerprint, Settings},
    config_db::ConfigDb,
    embedding::EmbeddingBackend,
    error::{Error, Result},
    keyword_index::KeywordIndex,
    loader,
    retriever::{HybridRetriever, RetrievalMode},
    vector_store::{FlatVectorStore, VectorStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing has been built yet.
    Cold,
    /// The cached snapshot matches the live fingerprint and generation.
    Warm,
    /// A snapshot was built before but is no longer valid.
    Stale,
}

/// The answer-generation model a snapshot was configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatModel {
    pub model: String,
    pub host: String,
}

impl ChatModel {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.chat_model.clone(),
            host: settings.ollama_host.clone(),
        }
    }
}

pub struct Snapshot {
    pub fingerprint: Fingerprint,
    pub generation: u64,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub keyword_index: Option<Arc<KeywordIndex>>,
    pub retriever: HybridRetriever,
    pub chat_model: ChatModel,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("fingerprint", &self.fingerprint)
            .field("generation", &self.generation)
            .field("vector_store", &self.vector_store.is_some())
            .field("keyword_index", &self.keyword_index.is_some())
            .field("retriever", &self.retriever)
            .field("chat_model", &self.chat_model)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct IndexCache {
    current: RwLock<Option<Arc<Snapshot>>>,
    generation: AtomicU64,
    mutation: Mutex<()>,
    built: AtomicBool,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self, fingerprint: &Fingerprint) -> CacheState {
        if self.warm(fingerprint).is_some() {
            CacheState::Warm
        } else if self.built.load(Ordering::SeqCst) {
            CacheState::Stale
        } else {
            CacheState::Cold
        }
    }

    fn warm(&self, fingerprint: &Fingerprint) -> Option<Arc<Snapshot>> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current
            .as_ref()
            .filter(|s| {
                &s.fingerprint == fingerprint && s.generation == self.generation()
            })
            .cloned()
    }

    /// Return a valid snapshot for `settings`, building one with `build`
    /// if the cache is cold or stale.
    ///
    /// `build` receives the generation the snapshot will belong to and
    /// runs under the mutation lock, so it never observes a half-written
    /// index. Must not be called while holding [`IndexCache::lock`].
    pub fn snapshot<F>(&self, settings: &Settings, build: F) -> Result<Arc<Snapshot>>
    where
        F: FnOnce(u64) -> Result<Snapshot>,
    {
        let fingerprint = settings.fingerprint();
        if let Some(snapshot) = self.warm(&fingerprint) {
            return Ok(snapshot);
        }

        let _guard = self.lock()?;
        if let Some(snapshot) = self.warm(&fingerprint) {
            return Ok(snapshot);
        }

        let generation = self.generation();
        tracing::debug!(generation, "building index snapshot");
        let snapshot = Arc::new(build(generation)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&snapshot));
        self.built.store(true, Ordering::SeqCst);
        Ok(snapshot)
    }

    /// Mark every cached snapshot stale.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!(generation, "index cache invalidated");
    }

    /// The single guard for index mutation. Ingestion, removal and clearing
    /// hold it across their whole fit, save and invalidate sequence.
    pub fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.mutation
            .lock()
            .map_err(|_| Error::LockPoisoned("index mutation"))
    }
}

/// Build a snapshot from the index directory named by `settings`.
///
/// A missing keyword file yields a semantic-only snapshot and a missing
/// vector store a keyword-only one. A corrupt keyword file is rebuilt from
/// the ingest history when any of the recorded files can still be loaded.
pub fn load_snapshot(
    settings: &Settings,
    generation: u64,
    backend: &dyn EmbeddingBackend,
    history: &ConfigDb,
) -> Result<Snapshot> {
    let keyword_file = settings.keyword_index_file();
    let keyword_index = match KeywordIndex::try_load(&keyword_file) {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!("{e}; rebuilding from ingest history");
            rebuild_keyword_index(settings, history)?
        }
    };

    let vector_store: Option<Arc<dyn VectorStore>> =
        match backend.embedder(&settings.embed_model, &settings.ollama_host) {
            Ok(embedder) => FlatVectorStore::load(&settings.index_path, embedder)
                .map(|store| Arc::new(store) as Arc<dyn VectorStore>),
            Err(e) => {
                tracing::warn!("embedding backend unavailable: {e}");
                None
            }
        };

    let keyword_index = keyword_index.map(Arc::new);
    let mode = if settings.use_hybrid_search {
        RetrievalMode::Hybrid
    } else {
        RetrievalMode::VectorOnly
    };
    let retriever = HybridRetriever::new(
        vector_store.clone(),
        keyword_index.clone(),
        settings.hybrid_alpha,
        mode,
    )?;

    tracing::info!(
        generation,
        vector = vector_store.as_ref().map(|s| s.len()),
        keyword = keyword_index.as_ref().map(|k| k.len()),
        "index snapshot ready"
    );
    Ok(Snapshot {
        fingerprint: settings.fingerprint(),
        generation,
        vector_store,
        keyword_index,
        retriever,
        chat_model: ChatModel::from_settings(settings),
    })
}

pub(crate) fn rebuild_keyword_index(
    settings: &Settings,
    history: &ConfigDb,
) -> Result<Option<KeywordIndex>> {
    let paths: Vec<std::path::PathBuf> = history
        .list_sources()?
        .into_iter()
        .map(|(_, full_path)| full_path.into())
        .collect();
    if paths.is_empty() {
        return Ok(None);
    }

    let splitter = RecursiveSplitter::new(ChunkingConfig::new(
        settings.chunk_size,
        settings.chunk_overlap,
    ));
    let outcome = loader::load_many(&paths, &splitter);
    if outcome.chunks.is_empty() {
        tracing::warn!("no ingested files could be reloaded");
        return Ok(None);
    }

    let index = KeywordIndex::from_chunks(outcome.chunks);
    if let Err(e) = index.save(&settings.keyword_index_file()) {
        tracing::warn!("could not save rebuilt keyword index: {e}");
    }
    tracing::info!(
        files = outcome.loaded.len(),
        chunks = index.len(),
        "keyword index rebuilt"
    );
    Ok(Some(index))
}
