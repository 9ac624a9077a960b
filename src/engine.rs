//! The public facade over the index: ingest, query, remove and inspect.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;

use crate::{
    cache::{self, CacheState, IndexCache, Snapshot},
    config::Settings,
    config_db::ConfigDb,
    data_dir::DataDir,
    embedding::{EmbeddingBackend, OllamaBackend},
    error::Result,
    graph::KnowledgeGraph,
    ingestion::{self, IndexContext, IngestReport},
    loader,
    retriever::RetrievalMode,
    tasks::{TaskId, TaskRegistry, TaskState},
};

/// One retrieved chunk, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub text: String,
    pub source_id: String,
    pub full_path: String,
    pub score: f64,
    pub vector_score: f64,
    pub keyword_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub distinct_source_count: usize,
    pub keyword_available: bool,
    pub vector_available: bool,
    pub mode: RetrievalMode,
    pub generation: u64,
}

pub struct Engine {
    data_dir: DataDir,
    config_db: ConfigDb,
    cache: IndexCache,
    backend: Arc<dyn EmbeddingBackend>,
    tasks: TaskRegistry,
}

impl Engine {
    /// Open the engine rooted at `data_dir`, embedding through Ollama.
    pub fn open(data_dir: DataDir) -> Result<Self> {
        Self::with_backend(data_dir, Arc::new(OllamaBackend))
    }

    pub fn with_backend(
        data_dir: DataDir,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        let config_db = ConfigDb::open(&data_dir.config_db())?;
        Ok(Self {
            data_dir,
            config_db,
            cache: IndexCache::new(),
            backend,
            tasks: TaskRegistry::new(),
        })
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// The live settings, re-read from the config database on every call.
    pub fn settings(&self) -> Result<Settings> {
        Settings::load(&self.config_db, &self.data_dir.default_index_dir())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<Settings> {
        let settings = Settings::set(
            &self.config_db,
            &self.data_dir.default_index_dir(),
            key,
            value,
        )?;
        tracing::info!(key, value, "setting updated");
        Ok(settings)
    }

    pub fn reset_settings(&self) -> Result<Settings> {
        Settings::reset(&self.config_db, &self.data_dir.default_index_dir())
    }

    pub fn cache_state(&self) -> Result<CacheState> {
        Ok(self.cache.state(&self.settings()?.fingerprint()))
    }

    /// The current snapshot, rebuilt from disk when the cache is not warm.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let settings = self.settings()?;
        self.cache.snapshot(&settings, |generation| {
            cache::load_snapshot(
                &settings,
                generation,
                self.backend.as_ref(),
                &self.config_db,
            )
        })
    }

    pub fn ingest(&self, paths: &[PathBuf]) -> Result<IngestReport> {
        let settings = self.settings()?;
        ingestion::ingest_files(&self.context(&settings), paths)
    }

    /// Queue an ingestion on the background pool.
    pub fn submit_ingest(self: &Arc<Self>, paths: Vec<PathBuf>) -> TaskId {
        let engine = Arc::clone(self);
        self.tasks.submit(move || engine.ingest(&paths))
    }

    pub fn task_status(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.status(id)
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// The `k` best chunks for `query`. An empty index yields no hits.
    pub fn query(&self, query: &str, k: usize) -> Result<Vec<QueryHit>> {
        let snapshot = self.snapshot()?;
        let hits = snapshot
            .retriever
            .retrieve(query, k)
            .into_iter()
            .map(|hit| QueryHit {
                text: hit.chunk.text,
                source_id: hit.chunk.source_id,
                full_path: hit.chunk.full_path,
                score: hit.score,
                vector_score: hit.vector_score,
                keyword_score: hit.keyword_score,
            })
            .collect();
        Ok(hits)
    }

    pub fn remove(&self, source_id: &str) -> Result<bool> {
        let settings = self.settings()?;
        ingestion::remove_source(&self.context(&settings), source_id)
    }

    pub fn clear(&self) -> Result<()> {
        let settings = self.settings()?;
        ingestion::clear_index(&self.context(&settings))
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let snapshot = self.snapshot()?;
        let chunk_count = match (&snapshot.vector_store, &snapshot.keyword_index)
        {
            (Some(store), _) if !store.is_empty() => store.len(),
            (_, Some(index)) => index.len(),
            (Some(store), None) => store.len(),
            (None, None) => 0,
        };
        Ok(IndexStats {
            chunk_count,
            distinct_source_count: collect_sources(&snapshot).len(),
            keyword_available: snapshot.keyword_index.is_some(),
            vector_available: snapshot.vector_store.is_some(),
            mode: snapshot.retriever.mode(),
            generation: snapshot.generation,
        })
    }

    /// Sorted, de-duplicated source ids present in either index.
    pub fn sources(&self) -> Result<Vec<String>> {
        let snapshot = self.snapshot()?;
        Ok(collect_sources(&snapshot).into_iter().collect())
    }

    /// The plain text the loader would index for `path`.
    pub fn extract_text(&self, path: &Path) -> Result<String> {
        loader::extract_text(path)
    }

    pub fn graph(
        &self,
        max_docs: usize,
        terms_per_doc: usize,
    ) -> Result<KnowledgeGraph> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .keyword_index
            .as_deref()
            .map(|index| KnowledgeGraph::build(index, max_docs, terms_per_doc))
            .unwrap_or_default())
    }

    fn context<'a>(&'a self, settings: &'a Settings) -> IndexContext<'a> {
        IndexContext {
            settings,
            cache: &self.cache,
            backend: self.backend.as_ref(),
            history: &self.config_db,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.data_dir)
            .field("generation", &self.cache.generation())
            .finish_non_exhaustive()
    }
}

fn collect_sources(snapshot: &Snapshot) -> BTreeSet<String> {
    let mut sources = BTreeSet::new();
    if let Some(store) = &snapshot.vector_store {
        sources.extend(store.sources());
    }
    if let Some(index) = &snapshot.keyword_index {
        sources.extend(index.sources());
    }
    sources
}
