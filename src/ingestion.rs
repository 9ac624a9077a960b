//! Index mutation: ingest, remove and clear.
//!
//! Every operation here runs under the cache's mutation lock, works on
//! index state loaded fresh from disk (never on a cached snapshot), persists
//! the result and then invalidates the cache. The cache is invalidated even
//! when a step fails, since earlier steps may already have hit the disk.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{
    cache::{self, IndexCache},
    chunking::{Chunk, ChunkingConfig, RecursiveSplitter},
    config::Settings,
    config_db::ConfigDb,
    embedding::EmbeddingBackend,
    error::Result,
    keyword_index::KeywordIndex,
    loader,
    vector_store::{FlatVectorStore, VectorStore},
};

/// Outcome of an ingestion request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Files that contributed chunks.
    pub succeeded: Vec<PathBuf>,
    /// Files that could not be loaded, with the reason.
    pub failed: Vec<(PathBuf, String)>,
    pub chunks_added: usize,
    /// Non-fatal problems, such as the semantic index not being updated.
    pub warnings: Vec<String>,
    pub message: String,
    pub success: bool,
}

/// Shared dependencies of the mutating operations.
pub struct IndexContext<'a> {
    pub settings: &'a Settings,
    pub cache: &'a IndexCache,
    pub backend: &'a dyn EmbeddingBackend,
    pub history: &'a ConfigDb,
}

/// Load, chunk and index `paths` into both indexes.
///
/// Load failures are itemized in the report. A batch with no loadable
/// content changes nothing and reports `success = false`. If embedding
/// fails the keyword index is still updated and the failure is reported as
/// a warning.
pub fn ingest_files(
    ctx: &IndexContext<'_>,
    paths: &[PathBuf],
) -> Result<IngestReport> {
    let settings = ctx.settings;
    let splitter = RecursiveSplitter::new(ChunkingConfig::new(
        settings.chunk_size,
        settings.chunk_overlap,
    ));
    let outcome = loader::load_many(paths, &splitter);

    let mut report = IngestReport {
        succeeded: outcome.loaded,
        failed: outcome.failed,
        ..Default::default()
    };

    if outcome.chunks.is_empty() {
        report.message = if report.failed.is_empty() {
            "No valid content found in the uploaded files.".to_string()
        } else {
            format!("Failed to load files:\n{}", failure_lines(&report.failed))
        };
        tracing::warn!(failed = report.failed.len(), "nothing to ingest");
        return Ok(report);
    }

    let _guard = ctx.cache.lock()?;
    let written = write_chunks(ctx, outcome.chunks, &mut report);
    ctx.cache.invalidate();
    written?;

    report.success = true;
    report.message =
        format!("Success! Indexed {} files.", report.succeeded.len());
    if !report.failed.is_empty() {
        report.message.push_str(&format!(
            "\nWarning: Some files failed:\n{}",
            failure_lines(&report.failed)
        ));
    }
    for warning in &report.warnings {
        report.message.push_str(&format!("\nWarning: {warning}"));
    }

    tracing::info!(
        files = report.succeeded.len(),
        chunks = report.chunks_added,
        failed = report.failed.len(),
        "ingestion complete"
    );
    Ok(report)
}

/// Remove every chunk of `source_id` from both indexes and the ingest
/// history. Returns whether anything was removed.
///
/// Vectors are removed even when the store on disk was written under a
/// different embedding model than the one currently configured.
pub fn remove_source(ctx: &IndexContext<'_>, source_id: &str) -> Result<bool> {
    let _guard = ctx.cache.lock()?;
    let removed = purge_source(ctx, source_id);
    ctx.cache.invalidate();
    removed
}

/// Delete the whole index directory and the ingest history.
pub fn clear_index(ctx: &IndexContext<'_>) -> Result<()> {
    let _guard = ctx.cache.lock()?;
    let cleared = remove_index_files(ctx);
    ctx.cache.invalidate();
    cleared?;
    tracing::info!(dir = %ctx.settings.index_path.display(), "index cleared");
    Ok(())
}

fn remove_index_files(ctx: &IndexContext<'_>) -> Result<()> {
    let dir = &ctx.settings.index_path;
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    ctx.history.clear_sources()
}

/// Vectors, then keywords, then history. Runs under the mutation lock.
fn write_chunks(
    ctx: &IndexContext<'_>,
    chunks: Vec<Chunk>,
    report: &mut IngestReport,
) -> Result<()> {
    let settings = ctx.settings;
    if let Err(e) = add_vectors(settings, ctx.backend, chunks.clone()) {
        tracing::warn!("semantic index not updated: {e}");
        report
            .warnings
            .push(format!("Semantic index not updated: {e}"));
    }

    let mut keyword_index = load_keyword_index(settings, ctx.history)?;
    report.chunks_added = chunks.len();
    keyword_index.extend(chunks);
    keyword_index.save(&settings.keyword_index_file())?;

    let entries: Vec<(String, String)> = report
        .succeeded
        .iter()
        .map(|p| (source_id(p), p.to_string_lossy().into_owned()))
        .collect();
    ctx.history.batch_record_sources(&entries)
}

fn purge_source(ctx: &IndexContext<'_>, source_id: &str) -> Result<bool> {
    let settings = ctx.settings;
    let mut removed = match remove_vectors(settings, ctx.backend, source_id) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("vector store not updated: {e}");
            0
        }
    };

    let mut keyword_index = load_keyword_index(settings, ctx.history)?;
    let n = keyword_index.remove_source(source_id);
    if n > 0 {
        keyword_index.save(&settings.keyword_index_file())?;
        removed += n;
    }

    let in_history = ctx.history.remove_source(source_id)?;
    tracing::info!(source_id, chunks = removed, "source removed");
    Ok(removed > 0 || in_history)
}

/// Delete `source_id` from the vector store. A store the configured model
/// cannot open is edited in place on disk.
fn remove_vectors(
    settings: &Settings,
    backend: &dyn EmbeddingBackend,
    source_id: &str,
) -> Result<usize> {
    let dir = &settings.index_path;
    let loaded = backend
        .embedder(&settings.embed_model, &settings.ollama_host)
        .ok()
        .and_then(|embedder| FlatVectorStore::load(dir, embedder));
    match loaded {
        Some(mut store) => {
            let n = store.delete_source(source_id);
            if n > 0 {
                store.persist()?;
            }
            Ok(n)
        }
        None => FlatVectorStore::purge_source(dir, source_id),
    }
}

fn add_vectors(
    settings: &Settings,
    backend: &dyn EmbeddingBackend,
    chunks: Vec<Chunk>,
) -> Result<usize> {
    let embedder =
        backend.embedder(&settings.embed_model, &settings.ollama_host)?;
    let dir = &settings.index_path;
    let mut store = match FlatVectorStore::load(dir, embedder.clone()) {
        Some(store) => store,
        None => FlatVectorStore::create(dir, embedder),
    };
    let added = store.add(chunks)?;
    store.persist()?;
    Ok(added)
}

/// The current keyword index from disk; a corrupt file is rebuilt from the
/// ingest history, a missing one starts empty.
fn load_keyword_index(
    settings: &Settings,
    history: &ConfigDb,
) -> Result<KeywordIndex> {
    match KeywordIndex::try_load(&settings.keyword_index_file()) {
        Ok(index) => Ok(index.unwrap_or_default()),
        Err(e) => {
            tracing::warn!("{e}; rebuilding from ingest history");
            Ok(cache::rebuild_keyword_index(settings, history)?
                .unwrap_or_default())
        }
    }
}

fn source_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn failure_lines(failed: &[(PathBuf, String)]) -> String {
    failed
        .iter()
        .map(|(path, reason)| format!("{}: {reason}", source_id(path)))
        .collect::<Vec<_>>()
        .join("\n")
}
