//! End-to-end flows through the public `Engine` API with an in-process
//! embedder, so no embedding server is needed.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use docfuse::{
    DataDir, Embedder, EmbeddingBackend, Engine, Error, KeywordIndex, Result,
    Settings, config::keys,
};

const DIM: usize = 64;

/// Bag-of-words embedder: each token hashes into a bucket.
struct BagOfWords {
    model: String,
}

impl Embedder for BagOfWords {
    fn model(&self) -> &str {
        &self.model
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed(t)).collect())
    }
}

fn embed(text: &str) -> Vec<f32> {
    let mut v = vec![0f32; DIM];
    for token in docfuse::keyword_index::tokenize(text) {
        let hash = token
            .bytes()
            .fold(5381u64, |h, b| h.wrapping_mul(33) ^ u64::from(b));
        v[(hash % DIM as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

struct Backend {
    available: bool,
}

impl EmbeddingBackend for Backend {
    fn embedder(&self, model: &str, _host: &str) -> Result<Arc<dyn Embedder>> {
        if !self.available {
            return Err(Error::EmbeddingUnavailable("connection refused".into()));
        }
        Ok(Arc::new(BagOfWords {
            model: model.to_string(),
        }))
    }
}

fn engine(root: &Path, available: bool) -> Engine {
    let data_dir = DataDir::resolve(Some(&root.join("data"))).unwrap();
    Engine::with_backend(data_dir, Arc::new(Backend { available })).unwrap()
}

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn keyword_index(engine: &Engine) -> KeywordIndex {
    let settings: Settings = engine.settings().unwrap();
    KeywordIndex::load(&settings.keyword_index_file()).unwrap()
}

#[test]
fn apple_query_ranks_apple_document_first() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    let a = write(tmp.path(), "a.txt", "apples are red fruit");
    let b = write(tmp.path(), "b.txt", "oranges are orange citrus");

    let report = engine.ingest(&[a, b]).unwrap();
    assert!(report.success, "{}", report.message);

    let hits = engine.query("apples", 2).unwrap();
    assert_eq!(hits[0].source_id, "a.txt");
    assert!(hits[0].score > 0.0);
    assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    if let Some(second) = hits.get(1) {
        assert!(hits[0].score >= second.score);
    }
}

#[test]
fn reingesting_doubles_chunks_and_keeps_idf_consistent() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    let a = write(tmp.path(), "a.txt", "apples are red fruit");
    let b = write(tmp.path(), "b.txt", "oranges are orange citrus");

    engine.ingest(&[a.clone(), b]).unwrap();
    assert_eq!(engine.stats().unwrap().chunk_count, 2);

    engine.ingest(&[a]).unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.chunk_count, 3);
    assert_eq!(stats.distinct_source_count, 2);

    // "apples" now appears in 2 of 3 chunks.
    let index = keyword_index(&engine);
    let expected = ((3.0 - 2.0 + 0.5) / (2.0 + 0.5) + 1.0f64).ln();
    assert!((index.idf("apples").unwrap() - expected).abs() < 1e-12);
}

#[test]
fn removed_source_never_comes_back() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    let a = write(tmp.path(), "a.txt", "apples are red fruit");
    let b = write(tmp.path(), "b.txt", "oranges are orange citrus");
    engine.ingest(&[a, b]).unwrap();

    assert!(engine.remove("a.txt").unwrap());

    for query in ["apples", "red fruit", "oranges", "are"] {
        let hits = engine.query(query, 5).unwrap();
        assert!(hits.iter().all(|h| h.source_id != "a.txt"), "{query}");
    }
    assert_eq!(engine.sources().unwrap(), vec!["b.txt"]);
    assert!(!engine.remove("a.txt").unwrap());
}

#[test]
fn embedding_outage_degrades_to_keywords() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), false);
    let a = write(tmp.path(), "a.txt", "apples are red fruit");
    let b = write(tmp.path(), "b.txt", "oranges are orange citrus");

    let report = engine.ingest(&[a, b]).unwrap();
    assert!(report.success);
    assert_eq!(report.warnings.len(), 1);

    let hits = engine.query("apples", 3).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_id, "a.txt");
    assert!((hits[0].score - 0.5).abs() < 1e-9);

    let stats = engine.stats().unwrap();
    assert!(stats.keyword_available);
    assert!(!stats.vector_available);
}

#[test]
fn vectors_written_earlier_serve_a_later_session() {
    let tmp = tempfile::tempdir().unwrap();
    let a = write(tmp.path(), "a.txt", "apples are red fruit");
    engine(tmp.path(), true).ingest(&[a]).unwrap();

    let engine = engine(tmp.path(), true);
    let stats = engine.stats().unwrap();
    assert!(stats.vector_available);
    assert!(stats.keyword_available);
    assert_eq!(stats.chunk_count, 1);
}

#[test]
fn semantic_only_mode_uses_vectors() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    let a = write(tmp.path(), "a.txt", "apples are red fruit");
    let b = write(tmp.path(), "b.txt", "oranges are orange citrus");
    engine.ingest(&[a, b]).unwrap();

    engine.set_setting(keys::USE_HYBRID_SEARCH, "false").unwrap();
    let hits = engine.query("apples", 2).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.keyword_score == 0.0 && h.score == h.vector_score));
    assert_eq!(hits[0].source_id, "a.txt");
}

#[test]
fn empty_index_returns_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    assert!(engine.query("anything", 5).unwrap().is_empty());
    assert!(engine.sources().unwrap().is_empty());
    assert!(engine.graph(50, 5).unwrap().nodes.is_empty());
}

#[test]
fn failed_batch_leaves_index_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    let bad = write(tmp.path(), "photo.jpg", "binary-ish");
    let empty = write(tmp.path(), "empty.txt", "");

    let report = engine.ingest(&[bad, empty]).unwrap();
    assert!(!report.success);
    assert_eq!(report.failed.len(), 2);
    assert!(report.message.starts_with("Failed to load files:"));
    assert_eq!(engine.stats().unwrap().chunk_count, 0);
}

#[test]
fn clear_then_reingest() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    let a = write(tmp.path(), "a.txt", "apples are red fruit");
    engine.ingest(&[a.clone()]).unwrap();

    engine.clear().unwrap();
    assert_eq!(engine.stats().unwrap().chunk_count, 0);

    engine.ingest(&[a]).unwrap();
    assert_eq!(engine.stats().unwrap().chunk_count, 1);
}

#[test]
fn remove_reaches_vectors_written_under_another_model() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    let a = write(tmp.path(), "a.txt", "apples are red fruit");
    let b = write(tmp.path(), "b.txt", "oranges are orange citrus");
    engine.ingest(&[a, b]).unwrap();

    engine.set_setting(keys::EMBED_MODEL, "other-model").unwrap();
    assert!(engine.remove("a.txt").unwrap());
    engine.reset_settings().unwrap();

    let hits = engine.query("apples", 5).unwrap();
    assert!(hits.iter().all(|h| h.source_id != "a.txt"));
    assert_eq!(engine.sources().unwrap(), vec!["b.txt"]);
    assert!(engine.stats().unwrap().vector_available);
}

#[test]
fn queries_stay_consistent_while_ingesting() {
    const WRITERS: usize = 2;
    const FILES_PER_WRITER: usize = 4;

    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path(), true);
    let batches: Vec<Vec<PathBuf>> = (0..WRITERS)
        .map(|w| {
            (0..FILES_PER_WRITER)
                .map(|i| {
                    write(
                        tmp.path(),
                        &format!("w{w}-{i}.txt"),
                        &format!("shared topic with marker{w}x{i}"),
                    )
                })
                .collect()
        })
        .collect();

    std::thread::scope(|scope| {
        for batch in &batches {
            let engine = &engine;
            scope.spawn(move || {
                for path in batch {
                    let report = engine.ingest(std::slice::from_ref(path)).unwrap();
                    assert!(report.success, "{}", report.message);
                }
            });
        }
        for _ in 0..3 {
            let engine = &engine;
            scope.spawn(move || {
                for _ in 0..20 {
                    let hits = engine.query("shared topic", 3).unwrap();
                    assert!(hits.len() <= 3);
                    let stats = engine.stats().unwrap();
                    assert!(stats.chunk_count <= WRITERS * FILES_PER_WRITER);
                }
            });
        }
    });

    let total = WRITERS * FILES_PER_WRITER;
    let stats = engine.stats().unwrap();
    assert_eq!(stats.chunk_count, total);
    assert_eq!(stats.distinct_source_count, total);
    assert_eq!(keyword_index(&engine).len(), total);
    assert_eq!(engine.sources().unwrap().len(), total);
}
