//! docfuse - hybrid keyword + semantic retrieval over local documents.
//!
//! Documents (text, markdown, PDF, CSV and Office files) are split into
//! overlapping chunks and indexed twice: in a BM25 keyword index built from
//! scratch, and in a vector store fed by an embedding service. Queries fuse
//! both rankings with a weighted sum and keep working when either signal is
//! missing.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use docfuse::{DataDir, Engine};
//!
//! let engine = Engine::open(DataDir::resolve(None).unwrap()).unwrap();
//! engine.ingest(&[PathBuf::from("notes.md")]).unwrap();
//!
//! for hit in engine.query("borrow checker", 3).unwrap() {
//!     println!("{} (score: {:.3})", hit.source_id, hit.score);
//! }
//! ```

pub mod cache;
pub mod chunking;
pub mod config;
pub mod config_db;
pub mod data_dir;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ingestion;
pub mod keyword_index;
pub mod loader;
mod ooxml;
pub mod retriever;
pub mod tasks;
pub mod vector_store;

pub use chunking::{Chunk, ChunkingConfig, RecursiveSplitter};
pub use config::Settings;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use embedding::{Embedder, EmbeddingBackend, OllamaBackend};
pub use engine::{Engine, IndexStats, QueryHit};
pub use error::{Error, Result};
pub use ingestion::IngestReport;
pub use keyword_index::KeywordIndex;
pub use retriever::{HybridRetriever, RetrievalMode, ScoredChunk};
pub use vector_store::{FlatVectorStore, VectorStore};
