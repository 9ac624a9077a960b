//! Hybrid retrieval: fuse semantic and keyword rankings into one list.
//!
//! Both sources over-fetch `2k` candidates. Vector distances become
//! similarities relative to the worst candidate, keyword scores are scaled
//! by the best one, and each chunk's final score is
//! `alpha * vector + (1 - alpha) * keyword`.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use crate::{
    chunking::Chunk,
    error::{Error, Result},
    keyword_index::KeywordIndex,
    vector_store::VectorStore,
};

/// Characters of chunk text used to recognise the same chunk in both
/// candidate lists. Distinct chunks sharing this prefix are merged.
pub const IDENTITY_PREFIX_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Both signals, weighted by alpha.
    Hybrid,
    /// Semantic signal only (alpha forced to 1).
    VectorOnly,
}

/// A fused result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
    /// Normalized vector similarity in `[0, 1]`, 0 if not a vector hit.
    pub vector_score: f64,
    /// Normalized keyword score in `(0, 1]`, 0 if not a keyword hit.
    pub keyword_score: f64,
}

pub struct HybridRetriever {
    vector: Option<Arc<dyn VectorStore>>,
    keyword: Option<Arc<KeywordIndex>>,
    alpha: f64,
    mode: RetrievalMode,
}

impl HybridRetriever {
    pub fn new(
        vector: Option<Arc<dyn VectorStore>>,
        keyword: Option<Arc<KeywordIndex>>,
        alpha: f64,
        mode: RetrievalMode,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::Config(format!(
                "hybrid alpha must be between 0 and 1, got {alpha}"
            )));
        }
        Ok(Self {
            vector,
            keyword,
            alpha,
            mode,
        })
    }

    pub fn alpha(&self) -> f64 {
        match self.mode {
            RetrievalMode::Hybrid => self.alpha,
            RetrievalMode::VectorOnly => 1.0,
        }
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn has_vector(&self) -> bool {
        self.vector.is_some()
    }

    pub fn has_keyword(&self) -> bool {
        self.keyword.is_some()
    }

    /// Retrieve the top `k` chunks for `query`.
    ///
    /// Never fails because one signal is missing: an absent vector store or
    /// a failed query embedding leaves only keyword scores, an absent
    /// keyword index leaves only vector scores.
    pub fn retrieve(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        if k == 0 {
            return Vec::new();
        }
        let fetch = k.saturating_mul(2);

        let vector_hits = self.vector.as_ref().and_then(|store| {
            match store.similarity_search(query, fetch) {
                Ok(hits) => Some(hits),
                Err(e) => {
                    tracing::warn!(
                        "semantic retrieval unavailable, using keywords only: {e}"
                    );
                    None
                }
            }
        });

        let mut alpha = self.alpha();
        let use_keywords = match self.mode {
            RetrievalMode::Hybrid => true,
            // Fall back to keywords when the only requested signal is gone.
            RetrievalMode::VectorOnly if vector_hits.is_none() => {
                alpha = 0.0;
                true
            }
            RetrievalMode::VectorOnly => false,
        };
        let keyword_hits = match &self.keyword {
            Some(index) if use_keywords => index.search(query, fetch),
            _ => Vec::new(),
        };

        let results = fuse(
            vector_hits.as_deref().unwrap_or_default(),
            &keyword_hits,
            alpha,
            k,
        );
        tracing::debug!(
            query,
            k,
            vector = vector_hits.as_ref().map(Vec::len),
            keyword = keyword_hits.len(),
            returned = results.len(),
            "retrieved"
        );
        results
    }
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("alpha", &self.alpha)
            .field("mode", &self.mode)
            .field("vector", &self.vector.is_some())
            .field("keyword", &self.keyword.is_some())
            .finish()
    }
}

fn identity_key(chunk: &Chunk) -> String {
    chunk.text.chars().take(IDENTITY_PREFIX_CHARS).collect()
}

/// Fuse raw vector distances and keyword scores.
///
/// Candidates are merged on their text prefix. A later duplicate in the
/// same list replaces the earlier one; equal final scores keep first-seen
/// order.
pub fn fuse(
    vector_hits: &[(Chunk, f32)],
    keyword_hits: &[(Chunk, f64)],
    alpha: f64,
    k: usize,
) -> Vec<ScoredChunk> {
    let mut merged: Vec<ScoredChunk> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    let max_distance = vector_hits
        .iter()
        .map(|(_, d)| f64::from(*d))
        .fold(f64::NEG_INFINITY, f64::max);
    for (chunk, distance) in vector_hits {
        let similarity = if max_distance > 0.0 {
            (1.0 - f64::from(*distance) / max_distance).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let key = identity_key(chunk);
        match by_key.get(&key) {
            Some(&i) => {
                merged[i].chunk = chunk.clone();
                merged[i].vector_score = similarity;
            }
            None => {
                by_key.insert(key, merged.len());
                merged.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score: 0.0,
                    vector_score: similarity,
                    keyword_score: 0.0,
                });
            }
        }
    }

    let max_score = keyword_hits
        .iter()
        .map(|(_, s)| *s)
        .filter(|s| *s > 0.0)
        .fold(0.0, f64::max);
    for (chunk, score) in keyword_hits {
        if *score <= 0.0 {
            continue;
        }
        let normalized = score / max_score;
        let key = identity_key(chunk);
        match by_key.get(&key) {
            Some(&i) => merged[i].keyword_score = normalized,
            None => {
                by_key.insert(key, merged.len());
                merged.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score: 0.0,
                    vector_score: 0.0,
                    keyword_score: normalized,
                });
            }
        }
    }

    for hit in &mut merged {
        hit.score = alpha * hit.vector_score + (1.0 - alpha) * hit.keyword_score;
    }
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(k);
    merged
}
