//! In-process BM25 keyword index over chunks.
//!
//! The index is rebuilt from scratch on every change to its document set:
//! document frequencies and IDF depend on the whole corpus, so adding or
//! removing chunks refits everything. That refit is linear in the corpus
//! size and is the main cost of ingestion.
//!
//! On disk the index is a single file: a 4-byte magic, a little-endian
//! `u32` schema version, then a JSON body carrying the chunks and all
//! derived statistics.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
};

/// File name of the keyword index inside the index directory.
pub const INDEX_FILE_NAME: &str = "keyword.idx";

const MAGIC: &[u8; 4] = b"DFKW";
const SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_K1: f64 = 1.5;
pub const DEFAULT_B: f64 = 0.75;

/// Lowercase the text and return its runs of alphanumeric characters and
/// underscores.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordIndex {
    k1: f64,
    b: f64,
    chunks: Vec<Chunk>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
    doc_freqs: HashMap<String, usize>,
    idf: HashMap<String, f64>,
    term_freqs: Vec<HashMap<String, u32>>,
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::with_params(DEFAULT_K1, DEFAULT_B)
    }
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            chunks: Vec::new(),
            doc_lengths: Vec::new(),
            avg_doc_length: 0.0,
            doc_freqs: HashMap::new(),
            idf: HashMap::new(),
            term_freqs: Vec::new(),
        }
    }

    /// Build a fitted index in one step.
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let mut index = Self::new();
        index.fit(chunks);
        index
    }

    /// Replace the document set and recompute every statistic.
    ///
    /// Nothing from a previous fit survives; document frequencies are
    /// counted fresh over `chunks`.
    pub fn fit(&mut self, chunks: Vec<Chunk>) {
        let mut doc_lengths = Vec::with_capacity(chunks.len());
        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();

        for chunk in &chunks {
            let tokens = tokenize(&chunk.text);
            doc_lengths.push(tokens.len());

            let mut counts: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *counts.entry(token).or_default() += 1;
            }
            for term in counts.keys() {
                *doc_freqs.entry(term.clone()).or_default() += 1;
            }
            term_freqs.push(counts);
        }

        let n = chunks.len() as f64;
        let idf = doc_freqs
            .iter()
            .map(|(term, &df)| {
                let df = df as f64;
                (term.clone(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();

        self.avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f64 / doc_lengths.len() as f64
        };
        self.chunks = chunks;
        self.doc_lengths = doc_lengths;
        self.term_freqs = term_freqs;
        self.doc_freqs = doc_freqs;
        self.idf = idf;

        tracing::debug!(
            chunks = self.chunks.len(),
            terms = self.idf.len(),
            avg_len = self.avg_doc_length,
            "keyword index fitted"
        );
    }

    /// Add chunks to the corpus and refit over the union.
    pub fn extend(&mut self, chunks: impl IntoIterator<Item = Chunk>) {
        let mut all = std::mem::take(&mut self.chunks);
        all.extend(chunks);
        self.fit(all);
    }

    /// Drop every chunk of `source_id` and refit. Returns how many chunks
    /// were removed.
    pub fn remove_source(&mut self, source_id: &str) -> usize {
        let before = self.chunks.len();
        let kept: Vec<Chunk> = std::mem::take(&mut self.chunks)
            .into_iter()
            .filter(|c| c.source_id != source_id)
            .collect();
        let removed = before - kept.len();
        self.fit(kept);
        removed
    }

    /// Rank chunks against `query` with BM25 and return the top `k`.
    ///
    /// Chunks sharing no token with the query are not returned. Ties keep
    /// corpus order.
    pub fn search(&self, query: &str, k: usize) -> Vec<(Chunk, f64)> {
        if self.chunks.is_empty() || k == 0 {
            return Vec::new();
        }
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let avg = if self.avg_doc_length > 0.0 {
            self.avg_doc_length
        } else {
            1.0
        };

        let mut scored: Vec<(usize, f64)> = Vec::new();
        for (i, freqs) in self.term_freqs.iter().enumerate() {
            let doc_len = self.doc_lengths[i] as f64;
            let mut score = 0.0;
            let mut matched = false;

            // Repeated query tokens count once per occurrence.
            for token in &query_tokens {
                let Some(&tf) = freqs.get(token) else {
                    continue;
                };
                matched = true;
                let tf = tf as f64;
                let idf = self.idf.get(token).copied().unwrap_or(0.0);
                let numerator = tf * (self.k1 + 1.0);
                let denominator = tf
                    + self.k1 * (1.0 - self.b + self.b * (doc_len / avg));
                score += idf * (numerator / denominator);
            }

            if matched {
                scored.push((i, score));
            }
        }

        // Stable sort keeps corpus order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(i, score)| (self.chunks[i].clone(), score))
            .collect()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    /// Distinct source ids in first-seen order.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.chunks
            .iter()
            .filter(|c| seen.insert(c.source_id.as_str()))
            .map(|c| c.source_id.clone())
            .collect()
    }

    /// The `n` most characteristic terms of chunk `doc`: terms whose IDF
    /// exceeds `min_idf`, ranked by `tf * idf`.
    pub fn top_terms(
        &self,
        doc: usize,
        n: usize,
        min_idf: f64,
    ) -> Vec<(String, f64)> {
        let Some(freqs) = self.term_freqs.get(doc) else {
            return Vec::new();
        };
        let mut terms: Vec<(String, f64)> = freqs
            .iter()
            .filter_map(|(term, &tf)| {
                let idf = self.idf.get(term).copied()?;
                (idf > min_idf).then(|| (term.clone(), tf as f64 * idf))
            })
            .collect();
        terms.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(n);
        terms
    }

    /// Write the index atomically: a temp file in the same directory is
    /// renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut bytes = Vec::with_capacity(8 + self.chunks.len() * 512);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        serde_json::to_writer(&mut bytes, self)?;

        let tmp = temp_path(path);
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;

        tracing::debug!(
            path = %path.display(),
            chunks = self.chunks.len(),
            bytes = bytes.len(),
            "keyword index saved"
        );
        Ok(())
    }

    /// Load an index, treating a missing or unreadable file alike.
    pub fn load(path: &Path) -> Option<Self> {
        match Self::try_load(path) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("{e}");
                None
            }
        }
    }

    /// Load an index. `Ok(None)` if the file does not exist,
    /// [`Error::IndexCorrupt`] if it exists but cannot be decoded.
    pub fn try_load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let corrupt = |reason: String| Error::IndexCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < 8 || &bytes[..4] != MAGIC {
            return Err(corrupt("bad magic header".into()));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..8]);
        let version = u32::from_le_bytes(version);
        if version != SCHEMA_VERSION {
            return Err(corrupt(format!(
                "unsupported schema version {version} (expected {SCHEMA_VERSION})"
            )));
        }

        let index: Self = serde_json::from_slice(&bytes[8..])
            .map_err(|e| corrupt(e.to_string()))?;
        if index.doc_lengths.len() != index.chunks.len()
            || index.term_freqs.len() != index.chunks.len()
        {
            return Err(corrupt("statistics do not match chunk count".into()));
        }

        tracing::debug!(
            path = %path.display(),
            chunks = index.chunks.len(),
            "keyword index loaded"
        );
        Ok(Some(index))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source_id: source.to_string(),
            full_path: format!("/docs/{source}"),
            segment: 0,
            index: 0,
        }
    }

    fn fruit_index() -> KeywordIndex {
        KeywordIndex::from_chunks(vec![
            chunk("a.txt", "Source: a.txt\n\napples are red"),
            chunk("b.txt", "Source: b.txt\n\noranges are orange"),
        ])
    }

    #[test]
    fn tokenize_lowercases_and_splits_on_non_word() {
        assert_eq!(
            tokenize("Hello, World! snake_case 42x"),
            vec!["hello", "world", "snake_case", "42x"]
        );
        assert_eq!(tokenize("Café naïve"), vec!["café", "naïve"]);
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn apple_query_ranks_apple_chunk_first() {
        let index = fruit_index();
        let results = index.search("apples", 2);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.source_id, "a.txt");
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn idf_matches_formula() {
        let index = fruit_index();
        // "are" appears in both chunks: ln((2 - 2 + 0.5) / 2.5 + 1)
        let expected = (0.5f64 / 2.5 + 1.0).ln();
        assert_eq!(index.idf("are"), Some(expected));
        // "apples" appears in one: ln(1.5 / 1.5 + 1) = ln 2
        assert_eq!(index.idf("apples"), Some(2f64.ln()));
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = KeywordIndex::new();
        assert!(index.search("anything", 5).is_empty());
        assert_eq!(index.avg_doc_length(), 0.0);
    }

    #[test]
    fn empty_query_returns_nothing() {
        assert!(fruit_index().search("  !! ", 5).is_empty());
    }

    #[test]
    fn refit_does_not_leak_previous_corpus() {
        let mut index = fruit_index();
        index.fit(vec![chunk("c.txt", "bananas only")]);

        assert_eq!(index.idf("apples"), None);
        assert_eq!(index.len(), 1);
        // N = 1, df = 1: ln(0.5 / 1.5 + 1)
        assert_eq!(index.idf("bananas"), Some((0.5f64 / 1.5 + 1.0).ln()));
    }

    #[test]
    fn duplicate_ingestion_doubles_chunks_with_consistent_idf() {
        let original = vec![
            chunk("a.txt", "apples are red"),
            chunk("b.txt", "oranges are orange"),
        ];
        let mut index = KeywordIndex::from_chunks(original.clone());
        index.extend(original.clone());

        assert_eq!(index.len(), 4);
        let doubled: Vec<Chunk> =
            original.iter().chain(original.iter()).cloned().collect();
        let fresh = KeywordIndex::from_chunks(doubled);
        assert_eq!(index.idf("apples"), fresh.idf("apples"));
        assert_eq!(index.idf("are"), fresh.idf("are"));
        // df("apples") = 2 of N = 4
        assert_eq!(index.idf("apples"), Some((2.5f64 / 2.5 + 1.0).ln()));
    }

    #[test]
    fn remove_source_purges_all_its_chunks() {
        let mut index = KeywordIndex::from_chunks(vec![
            chunk("a.txt", "apples one"),
            chunk("a.txt", "apples two"),
            chunk("b.txt", "oranges"),
        ]);

        assert_eq!(index.remove_source("a.txt"), 2);
        assert_eq!(index.sources(), vec!["b.txt"]);
        assert!(index.search("apples", 10).is_empty());
        assert_eq!(index.remove_source("a.txt"), 0);
    }

    #[test]
    fn search_truncates_to_k_and_orders_by_score() {
        let index = KeywordIndex::from_chunks(vec![
            chunk("a.txt", "rust"),
            chunk("b.txt", "rust rust rust"),
            chunk("c.txt", "rust and other words that dilute the score"),
            chunk("d.txt", "python"),
        ]);
        let results = index.search("rust", 2);

        assert_eq!(results.len(), 2);
        assert!(results[0].1 >= results[1].1);
        assert_eq!(results[0].0.source_id, "b.txt");
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join(INDEX_FILE_NAME);
        let index = fruit_index();

        index.save(&path).unwrap();
        let loaded = KeywordIndex::load(&path).unwrap();

        assert_eq!(loaded, index);
        assert_eq!(loaded.search("oranges", 3), index.search("oranges", 3));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn load_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(INDEX_FILE_NAME);

        assert!(KeywordIndex::load(&path).is_none());
        assert!(KeywordIndex::try_load(&path).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(INDEX_FILE_NAME);

        std::fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            KeywordIndex::try_load(&path),
            Err(Error::IndexCorrupt { .. })
        ));
        assert!(KeywordIndex::load(&path).is_none());

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(b"{}");
        std::fs::write(&path, bytes).unwrap();
        let err = KeywordIndex::try_load(&path).unwrap_err();
        assert!(err.to_string().contains("schema version 99"));
    }

    #[test]
    fn top_terms_filters_common_terms() {
        let index = KeywordIndex::from_chunks(vec![
            chunk("a.txt", "the kernel scheduler the kernel"),
            chunk("b.txt", "the garden"),
            chunk("c.txt", "the river"),
        ]);
        let terms = index.top_terms(0, 5, 0.5);
        let names: Vec<_> = terms.iter().map(|(t, _)| t.as_str()).collect();

        assert_eq!(names, vec!["kernel", "scheduler"]);
        assert!(index.top_terms(42, 5, 0.5).is_empty());
    }
}
