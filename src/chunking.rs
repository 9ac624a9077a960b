//! Chunking utilities for splitting document segments into overlapping
//! windows.
//!
//! The splitter is recursive: it first tries to cut at paragraph breaks,
//! then line breaks, then sentence ends, then spaces, and only falls back
//! to cutting between arbitrary characters when a piece still does not fit.
//! Sizes are measured in characters, not bytes, so multi-byte text is never
//! cut inside a code point.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Separators in order of preference. The empty separator means "split
/// between characters".
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// A bounded span of document text with source metadata.
///
/// `source_id` is the basename of the originating file and is what removal
/// keys on, so every chunk of one file can be purged together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    pub full_path: String,
    /// Zero-based segment (page, slide, sheet, row) within the file.
    pub segment: usize,
    /// Zero-based chunk index within the segment.
    pub index: usize,
}

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use docfuse::chunking::ChunkingConfig;
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, 1000);
/// assert_eq!(config.overlap, 200);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }
}

/// Recursive character splitter.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    config: ChunkingConfig,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            separators: DEFAULT_SEPARATORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Split text into trimmed, non-empty pieces of at most `chunk_size`
    /// characters (unless a single unsplittable run is longer).
    ///
    /// # Examples
    ///
    /// ```
    /// use docfuse::chunking::{ChunkingConfig, RecursiveSplitter};
    ///
    /// let splitter = RecursiveSplitter::new(ChunkingConfig::default());
    /// let pieces = splitter.split_text("Hello, world!");
    /// assert_eq!(pieces, vec!["Hello, world!".to_string()]);
    ///
    /// let text = "word ".repeat(500);
    /// let pieces = splitter.split_text(&text);
    /// assert!(pieces.len() >= 2);
    /// ```
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split a segment and stamp every piece with its source metadata.
    pub fn split_segment(
        &self,
        text: &str,
        source_id: &str,
        full_path: &str,
        segment: usize,
    ) -> Vec<Chunk> {
        self.split_text(text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                text,
                source_id: source_id.to_string(),
                full_path: full_path.to_string(),
                segment,
                index,
            })
            .collect()
    }

    fn split_recursive(
        &self,
        text: &str,
        separators: &[String],
    ) -> Vec<String> {
        // Pick the first separator present in the text; "" always matches.
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut rest: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep.as_str();
                rest = &separators[i + 1..];
                break;
            }
        }

        let mut output = Vec::new();
        let mut fitting: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.config.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                output.extend(self.merge(&fitting));
                fitting.clear();
            }
            if rest.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    output.push(trimmed.to_string());
                }
            } else {
                output.extend(self.split_recursive(&piece, rest));
            }
        }

        if !fitting.is_empty() {
            output.extend(self.merge(&fitting));
        }
        output
    }

    /// Greedily merge small pieces into chunks, carrying up to `overlap`
    /// characters from the tail of the previous chunk into the next one.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let ChunkingConfig {
            chunk_size,
            overlap,
        } = self.config;

        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);
                while total > overlap
                    || (total + len > chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }
            window.push_back((piece.as_str(), len));
            total += len;
        }
        push_joined(&mut chunks, &window);
        chunks
    }
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(s, _)| *s).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split on `separator`, attaching each separator to the start of the piece
/// that follows it. Empty pieces are dropped.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(text[start..pos].to_string());
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(text[start..].to_string());
    }
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
