//! Document loading: file kind detection, per-kind segment extraction and
//! chunking.
//!
//! Every supported format is reduced to a list of text segments (pages,
//! slides, sheets, rows). Each segment is prefixed with its file name so a
//! keyword search for the file name finds the document, then split into
//! chunks with the recursive splitter.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::{
    chunking::{Chunk, RecursiveSplitter},
    error::{Error, Result},
    ooxml,
};

/// The closed set of document kinds the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Text,
    Markdown,
    Pdf,
    Spreadsheet,
    Presentation,
    WordProcessor,
    Tabular,
}

/// Recognised extensions, lowercase, without the leading dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "txt", "xaml", "md", "markdown", "pdf", "xlsx", "pptx", "docx", "csv",
];

impl FileKind {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let kind = match extension.as_str() {
            "txt" | "xaml" => Self::Text,
            "md" | "markdown" => Self::Markdown,
            "pdf" => Self::Pdf,
            "xlsx" => Self::Spreadsheet,
            "pptx" => Self::Presentation,
            "docx" => Self::WordProcessor,
            "csv" => Self::Tabular,
            _ => {
                return Err(Error::UnsupportedType {
                    extension,
                    supported: SUPPORTED_EXTENSIONS.to_vec(),
                });
            }
        };
        Ok(kind)
    }

    /// Extract the raw text segments of a file of this kind.
    pub fn segments(self, path: &Path) -> Result<Vec<String>> {
        match self {
            Self::Text | Self::Markdown => {
                let bytes = std::fs::read(path)?;
                let text = String::from_utf8(bytes)
                    .map_err(|_| Error::load(path, "file is not valid UTF-8"))?;
                Ok(vec![text])
            }
            Self::Pdf => pdf_pages(path),
            Self::Spreadsheet => ooxml::xlsx_sheets(path),
            Self::Presentation => ooxml::pptx_slides(path),
            Self::WordProcessor => Ok(vec![ooxml::docx_text(path)?]),
            Self::Tabular => {
                let text = std::fs::read_to_string(path)?;
                Ok(csv_rows(&text))
            }
        }
    }
}

fn pdf_pages(path: &Path) -> Result<Vec<String>> {
    let doc = pdf_oxide::PdfDocument::open(path)
        .map_err(|e| Error::load(path, e))?;
    let pages = doc.page_count().map_err(|e| Error::load(path, e))?;

    let mut segments = Vec::with_capacity(pages);
    for page in 0..pages {
        let text = doc
            .extract_text(page)
            .map_err(|e| Error::load(path, format!("page {}: {e}", page + 1)))?;
        if text.trim().is_empty() {
            tracing::debug!(path = %path.display(), page, "skipping empty page");
            continue;
        }
        segments.push(text);
    }
    Ok(segments)
}

/// Render each CSV data row as `header: value` lines.
fn csv_rows(text: &str) -> Vec<String> {
    let mut records = parse_csv(text).into_iter();
    let Some(header) = records.next() else {
        return Vec::new();
    };

    records
        .filter(|row| row.iter().any(|field| !field.trim().is_empty()))
        .map(|row| {
            header
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let value = row.get(i).map(String::as_str).unwrap_or("");
                    format!("{}: {}", column.trim(), value.trim())
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

/// Minimal RFC 4180 reader: quoted fields, doubled quotes, embedded
/// newlines, CRLF or LF line endings.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

fn source_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Load a single file into chunks.
///
/// Each segment gets a `Source: <file name>` header before splitting, and
/// every chunk carries the file name as `source_id` and the path as given
/// as `full_path`.
pub fn load_file(path: &Path, splitter: &RecursiveSplitter) -> Result<Vec<Chunk>> {
    let kind = FileKind::from_path(path)?;
    if !path.is_file() {
        return Err(Error::load(path, "file does not exist"));
    }

    let source_id = source_id(path);
    let full_path = path.to_string_lossy();

    let segments = kind.segments(path).map_err(|e| match e {
        Error::Io(io) => Error::load(path, io),
        other => other,
    })?;

    let mut chunks = Vec::new();
    for (segment, text) in segments.iter().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        let stamped = format!("Source: {source_id}\n\n{text}");
        chunks.extend(splitter.split_segment(
            &stamped,
            &source_id,
            &full_path,
            segment,
        ));
    }

    tracing::debug!(
        path = %path.display(),
        ?kind,
        segments = segments.len(),
        chunks = chunks.len(),
        "loaded file"
    );
    Ok(chunks)
}

/// Result of loading a batch of files.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub chunks: Vec<Chunk>,
    /// Files that produced at least one chunk, in input order.
    pub loaded: Vec<PathBuf>,
    /// Files that failed or produced nothing, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Load many files in parallel. Per-file errors are collected rather than
/// aborting the batch; chunk order follows input order.
pub fn load_many(paths: &[PathBuf], splitter: &RecursiveSplitter) -> LoadOutcome {
    let results: Vec<_> = paths
        .par_iter()
        .map(|path| (path, load_file(path, splitter)))
        .collect();

    let mut outcome = LoadOutcome::default();
    for (path, result) in results {
        match result {
            Ok(chunks) if chunks.is_empty() => {
                outcome
                    .failed
                    .push((path.clone(), "no text content found".into()));
            }
            Ok(chunks) => {
                outcome.chunks.extend(chunks);
                outcome.loaded.push(path.clone());
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to load: {e}");
                outcome.failed.push((path.clone(), e.to_string()));
            }
        }
    }
    outcome
}

/// The whole document as plain text, segments separated by a blank line.
pub fn extract_text(path: &Path) -> Result<String> {
    let kind = FileKind::from_path(path)?;
    let segments = kind.segments(path)?;
    Ok(segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(
            FileKind::from_path(Path::new("a/Notes.TXT")).unwrap(),
            FileKind::Text
        );
        assert_eq!(
            FileKind::from_path(Path::new("layout.xaml")).unwrap(),
            FileKind::Text
        );
        assert_eq!(
            FileKind::from_path(Path::new("r.Markdown")).unwrap(),
            FileKind::Markdown
        );
        assert_eq!(
            FileKind::from_path(Path::new("b.xlsx")).unwrap(),
            FileKind::Spreadsheet
        );
        assert_eq!(
            FileKind::from_path(Path::new("c.csv")).unwrap(),
            FileKind::Tabular
        );
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = FileKind::from_path(Path::new("image.png")).unwrap_err();
        match err {
            Error::UnsupportedType {
                extension,
                supported,
            } => {
                assert_eq!(extension, "png");
                assert!(supported.contains(&"pdf"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(FileKind::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn text_file_chunks_carry_source_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fruit.txt");
        std::fs::write(&path, "Apples are red.").unwrap();

        let chunks = load_file(&path, &RecursiveSplitter::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Source: fruit.txt\n\nApples are red.");
        assert_eq!(chunks[0].source_id, "fruit.txt");
        assert_eq!(chunks[0].full_path, path.to_string_lossy());
    }

    #[test]
    fn long_text_file_splits_into_several_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("long.md");
        let body = "A paragraph of prose about retrieval.\n\n".repeat(20);
        std::fs::write(&path, body).unwrap();

        let splitter = RecursiveSplitter::new(ChunkingConfig::new(200, 40));
        let chunks = load_file(&path, &splitter).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks[0].text.starts_with("Source: long.md"));
        assert!(chunks.iter().all(|c| c.source_id == "long.md"));
    }

    #[test]
    fn invalid_utf8_is_a_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bin.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let err = load_file(&path, &RecursiveSplitter::default()).unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn csv_rows_become_header_value_segments() {
        let rows = csv_rows(
            "name,notes\r\nwidget,\"red, round\"\n\"gadget\",\"says \"\"hi\"\"\nthere\"\n",
        );
        assert_eq!(
            rows,
            vec![
                "name: widget\nnotes: red, round".to_string(),
                "name: gadget\nnotes: says \"hi\"\nthere".to_string(),
            ]
        );
    }

    #[test]
    fn csv_without_rows_is_empty() {
        assert!(csv_rows("only,header\n").is_empty());
        assert!(csv_rows("").is_empty());
    }

    #[test]
    fn csv_file_gets_one_chunk_per_row() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("people.csv");
        std::fs::write(&path, "name,role\nada,engineer\ngrace,admiral\n")
            .unwrap();

        let chunks = load_file(&path, &RecursiveSplitter::default()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].segment, 1);
        assert!(chunks[1].text.ends_with("name: grace\nrole: admiral"));
    }

    #[test]
    fn load_many_collects_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.txt");
        let empty = tmp.path().join("empty.txt");
        let missing = tmp.path().join("missing.txt");
        let weird = tmp.path().join("data.bin");
        std::fs::write(&good, "some content").unwrap();
        std::fs::write(&empty, "   ").unwrap();
        std::fs::write(&weird, "x").unwrap();

        let outcome = load_many(
            &[good.clone(), empty, missing, weird],
            &RecursiveSplitter::default(),
        );
        assert_eq!(outcome.loaded, vec![good]);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.failed.len(), 3);
        assert!(
            outcome
                .failed
                .iter()
                .any(|(_, reason)| reason.contains("unsupported file type"))
        );
    }

    #[test]
    fn extract_text_joins_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deck.pptx");
        crate::ooxml::tests::write_package(
            &path,
            &[
                (
                    "ppt/slides/slide1.xml",
                    "<p:sld><a:p><a:t>one</a:t></a:p></p:sld>",
                ),
                (
                    "ppt/slides/slide2.xml",
                    "<p:sld><a:p><a:t>two</a:t></a:p></p:sld>",
                ),
            ],
        );

        assert_eq!(extract_text(&path).unwrap(), "one\n\ntwo");
    }
}
