//! Text extraction from Office Open XML packages (docx, pptx, xlsx).
//!
//! These formats are zip archives of XML parts. Only the text content is
//! needed, so a small pull scanner over the raw XML is enough: it yields
//! start tags, end tags and text runs, and the per-format extractors pick
//! out the elements that carry document text.

use std::{
    collections::HashMap,
    io::{Read, Seek},
    path::Path,
};

use crate::error::{Error, Result};

/// A lexical XML event. Names are raw, including any namespace prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event<'a> {
    Start {
        name: &'a str,
        attrs: &'a str,
        empty: bool,
    },
    End {
        name: &'a str,
    },
    Text(&'a str),
    /// CDATA content, not entity-encoded.
    Raw(&'a str),
}

/// Pull scanner over an XML document.
///
/// Processing instructions, comments and doctype declarations are skipped.
/// Malformed trailing input ends the scan instead of erroring; extraction
/// is best-effort by nature.
pub(crate) struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Event<'a>> {
        loop {
            let rest = &self.src[self.pos..];
            if rest.is_empty() {
                return None;
            }

            if !rest.starts_with('<') {
                let end = rest.find('<').unwrap_or(rest.len());
                self.pos += end;
                return Some(Event::Text(&rest[..end]));
            }

            if let Some(body) = rest.strip_prefix("<![CDATA[") {
                let end = body.find("]]>")?;
                self.pos += "<![CDATA[".len() + end + "]]>".len();
                return Some(Event::Raw(&body[..end]));
            }
            if rest.starts_with("<!--") {
                let end = rest.find("-->")?;
                self.pos += end + 3;
                continue;
            }
            if rest.starts_with("<?") || rest.starts_with("<!") {
                let end = rest.find('>')?;
                self.pos += end + 1;
                continue;
            }

            let end = rest.find('>')?;
            let tag = &rest[1..end];
            self.pos += end + 1;

            if let Some(name) = tag.strip_prefix('/') {
                return Some(Event::End { name: name.trim() });
            }

            let (tag, empty) = match tag.strip_suffix('/') {
                Some(t) => (t, true),
                None => (tag, false),
            };
            let split = tag
                .find(|c: char| c.is_ascii_whitespace())
                .unwrap_or(tag.len());
            return Some(Event::Start {
                name: &tag[..split],
                attrs: &tag[split..],
                empty,
            });
        }
    }
}

/// Strip a namespace prefix: `w:t` -> `t`.
pub(crate) fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Look up an attribute value by (possibly prefixed) name.
pub(crate) fn attr(attrs: &str, wanted: &str) -> Option<String> {
    let mut rest = attrs;
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = after.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let close = after[1..].find(quote)?;
        let value = &after[1..1 + close];
        if key == wanted {
            return Some(decode_entities(value));
        }
        rest = &after[close + 2..];
    }
    None
}

/// Decode the predefined XML entities and numeric character references.
/// Unknown entities are left as-is.
pub(crate) fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| {
                    entity.strip_prefix('#').and_then(|d| d.parse().ok())
                })
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collect paragraph text from a WordprocessingML or DrawingML part.
///
/// Text lives in `<*:t>` runs; `<*:p>` closes a paragraph, `<*:tab>` and
/// `<*:br>` become whitespace.
fn paragraphs(xml: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    for event in Scanner::new(xml) {
        match event {
            Event::Start { name, empty, .. } => match local_name(name) {
                "t" if !empty => in_text = true,
                "tab" => current.push('\t'),
                "br" | "cr" => current.push('\n'),
                _ => {}
            },
            Event::End { name } => match local_name(name) {
                "t" => in_text = false,
                "p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Event::Text(text) if in_text => {
                current.push_str(&decode_entities(text))
            }
            Event::Raw(text) if in_text => current.push_str(text),
            _ => {}
        }
    }

    let para = current.trim();
    if !para.is_empty() {
        paragraphs.push(para.to_string());
    }
    paragraphs
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<std::fs::File>> {
    let file = std::fs::File::open(path)?;
    zip::ZipArchive::new(file).map_err(|e| Error::load(path, e))
}

fn read_part<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    path: &Path,
    name: &str,
) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(Error::load(path, e)),
    };
    let mut buf = String::new();
    entry
        .read_to_string(&mut buf)
        .map_err(|e| Error::load(path, format!("{name}: {e}")))?;
    Ok(Some(buf))
}

/// Extract a Word document as a single segment of newline-separated
/// paragraphs.
pub fn docx_text(path: &Path) -> Result<String> {
    let mut archive = open_archive(path)?;
    let xml = read_part(&mut archive, path, "word/document.xml")?
        .ok_or_else(|| Error::load(path, "missing word/document.xml"))?;
    Ok(paragraphs(&xml).join("\n"))
}

/// Extract one segment per slide, in slide order.
pub fn pptx_slides(path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(path)?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    // Lexical order would put slide10 before slide2.
    slides.sort_by_key(|(number, _)| *number);

    let mut segments = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        if let Some(xml) = read_part(&mut archive, path, &name)? {
            segments.push(paragraphs(&xml).join("\n"));
        }
    }
    Ok(segments)
}

/// Extract one segment per worksheet. Each segment starts with the sheet
/// name, followed by one line per row with cells separated by tabs.
pub fn xlsx_sheets(path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(path)?;

    let shared = match read_part(&mut archive, path, "xl/sharedStrings.xml")? {
        Some(xml) => shared_strings(&xml),
        None => Vec::new(),
    };
    let workbook = read_part(&mut archive, path, "xl/workbook.xml")?
        .ok_or_else(|| Error::load(path, "missing xl/workbook.xml"))?;
    let rels = read_part(&mut archive, path, "xl/_rels/workbook.xml.rels")?
        .map(|xml| relationships(&xml))
        .unwrap_or_default();

    let mut segments = Vec::new();
    for (index, (name, rel_id)) in sheet_list(&workbook).into_iter().enumerate()
    {
        let part = rel_id
            .and_then(|id| rels.get(&id).cloned())
            .map(|target| resolve_target(&target))
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1));

        let Some(xml) = read_part(&mut archive, path, &part)? else {
            tracing::warn!(sheet = %name, part, "worksheet part missing");
            continue;
        };
        let rows = sheet_rows(&xml, &shared);
        let mut text = format!("Sheet: {name}");
        for row in rows {
            text.push('\n');
            text.push_str(&row.join("\t"));
        }
        segments.push(text);
    }
    Ok(segments)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

fn shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    for event in Scanner::new(xml) {
        match event {
            Event::Start { name, empty, .. } => match local_name(name) {
                "si" if empty => strings.push(String::new()),
                "si" => current.clear(),
                "t" if !empty => in_text = true,
                _ => {}
            },
            Event::End { name } => match local_name(name) {
                "si" => strings.push(std::mem::take(&mut current)),
                "t" => in_text = false,
                _ => {}
            },
            Event::Text(text) if in_text => {
                current.push_str(&decode_entities(text))
            }
            Event::Raw(text) if in_text => current.push_str(text),
            _ => {}
        }
    }
    strings
}

/// Sheet names with their relationship ids, in workbook order.
fn sheet_list(workbook: &str) -> Vec<(String, Option<String>)> {
    Scanner::new(workbook)
        .filter_map(|event| match event {
            Event::Start { name, attrs, .. } if local_name(name) == "sheet" => {
                let sheet = attr(attrs, "name").unwrap_or_default();
                Some((sheet, attr(attrs, "r:id")))
            }
            _ => None,
        })
        .collect()
}

fn relationships(xml: &str) -> HashMap<String, String> {
    Scanner::new(xml)
        .filter_map(|event| match event {
            Event::Start { name, attrs, .. }
                if local_name(name) == "Relationship" =>
            {
                Some((attr(attrs, "Id")?, attr(attrs, "Target")?))
            }
            _ => None,
        })
        .collect()
}

fn sheet_rows(xml: &str, shared: &[String]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type: Option<String> = None;
    let mut value = String::new();
    let mut in_value = false;

    for event in Scanner::new(xml) {
        match event {
            Event::Start { name, attrs, empty } => match local_name(name) {
                "row" => row.clear(),
                "c" if !empty => {
                    cell_type = attr(attrs, "t");
                    value.clear();
                }
                "v" | "t" if !empty => in_value = true,
                _ => {}
            },
            Event::End { name } => match local_name(name) {
                "v" | "t" => in_value = false,
                "c" => {
                    let text = match cell_type.as_deref() {
                        Some("s") => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                            .unwrap_or_default(),
                        _ => value.clone(),
                    };
                    if !text.trim().is_empty() {
                        row.push(text);
                    }
                }
                "row" => {
                    if !row.is_empty() {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                _ => {}
            },
            Event::Text(text) if in_value => {
                value.push_str(&decode_entities(text))
            }
            Event::Raw(text) if in_value => value.push_str(text),
            _ => {}
        }
    }
    rows
}
