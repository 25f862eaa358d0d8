//! Sentence-window text chunker.
//!
//! Splits each text unit of a document into sentences, then groups the
//! sentences into windows of `window_size` with `overlap` sentences shared
//! between consecutive windows. Every window becomes one [`Chunk`].
//!
//! # Algorithm
//!
//! 1. Walk the unit line by line. Blank lines end a paragraph. Markdown
//!    ATX headings (`#` … `######`) end a paragraph and update the heading
//!    stack instead of contributing text.
//! 2. Split each paragraph on `.`, `!` or `?` (plus any trailing closing
//!    quotes or brackets) followed by whitespace or end of text.
//! 3. Collapse every whitespace run in a sentence to a single space.
//! 4. Emit windows starting at `0, step, 2·step, …` where
//!    `step = window_size - overlap`, stopping once a window reaches the
//!    last sentence. A unit with fewer than `window_size` sentences yields
//!    exactly one chunk; a unit with no sentences yields none.
//! 5. Chunk indices run contiguously across all units of the document.
//!
//! Identical `(units, config)` always yields an identical chunk set apart
//! from the caller-supplied `created_at`.
//!
//! # Example
//!
//! ```rust
//! use groundwork_core::chunk::{chunk_document, ChunkingConfig};
//! use groundwork_core::models::{DocumentRef, SourceType, TextUnit};
//!
//! let config = ChunkingConfig::new(2, 1).unwrap();
//! let doc = DocumentRef { doc_id: "doc_1", source_path: "a.txt", source_type: SourceType::Flat };
//! let units = vec![TextUnit { text: "One. Two. Three.".into(), page: None }];
//! let chunks = chunk_document(&doc, &units, &config, "2024-01-01T00:00:00Z");
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].text, "Two. Three.");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{GroundworkError, Result};
use crate::hash::hash_text;
use crate::models::{Chunk, DocumentRef, TextUnit};

/// Bumped whenever the splitting rules change, so old boundaries are invalidated.
pub const CHUNKER_VERSION: &str = "sentence-window/1";

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];
const CLOSING_PUNCTUATION: [char; 7] = ['"', '\'', ')', ']', '}', '\u{201D}', '\u{2019}'];

/// Window parameters, counted in sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub window_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(window_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            window_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Requires `0 <= overlap < window_size`.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(GroundworkError::Config(
                "splitter.sent_window_size must be >= 1".to_string(),
            ));
        }
        if self.overlap >= self.window_size {
            return Err(GroundworkError::Config(format!(
                "splitter.sent_window_overlap ({}) must be < sent_window_size ({})",
                self.overlap, self.window_size
            )));
        }
        Ok(())
    }

    pub fn step(&self) -> usize {
        self.window_size - self.overlap
    }

    /// Fingerprint stored in the manifest. Any change forces a full rebuild.
    pub fn fingerprint(&self) -> String {
        hash_text(&format!(
            "{}\nwindow_size={}\noverlap={}",
            CHUNKER_VERSION, self.window_size, self.overlap
        ))
    }
}

/// A sentence plus the heading path in effect where it appeared.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    pub text: String,
    pub heading_path: Vec<String>,
}

/// Chunk every unit of one document.
pub fn chunk_document(
    doc: &DocumentRef<'_>,
    units: &[TextUnit],
    config: &ChunkingConfig,
    created_at: &str,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index = 0usize;

    for unit in units {
        let sentences = split_sentences(&unit.text);
        for start in window_starts(sentences.len(), config) {
            let end = (start + config.window_size).min(sentences.len());
            let window = &sentences[start..end];
            let text = window
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");

            chunks.push(Chunk {
                id: Chunk::make_id(doc.doc_id, index),
                doc_id: doc.doc_id.to_string(),
                source_path: doc.source_path.to_string(),
                source_type: doc.source_type,
                page: unit.page,
                heading_path: window[0].heading_path.clone(),
                hash: hash_text(&text),
                text,
                created_at: created_at.to_string(),
            });
            index += 1;
        }
    }

    chunks
}

/// Start offsets of every window over `n` sentences.
pub fn window_starts(n: usize, config: &ChunkingConfig) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let step = config.step().max(1);
    let mut starts = Vec::new();
    let mut start = 0;
    loop {
        starts.push(start);
        if start + config.window_size >= n {
            break;
        }
        start += step;
    }
    starts
}

/// Split a text unit into whitespace-normalized sentences.
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut headings: Vec<(usize, String)> = Vec::new();
    let mut paragraph = String::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &headings, &mut sentences);
            continue;
        }

        if let Some((level, title)) = parse_heading(trimmed) {
            flush_paragraph(&mut paragraph, &headings, &mut sentences);
            while headings.last().is_some_and(|(l, _)| *l >= level) {
                headings.pop();
            }
            if !title.is_empty() {
                headings.push((level, title));
            }
            continue;
        }

        if !paragraph.is_empty() {
            paragraph.push(' ');
        }
        paragraph.push_str(trimmed);
    }
    flush_paragraph(&mut paragraph, &headings, &mut sentences);

    sentences
}

fn flush_paragraph(
    paragraph: &mut String,
    headings: &[(usize, String)],
    sentences: &mut Vec<Sentence>,
) {
    if paragraph.is_empty() {
        return;
    }
    let heading_path: Vec<String> = headings.iter().map(|(_, t)| t.clone()).collect();
    for text in split_paragraph(paragraph) {
        sentences.push(Sentence {
            text,
            heading_path: heading_path.clone(),
        });
    }
    paragraph.clear();
}

fn split_paragraph(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let chars: Vec<(usize, char)> = paragraph.char_indices().collect();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (_, c) = chars[i];
        if SENTENCE_TERMINATORS.contains(&c) {
            let mut j = i + 1;
            while j < chars.len()
                && (SENTENCE_TERMINATORS.contains(&chars[j].1)
                    || CLOSING_PUNCTUATION.contains(&chars[j].1))
            {
                j += 1;
            }
            if j == chars.len() || chars[j].1.is_whitespace() {
                let end = chars.get(j).map(|(pos, _)| *pos).unwrap_or(paragraph.len());
                push_normalized(&paragraph[start..end], &mut out);
                start = end;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    if start < paragraph.len() {
        push_normalized(&paragraph[start..], &mut out);
    }
    out
}

fn push_normalized(raw: &str, out: &mut Vec<String>) {
    let normalized = normalize_whitespace(raw);
    if !normalized.is_empty() {
        out.push(normalized);
    }
}

/// Collapse every whitespace run to one space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    Some((level, normalize_whitespace(title)))
}
