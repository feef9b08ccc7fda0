//! Structure-aware chunking.
//!
//! A document is cut into sections at title lines (page markers, roman
//! numeral headings, short enumerated labels, horizontal rules). A heading
//! line other than a page marker leads its section's text. Sections are
//! packed into size-bounded chunks along paragraph boundaries, and each chunk
//! after the first borrows the tail of its predecessor. Extracted table rows
//! become one chunk each.

use std::borrow::Cow;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::primary_field::{KeywordColumnDetector, PrimaryFieldDetector};
use crate::types::{Chunk, ChunkMeta, Document, SourceType, TableRow, OVERLAP_MARKER};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    pub target_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { min_chars: 500, max_chars: 2500, target_chars: 1500, overlap_chars: 200 }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_chars == 0 {
            return Err(Error::InvalidConfig("chunking.target_chars must be positive".into()));
        }
        if self.min_chars > self.target_chars || self.target_chars > self.max_chars {
            return Err(Error::InvalidConfig(format!(
                "chunking sizes must satisfy min <= target <= max (got {} / {} / {})",
                self.min_chars, self.target_chars, self.max_chars
            )));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(Error::InvalidConfig("chunking.overlap_chars must be below max_chars".into()));
        }
        Ok(())
    }
}

/// A run of lines between two title lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub title: Option<String>,
    pub level: u8,
    pub page: Option<u32>,
    pub content: String,
}

enum Heading {
    Page(u32),
    Roman,
    Numbered,
    Rule,
}

impl Heading {
    fn level(&self) -> u8 {
        match self {
            Self::Page(_) => 1,
            Self::Roman | Self::Rule => 2,
            Self::Numbered => 3,
        }
    }
}

struct SectionPatterns {
    page: Regex,
    roman: Regex,
    numbered: Regex,
    rule: Regex,
    paragraph_break: Regex,
}

impl SectionPatterns {
    fn compile() -> Result<Self> {
        let re = |p: &str| Regex::new(p).map_err(|e| Error::Operation(format!("bad pattern {p}: {e}")));
        Ok(Self {
            page: re(r"^\[페이지\s+(\d+)\]")?,
            roman: re(r"^[ⅠⅡⅢⅣⅤⅥⅦⅧⅨⅩ]\.?\s+")?,
            numbered: re(r"^[0-9가-힣]{1,2}\.?\s+")?,
            rule: re(r"^[-=]{3,}$")?,
            paragraph_break: re(r"\n\s*\n")?,
        })
    }

    fn classify(&self, line: &str) -> Option<Heading> {
        if let Some(caps) = self.page.captures(line) {
            let n = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            return Some(Heading::Page(n));
        }
        if self.roman.is_match(line) {
            return Some(Heading::Roman);
        }
        if line.chars().count() < 100 && self.numbered.is_match(line) {
            return Some(Heading::Numbered);
        }
        if self.rule.is_match(line) {
            return Some(Heading::Rule);
        }
        None
    }
}

/// A chunk before ids, overlap and document metadata are attached.
struct Piece {
    text: String,
    section_idx: usize,
    force_split: bool,
}

pub struct Chunker {
    config: ChunkingConfig,
    patterns: SectionPatterns,
    detector: Box<dyn PrimaryFieldDetector>,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            patterns: SectionPatterns::compile()?,
            detector: Box::new(KeywordColumnDetector::default()),
        })
    }

    pub fn with_detector(mut self, detector: Box<dyn PrimaryFieldDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Chunks bare text as a single untitled document.
    pub fn chunk_text(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let doc = Document {
            id: doc_id.to_string(),
            filename: doc_id.to_string(),
            file_type: "txt".to_string(),
            title: None,
            full_text: text.to_string(),
            pages: Vec::new(),
            tables: Vec::new(),
            code: None,
            metadata: Default::default(),
        };
        self.chunk_document(&doc)
    }

    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        let text = doc.text();
        let sections = self.split_sections(&text);

        let mut pieces = Vec::new();
        for (idx, section) in sections.iter().enumerate() {
            // Heading lines are text too; page markers are not.
            let body = match section.title.as_deref() {
                Some(title) if section.level > 1 => Cow::Owned(format!("{title}\n{}", section.content.trim())),
                _ => Cow::Borrowed(section.content.as_str()),
            };
            self.pack_section(&body, idx, &mut pieces);
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        let mut prev_body: Option<&str> = None;
        for piece in &pieces {
            let section = &sections[piece.section_idx];
            let mut meta = self.base_meta(doc);
            meta.page = section.page;
            meta.section_title = section.title.clone();
            meta.section_idx = Some(piece.section_idx);
            meta.force_split = piece.force_split;

            let text = match prev_body {
                Some(prev) if self.config.overlap_chars > 0 => {
                    let tail = tail_chars(prev, self.config.overlap_chars);
                    meta.overlap_len = tail.len() + OVERLAP_MARKER.len();
                    format!("{tail}{OVERLAP_MARKER}{}", piece.text)
                }
                _ => piece.text.clone(),
            };
            prev_body = Some(&piece.text);
            chunks.push(Chunk { id: String::new(), doc_id: doc.id.clone(), text, meta, embedding: None });
        }

        for row in doc.table_rows() {
            if let Some(chunk) = self.table_chunk(doc, &row) {
                chunks.push(chunk);
            }
        }

        let total = chunks.len();
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.id = Chunk::make_id(&doc.id, i);
            chunk.meta.chunk_index = i;
            chunk.meta.total_chunks = total;
        }
        debug!(doc = %doc.id, sections = sections.len(), chunks = total, "chunked document");
        chunks
    }

    pub fn split_sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut page = None;
        let mut current = Section::default();

        for line in text.lines() {
            let trimmed = line.trim();
            let Some(heading) = self.patterns.classify(trimmed) else {
                current.content.push_str(line);
                current.content.push('\n');
                continue;
            };
            if let Heading::Page(n) = heading {
                page = Some(n);
            }
            let title = match heading {
                Heading::Rule => None,
                _ => Some(trimmed.to_string()),
            };
            let next = Section { title, level: heading.level(), page, content: String::new() };
            let finished = std::mem::replace(&mut current, next);
            if !finished.content.trim().is_empty() {
                sections.push(finished);
            }
        }
        if !current.content.trim().is_empty() {
            sections.push(current);
        }
        sections
    }

    fn pack_section(&self, content: &str, section_idx: usize, out: &mut Vec<Piece>) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let cfg = &self.config;
        if char_len(content) <= cfg.target_chars {
            out.push(Piece { text: content.to_string(), section_idx, force_split: false });
            return;
        }

        let mut buffer = String::new();
        for para in self
            .patterns
            .paragraph_break
            .split(content)
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let candidate = if buffer.is_empty() { para.to_string() } else { format!("{buffer}\n\n{para}") };
            if char_len(&candidate) <= cfg.max_chars {
                if char_len(&candidate) >= cfg.target_chars {
                    out.push(Piece { text: candidate, section_idx, force_split: false });
                    buffer.clear();
                } else {
                    buffer = candidate;
                }
                continue;
            }
            if !buffer.is_empty() {
                out.push(Piece { text: std::mem::take(&mut buffer), section_idx, force_split: false });
            }
            if char_len(para) > cfg.max_chars {
                for text in self.force_split(para) {
                    out.push(Piece { text, section_idx, force_split: true });
                }
            } else {
                buffer = para.to_string();
            }
        }
        // Short tails are kept; dropping them would lose section content.
        if !buffer.is_empty() {
            if char_len(&buffer) < cfg.min_chars {
                debug!(section_idx, len = char_len(&buffer), "emitting undersized section tail");
            }
            out.push(Piece { text: buffer, section_idx, force_split: false });
        }
    }

    /// Splits on word boundaries so that each piece stays under the target.
    fn force_split(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            let candidate_len = if current.is_empty() {
                char_len(word)
            } else {
                char_len(&current) + 1 + char_len(word)
            };
            if candidate_len >= self.config.target_chars && !current.is_empty() {
                pieces.push(std::mem::replace(&mut current, word.to_string()));
            } else {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    fn table_chunk(&self, doc: &Document, row: &TableRow) -> Option<Chunk> {
        let text = row
            .filled()
            .map(|(header, value)| format!("[{header}] {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return None;
        }
        let mut meta = self.base_meta(doc);
        meta.page = Some(row.page_number);
        meta.source_type = SourceType::Table;
        meta.table_index = Some(row.table_index);
        meta.row_index = Some(row.row_index);
        if let Some((field, value)) = self.detector.detect(&doc.filename, row) {
            // Filters name fields without spaces ("재료코드"), whatever the header said.
            meta.extra.insert(field.split_whitespace().collect(), value.clone());
            meta.primary_field = Some(field);
            meta.primary_value = Some(value);
        }
        Some(Chunk { id: String::new(), doc_id: doc.id.clone(), text, meta, embedding: None })
    }

    fn base_meta(&self, doc: &Document) -> ChunkMeta {
        ChunkMeta {
            filename: doc.filename.clone(),
            file_type: doc.file_type.clone(),
            doc_code: doc.code.clone(),
            extra: doc.metadata.clone(),
            ..ChunkMeta::default()
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    s.char_indices().nth(len - n).map_or(s, |(i, _)| &s[i..])
}
