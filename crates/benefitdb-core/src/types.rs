//! Domain types shared by the chunker, both indexes and the retrieval engine.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

pub type ChunkId = String;
pub type Meta = BTreeMap<String, String>;

/// Equality constraints over chunk metadata, e.g. `{"재료코드": "A12345"}`.
pub type MetaFilter = BTreeMap<String, String>;

/// Separator placed between a chunk's borrowed overlap and its own body.
pub const OVERLAP_MARKER: &str = "\n...\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

/// A table as extracted from a page: the first row holds the headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableGrid {
    pub page_number: u32,
    pub table_index: usize,
    pub rows: Vec<Vec<String>>,
}

impl TableGrid {
    /// Data rows keyed by the header row. Grids without a data row yield nothing.
    pub fn data_rows(&self) -> Vec<TableRow> {
        let Some((header_row, body)) = self.rows.split_first() else {
            return Vec::new();
        };
        if body.is_empty() {
            return Vec::new();
        }
        let headers: Vec<String> = header_row
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = h.trim();
                if h.is_empty() { format!("col{}", i + 1) } else { h.to_string() }
            })
            .collect();
        body.iter()
            .enumerate()
            .map(|(row_index, row)| TableRow {
                page_number: self.page_number,
                table_index: self.table_index,
                row_index,
                cells: (0..headers.len())
                    .map(|i| row.get(i).map(|c| c.trim().to_string()).unwrap_or_default())
                    .collect(),
                headers: headers.clone(),
            })
            .collect()
    }
}

/// One data row of an extracted table. `cells[i]` is the value under `headers[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub page_number: u32,
    pub table_index: usize,
    pub row_index: usize,
    pub headers: Vec<String>,
    pub cells: Vec<String>,
}

impl TableRow {
    /// `(header, value)` pairs in header order, skipping empty cells.
    pub fn filled(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .zip(self.cells.iter())
            .filter(|(_, v)| !v.is_empty())
            .map(|(h, v)| (h.as_str(), v.as_str()))
    }
}

fn default_file_type() -> String {
    "pdf".to_string()
}

/// An ingested source document as produced by the extraction stage.
///
/// `full_text` wins over `pages` when both are present; a document with only
/// pages is rendered with `[페이지 N]` markers so the chunker can recover page
/// provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default = "default_file_type")]
    pub file_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub pages: Vec<PageText>,
    #[serde(default)]
    pub tables: Vec<TableGrid>,
    /// Document code shared by every chunk of this document.
    #[serde(default)]
    pub code: Option<String>,
    /// Copied into each chunk's metadata.
    #[serde(default)]
    pub metadata: Meta,
}

impl Document {
    pub fn text(&self) -> Cow<'_, str> {
        if !self.full_text.trim().is_empty() || self.pages.is_empty() {
            return Cow::Borrowed(&self.full_text);
        }
        let mut out = String::new();
        for page in &self.pages {
            out.push_str(&format!("[페이지 {}]\n{}\n", page.page_number, page.text));
        }
        Cow::Owned(out)
    }

    pub fn table_rows(&self) -> Vec<TableRow> {
        self.tables.iter().flat_map(TableGrid::data_rows).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Text,
    Table,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub filename: String,
    pub file_type: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub section_title: Option<String>,
    #[serde(default)]
    pub section_idx: Option<usize>,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub force_split: bool,
    /// Byte length of the borrowed overlap prefix, marker included.
    #[serde(default)]
    pub overlap_len: usize,
    #[serde(default)]
    pub doc_code: Option<String>,
    #[serde(default)]
    pub primary_field: Option<String>,
    #[serde(default)]
    pub primary_value: Option<String>,
    #[serde(default)]
    pub table_index: Option<usize>,
    #[serde(default)]
    pub row_index: Option<usize>,
    #[serde(default)]
    pub extra: Meta,
}

impl ChunkMeta {
    /// Looks up a metadata value by name, falling back to `extra`.
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        match key {
            "filename" => Some(Cow::Borrowed(self.filename.as_str())),
            "file_type" => Some(Cow::Borrowed(self.file_type.as_str())),
            "chunk_index" => Some(Cow::Owned(self.chunk_index.to_string())),
            "page" => self.page.map(|p| Cow::Owned(p.to_string())),
            "section_title" => self.section_title.as_deref().map(Cow::Borrowed),
            "source_type" => Some(Cow::Borrowed(self.source_type.as_str())),
            "doc_code" => self.doc_code.as_deref().map(Cow::Borrowed),
            "primary_field" => self.primary_field.as_deref().map(Cow::Borrowed),
            "primary_value" => self.primary_value.as_deref().map(Cow::Borrowed),
            _ => self.extra.get(key).map(|v| Cow::Borrowed(v.as_str())),
        }
    }

    pub fn matches(&self, filter: &MetaFilter) -> bool {
        filter.iter().all(|(k, v)| self.get(k).is_some_and(|have| have == v.as_str()))
    }

    pub fn has_primary_field(&self) -> bool {
        self.primary_field.as_deref().is_some_and(|f| !f.is_empty())
    }
}

/// The atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub doc_id: String,
    pub text: String,
    pub meta: ChunkMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn make_id(doc_id: &str, chunk_index: usize) -> ChunkId {
        format!("{doc_id}:{chunk_index}")
    }

    /// Chunk text without the overlap borrowed from its predecessor.
    pub fn body(&self) -> &str {
        self.text.get(self.meta.overlap_len..).unwrap_or(&self.text)
    }
}

/// Which engine produced a hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Dense,
    Sparse,
}

/// Raw hit from a single index.
///
/// For `Dense` hits `score` and `raw_score` are both the L2 distance (lower is
/// better). For `Sparse` hits `score` is the BM25 score divided by the top
/// hit's score and `raw_score` is the BM25 score itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
    pub raw_score: f32,
    pub source: SourceKind,
}

/// A ranked chunk as returned to callers. Each stage builds new values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub chunk: Chunk,
    pub dense_distance: Option<f32>,
    pub dense_similarity: f32,
    pub sparse_score: f32,
    pub sparse_raw: Option<f32>,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
    /// Score carried into the most recent rerank stage.
    pub original_score: Option<f32>,
    /// 1-based.
    pub rank: usize,
    pub escalated: bool,
}

impl ScoredResult {
    /// Unscored and unranked; fusion fills in the signals.
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            dense_distance: None,
            dense_similarity: 0.0,
            sparse_score: 0.0,
            sparse_raw: None,
            fused_score: 0.0,
            rerank_score: None,
            original_score: None,
            rank: 0,
            escalated: false,
        }
    }

    /// A chunk pulled in by document code with a neutral score.
    pub fn escalated(chunk: Chunk) -> Self {
        Self { escalated: true, ..Self::new(chunk) }
    }

    /// The score that determined this result's position.
    pub fn score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.fused_score)
    }
}

/// Relative weights of the two retrieval signals. Need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub dense: f32,
    pub sparse: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { dense: 0.7, sparse: 0.3 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    #[default]
    Weighted,
    Rrf,
}

/// One entry of a precision-rerank response: position in the submitted list
/// and its relevance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance: f32,
}
