//! BM25 sparse index over chunk text, persisted as a tantivy directory.
//!
//! Postings, chunk text and chunk metadata live in the same index. Every
//! change, rebuilds included, lands as one tantivy commit, and a handle only
//! sees it after its own reader reloads.

use std::path::Path;
use std::sync::Mutex;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tracing::{debug, info, warn};

use benefitdb_core::traits::SparseIndex;
use benefitdb_core::types::{Chunk, ChunkMeta, MetaFilter, SearchHit, SourceKind};
use benefitdb_core::{Error, Result};

use crate::tantivy_utils::{build_schema, register_tokenizer, Fields};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// With a metadata filter, this many times `k` hits are scored before
/// filtering.
pub const FILTER_OVERFETCH: usize = 3;

pub struct TantivySparseIndex {
	index: Index,
	reader: IndexReader,
	// A writer lives for one commit; the directory lock is free between commits.
	write_lock: Mutex<()>,
	fields: Fields,
}

impl TantivySparseIndex {
	/// Creates an empty index at `dir`, wiping whatever was there.
	pub fn create(dir: &Path) -> Result<Self> {
		if dir.exists() { std::fs::remove_dir_all(dir)?; }
		std::fs::create_dir_all(dir)?;
		let index = Index::create_in_dir(dir, build_schema()).map_err(Error::sparse)?;
		Self::from_index(index)
	}

	pub fn open(dir: &Path) -> Result<Self> {
		if !dir.join("meta.json").exists() {
			return Err(Error::NotFound(format!("sparse index at {}", dir.display())));
		}
		let index = Index::open_in_dir(dir).map_err(Error::sparse)?;
		Self::from_index(index)
	}

	pub fn open_or_create(dir: &Path) -> Result<Self> {
		if dir.join("meta.json").exists() { Self::open(dir) } else { Self::create(dir) }
	}

	pub fn in_memory() -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()))
	}

	/// Replaces every document at `dir` with `chunks` in a single commit. An
	/// index that cannot be opened is recreated from scratch.
	pub fn rebuild(dir: &Path, chunks: &[Chunk]) -> Result<Self> {
		let index = match Self::open(dir) {
			Ok(index) => index,
			Err(Error::NotFound(_)) => Self::create(dir)?,
			Err(e) => {
				warn!(dir = %dir.display(), error = %e, "existing sparse index unreadable; recreating");
				Self::create(dir)?
			}
		};
		index.commit(chunks, true)?;
		info!(dir = %dir.display(), chunks = chunks.len(), "sparse index rebuilt");
		Ok(index)
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let fields = Fields::resolve(&index.schema())?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(Error::sparse)?;
		Ok(Self { index, reader, write_lock: Mutex::new(()), fields })
	}

	/// Adds `chunks`, after deleting everything when `replace` is set, and
	/// reloads this handle's reader.
	fn commit(&self, chunks: &[Chunk], replace: bool) -> Result<()> {
		let _guard = self.write_lock.lock().map_err(|_| Error::sparse("index write lock poisoned"))?;
		let mut writer: IndexWriter = self.index.writer(WRITER_HEAP_BYTES).map_err(Error::sparse)?;
		if replace {
			writer.delete_all_documents().map_err(Error::sparse)?;
		}
		for c in chunks {
			let meta = serde_json::to_string(&c.meta)?;
			let mut doc = doc!(
				self.fields.id => c.id.clone(),
				self.fields.doc_id => c.doc_id.clone(),
				self.fields.text => c.text.clone(),
				self.fields.meta => meta,
			);
			if let Some(code) = &c.meta.doc_code { doc.add_text(self.fields.doc_code, code); }
			writer.add_document(doc).map_err(Error::sparse)?;
		}
		writer.commit().map_err(Error::sparse)?;
		writer.wait_merging_threads().map_err(Error::sparse)?;
		self.reader.reload().map_err(Error::sparse)?;
		debug!(added = chunks.len(), replace, "sparse index committed");
		Ok(())
	}

	fn query_terms(&self, query: &str) -> Result<Vec<String>> {
		let mut analyzer = self.index.tokenizer_for_field(self.fields.text).map_err(Error::sparse)?;
		let mut stream = analyzer.token_stream(query);
		let mut terms = Vec::new();
		while stream.advance() { terms.push(stream.token().text.clone()); }
		Ok(terms)
	}

	fn load_chunk(&self, searcher: &Searcher, addr: tantivy::DocAddress) -> Result<Chunk> {
		let doc: TantivyDocument = searcher.doc(addr).map_err(Error::sparse)?;
		let text_of = |field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or("").to_string();
		let meta: ChunkMeta = serde_json::from_str(&text_of(self.fields.meta))?;
		Ok(Chunk { id: text_of(self.fields.id), doc_id: text_of(self.fields.doc_id), text: text_of(self.fields.text), meta, embedding: None })
	}
}

impl SparseIndex for TantivySparseIndex {
	fn search(&self, query: &str, k: usize, filter: Option<&MetaFilter>) -> Result<Vec<SearchHit>> {
		let terms = self.query_terms(query)?;
		if terms.is_empty() || k == 0 { return Ok(Vec::new()); }
		// Term queries rather than QueryParser: user text may contain query syntax.
		let clauses: Vec<(Occur, Box<dyn Query>)> = terms
			.iter()
			.map(|t| {
				let term = Term::from_field_text(self.fields.text, t);
				(Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)) as Box<dyn Query>)
			})
			.collect();
		let query = BooleanQuery::new(clauses);

		let fetch = if filter.is_some() { k * FILTER_OVERFETCH } else { k };
		let searcher = self.reader.searcher();
		let top_docs = searcher.search(&query, &TopDocs::with_limit(fetch)).map_err(Error::sparse)?;

		let mut scored = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			if score <= 0.0 { continue; }
			let chunk = self.load_chunk(&searcher, addr)?;
			if filter.is_some_and(|f| !chunk.meta.matches(f)) { continue; }
			scored.push((score, chunk));
			if scored.len() == k { break; }
		}

		let top = scored.first().map_or(0.0, |(s, _)| *s);
		let hits: Vec<SearchHit> = scored
			.into_iter()
			.map(|(raw, chunk)| SearchHit { chunk, score: if top > 0.0 { raw / top } else { 0.0 }, raw_score: raw, source: SourceKind::Sparse })
			.collect();
		debug!(terms = terms.len(), hits = hits.len(), "sparse search");
		Ok(hits)
	}

	fn append(&self, chunks: &[Chunk]) -> Result<()> {
		if chunks.is_empty() { return Ok(()); }
		self.commit(chunks, false)
	}

	fn chunks_by_doc_code(&self, code: &str, limit: usize) -> Result<Vec<Chunk>> {
		if limit == 0 { return Ok(Vec::new()); }
		let searcher = self.reader.searcher();
		let query = TermQuery::new(Term::from_field_text(self.fields.doc_code, code), IndexRecordOption::Basic);
		let top_docs = searcher.search(&query, &TopDocs::with_limit(limit)).map_err(Error::sparse)?;
		let mut chunks = top_docs.into_iter().map(|(_, addr)| self.load_chunk(&searcher, addr)).collect::<Result<Vec<_>>>()?;
		chunks.sort_by(|a, b| (&a.doc_id, a.meta.chunk_index).cmp(&(&b.doc_id, b.meta.chunk_index)));
		Ok(chunks)
	}

	fn count(&self) -> Result<usize> {
		Ok(usize::try_from(self.reader.searcher().num_docs()).unwrap_or(usize::MAX))
	}
}
