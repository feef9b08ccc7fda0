//! Document ingestion into both indexes, with a JSON state file recording
//! which source files are already indexed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use benefitdb_core::chunker::Chunker;
use benefitdb_core::config::DataPaths;
use benefitdb_core::loader::{load_directory, LoadedDocument};
use benefitdb_core::traits::{DenseIndex, Embedder, SparseIndex};
use benefitdb_core::types::{Chunk, Document};
use benefitdb_core::{Error, Result};
use benefitdb_text::TantivySparseIndex;
use benefitdb_vector::LanceDenseIndex;

use crate::engine::IndexSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub doc_id: String,
    pub chunks: usize,
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
}

/// Processed files keyed by their path relative to the documents directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionState {
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
    /// Set while an append is in flight. Still set on load means the two
    /// indexes may disagree and only a rebuild can realign them.
    #[serde(default)]
    pub needs_rebuild: bool,
}

impl IngestionState {
    /// A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes through a temporary sibling and renames it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files.contains_key(key)
    }
}

pub fn content_hash(document: &Document) -> Result<String> {
    let bytes = serde_json::to_vec(document)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub indexed_files: usize,
    pub unchanged_files: usize,
    pub changed_files: Vec<String>,
    pub invalid_files: Vec<(PathBuf, String)>,
    pub chunks: usize,
    pub dropped_chunks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct IndexStatus {
    pub files: BTreeMap<String, FileRecord>,
    pub needs_rebuild: bool,
    pub dense_rows: Option<usize>,
    pub sparse_docs: Option<usize>,
}

pub struct Ingestor {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    paths: DataPaths,
    table: String,
    progress: bool,
}

impl Ingestor {
    pub fn new(chunker: Chunker, embedder: Arc<dyn Embedder>, paths: DataPaths, table: &str) -> Self {
        Self { chunker, embedder, paths, table: table.to_string(), progress: false }
    }

    /// Shows a progress bar on stderr while embedding.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Indexes documents not yet recorded in the state file. With `force`, or
    /// when an earlier append left the indexes out of step, everything is
    /// re-indexed through a full rebuild since both indexes are append-only.
    pub async fn ingest(&self, force: bool) -> Result<IngestReport> {
        if force {
            return self.rebuild().await;
        }
        let mut state = IngestionState::load(&self.paths.state_file)?;
        if state.needs_rebuild {
            warn!("an earlier ingest did not finish appending to both indexes; rebuilding");
            return self.rebuild().await;
        }
        let (pending, mut report) = self.pending_documents(&state)?;
        if pending.is_empty() {
            info!(unchanged = report.unchanged_files, "no new documents to index");
            return Ok(report);
        }

        let dim = self.embedder.dim();
        let dense = LanceDenseIndex::open_or_create(&self.paths.dense_index_dir, &self.table, dim).await?;
        let sparse = TantivySparseIndex::open_or_create(&self.paths.sparse_index_dir)?;
        self.append_pending(&dense, &sparse, &pending, &mut state, &mut report).await?;
        Ok(report)
    }

    /// Incremental ingest into indexes the caller has opened. Refuses to run
    /// while the state file says the indexes need a rebuild.
    pub async fn ingest_into(&self, dense: &dyn DenseIndex, sparse: &dyn SparseIndex) -> Result<IngestReport> {
        let mut state = IngestionState::load(&self.paths.state_file)?;
        if state.needs_rebuild {
            return Err(Error::Operation("indexes are out of step; run a rebuild".into()));
        }
        let (pending, mut report) = self.pending_documents(&state)?;
        self.append_pending(dense, sparse, &pending, &mut state, &mut report).await?;
        Ok(report)
    }

    /// Rebuilds both indexes from every document and rewrites the state file.
    /// Each index is replaced in one commit, so open handles keep serving the
    /// old rows until they are reopened.
    pub async fn rebuild(&self) -> Result<IngestReport> {
        let loaded = load_directory(&self.paths.documents_dir);
        let mut report = IngestReport { invalid_files: loaded.skipped, ..IngestReport::default() };
        let mut state = IngestionState::default();
        let mut all_chunks = Vec::new();

        let bar = self.progress_bar(loaded.documents.len());
        for LoadedDocument { key, document, .. } in &loaded.documents {
            bar.set_message(key.clone());
            let (chunks, dropped) = self.embedded_chunks(document).await;
            state.files.insert(key.clone(), self.record(document, chunks.len())?);
            report.indexed_files += 1;
            report.chunks += chunks.len();
            report.dropped_chunks += dropped;
            all_chunks.extend(chunks);
            bar.inc(1);
        }
        bar.finish_and_clear();

        LanceDenseIndex::rebuild(&self.paths.dense_index_dir, &self.table, self.embedder.dim(), &all_chunks).await?;
        TantivySparseIndex::rebuild(&self.paths.sparse_index_dir, &all_chunks)?;
        state.save(&self.paths.state_file)?;
        info!(files = report.indexed_files, chunks = report.chunks, dropped = report.dropped_chunks, "full rebuild done");
        Ok(report)
    }

    /// Regenerates the sparse index from the rows stored in the dense table,
    /// without touching the source documents or the embedding service.
    pub async fn rebuild_sparse_from_dense(&self) -> Result<usize> {
        let dense = LanceDenseIndex::open(&self.paths.dense_index_dir, &self.table, self.embedder.dim()).await?;
        let chunks = dense.all_chunks().await?;
        TantivySparseIndex::rebuild(&self.paths.sparse_index_dir, &chunks)?;
        info!(chunks = chunks.len(), "sparse index rebuilt from dense rows");
        Ok(chunks.len())
    }

    /// Forgets which files were processed. The indexes are left as they are.
    pub fn reset(&self) -> Result<()> {
        if self.paths.state_file.exists() {
            fs::remove_file(&self.paths.state_file)?;
            info!(file = %self.paths.state_file.display(), "ingestion state cleared");
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let state = IngestionState::load(&self.paths.state_file)?;
        let snapshot = IndexSnapshot::open(&self.paths, &self.table, self.embedder.dim()).await?;
        let dense_rows = match &snapshot.dense {
            Some(d) => Some(d.count().await?),
            None => None,
        };
        let sparse_docs = snapshot.sparse.as_ref().map(|s| s.count()).transpose()?;
        Ok(IndexStatus { files: state.files, needs_rebuild: state.needs_rebuild, dense_rows, sparse_docs })
    }

    /// Splits loaded documents into those still to index and a report
    /// counting the rest.
    fn pending_documents(&self, state: &IngestionState) -> Result<(Vec<LoadedDocument>, IngestReport)> {
        let loaded = load_directory(&self.paths.documents_dir);
        let mut report = IngestReport { invalid_files: loaded.skipped, ..IngestReport::default() };
        let mut pending = Vec::new();
        for doc in loaded.documents {
            let Some(record) = state.files.get(&doc.key) else {
                pending.push(doc);
                continue;
            };
            report.unchanged_files += 1;
            if content_hash(&doc.document)? != record.content_hash {
                warn!(file = %doc.key, "content changed since it was indexed; run a rebuild to pick it up");
                report.changed_files.push(doc.key);
            }
        }
        Ok((pending, report))
    }

    async fn append_pending(
        &self,
        dense: &dyn DenseIndex,
        sparse: &dyn SparseIndex,
        pending: &[LoadedDocument],
        state: &mut IngestionState,
        report: &mut IngestReport,
    ) -> Result<()> {
        let bar = self.progress_bar(pending.len());
        for doc in pending {
            bar.set_message(doc.key.clone());
            let (chunks, dropped) = self.embedded_chunks(&doc.document).await;
            state.needs_rebuild = true;
            state.save(&self.paths.state_file)?;
            if let Err(e) = append_both(dense, sparse, &chunks).await {
                bar.abandon();
                warn!(file = %doc.key, error = %e, "append failed; the next ingest rebuilds both indexes");
                return Err(e);
            }
            state.files.insert(doc.key.clone(), self.record(&doc.document, chunks.len())?);
            state.needs_rebuild = false;
            state.save(&self.paths.state_file)?;
            report.indexed_files += 1;
            report.chunks += chunks.len();
            report.dropped_chunks += dropped;
            bar.inc(1);
        }
        bar.finish_and_clear();
        info!(files = report.indexed_files, chunks = report.chunks, dropped = report.dropped_chunks, "incremental ingest done");
        Ok(())
    }

    /// Chunks with embeddings attached. Chunks whose embedding failed are
    /// dropped so both indexes receive the same rows; the count is returned.
    async fn embedded_chunks(&self, document: &Document) -> (Vec<Chunk>, usize) {
        let chunks = self.chunker.chunk_document(document);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await;
        let total = chunks.len();
        let kept: Vec<Chunk> = chunks
            .into_iter()
            .zip(vectors)
            .filter_map(|(chunk, v)| v.map(|embedding| Chunk { embedding: Some(embedding), ..chunk }))
            .collect();
        let dropped = total - kept.len();
        if dropped > 0 {
            warn!(file = %document.filename, dropped, "chunks without embeddings left out of both indexes");
        }
        debug!(file = %document.filename, chunks = kept.len(), "document chunked");
        (kept, dropped)
    }

    fn record(&self, document: &Document, chunks: usize) -> Result<FileRecord> {
        Ok(FileRecord {
            doc_id: document.id.clone(),
            chunks,
            content_hash: content_hash(document)?,
            indexed_at: Utc::now(),
        })
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents {msg}")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}

async fn append_both(dense: &dyn DenseIndex, sparse: &dyn SparseIndex, chunks: &[Chunk]) -> Result<()> {
    dense.append(chunks).await?;
    sparse.append(chunks)
}

/// Fails with `NotIndexed` when neither index exists yet.
pub async fn open_indexes(paths: &DataPaths, table: &str, dim: usize) -> Result<IndexSnapshot> {
    let snapshot = IndexSnapshot::open(paths, table, dim).await?;
    if snapshot.is_empty() {
        return Err(Error::NotIndexed);
    }
    Ok(snapshot)
}
