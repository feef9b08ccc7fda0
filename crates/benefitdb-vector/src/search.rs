//! LanceDB-backed dense index over chunk embeddings.
//!
//! The table is opened once and held; reads go to the version that was
//! current at open time plus this handle's own appends.
use std::path::Path;

use arrow_array::{Array, Float32Array, RecordBatch, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{DistanceType, Table};
use tracing::{debug, info};

use benefitdb_core::traits::DenseIndex;
use benefitdb_core::types::{Chunk, ChunkMeta, MetaFilter, SearchHit, SourceKind};
use benefitdb_core::{Error, Result};

use crate::schema::build_chunk_schema;
use crate::table::{create_table, open_db, open_table, table_exists};
use crate::writer::{chunks_to_record_batch, insert_batch};

/// With a metadata filter, this many times `k` neighbours are fetched before
/// filtering.
pub const FILTER_OVERFETCH: usize = 3;

pub struct LanceDenseIndex {
	table: Table,
	dim: i32,
}

impl LanceDenseIndex {
	/// Opens an existing chunk table. A missing directory or table is `NotFound`.
	pub async fn open(dir: &Path, table_name: &str, dim: usize) -> Result<Self> {
		if !dir.exists() {
			return Err(Error::NotFound(format!("dense index at {}", dir.display())));
		}
		let db = open_db(dir).await?;
		if !table_exists(&db, table_name).await? {
			return Err(Error::NotFound(format!("dense table {table_name} in {}", dir.display())));
		}
		Ok(Self { table: open_table(&db, table_name).await?, dim: dim_i32(dim)? })
	}

	/// Empty table at `dir`, wiping whatever was there.
	pub async fn create(dir: &Path, table_name: &str, dim: usize) -> Result<Self> {
		if dir.exists() { std::fs::remove_dir_all(dir)?; }
		std::fs::create_dir_all(dir)?;
		let dim = dim_i32(dim)?;
		let db = open_db(dir).await?;
		let table = create_table(&db, table_name, build_chunk_schema(dim), None, false).await?;
		Ok(Self { table, dim })
	}

	pub async fn open_or_create(dir: &Path, table_name: &str, dim: usize) -> Result<Self> {
		match Self::open(dir, table_name, dim).await {
			Err(Error::NotFound(_)) => Self::create(dir, table_name, dim).await,
			other => other,
		}
	}

	/// Replaces the table's rows with `chunks` in a single commit. Handles
	/// opened before the rebuild keep serving the previous version.
	pub async fn rebuild(dir: &Path, table_name: &str, dim: usize, chunks: &[Chunk]) -> Result<Self> {
		std::fs::create_dir_all(dir)?;
		let dim = dim_i32(dim)?;
		let batch = if chunks.is_empty() { None } else { Some(chunks_to_record_batch(chunks, dim)?) };
		let db = open_db(dir).await?;
		let table = create_table(&db, table_name, build_chunk_schema(dim), batch, true).await?;
		info!(dir = %dir.display(), chunks = chunks.len(), "dense index rebuilt");
		Ok(Self { table, dim })
	}

	pub fn dim(&self) -> usize { usize::try_from(self.dim).unwrap_or(0) }

	/// Every stored chunk with its embedding, ordered by (doc_id, chunk_index).
	/// Used to rebuild the sparse index without re-embedding.
	pub async fn all_chunks(&self) -> Result<Vec<Chunk>> {
		let total = self.table.count_rows(None).await.map_err(Error::dense)?;
		if total == 0 { return Ok(Vec::new()); }
		let mut stream = self.table.query().limit(total).execute().await.map_err(Error::dense)?;
		let mut chunks = Vec::with_capacity(total);
		while let Some(batch) = stream.try_next().await.map_err(Error::dense)? {
			chunks.extend(batch_to_chunks(&batch, true)?);
		}
		chunks.sort_by(|a, b| (&a.doc_id, a.meta.chunk_index).cmp(&(&b.doc_id, b.meta.chunk_index)));
		Ok(chunks)
	}
}

fn dim_i32(dim: usize) -> Result<i32> {
	i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("embedding dimension {dim} is too large")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| Error::dense(format!("{name} column missing")))
}

fn batch_to_chunks(batch: &RecordBatch, with_vectors: bool) -> Result<Vec<Chunk>> {
	let ids = string_column(batch, "id")?;
	let doc_ids = string_column(batch, "doc_id")?;
	let texts = string_column(batch, "text")?;
	let metas = string_column(batch, "meta")?;
	let vectors = if with_vectors {
		batch.column_by_name("vector").and_then(|c| c.as_any().downcast_ref::<arrow_array::FixedSizeListArray>())
	} else {
		None
	};
	let mut out = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let meta: ChunkMeta = serde_json::from_str(metas.value(i))?;
		let embedding = vectors.filter(|v| v.is_valid(i)).and_then(|v| {
			let inner = v.value(i);
			inner.as_any().downcast_ref::<Float32Array>().map(|f| f.values().to_vec())
		});
		out.push(Chunk {
			id: ids.value(i).to_string(),
			doc_id: doc_ids.value(i).to_string(),
			text: texts.value(i).to_string(),
			meta,
			embedding,
		});
	}
	Ok(out)
}

#[async_trait]
impl DenseIndex for LanceDenseIndex {
	async fn search(&self, query_vec: &[f32], k: usize, filter: Option<&MetaFilter>) -> Result<Vec<SearchHit>> {
		if k == 0 { return Ok(Vec::new()); }
		if query_vec.len() != self.dim() {
			return Err(Error::dense(format!("query has {} dimensions, index expects {}", query_vec.len(), self.dim)));
		}
		let table = &self.table;
		if table.count_rows(None).await.map_err(Error::dense)? == 0 { return Ok(Vec::new()); }

		let fetch = if filter.is_some() { k * FILTER_OVERFETCH } else { k };
		let mut results = table
			.vector_search(query_vec.to_vec())
			.map_err(Error::dense)?
			.distance_type(DistanceType::L2)
			.limit(fetch)
			.execute()
			.await
			.map_err(Error::dense)?;

		let mut hits = Vec::with_capacity(fetch);
		while let Some(batch) = results.try_next().await.map_err(Error::dense)? {
			let distances = batch
				.column_by_name("_distance")
				.and_then(|c| c.as_any().downcast_ref::<Float32Array>())
				.ok_or_else(|| Error::dense("_distance column missing"))?
				.clone();
			for (i, chunk) in batch_to_chunks(&batch, false)?.into_iter().enumerate() {
				if filter.is_some_and(|f| !chunk.meta.matches(f)) { continue; }
				let d = distances.value(i);
				hits.push(SearchHit { chunk, score: d, raw_score: d, source: SourceKind::Dense });
			}
		}
		hits.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.chunk.id.cmp(&b.chunk.id)));
		hits.truncate(k);
		debug!(fetched = fetch, hits = hits.len(), "dense search");
		Ok(hits)
	}

	async fn append(&self, chunks: &[Chunk]) -> Result<()> {
		insert_batch(&self.table, chunks, self.dim).await
	}

	async fn chunks_by_doc_code(&self, code: &str, limit: usize) -> Result<Vec<Chunk>> {
		if limit == 0 { return Ok(Vec::new()); }
		let predicate = format!("doc_code = '{}'", code.replace('\'', "''"));
		let mut stream = self.table.query().only_if(predicate).limit(limit).execute().await.map_err(Error::dense)?;
		let mut chunks = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(Error::dense)? {
			chunks.extend(batch_to_chunks(&batch, false)?);
		}
		chunks.sort_by(|a, b| (&a.doc_id, a.meta.chunk_index).cmp(&(&b.doc_id, b.meta.chunk_index)));
		chunks.truncate(limit);
		Ok(chunks)
	}

	async fn count(&self) -> Result<usize> {
		self.table.count_rows(None).await.map_err(Error::dense)
	}
}
