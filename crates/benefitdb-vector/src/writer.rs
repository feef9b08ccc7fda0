//! Chunk rows to Arrow record batches, and appends into the chunk table.
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use lancedb::Table;
use tracing::debug;

use benefitdb_core::types::Chunk;
use benefitdb_core::{Error, Result};

use crate::schema::build_chunk_schema;

/// Every chunk must carry an embedding of exactly `dim` values.
pub fn chunks_to_record_batch(chunks: &[Chunk], dim: i32) -> Result<RecordBatch> {
	let width = usize::try_from(dim).map_err(Error::dense)?;
	let mut ids = Vec::with_capacity(chunks.len());
	let mut doc_ids = Vec::with_capacity(chunks.len());
	let mut doc_codes: Vec<Option<String>> = Vec::with_capacity(chunks.len());
	let mut chunk_indices = Vec::with_capacity(chunks.len());
	let mut texts = Vec::with_capacity(chunks.len());
	let mut metas = Vec::with_capacity(chunks.len());
	let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
	for c in chunks {
		let Some(embedding) = c.embedding.as_ref() else {
			return Err(Error::dense(format!("chunk {} has no embedding", c.id)));
		};
		if embedding.len() != width {
			return Err(Error::dense(format!("chunk {} has {} dimensions, table expects {width}", c.id, embedding.len())));
		}
		ids.push(c.id.clone());
		doc_ids.push(c.doc_id.clone());
		doc_codes.push(c.meta.doc_code.clone());
		chunk_indices.push(i32::try_from(c.meta.chunk_index).map_err(Error::dense)?);
		texts.push(c.text.clone());
		metas.push(serde_json::to_string(&c.meta)?);
		vectors.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
	}
	RecordBatch::try_new(build_chunk_schema(dim), vec![
		Arc::new(StringArray::from(ids)),
		Arc::new(StringArray::from(doc_ids)),
		Arc::new(StringArray::from(doc_codes)),
		Arc::new(Int32Array::from(chunk_indices)),
		Arc::new(StringArray::from(texts)),
		Arc::new(StringArray::from(metas)),
		Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), dim)),
	])
	.map_err(Error::dense)
}

/// Appends to an open chunk table.
pub async fn insert_batch(table: &Table, chunks: &[Chunk], dim: i32) -> Result<()> {
	if chunks.is_empty() { return Ok(()); }
	let record_batch = chunks_to_record_batch(chunks, dim)?;
	let schema = record_batch.schema();
	let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
	table.add(reader).execute().await.map_err(Error::dense)?;
	debug!(table = table.name(), rows = chunks.len(), "dense rows appended");
	Ok(())
}
