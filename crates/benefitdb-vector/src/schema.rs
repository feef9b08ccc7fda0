use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// One row per chunk. `meta` holds the serialized chunk metadata; `doc_code`
/// is duplicated out of it so whole-document lookups can filter on a column.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("doc_id", DataType::Utf8, false),
		Field::new("doc_code", DataType::Utf8, true),
		Field::new("chunk_index", DataType::Int32, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("meta", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}
