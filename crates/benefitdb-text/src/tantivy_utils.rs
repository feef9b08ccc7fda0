use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, TextAnalyzer, WhitespaceTokenizer};
use tantivy::Index;

use benefitdb_core::{Error, Result};

pub const TOKENIZER_NAME: &str = "whitespace_lower";

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("id", STRING | STORED);
	schema_builder.add_text_field("doc_id", STRING | STORED);
	schema_builder.add_text_field("doc_code", STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER_NAME).set_index_option(IndexRecordOption::WithFreqs);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	schema_builder.add_text_field("text", text_options);
	// ChunkMeta as JSON; only ever read back, never searched.
	schema_builder.add_text_field("meta", STORED);
	schema_builder.build()
}

/// Korean text carries no reliable word boundaries beyond whitespace, so terms
/// are whitespace-split and lower-cased with no stemming or stop words.
pub fn register_tokenizer(index: &Index) {
	let tokenizer = TextAnalyzer::builder(WhitespaceTokenizer::default()).filter(LowerCaser).build();
	index.tokenizers().register(TOKENIZER_NAME, tokenizer);
}

#[derive(Debug, Clone, Copy)]
pub struct Fields {
	pub id: Field,
	pub doc_id: Field,
	pub doc_code: Field,
	pub text: Field,
	pub meta: Field,
}

impl Fields {
	pub fn resolve(schema: &Schema) -> Result<Self> {
		let get = |name: &str| schema.get_field(name).map_err(Error::sparse);
		Ok(Self { id: get("id")?, doc_id: get("doc_id")?, doc_code: get("doc_code")?, text: get("text")?, meta: get("meta")? })
	}
}
