//! benefitdb-text
//!
//! Lexical retrieval: the tantivy-backed BM25 sparse index and the transient
//! in-memory BM25 used to trim candidate lists locally.
pub mod index;
pub mod local_rerank;
pub mod tantivy_utils;
pub mod token_class;

pub use index::TantivySparseIndex;
pub use local_rerank::LocalReranker;
pub use token_class::TokenClassTokenizer;
