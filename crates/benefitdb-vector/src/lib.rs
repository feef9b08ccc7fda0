//! benefitdb-vector
//!
//! Dense retrieval over chunk embeddings: a LanceDB table persisted on disk
//! and an exhaustive in-memory index with the same contract.
pub mod flat;
pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

pub use flat::FlatL2Index;
pub use search::LanceDenseIndex;
