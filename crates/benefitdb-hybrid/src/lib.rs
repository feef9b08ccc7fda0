//! benefitdb-hybrid
//!
//! The retrieval pipeline on top of the two indexes: query expansion,
//! concurrent dense and sparse lookup, fusion, precision rerank, document
//! code fallback, and the ingestion that feeds it all.
pub mod engine;
pub mod expander;
pub mod fallback;
pub mod fusion;
pub mod ingest;

pub use engine::{HybridRetriever, IndexSnapshot};
pub use expander::QueryExpander;
pub use fallback::FallbackEscalator;
pub use fusion::{fuse, FusionParams};
pub use ingest::{Ingestor, IngestionState, IngestReport, IndexStatus};
