use std::env;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use benefitdb_core::chunker::Chunker;
use benefitdb_core::config::{Config, DataPaths, Settings};
use benefitdb_core::types::ScoredResult;
use benefitdb_embed::{get_default_embedder, get_precision_reranker};
use benefitdb_hybrid::ingest::open_indexes;
use benefitdb_hybrid::{FallbackEscalator, HybridRetriever, Ingestor};
use benefitdb_text::LocalReranker;

/// Hybrid retrieval over insurance benefit notices and material code lists.
#[derive(Parser, Debug)]
#[command(name = "benefitdb", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index documents not yet recorded in the state file
    Ingest {
        /// Re-index everything through a full rebuild
        #[arg(long)]
        force: bool,
    },
    /// Rebuild both indexes from the documents directory
    Rebuild {
        /// Only regenerate the sparse index from rows already in the dense table
        #[arg(long)]
        sparse_from_dense: bool,
    },
    /// Run a hybrid query
    Query {
        text: Option<String>,
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Restrict to chunks carrying this 재료코드
        #[arg(long)]
        material_code: Option<String>,
        /// Restrict to chunks carrying this 시술코드
        #[arg(long)]
        procedure_code: Option<String>,
        /// Skip widening results with the rest of a coded document
        #[arg(long)]
        no_fallback: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show processed files and index sizes
    Status,
    /// Forget processed files; the indexes are left in place
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load().context("loading configuration")?;
    let settings = config.settings().context("reading settings")?;
    let base = env::current_dir().context("resolving working directory")?;
    let paths = settings.data.resolve(&base);

    match cli.command {
        Command::Ingest { force } => {
            let report = ingestor(&settings, &paths)?.ingest(force).await.context("ingest failed")?;
            println!("✅ Ingest complete: {} files, {} chunks", report.indexed_files, report.chunks);
            if report.unchanged_files > 0 {
                println!("   {} files already indexed", report.unchanged_files);
            }
            for name in &report.changed_files {
                println!("⚠️  {name} changed since it was indexed; run `benefitdb rebuild` to pick it up");
            }
            for (path, reason) in &report.invalid_files {
                println!("⚠️  skipped {}: {reason}", path.display());
            }
            if report.dropped_chunks > 0 {
                println!("⚠️  {} chunks left out after embedding failures", report.dropped_chunks);
            }
        }
        Command::Rebuild { sparse_from_dense } => {
            let ingestor = ingestor(&settings, &paths)?;
            if sparse_from_dense {
                let n = ingestor.rebuild_sparse_from_dense().await.context("sparse rebuild failed")?;
                println!("✅ Sparse index rebuilt from {n} dense rows");
            } else {
                let report = ingestor.rebuild().await.context("rebuild failed")?;
                println!("✅ Rebuilt indexes: {} files, {} chunks", report.indexed_files, report.chunks);
            }
        }
        Command::Query { text, top_k, material_code, procedure_code, no_fallback, json } => {
            let request = QueryRequest { text, top_k, material_code, procedure_code, no_fallback };
            match run_query(&settings, &paths, request).await {
                Ok(results) if results.is_empty() => println!("No results."),
                Ok(results) if json => println!("{}", serde_json::to_string_pretty(&results)?),
                Ok(results) => print_results(&results),
                Err(e) => {
                    warn!(error = %e, "query failed");
                    println!("No results: {e:#}");
                }
            }
        }
        Command::Status => {
            let status = ingestor(&settings, &paths)?.status().await.context("reading status")?;
            println!("Documents: {}", paths.documents_dir.display());
            println!("Processed files: {}", status.files.len());
            for (name, record) in &status.files {
                println!("  {name}  {} chunks  {}", record.chunks, record.indexed_at.format("%Y-%m-%d %H:%M:%S"));
            }
            if status.needs_rebuild {
                println!("⚠️  an ingest stopped part way; the next `benefitdb ingest` rebuilds both indexes");
            }
            let show = |n: Option<usize>| n.map_or_else(|| "missing".to_string(), |n| n.to_string());
            println!("Dense rows:  {}", show(status.dense_rows));
            println!("Sparse docs: {}", show(status.sparse_docs));
        }
        Command::Reset => {
            ingestor(&settings, &paths)?.reset().context("reset failed")?;
            println!("✅ Ingestion state cleared ({})", paths.state_file.display());
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn ingestor(settings: &Settings, paths: &DataPaths) -> anyhow::Result<Ingestor> {
    let chunker = Chunker::new(settings.chunking.clone()).context("chunking settings")?;
    let embedder = get_default_embedder(&settings.embedding).context("embedding settings")?;
    Ok(Ingestor::new(chunker, embedder, paths.clone(), &settings.data.dense_table).with_progress(true))
}

struct QueryRequest {
    text: Option<String>,
    top_k: Option<usize>,
    material_code: Option<String>,
    procedure_code: Option<String>,
    no_fallback: bool,
}

async fn run_query(settings: &Settings, paths: &DataPaths, request: QueryRequest) -> anyhow::Result<Vec<ScoredResult>> {
    let embedder = get_default_embedder(&settings.embedding)?;
    let snapshot = open_indexes(paths, &settings.data.dense_table, embedder.dim()).await?;
    let reranker = get_precision_reranker(&settings.rerank)?;
    let retriever = Arc::new(
        HybridRetriever::new(snapshot, embedder, &settings.retrieval)
            .with_reranker(reranker, settings.retrieval.precision_rerank),
    );

    let top_k = request.top_k.unwrap_or(settings.retrieval.top_k);
    if request.material_code.is_some() || request.procedure_code.is_some() {
        info!(material = ?request.material_code, procedure = ?request.procedure_code, "code-filtered query");
        return Ok(retriever
            .search_by_codes(
                request.material_code.as_deref(),
                request.procedure_code.as_deref(),
                request.text.as_deref(),
                Some(top_k),
            )
            .await?);
    }

    let text = request.text.filter(|t| !t.trim().is_empty()).context("a query text or a code is required")?;
    if request.no_fallback {
        return Ok(retriever.search(&text, top_k, None).await?);
    }
    let escalator = FallbackEscalator::new(retriever, LocalReranker::default(), settings.retrieval.fallback_max_chunks);
    Ok(escalator.search_with_fallback(&text, top_k, None).await?)
}

fn print_results(results: &[ScoredResult]) {
    for r in results {
        let meta = &r.chunk.meta;
        let mut source = meta.filename.clone();
        if let Some(page) = meta.page {
            source.push_str(&format!(" p.{page}"));
        }
        if let Some(code) = &meta.doc_code {
            source.push_str(&format!(" [{code}]"));
        }
        let mut scores = format!("fused {:.4}", r.fused_score);
        if let Some(rerank) = r.rerank_score {
            scores.push_str(&format!(", rerank {rerank:.4}"));
        }
        if r.escalated {
            scores.push_str(", via document code");
        }
        println!("{}. {source} ({scores})", r.rank);
        if let (Some(field), Some(value)) = (&meta.primary_field, &meta.primary_value) {
            println!("   {field}: {value}");
        }
        let snippet: String = r.chunk.body().chars().take(200).collect();
        println!("   {}\n", snippet.replace('\n', " "));
    }
}
