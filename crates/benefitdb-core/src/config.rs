//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (double underscore nests, e.g. `APP_RETRIEVAL__DENSE_WEIGHT=0.5`). Typed
//! [`Settings`] are extracted over built-in defaults so every key is optional.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::{FusionMode, FusionWeights};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            other => tracing::debug!(env = other, "no environment overlay for RUST_ENV"),
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// Typed settings with defaults filled in, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(self.figment.clone())
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub rerank: RerankSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        let r = &self.retrieval;
        if r.dense_weight < 0.0 || r.sparse_weight < 0.0 {
            return Err(Error::InvalidConfig("fusion weights must be non-negative".into()));
        }
        if r.top_k == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k must be at least 1".into()));
        }
        if r.rrf_k <= 0.0 {
            return Err(Error::InvalidConfig("retrieval.rrf_k must be positive".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(Error::InvalidConfig("embedding.dimensions must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub documents_dir: String,
    pub dense_index_dir: String,
    pub sparse_index_dir: String,
    pub state_file: String,
    pub dense_table: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            documents_dir: "data/documents".to_string(),
            dense_index_dir: "data/indexes/lancedb".to_string(),
            sparse_index_dir: "data/indexes/tantivy".to_string(),
            state_file: "data/processed_files.json".to_string(),
            dense_table: "chunks".to_string(),
        }
    }
}

/// Data locations after `~`/`${VAR}` expansion, relative to a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub documents_dir: PathBuf,
    pub dense_index_dir: PathBuf,
    pub sparse_index_dir: PathBuf,
    pub state_file: PathBuf,
}

impl DataSettings {
    pub fn resolve(&self, base: &Path) -> DataPaths {
        DataPaths {
            documents_dir: resolve_with_base(base, &self.documents_dir),
            dense_index_dir: resolve_with_base(base, &self.dense_index_dir),
            sparse_index_dir: resolve_with_base(base, &self.sparse_index_dir),
            state_file: resolve_with_base(base, &self.state_file),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub dense_weight: f32,
    pub sparse_weight: f32,
    pub fusion: FusionMode,
    pub rrf_k: f32,
    pub precision_rerank: bool,
    pub fallback_max_chunks: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            dense_weight: 0.7,
            sparse_weight: 0.3,
            fusion: FusionMode::Weighted,
            rrf_k: 60.0,
            precision_rerank: true,
            fallback_max_chunks: 50,
        }
    }
}

impl RetrievalSettings {
    pub fn weights(&self) -> FusionWeights {
        FusionWeights { dense: self.dense_weight, sparse: self.sparse_weight }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub timeout_ms: u64,
    /// Use the deterministic hashing embedder instead of the service.
    pub fake: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "titan-embed-text-v2".to_string(),
            dimensions: 1024,
            timeout_ms: 30_000,
            fake: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "rerank-multilingual-v3.0".to_string(),
            timeout_ms: 15_000,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
