// ── Atoms: Startup Configuration ───────────────────────────────────────────
// Layered configuration: built-in defaults -> config file -> environment.
// Per-tenant runtime config (EmbeddingConfig, VisitorAssignmentRule) is NOT
// here — it lives in the relational store, loaded per request.

use crate::atoms::error::{EngineError, EngineResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    #[serde(default)]
    pub reload: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 8080, workers: 4, reload: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub max_file_size: u64,
    pub allowed_file_types: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: "./data/uploads".into(),
            max_file_size: 50 * 1024 * 1024,
            allowed_file_types: vec![
                "application/pdf".into(),
                "text/plain".into(),
                "text/markdown".into(),
                "application/msword".into(),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document".into(),
                "text/html".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 200, batch_size: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingDefaultsConfig {
    pub provider: String,
    pub model: String,
    pub dimensions: i32,
    pub batch_size: i32,
    pub base_url: Option<String>,
}

impl Default for EmbeddingDefaultsConfig {
    fn default() -> Self {
        Self {
            provider: "openai_compatible".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            batch_size: 10,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_search_limit: usize,
    pub max_search_limit: usize,
    pub min_similarity_score: f64,
    pub rrf_k: f64,
    pub candidate_multiplier: usize,
    pub qa_generation_batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_search_limit: 10,
            max_search_limit: 100,
            min_similarity_score: 0.0,
            rrf_k: 60.0,
            candidate_multiplier: 2,
            qa_generation_batch_size: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub queue_default_timeout_minutes: i64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { queue_default_timeout_minutes: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self { base_url: "http://127.0.0.1:5001".into(), api_key: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingDefaultsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub database_path: String,
}

fn default_db_path() -> String {
    "./data/engine.sqlite3".into()
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `APP_`, `__`-separated for nesting)
/// 2. `config/default.toml` relative to `config_dir`
/// 3. Built-in defaults
pub fn load_config(config_dir: Option<&Path>) -> EngineResult<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    let config_file = config_dir
        .map(|d| d.join("default.toml"))
        .unwrap_or_else(|| Path::new("config/default.toml").to_path_buf());
    if config_file.exists() {
        figment = figment.merge(Toml::file(&config_file));
    }

    figment = figment.merge(Env::prefixed("APP_").split("__"));
    let config: AppConfig = figment.extract().map_err(|e| EngineError::config_missing(e.to_string()))?;

    if config.chunking.chunk_size < config.chunking.chunk_overlap {
        return Err(EngineError::invalid(format!(
            "chunking.chunk_size ({}) must be >= chunking.chunk_overlap ({})",
            config.chunking.chunk_size, config.chunking.chunk_overlap
        )));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retrieval.rrf_k, 60.0);
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.chunk_overlap, 200);
        assert_eq!(cfg.embedding.dimensions, 1536);
    }

    #[test]
    fn loading_defaults_succeeds_with_no_config_file() {
        let cfg = load_config(Some(Path::new("/nonexistent"))).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1000);
    }

    #[test]
    fn chunk_overlap_larger_than_chunk_size_is_rejected() {
        std::env::set_var("APP_CHUNKING__CHUNK_SIZE", "100");
        std::env::set_var("APP_CHUNKING__CHUNK_OVERLAP", "200");
        let result = load_config(Some(Path::new("/nonexistent")));
        std::env::remove_var("APP_CHUNKING__CHUNK_SIZE");
        std::env::remove_var("APP_CHUNKING__CHUNK_OVERLAP");
        assert!(result.is_err());
    }
}
