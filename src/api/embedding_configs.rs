use super::errors::{ApiError, ApiResult};
use super::AppState;
use crate::atoms::error::EngineError;
use crate::atoms::ids::{EmbeddingConfigId, ProjectId};
use crate::atoms::types::{EmbeddingConfig, EmbeddingProvider, ENFORCED_EMBEDDING_DIMENSIONS};
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct BatchSyncRequest {
    pub configs: Vec<BatchSyncConfig>,
}

#[derive(Deserialize)]
pub struct BatchSyncConfig {
    pub project_id: ProjectId,
    pub provider: EmbeddingProvider,
    pub model: String,
    #[serde(default)]
    pub dimensions: Option<i32>,
    #[serde(default = "default_batch_size")]
    pub batch_size: i32,
    pub api_key: String,
    pub base_url: Option<String>,
}

fn default_batch_size() -> i32 {
    32
}

pub async fn batch_sync(State(state): State<AppState>, Json(req): Json<BatchSyncRequest>) -> ApiResult<Json<Vec<EmbeddingConfig>>> {
    let mut synced = Vec::with_capacity(req.configs.len());
    for item in req.configs {
        if let Some(dims) = item.dimensions {
            if dims != ENFORCED_EMBEDDING_DIMENSIONS {
                return Err(ApiError(EngineError::invalid(format!(
                    "embedding config for project {} must use {} dimensions, got {}",
                    item.project_id, ENFORCED_EMBEDDING_DIMENSIONS, dims
                ))));
            }
        }
        let config = EmbeddingConfig {
            id: EmbeddingConfigId::new(),
            project_id: item.project_id,
            provider: item.provider,
            model: item.model,
            dimensions: ENFORCED_EMBEDDING_DIMENSIONS,
            batch_size: item.batch_size,
            api_key: item.api_key,
            base_url: item.base_url,
            is_active: true,
        };
        state.store.upsert_embedding_config(&config)?;
        state.embeddings.invalidate(item.project_id);
        synced.push(config);
    }
    Ok(Json(synced))
}

pub async fn get_active(State(state): State<AppState>, Path(project_id): Path<ProjectId>) -> ApiResult<Json<Option<EmbeddingConfig>>> {
    let config = state.store.get_active_embedding_config(project_id)?;
    Ok(Json(config))
}
