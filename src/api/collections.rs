use super::errors::{ApiError, ApiResult};
use super::AppState;
use crate::atoms::error::EngineError;
use crate::atoms::ids::{CollectionId, ProjectId};
use crate::atoms::types::{Collection, CollectionType, SearchKind};
use crate::engine::retrieval::RetrievalOptions;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
pub struct ProjectQuery {
    pub project_id: ProjectId,
}

#[derive(Serialize)]
pub struct CollectionListResponse {
    pub collections: Vec<CollectionWithCount>,
}

#[derive(Serialize)]
pub struct CollectionWithCount {
    #[serde(flatten)]
    pub collection: Collection,
    pub file_count: usize,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ProjectQuery>) -> ApiResult<Json<CollectionListResponse>> {
    let collections = state.store.list_collections(q.project_id)?;
    let collections = collections
        .into_iter()
        .map(|c| {
            let file_count = state.store.list_files(q.project_id, Some(c.id)).map(|f| f.len()).unwrap_or(0);
            CollectionWithCount { collection: c, file_count }
        })
        .collect();
    Ok(Json(CollectionListResponse { collections }))
}

#[derive(Deserialize)]
pub struct CreateCollectionRequest {
    pub display_name: String,
    #[serde(rename = "type")]
    pub collection_type: CollectionType,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub crawl_config: Option<Value>,
}

pub async fn create(State(state): State<AppState>, Query(q): Query<ProjectQuery>, Json(req): Json<CreateCollectionRequest>) -> ApiResult<Json<Collection>> {
    if req.display_name.trim().is_empty() {
        return Err(ApiError(EngineError::invalid("display_name must not be empty")));
    }
    let now = Utc::now();
    let collection = Collection {
        id: CollectionId::new(),
        project_id: q.project_id,
        collection_type: req.collection_type,
        display_name: req.display_name,
        description: req.description,
        metadata: Default::default(),
        tags: req.tags,
        crawl_config: req.crawl_config,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    state.store.create_collection(&collection)?;
    Ok(Json(collection))
}

#[derive(Deserialize)]
pub struct UpdateCollectionRequest {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<CollectionId>,
    Query(q): Query<ProjectQuery>,
    Json(req): Json<UpdateCollectionRequest>,
) -> ApiResult<Json<Collection>> {
    let mut collection = state.store.get_collection(q.project_id, id)?;
    if let Some(name) = req.display_name {
        collection.display_name = name;
    }
    if req.description.is_some() {
        collection.description = req.description;
    }
    if let Some(tags) = req.tags {
        collection.tags = tags;
    }
    collection.updated_at = Utc::now();
    state.store.update_collection(&collection)?;
    Ok(Json(collection))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<CollectionId>, Query(q): Query<ProjectQuery>) -> ApiResult<()> {
    state.store.soft_delete_collection(q.project_id, id)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub search_type: Option<SearchKind>,
}

pub async fn search(
    State(state): State<AppState>,
    Path(id): Path<CollectionId>,
    Query(q): Query<ProjectQuery>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<Value>> {
    if req.query.trim().is_empty() {
        return Err(ApiError(EngineError::invalid("query must not be empty")));
    }
    let cfg = &state.config.retrieval;
    let opts = RetrievalOptions {
        collection_id: Some(id),
        limit: req.limit.unwrap_or(cfg.default_search_limit).min(cfg.max_search_limit),
        min_score: req.min_score.unwrap_or(cfg.min_similarity_score),
        rrf_k: cfg.rrf_k,
        candidate_multiplier: cfg.candidate_multiplier,
    };

    let (results, metadata) = match req.search_type.unwrap_or(SearchKind::Hybrid) {
        SearchKind::Lexical => state.retrieval.lexical(q.project_id, &req.query, &opts)?,
        SearchKind::Semantic => state.retrieval.semantic(q.project_id, &req.query, &opts).await?,
        SearchKind::Hybrid => state.retrieval.hybrid(q.project_id, &req.query, &opts).await?,
    };

    Ok(Json(serde_json::json!({ "results": results, "metadata": metadata })))
}
