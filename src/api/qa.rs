use super::collections::ProjectQuery;
use super::errors::{ApiError, ApiResult};
use super::AppState;
use crate::atoms::error::EngineError;
use crate::atoms::ids::{CollectionId, QaPairId};
use crate::atoms::types::{QaPair, QaStatus};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};

const MAX_IMPORT_ROWS: usize = 1000;

fn question_hash(question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(question.trim());
    format!("{:x}", hasher.finalize())
}

pub async fn list(State(state): State<AppState>, Path(collection_id): Path<CollectionId>, Query(q): Query<ProjectQuery>) -> ApiResult<Json<Vec<QaPair>>> {
    let pairs = state.store.list_qa_pairs(q.project_id, collection_id)?;
    Ok(Json(pairs))
}

#[derive(Deserialize)]
pub struct CreateQaPairRequest {
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

fn new_qa_pair(project_id: crate::atoms::ids::ProjectId, collection_id: CollectionId, req: CreateQaPairRequest, source_type: &str) -> ApiResult<QaPair> {
    if req.question.trim().is_empty() || req.answer.trim().is_empty() {
        return Err(ApiError(EngineError::invalid("question and answer must not be empty")));
    }
    let now = Utc::now();
    Ok(QaPair {
        id: QaPairId::new(),
        project_id,
        collection_id,
        question_hash: question_hash(&req.question),
        question: req.question,
        answer: req.answer,
        category: req.category,
        subcategory: req.subcategory,
        tags: req.tags,
        qa_metadata: None,
        source_type: source_type.into(),
        status: QaStatus::Pending,
        document_id: None,
        priority: req.priority,
        error_message: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
}

async fn submit_qa(state: &AppState, project_id: crate::atoms::ids::ProjectId, qa_id: QaPairId, is_update: bool) {
    let pipeline = state.qa_pipeline.clone();
    state
        .workers
        .submit("qa_pair", qa_id.to_string(), async move {
            if let Err(e) = pipeline.process_qa(project_id, qa_id, is_update).await {
                log::warn!("qa pair {qa_id} failed to process: {e}");
            }
        })
        .await;
}

pub async fn create(State(state): State<AppState>, Path(collection_id): Path<CollectionId>, Query(q): Query<ProjectQuery>, Json(req): Json<CreateQaPairRequest>) -> ApiResult<Json<QaPair>> {
    let qa = new_qa_pair(q.project_id, collection_id, req, "manual")?;
    if state.store.create_qa_pair(&qa)? {
        submit_qa(&state, q.project_id, qa.id, false).await;
    }
    Ok(Json(qa))
}

#[derive(Deserialize)]
pub struct UpdateQaPairRequest {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub tags: Option<Vec<String>>,
    pub priority: Option<i32>,
}

pub async fn update(
    State(state): State<AppState>,
    Path((_collection_id, qa_id)): Path<(CollectionId, QaPairId)>,
    Query(q): Query<ProjectQuery>,
    Json(req): Json<UpdateQaPairRequest>,
) -> ApiResult<Json<QaPair>> {
    let mut qa = state.store.get_qa_pair(q.project_id, qa_id)?;
    let mut content_changed = false;
    if let Some(question) = req.question {
        qa.question_hash = question_hash(&question);
        qa.question = question;
        content_changed = true;
    }
    if let Some(answer) = req.answer {
        qa.answer = answer;
        content_changed = true;
    }
    if req.category.is_some() {
        qa.category = req.category;
    }
    if req.subcategory.is_some() {
        qa.subcategory = req.subcategory;
    }
    if let Some(tags) = req.tags {
        qa.tags = tags;
    }
    if let Some(priority) = req.priority {
        qa.priority = priority;
    }
    qa.updated_at = Utc::now();
    state.store.update_qa_pair(&qa)?;

    if content_changed {
        submit_qa(&state, q.project_id, qa.id, true).await;
    }
    Ok(Json(qa))
}

pub async fn delete(State(state): State<AppState>, Path((_collection_id, qa_id)): Path<(CollectionId, QaPairId)>, Query(q): Query<ProjectQuery>) -> ApiResult<()> {
    state.qa_pipeline.delete_qa(q.project_id, qa_id)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct CreateQaBatchRequest {
    pub pairs: Vec<CreateQaPairRequest>,
}

#[derive(serde::Serialize)]
pub struct QaBatchResponse {
    pub created: Vec<QaPair>,
    pub skipped: usize,
}

pub async fn create_batch(State(state): State<AppState>, Path(collection_id): Path<CollectionId>, Query(q): Query<ProjectQuery>, Json(req): Json<CreateQaBatchRequest>) -> ApiResult<Json<QaBatchResponse>> {
    if req.pairs.len() > MAX_IMPORT_ROWS {
        return Err(ApiError(EngineError::invalid(format!("batch exceeds max of {MAX_IMPORT_ROWS} pairs"))));
    }
    let mut created = Vec::new();
    let mut skipped = 0;
    for pair_req in req.pairs {
        let qa = new_qa_pair(q.project_id, collection_id, pair_req, "manual")?;
        if state.store.create_qa_pair(&qa)? {
            created.push(qa);
        } else {
            skipped += 1;
        }
    }
    let ids: Vec<QaPairId> = created.iter().map(|qa| qa.id).collect();
    let pipeline = state.qa_pipeline.clone();
    let project_id = q.project_id;
    state
        .workers
        .submit("qa_batch", collection_id.to_string(), async move {
            let outcome = pipeline.process_qa_batch(project_id, &ids).await;
            log::info!("qa batch for collection {collection_id}: {} succeeded, {} failed", outcome.succeeded, outcome.failed);
        })
        .await;
    Ok(Json(QaBatchResponse { created, skipped }))
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum ImportRequest {
    Json { pairs: Vec<CreateQaPairRequest> },
    Csv { csv: String },
}

fn parse_csv(csv_text: &str) -> ApiResult<Vec<CreateQaPairRequest>> {
    let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
    let mut pairs = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ApiError(EngineError::invalid(format!("invalid csv row: {e}"))))?;
        let question = record.get(0).unwrap_or("").to_string();
        let answer = record.get(1).unwrap_or("").to_string();
        let category = record.get(2).filter(|s| !s.is_empty()).map(str::to_string);
        pairs.push(CreateQaPairRequest { question, answer, category, subcategory: None, tags: vec![], priority: 0 });
    }
    Ok(pairs)
}

pub async fn import(State(state): State<AppState>, Path(collection_id): Path<CollectionId>, Query(q): Query<ProjectQuery>, Json(req): Json<ImportRequest>) -> ApiResult<Json<QaBatchResponse>> {
    let pairs = match req {
        ImportRequest::Json { pairs } => pairs,
        ImportRequest::Csv { csv } => parse_csv(&csv)?,
    };
    if pairs.len() > MAX_IMPORT_ROWS {
        return Err(ApiError(EngineError::invalid(format!("import exceeds max of {MAX_IMPORT_ROWS} rows"))));
    }

    let mut created = Vec::new();
    let mut skipped = 0;
    for pair_req in pairs {
        let qa = new_qa_pair(q.project_id, collection_id, pair_req, "import")?;
        if state.store.create_qa_pair(&qa)? {
            created.push(qa);
        } else {
            skipped += 1;
        }
    }
    let ids: Vec<QaPairId> = created.iter().map(|qa| qa.id).collect();
    let pipeline = state.qa_pipeline.clone();
    let project_id = q.project_id;
    state
        .workers
        .submit("qa_batch", collection_id.to_string(), async move {
            let outcome = pipeline.process_qa_batch(project_id, &ids).await;
            log::info!("qa import for collection {collection_id}: {} succeeded, {} failed", outcome.succeeded, outcome.failed);
        })
        .await;
    Ok(Json(QaBatchResponse { created, skipped }))
}
