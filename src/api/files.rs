use super::collections::ProjectQuery;
use super::errors::{ApiError, ApiResult};
use super::AppState;
use crate::atoms::error::EngineError;
use crate::atoms::ids::{CollectionId, FileId, ProjectId};
use crate::atoms::types::{CollectionType, FileRecord, FileStatus};
use axum::extract::{Multipart, Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path as StdPath, PathBuf};

#[derive(Serialize)]
pub struct UploadResult {
    pub file: Option<FileRecord>,
    pub error: Option<String>,
    pub original_filename: String,
}

struct UploadedField {
    filename: String,
    content_type: String,
    data: Vec<u8>,
}

async fn read_upload_field(multipart: &mut Multipart) -> ApiResult<(Option<UploadedField>, Option<CollectionId>, Option<String>)> {
    let mut file_field = None;
    let mut collection_id = None;
    let mut description = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError(EngineError::invalid(e.to_string())))? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                let data = field.bytes().await.map_err(|e| ApiError(EngineError::invalid(e.to_string())))?.to_vec();
                file_field = Some(UploadedField { filename, content_type, data });
            }
            "collection_id" => {
                let text = field.text().await.unwrap_or_default();
                collection_id = CollectionId::parse(&text).ok();
            }
            "description" => {
                description = Some(field.text().await.unwrap_or_default());
            }
            _ => {}
        }
    }
    Ok((file_field, collection_id, description))
}

async fn store_upload(state: &AppState, project_id: ProjectId, collection_id: Option<CollectionId>, description: Option<String>, field: UploadedField) -> ApiResult<FileRecord> {
    let storage = &state.config.storage;
    if !storage.allowed_file_types.iter().any(|t| t == &field.content_type) {
        return Err(ApiError(EngineError::invalid(format!("content_type {} is not allowed", field.content_type))));
    }
    if field.data.len() as u64 > storage.max_file_size {
        return Err(ApiError(EngineError::invalid(format!("file exceeds max_file_size of {} bytes", storage.max_file_size))));
    }

    let file_id = FileId::new();
    let dir = StdPath::new(&storage.upload_dir).join("files");
    tokio::fs::create_dir_all(&dir).await.map_err(EngineError::Io)?;
    let storage_path = dir.join(format!("{file_id}-{}", field.filename));
    tokio::fs::write(&storage_path, &field.data).await.map_err(EngineError::Io)?;

    let is_qa_mode = if let Some(cid) = collection_id { state.store.get_collection(project_id, cid).map(|c| c.collection_type == CollectionType::Qa).unwrap_or(false) } else { false };

    let now = Utc::now();
    let file = FileRecord {
        id: file_id,
        project_id,
        collection_id,
        original_filename: field.filename.clone(),
        size: field.data.len() as i64,
        content_type: field.content_type,
        storage_provider: "local".into(),
        storage_path: storage_path.to_string_lossy().to_string(),
        storage_metadata: HashMap::new(),
        status: FileStatus::Pending,
        language: None,
        description,
        tags: vec![],
        document_count: None,
        total_tokens: None,
        error_message: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    state.store.create_file(&file)?;

    let pipeline = state.pipeline.clone();
    state
        .workers
        .submit("file", file.id.to_string(), async move {
            if let Err(e) = pipeline.process_file(project_id, file_id, is_qa_mode, None).await {
                log::warn!("file {file_id} pipeline failed: {e}");
            }
        })
        .await;

    Ok(file)
}

pub async fn upload(State(state): State<AppState>, Query(q): Query<ProjectQuery>, mut multipart: Multipart) -> ApiResult<Json<FileRecord>> {
    let (field, collection_id, description) = read_upload_field(&mut multipart).await?;
    let field = field.ok_or_else(|| ApiError(EngineError::invalid("missing \"file\" field")))?;
    let file = store_upload(&state, q.project_id, collection_id, description, field).await?;
    Ok(Json(file))
}

pub async fn upload_batch(State(state): State<AppState>, Query(q): Query<ProjectQuery>, mut multipart: Multipart) -> ApiResult<Json<Vec<UploadResult>>> {
    let mut results = Vec::new();
    let mut collection_id = None;
    let mut description = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError(EngineError::invalid(e.to_string())))? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "collection_id" => collection_id = CollectionId::parse(&field.text().await.unwrap_or_default()).ok(),
            "description" => description = Some(field.text().await.unwrap_or_default()),
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                let data = match field.bytes().await {
                    Ok(b) => b.to_vec(),
                    Err(e) => {
                        results.push(UploadResult { file: None, error: Some(e.to_string()), original_filename: filename });
                        continue;
                    }
                };
                let uploaded = UploadedField { filename: filename.clone(), content_type, data };
                match store_upload(&state, q.project_id, collection_id, description.clone(), uploaded).await {
                    Ok(file) => results.push(UploadResult { file: Some(file), error: None, original_filename: filename }),
                    Err(e) => results.push(UploadResult { file: None, error: Some(e.0.to_string()), original_filename: filename }),
                }
            }
            _ => {}
        }
    }

    Ok(Json(results))
}

pub async fn download(State(state): State<AppState>, Path(id): Path<FileId>, Query(q): Query<ProjectQuery>) -> ApiResult<impl IntoResponse> {
    let file = state.store.get_file(q.project_id, id)?;

    let upload_root = PathBuf::from(&state.config.storage.upload_dir).canonicalize().map_err(EngineError::Io)?;
    let resolved = PathBuf::from(&file.storage_path).canonicalize().map_err(EngineError::Io)?;
    if !resolved.starts_with(&upload_root) {
        return Err(ApiError(EngineError::Forbidden("file path escapes upload root".into())));
    }

    let bytes = tokio::fs::read(&resolved).await.map_err(EngineError::Io)?;
    let headers = [
        (axum::http::header::CONTENT_TYPE, file.content_type.clone()),
        (axum::http::header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file.original_filename)),
    ];
    Ok((headers, bytes))
}
