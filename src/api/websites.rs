use super::collections::ProjectQuery;
use super::errors::{ApiError, ApiResult};
use super::AppState;
use crate::atoms::error::EngineError;
use crate::atoms::ids::{CollectionId, WebsiteId, WebsitePageId};
use crate::atoms::types::{CrawlJobStatus, WebsiteCrawlJob};
use crate::engine::crawl::CrawlDeeperOutcome;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Deserialize)]
pub struct CreateCrawlJobRequest {
    pub collection_id: CollectionId,
    pub start_url: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: i32,
    #[serde(default = "default_max_depth")]
    pub max_depth: i32,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    pub crawl_options: Option<Value>,
}

fn default_max_pages() -> i32 {
    100
}

fn default_max_depth() -> i32 {
    3
}

pub async fn start_crawl(State(state): State<AppState>, Query(q): Query<ProjectQuery>, Json(req): Json<CreateCrawlJobRequest>) -> ApiResult<Json<WebsiteCrawlJob>> {
    if req.start_url.trim().is_empty() {
        return Err(ApiError(EngineError::invalid("start_url must not be empty")));
    }
    let now = Utc::now();
    let job = WebsiteCrawlJob {
        id: WebsiteId::new(),
        project_id: q.project_id,
        collection_id: req.collection_id,
        start_url: req.start_url,
        max_pages: req.max_pages,
        max_depth: req.max_depth,
        include_patterns: req.include_patterns,
        exclude_patterns: req.exclude_patterns,
        status: CrawlJobStatus::Pending,
        pages_discovered: 0,
        pages_crawled: 0,
        pages_processed: 0,
        pages_failed: 0,
        crawl_options: req.crawl_options,
        error_message: None,
        task_id: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    state.store.create_crawl_job(&job)?;

    let crawl = state.crawl.clone();
    let project_id = q.project_id;
    let job_id = job.id;
    state
        .workers
        .submit("crawl_job", job_id.to_string(), async move {
            if let Err(e) = crawl.run_crawl_job(project_id, job_id, CancellationToken::new()).await {
                log::warn!("crawl job {job_id} failed: {e}");
            }
        })
        .await;

    Ok(Json(job))
}

pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<WebsiteId>, Query(q): Query<ProjectQuery>) -> ApiResult<Json<WebsiteCrawlJob>> {
    let job = state.store.get_crawl_job(q.project_id, job_id)?;
    Ok(Json(job))
}

pub async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<WebsiteId>, Query(q): Query<ProjectQuery>) -> ApiResult<()> {
    state.store.update_crawl_job_status(q.project_id, job_id, CrawlJobStatus::Cancelled, None)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct AddPageRequest {
    pub url: String,
}

pub async fn add_page(State(state): State<AppState>, Path(job_id): Path<WebsiteId>, Query(q): Query<ProjectQuery>, Json(req): Json<AddPageRequest>) -> ApiResult<Json<WebsitePageId>> {
    let page_id = state.crawl.add_page(q.project_id, job_id, &req.url).await?;
    Ok(Json(page_id))
}

pub async fn crawl_deeper(State(state): State<AppState>, Path(page_id): Path<WebsitePageId>, Query(q): Query<ProjectQuery>) -> ApiResult<Json<CrawlDeeperOutcome>> {
    let outcome = state.crawl.crawl_deeper(q.project_id, page_id, CancellationToken::new()).await?;
    Ok(Json(outcome))
}
