// ── External Interfaces ──────────────────────────────────────────────────
// Thin `axum` routing over the engine layer: handlers parse the request,
// call into `engine::`, and map the result through `api::errors`. No
// business logic lives here.

pub mod collections;
pub mod embedding_configs;
pub mod errors;
pub mod files;
pub mod platforms;
pub mod qa;
pub mod websites;

use crate::atoms::config::AppConfig;
use crate::engine::assignment::AssignmentEngine;
use crate::engine::channel_fabric::ChannelFabric;
use crate::engine::crawl::CrawlEngine;
use crate::engine::embedding::EmbeddingResolver;
use crate::engine::pipeline::Pipeline;
use crate::engine::qa::QaPipeline;
use crate::engine::retrieval::Retrieval;
use crate::engine::store::Store;
use crate::engine::workers::WorkerPool;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// `Arc<Store>` is the concrete `EmbeddingConfigSource` everywhere the
/// engine needs one; every generic engine component is instantiated over it.
pub type Embeddings = EmbeddingResolver<Arc<Store>>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<AppConfig>,
    pub embeddings: Arc<Embeddings>,
    pub pipeline: Arc<Pipeline<Arc<Store>>>,
    pub qa_pipeline: Arc<QaPipeline<Arc<Store>>>,
    pub retrieval: Arc<Retrieval<Arc<Store>>>,
    pub crawl: Arc<CrawlEngine<Arc<Store>>>,
    pub assignment: Arc<AssignmentEngine>,
    pub channel_fabric: Arc<ChannelFabric>,
    pub workers: WorkerPool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/collections", get(collections::list).post(collections::create))
        .route("/v1/collections/{id}", put(collections::update).delete(collections::delete))
        .route("/v1/collections/{id}/documents/search", post(collections::search))
        .route("/v1/files", post(files::upload))
        .route("/v1/files/batch", post(files::upload_batch))
        .route("/v1/files/{id}/download", get(files::download))
        .route("/v1/websites/crawl", post(websites::start_crawl))
        .route("/v1/websites/crawl/{job_id}", get(websites::get_job))
        .route("/v1/websites/crawl/{job_id}/cancel", post(websites::cancel_job))
        .route("/v1/websites/crawl/{job_id}/pages", post(websites::add_page))
        .route("/v1/websites/pages/{page_id}/crawl-deeper", post(websites::crawl_deeper))
        .route("/v1/collections/{id}/qa-pairs", get(qa::list).post(qa::create))
        .route("/v1/collections/{id}/qa-pairs/{qa_id}", put(qa::update).delete(qa::delete))
        .route("/v1/collections/{id}/qa-pairs/batch", post(qa::create_batch))
        .route("/v1/collections/{id}/qa-pairs/import", post(qa::import))
        .route("/v1/embedding-configs/batch-sync", post(embedding_configs::batch_sync))
        .route("/v1/embedding-configs/{project_id}", get(embedding_configs::get_active))
        .route("/v1/platforms/callback/{api_key}", get(platforms::verify).post(platforms::callback))
        .route("/integrations/wukongim/webhook", post(platforms::wukongim_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
