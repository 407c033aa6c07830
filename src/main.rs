use deskpilot::api::{self, AppState};
use deskpilot::atoms::config::load_config;
use deskpilot::engine::assignment::AssignmentEngine;
use deskpilot::engine::channel_fabric::wukongim::{WukongimClient, WukongimConfig};
use deskpilot::engine::channel_fabric::ChannelFabric;
use deskpilot::engine::crawl::CrawlEngine;
use deskpilot::engine::embedding::EmbeddingResolver;
use deskpilot::engine::pipeline::Pipeline;
use deskpilot::engine::qa::QaPipeline;
use deskpilot::engine::retrieval::Retrieval;
use deskpilot::engine::store::Store;
use deskpilot::engine::workers::WorkerPool;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Arc::new(load_config(Some(Path::new("config")))?);
    log::info!("starting deskpilotd on {}:{}", config.server.host, config.server.port);

    let store = Arc::new(Store::open(Path::new(&config.database_path))?);
    std::fs::create_dir_all(&config.storage.upload_dir)?;

    let embeddings = Arc::new(EmbeddingResolver::new(store.clone()));
    let pipeline = Arc::new(Pipeline::new(store.clone(), embeddings.clone(), config.chunking.clone(), config.retrieval.qa_generation_batch_size));
    let qa_pipeline = Arc::new(QaPipeline::new(store.clone(), embeddings.clone()));
    let retrieval = Arc::new(Retrieval::new(store.clone(), embeddings.clone()));
    let crawl = Arc::new(CrawlEngine::new(store.clone(), pipeline.clone(), config.storage.upload_dir.clone()));

    let substrate = Arc::new(WukongimClient::new(WukongimConfig {
        base_url: config.messaging.base_url.clone(),
        api_key: config.messaging.api_key.clone(),
    }));
    let channel_fabric = Arc::new(ChannelFabric::new(store.clone(), substrate));
    let assignment = Arc::new(AssignmentEngine::new(store.clone(), config.routing.queue_default_timeout_minutes).with_channel_fabric(channel_fabric.clone()));

    let workers = WorkerPool::new(config.server.workers);

    let state = AppState {
        store,
        config: config.clone(),
        embeddings,
        pipeline,
        qa_pipeline,
        retrieval,
        crawl,
        assignment,
        channel_fabric,
        workers,
    };

    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
