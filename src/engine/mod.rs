// Customer-service engine — ingestion pipelines, retrieval, and visitor
// routing built around a shared SQLite store.

pub mod assignment;
pub mod channel_fabric;
pub mod chunking;
pub mod crawl;
pub mod embedding;
pub mod extract;
pub mod intake;
pub mod llm;
pub mod pipeline;
pub mod qa;
pub mod retrieval;
pub mod store;
pub mod vector_store;
pub mod workers;
