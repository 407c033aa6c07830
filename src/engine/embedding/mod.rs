// ── Engine: Embedding Resolver (C1) ────────────────────────────────────────
// Resolves a project's active `EmbeddingConfig` into a pluggable client and
// caches clients per project so repeated calls don't re-read config.

mod client;
mod resolver;

pub use client::EmbeddingClient;
pub use resolver::{EmbeddingConfigSource, EmbeddingResolver};
