// ── Embedding Resolver ──────────────────────────────────────────────────────
// Per-project cache over `EmbeddingClient`. The store layer is reached only
// through `EmbeddingConfigSource` so this module has no direct dependency on
// `engine::store` — it is handed whatever implements the lookup.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ids::ProjectId;
use crate::atoms::types::EmbeddingConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::client::EmbeddingClient;

#[async_trait]
pub trait EmbeddingConfigSource: Send + Sync {
    /// The project's single active `EmbeddingConfig` row, if any.
    async fn active_embedding_config(&self, project_id: ProjectId) -> EngineResult<Option<EmbeddingConfig>>;
}

pub struct EmbeddingResolver<S: EmbeddingConfigSource> {
    source: S,
    cache: Mutex<HashMap<ProjectId, Arc<EmbeddingClient>>>,
}

impl<S: EmbeddingConfigSource> EmbeddingResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source, cache: Mutex::new(HashMap::new()) }
    }

    /// Resolves the project's active embedding client, building and caching
    /// one on first use. Returns `ConfigMissing` if the project has no
    /// active `EmbeddingConfig` row.
    pub async fn resolve(&self, project_id: ProjectId) -> EngineResult<Arc<EmbeddingClient>> {
        if let Some(client) = self.cache.lock().get(&project_id) {
            return Ok(client.clone());
        }

        let config = self
            .source
            .active_embedding_config(project_id)
            .await?
            .ok_or_else(|| EngineError::config_missing(format!("no active embedding config for project {project_id}")))?;

        let client = Arc::new(EmbeddingClient::new(config));
        self.cache.lock().insert(project_id, client.clone());
        Ok(client)
    }

    /// Drops a project's cached client so the next `resolve` re-reads its
    /// `EmbeddingConfig` row. Call after `batch-sync` changes a project's
    /// active configuration.
    pub fn invalidate(&self, project_id: ProjectId) {
        self.cache.lock().remove(&project_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::EmbeddingProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        config: EmbeddingConfig,
    }

    #[async_trait]
    impl EmbeddingConfigSource for CountingSource {
        async fn active_embedding_config(&self, _project_id: ProjectId) -> EngineResult<Option<EmbeddingConfig>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.config.clone()))
        }
    }

    fn sample_config(project_id: ProjectId) -> EmbeddingConfig {
        EmbeddingConfig {
            id: crate::atoms::ids::EmbeddingConfigId::new(),
            project_id,
            provider: EmbeddingProvider::OpenAiCompatible,
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            batch_size: 10,
            api_key: "sk-test".into(),
            base_url: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn caches_client_after_first_resolve() {
        let project_id = ProjectId::new();
        let source = CountingSource { calls: AtomicUsize::new(0), config: sample_config(project_id) };
        let resolver = EmbeddingResolver::new(source);

        resolver.resolve(project_id).await.unwrap();
        resolver.resolve(project_id).await.unwrap();

        assert_eq!(resolver.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let project_id = ProjectId::new();
        let source = CountingSource { calls: AtomicUsize::new(0), config: sample_config(project_id) };
        let resolver = EmbeddingResolver::new(source);

        resolver.resolve(project_id).await.unwrap();
        resolver.invalidate(project_id);
        resolver.resolve(project_id).await.unwrap();

        assert_eq!(resolver.source.calls.load(Ordering::SeqCst), 2);
    }

    struct EmptySource;

    #[async_trait]
    impl EmbeddingConfigSource for EmptySource {
        async fn active_embedding_config(&self, _project_id: ProjectId) -> EngineResult<Option<EmbeddingConfig>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn missing_config_is_config_missing_error() {
        let resolver = EmbeddingResolver::new(EmptySource);
        let err = resolver.resolve(ProjectId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigMissing(_)));
    }
}
