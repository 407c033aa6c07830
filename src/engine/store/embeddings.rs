use super::{enum_from_str, enum_str, map_missing, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::{EmbeddingConfigId, ProjectId};
use crate::atoms::types::{EmbeddingConfig, EmbeddingProvider};
use crate::engine::embedding::EmbeddingConfigSource;
use async_trait::async_trait;
use rusqlite::{params, Row};

fn row_to_config(row: &Row) -> rusqlite::Result<EmbeddingConfig> {
    let provider_raw: String = row.get("provider")?;
    Ok(EmbeddingConfig {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        provider: enum_from_str::<EmbeddingProvider>(&provider_raw).unwrap_or(EmbeddingProvider::OpenAiCompatible),
        model: row.get("model")?,
        dimensions: row.get("dimensions")?,
        batch_size: row.get("batch_size")?,
        api_key: row.get("api_key")?,
        base_url: row.get("base_url")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

impl Store {
    /// Inserts a config. If `is_active`, any previously active config for
    /// the same project is deactivated first (only one active config per
    /// project, enforced by the partial unique index).
    pub fn upsert_embedding_config(&self, config: &EmbeddingConfig) -> EngineResult<()> {
        let conn = self.conn.lock();
        if config.is_active {
            conn.execute(
                "UPDATE embedding_configs SET is_active = 0 WHERE project_id = ?1 AND id != ?2",
                params![config.project_id, config.id],
            )?;
        }
        conn.execute(
            "INSERT INTO embedding_configs (id, project_id, provider, model, dimensions, batch_size, api_key, base_url, is_active)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
             ON CONFLICT(id) DO UPDATE SET provider=excluded.provider, model=excluded.model, dimensions=excluded.dimensions,
                batch_size=excluded.batch_size, api_key=excluded.api_key, base_url=excluded.base_url, is_active=excluded.is_active",
            params![
                config.id, config.project_id, enum_str(&config.provider), config.model, config.dimensions,
                config.batch_size, config.api_key, config.base_url, config.is_active as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_active_embedding_config(&self, project_id: ProjectId) -> EngineResult<Option<EmbeddingConfig>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT * FROM embedding_configs WHERE project_id = ?1 AND is_active = 1",
            params![project_id],
            row_to_config,
        );
        match result {
            Ok(config) => Ok(Some(config)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_embedding_configs(&self, project_id: ProjectId) -> EngineResult<Vec<EmbeddingConfig>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM embedding_configs WHERE project_id = ?1")?;
        let rows = stmt.query_map(params![project_id], row_to_config)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    #[allow(dead_code)]
    pub fn get_embedding_config(&self, project_id: ProjectId, id: EmbeddingConfigId) -> EngineResult<EmbeddingConfig> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM embedding_configs WHERE project_id = ?1 AND id = ?2",
            params![project_id, id],
            row_to_config,
        )
        .map_err(|e| map_missing("embedding_config", e))
    }
}

/// Wires `Store` into `engine::embedding::EmbeddingResolver` without the
/// embedding module depending on `engine::store` directly.
#[async_trait]
impl EmbeddingConfigSource for std::sync::Arc<Store> {
    async fn active_embedding_config(&self, project_id: ProjectId) -> EngineResult<Option<EmbeddingConfig>> {
        self.get_active_embedding_config(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activating_a_new_config_deactivates_the_previous_one() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();

        let first = EmbeddingConfig {
            id: EmbeddingConfigId::new(),
            project_id,
            provider: EmbeddingProvider::OpenAiCompatible,
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            batch_size: 10,
            api_key: "sk-a".into(),
            base_url: None,
            is_active: true,
        };
        store.upsert_embedding_config(&first).unwrap();

        let second = EmbeddingConfig { id: EmbeddingConfigId::new(), model: "qwen3-embedding".into(), provider: EmbeddingProvider::Qwen3, ..first.clone() };
        store.upsert_embedding_config(&second).unwrap();

        let active = store.get_active_embedding_config(project_id).unwrap().unwrap();
        assert_eq!(active.id.0, second.id.0);
        assert_eq!(store.list_embedding_configs(project_id).unwrap().len(), 2);
    }
}
