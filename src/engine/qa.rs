// ── QA Pipeline (C5) ────────────────────────────────────────────────────────
// Embeds a single QA pair as one `FileDocument` (no chunking — the pair's
// "question\n\nanswer" composition is already a single indexable unit),
// reusing the document pipeline's embed-and-persist machinery.

use crate::atoms::error::EngineResult;
use crate::atoms::ids::{ChunkId, ProjectId, QaPairId};
use crate::atoms::types::{FileDocument, QaPair, QaStatus};
use crate::engine::embedding::{EmbeddingConfigSource, EmbeddingResolver};
use crate::engine::store::Store;
use crate::engine::vector_store::f32_vec_to_bytes;
use chrono::Utc;
use log::warn;
use std::sync::Arc;

pub struct QaPipeline<S: EmbeddingConfigSource> {
    store: Arc<Store>,
    embeddings: Arc<EmbeddingResolver<S>>,
}

pub struct QaBatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl<S: EmbeddingConfigSource> QaPipeline<S> {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingResolver<S>>) -> Self {
        Self { store, embeddings }
    }

    pub async fn process_qa(&self, project_id: ProjectId, qa_pair_id: QaPairId, is_update: bool) -> EngineResult<()> {
        let qa = self.store.get_qa_pair(project_id, qa_pair_id)?;
        self.store.transition_qa_status(project_id, qa_pair_id, QaStatus::Processing, None)?;

        match self.embed_and_link(project_id, &qa, is_update).await {
            Ok(()) => {
                self.store.transition_qa_status(project_id, qa_pair_id, QaStatus::Processed, None)?;
                Ok(())
            }
            Err(e) => {
                self.store.transition_qa_status(project_id, qa_pair_id, QaStatus::Failed, Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Processes a batch, never short-circuiting on a single pair's failure.
    pub async fn process_qa_batch(&self, project_id: ProjectId, qa_pair_ids: &[QaPairId]) -> QaBatchOutcome {
        let mut outcome = QaBatchOutcome { succeeded: 0, failed: 0 };
        for id in qa_pair_ids {
            match self.process_qa(project_id, *id, false).await {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    warn!("qa pair {id} failed to process: {e}");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    async fn embed_and_link(&self, project_id: ProjectId, qa: &QaPair, is_update: bool) -> EngineResult<()> {
        if is_update {
            if let Some(old_document_id) = qa.document_id {
                self.store.delete_document(project_id, old_document_id)?;
            }
        }

        let content = format!("问题: {}\n\n答案: {}", qa.question, qa.answer);
        let client = self.embeddings.resolve(project_id).await?;
        let vector = client.embed_query(&content).await?;

        let mut tags = std::collections::HashMap::new();
        tags.insert("qa_pair_id".to_string(), serde_json::json!(qa.id));
        tags.insert("source_type".to_string(), serde_json::json!("qa"));
        if let Some(category) = &qa.category {
            tags.insert("category".to_string(), serde_json::json!(category));
        }
        if let Some(subcategory) = &qa.subcategory {
            tags.insert("subcategory".to_string(), serde_json::json!(subcategory));
        }

        let document = FileDocument {
            id: ChunkId::new(),
            project_id,
            file_id: None,
            collection_id: Some(qa.collection_id),
            content,
            content_length: (qa.question.len() + qa.answer.len()) as i64,
            token_count: None,
            chunk_index: Some(0),
            section_title: Some(qa.question.chars().take(500).collect()),
            page_number: None,
            content_type: "qa_pair".into(),
            language: None,
            confidence_score: None,
            tags,
            embedding_model: Some(client.model().to_string()),
            embedding_dimensions: Some(client.dimensions() as i64),
            created_at: Utc::now(),
        };

        self.store.insert_documents(std::slice::from_ref(&document))?;
        self.store.set_document_embedding(project_id, document.id, &f32_vec_to_bytes(&vector), client.model(), client.dimensions() as i64)?;
        self.store.link_qa_document(project_id, qa.id, document.id)?;
        Ok(())
    }

    /// Removes a QA pair's indexed document first (a miss there is a
    /// warning, not an error — the row may never have finished embedding),
    /// then the QA pair row itself.
    pub fn delete_qa(&self, project_id: ProjectId, qa_pair_id: QaPairId) -> EngineResult<()> {
        let qa = self.store.get_qa_pair(project_id, qa_pair_id)?;
        if let Some(document_id) = qa.document_id {
            if let Err(e) = self.store.delete_document(project_id, document_id) {
                warn!("qa pair {qa_pair_id} had no indexed document to remove: {e}");
            }
        }
        self.store.soft_delete_qa_pair(project_id, qa_pair_id)
    }
}
