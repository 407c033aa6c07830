// ── Document Pipeline (C3) ──────────────────────────────────────────────────
// `process_file` drives a File through pending -> processing -> chunking ->
// embedding -> completed|failed. Every step transition goes through
// `Store::transition_file_status`, which enforces the forward-only state
// machine; a failure at any step short-circuits to `failed` with a message
// and, for crawl-originated files, marks the source WebsitePage failed too.

use crate::atoms::config::ChunkingConfig;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ids::{FileId, ProjectId};
use crate::atoms::types::{FileDocument, FileStatus, WebsitePageStatus};
use crate::engine::chunking;
use crate::engine::embedding::{EmbeddingConfigSource, EmbeddingResolver};
use crate::engine::extract;
use crate::engine::llm::LlmClient;
use crate::engine::store::Store;
use chrono::Utc;
use log::warn;
use std::sync::Arc;

pub struct PipelineOutcome {
    pub document_count: i64,
    pub total_tokens: i64,
}

pub struct Pipeline<S: EmbeddingConfigSource> {
    store: Arc<Store>,
    embeddings: Arc<EmbeddingResolver<S>>,
    chunking: ChunkingConfig,
    qa_generation_batch_size: usize,
}

impl<S: EmbeddingConfigSource> Pipeline<S> {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingResolver<S>>, chunking: ChunkingConfig, qa_generation_batch_size: usize) -> Self {
        Self { store, embeddings, chunking, qa_generation_batch_size }
    }

    /// Runs the full pipeline for `file_id`. `qa_augmenter` is consulted only
    /// when `is_qa_mode` is set; its failures are logged and skipped, never
    /// fatal to the file.
    pub async fn process_file(
        &self,
        project_id: ProjectId,
        file_id: FileId,
        is_qa_mode: bool,
        qa_augmenter: Option<&LlmClient>,
    ) -> EngineResult<PipelineOutcome> {
        let file = self.store.get_file(project_id, file_id)?;

        let outcome = self.run(project_id, file_id, is_qa_mode, qa_augmenter).await;

        match &outcome {
            Ok(result) => {
                self.store.finalize_file_completion(project_id, file_id, result.document_count, result.total_tokens)?;
            }
            Err(e) => {
                let _ = self.store.transition_file_status(project_id, file_id, FileStatus::Failed, Some(&e.to_string()));
            }
        }
        let _ = file; // loaded to confirm the file exists before any step runs
        outcome
    }

    async fn run(&self, project_id: ProjectId, file_id: FileId, is_qa_mode: bool, qa_augmenter: Option<&LlmClient>) -> EngineResult<PipelineOutcome> {
        let file = self.store.get_file(project_id, file_id)?;

        self.store.transition_file_status(project_id, file_id, FileStatus::Processing, None)?;
        let bytes = tokio::fs::read(&file.storage_path)
            .await
            .map_err(|e| EngineError::invalid(format!("cannot read {}: {e}", file.storage_path)))?;
        let text = extract::extract_text(&file.content_type, &bytes)?;

        self.store.transition_file_status(project_id, file_id, FileStatus::Chunking, None)?;
        let chunks = chunking::split(&text, self.chunking.chunk_size, self.chunking.chunk_overlap);
        if chunks.is_empty() {
            return Err(EngineError::invalid("chunking produced no chunks"));
        }

        let now = Utc::now();
        let mut documents: Vec<FileDocument> = chunks
            .iter()
            .map(|c| FileDocument {
                id: crate::atoms::ids::ChunkId::new(),
                project_id,
                file_id: Some(file_id),
                collection_id: file.collection_id,
                content: c.content.clone(),
                content_length: c.character_count,
                token_count: Some(c.token_count),
                chunk_index: Some(c.index as i64),
                section_title: None,
                page_number: None,
                content_type: "paragraph".into(),
                language: file.language.clone(),
                confidence_score: None,
                tags: Default::default(),
                embedding_model: None,
                embedding_dimensions: None,
                created_at: now,
            })
            .collect();

        if is_qa_mode {
            if let Some(llm) = qa_augmenter {
                self.augment_with_qa(project_id, &file, &mut documents, llm).await;
            }
        }

        self.store.insert_documents(&documents)?;

        self.store.transition_file_status(project_id, file_id, FileStatus::Embedding, None)?;
        let client = self.embeddings.resolve(project_id).await?;
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let cap = client.provider().max_batch_size();

        for (batch_docs, batch_texts) in documents.chunks(cap).zip(texts.chunks(cap)) {
            let vectors = client.embed_documents(batch_texts).await?;
            if vectors.len() != batch_docs.len() {
                return Err(EngineError::upstream("embedding", "embedding count did not match chunk count"));
            }
            for (doc, vector) in batch_docs.iter().zip(vectors.iter()) {
                let bytes = crate::engine::vector_store::f32_vec_to_bytes(vector);
                self.store.set_document_embedding(project_id, doc.id, &bytes, client.model(), client.dimensions() as i64)?;
            }
        }

        let total_tokens: i64 = documents.iter().filter_map(|d| d.token_count).sum();
        Ok(PipelineOutcome { document_count: documents.len() as i64, total_tokens })
    }

    /// Batched LLM-assisted QA generation over the freshly cut chunks.
    /// Generated pairs are appended to `documents` as `content_type =
    /// "qa_pair"` chunks of the same file, so they ride the same
    /// insert-then-embed path as the paragraph chunks rather than living in
    /// a separate, never-embedded table. Best-effort: a batch failure is
    /// logged and the remaining batches still run.
    async fn augment_with_qa(&self, project_id: ProjectId, file: &crate::atoms::types::FileRecord, documents: &mut Vec<FileDocument>, llm: &LlmClient) {
        if file.collection_id.is_none() {
            return;
        }
        let source_contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let now = Utc::now();
        let mut generated = Vec::new();
        for batch in source_contents.chunks(self.qa_generation_batch_size.max(1)) {
            let joined = batch.join("\n---\n");
            let prompt = format!(
                "Generate concise question/answer pairs (one per line, formatted \"Q: ...\\nA: ...\") \
                 covering the key facts in the following text:\n\n{joined}"
            );
            let response = match llm.complete("You produce terse factual QA pairs from source text.", &prompt).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("qa augmentation batch failed for file {}: {e}", file.id);
                    continue;
                }
            };

            for (question, answer) in parse_qa_pairs(&response) {
                let content = format!("问题: {question}\n\n答案: {answer}");
                generated.push(FileDocument {
                    id: crate::atoms::ids::ChunkId::new(),
                    project_id,
                    file_id: Some(file.id),
                    collection_id: file.collection_id,
                    content_length: content.chars().count() as i64,
                    token_count: Some(chunking::estimate_tokens(&content)),
                    chunk_index: None,
                    section_title: None,
                    page_number: None,
                    content_type: "qa_pair".into(),
                    language: file.language.clone(),
                    confidence_score: None,
                    tags: Default::default(),
                    embedding_model: None,
                    embedding_dimensions: None,
                    created_at: now,
                    content,
                });
            }
        }
        documents.extend(generated);
    }

    /// Variant for crawl-originated files: runs the same pipeline and, on
    /// either outcome, updates the originating `WebsitePage` directly rather
    /// than searching for it.
    pub async fn process_crawled_page(
        &self,
        project_id: ProjectId,
        file_id: FileId,
        mut page: crate::atoms::types::WebsitePage,
    ) -> EngineResult<PipelineOutcome> {
        let outcome = self.run(project_id, file_id, false, None).await;
        match &outcome {
            Ok(result) => {
                self.store.finalize_file_completion(project_id, file_id, result.document_count, result.total_tokens)?;
                page.status = WebsitePageStatus::Processed;
            }
            Err(e) => {
                let _ = self.store.transition_file_status(project_id, file_id, FileStatus::Failed, Some(&e.to_string()));
                page.status = WebsitePageStatus::Failed;
                page.error_message = Some(e.to_string());
            }
        }
        self.store.update_page(&page)?;
        outcome
    }
}

fn parse_qa_pairs(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut pending_question: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(q) = line.strip_prefix("Q:") {
            pending_question = Some(q.trim().to_string());
        } else if let Some(a) = line.strip_prefix("A:") {
            if let Some(q) = pending_question.take() {
                if !q.is_empty() && !a.trim().is_empty() {
                    pairs.push((q, a.trim().to_string()));
                }
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alternating_q_and_a_lines() {
        let text = "Q: What are your hours?\nA: 9am to 6pm.\nQ: Where are you located?\nA: Downtown.";
        let pairs = parse_qa_pairs(text);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "What are your hours?");
        assert_eq!(pairs[1].1, "Downtown.");
    }

    #[test]
    fn ignores_unpaired_questions() {
        let text = "Q: dangling question with no answer";
        assert!(parse_qa_pairs(text).is_empty());
    }
}
