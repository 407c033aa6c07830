// ── Retrieval (C6) ──────────────────────────────────────────────────────────
// Semantic, lexical, and hybrid search, all tenant-scoped, all producing the
// same `SearchResult`/`SearchMetadata` shape so callers don't branch on
// search kind.

use crate::atoms::error::EngineResult;
use crate::atoms::ids::{CollectionId, ProjectId};
use crate::atoms::types::{SearchKind, SearchMetadata, SearchResult};
use crate::engine::embedding::EmbeddingResolver;
use crate::engine::store::Store;
use crate::engine::vector_store::VectorStore;
use std::sync::Arc;

pub struct RetrievalOptions {
    pub collection_id: Option<CollectionId>,
    pub limit: usize,
    pub min_score: f64,
    pub rrf_k: f64,
    pub candidate_multiplier: usize,
}

pub struct Retrieval<S: crate::engine::embedding::EmbeddingConfigSource> {
    store: Arc<Store>,
    vectors: VectorStore,
    embeddings: Arc<EmbeddingResolver<S>>,
}

impl<S: crate::engine::embedding::EmbeddingConfigSource> Retrieval<S> {
    pub fn new(store: Arc<Store>, embeddings: Arc<EmbeddingResolver<S>>) -> Self {
        Self { vectors: VectorStore::new(store.clone()), store, embeddings }
    }

    pub async fn semantic(&self, project_id: ProjectId, query: &str, opts: &RetrievalOptions) -> EngineResult<(Vec<SearchResult>, SearchMetadata)> {
        let started = std::time::Instant::now();
        let client = self.embeddings.resolve(project_id).await?;
        let query_vector = client.embed_query(query).await?;

        let candidates = self.vectors.knn(project_id, opts.collection_id, &query_vector, opts.limit * opts.candidate_multiplier.max(1))?;
        let total = candidates.len();
        let results = self.hydrate(project_id, candidates, opts)?;
        let returned = results.len();

        Ok((results, self.metadata(query, total, returned, started.elapsed(), SearchKind::Semantic)))
    }

    pub fn lexical(&self, project_id: ProjectId, query: &str, opts: &RetrievalOptions) -> EngineResult<(Vec<SearchResult>, SearchMetadata)> {
        let started = std::time::Instant::now();
        let ids = self.vectors.lexical(project_id, opts.collection_id, query, opts.limit * opts.candidate_multiplier.max(1))?;
        let total = ids.len();
        // Lexical-only rank has no numeric score from the FTS5 `rank` column
        // surfaced to us; rank position stands in, matching RRF's own
        // rank-based (not raw-score-based) contribution.
        let scored: Vec<(crate::atoms::ids::ChunkId, f64)> = ids
            .into_iter()
            .enumerate()
            .map(|(rank, id)| (id, 1.0 / (rank as f64 + 1.0)))
            .collect();
        let results = self.hydrate(project_id, scored, opts)?;
        let returned = results.len();
        Ok((results, self.metadata(query, total, returned, started.elapsed(), SearchKind::Lexical)))
    }

    pub async fn hybrid(&self, project_id: ProjectId, query: &str, opts: &RetrievalOptions) -> EngineResult<(Vec<SearchResult>, SearchMetadata)> {
        let started = std::time::Instant::now();
        let client = self.embeddings.resolve(project_id).await?;
        let query_vector = client.embed_query(query).await?;
        let candidate_k = opts.limit * opts.candidate_multiplier.max(1);

        let semantic_ranked: Vec<crate::atoms::ids::ChunkId> = self
            .vectors
            .knn(project_id, opts.collection_id, &query_vector, candidate_k)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let lexical_ranked = self.vectors.lexical(project_id, opts.collection_id, query, candidate_k)?;

        let fused = VectorStore::reciprocal_rank_fuse(&[semantic_ranked, lexical_ranked], opts.rrf_k);
        let total = fused.len();
        let results = self.hydrate(project_id, fused, opts)?;
        let returned = results.len();
        Ok((results, self.metadata(query, total, returned, started.elapsed(), SearchKind::Hybrid)))
    }

    /// Joins scored ids back to `file_documents` (scoped to `project_id`
    /// again as defense in depth), applies `min_score`, sorts by score desc
    /// then `created_at` desc, and truncates to `opts.limit`.
    fn hydrate(&self, project_id: ProjectId, scored: Vec<(crate::atoms::ids::ChunkId, f64)>, opts: &RetrievalOptions) -> EngineResult<Vec<SearchResult>> {
        let mut results = Vec::new();
        for (id, score) in scored {
            if score < opts.min_score {
                continue;
            }
            let Ok(doc) = self.store.get_document(project_id, id) else { continue };
            let preview: String = doc.content.chars().take(200).collect();
            results.push(SearchResult {
                document_id: doc.id,
                file_id: doc.file_id,
                collection_id: doc.collection_id,
                relevance_score: score,
                content_preview: preview,
                document_title: doc.section_title.clone(),
                content_type: doc.content_type,
                chunk_index: doc.chunk_index,
                page_number: doc.page_number,
                section_title: doc.section_title,
                tags: Some(doc.tags),
                created_at: doc.created_at,
            });
        }
        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        results.truncate(opts.limit);
        Ok(results)
    }

    fn metadata(&self, query: &str, total: usize, returned: usize, elapsed: std::time::Duration, kind: SearchKind) -> SearchMetadata {
        SearchMetadata {
            query: query.to_string(),
            total_results: total,
            returned_results: returned,
            search_time_ms: elapsed.as_millis() as u64,
            filters_applied: None,
            search_type: kind,
        }
    }
}
