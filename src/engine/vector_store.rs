// ── Vector Store (C2) ───────────────────────────────────────────────────────
// Embeddings are stored as little-endian `f32` BLOBs in `file_documents` and
// scored in-process; there is no dedicated vector column type, mirroring
// `engine/sessions.rs`'s `f32_vec_to_bytes`/`cosine_similarity` approach.
// Hybrid fusion reuses `engram/hybrid_search.rs`'s RRF accumulate-then-sort
// shape, unweighted (both lists get weight 1.0 — the spec's hybrid search has
// no query-type-dependent weighting).

use crate::atoms::error::EngineResult;
use crate::atoms::ids::{ChunkId, CollectionId, ProjectId};
use crate::engine::store::Store;
use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::sync::Arc;

pub fn f32_vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn bytes_to_f32_vec(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    dot / denom
}

struct ScoredId {
    id: ChunkId,
    score: f64,
}

impl PartialEq for ScoredId {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}
impl Eq for ScoredId {}
impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the lowest score first,
        // letting us keep only the top-k as we scan.
        other.score.partial_cmp(&self.score).unwrap_or(Ordering::Equal)
    }
}

pub struct VectorStore {
    store: Arc<Store>,
}

impl VectorStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Top-k documents by cosine similarity to `query_vector`, optionally
    /// scoped to one collection. Scores are cosine similarity in `[-1, 1]`.
    pub fn knn(
        &self,
        project_id: ProjectId,
        collection_id: Option<CollectionId>,
        query_vector: &[f32],
        k: usize,
    ) -> EngineResult<Vec<(ChunkId, f64)>> {
        let rows = self.store.embedded_document_vectors(project_id, collection_id)?;
        let mut heap: BinaryHeap<ScoredId> = BinaryHeap::with_capacity(k + 1);
        for (id, blob) in rows {
            let vector = bytes_to_f32_vec(&blob);
            let score = cosine_similarity(query_vector, &vector);
            heap.push(ScoredId { id, score });
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut out: Vec<(ChunkId, f64)> = heap.into_iter().map(|s| (s.id, s.score)).collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        Ok(out)
    }

    pub fn lexical(
        &self,
        project_id: ProjectId,
        collection_id: Option<CollectionId>,
        query: &str,
        k: usize,
    ) -> EngineResult<Vec<ChunkId>> {
        self.store.lexical_search_documents(project_id, collection_id, query, k)
    }

    /// Unweighted reciprocal rank fusion: `score(id) = sum(1 / (rrf_k + rank + 1))`
    /// over every ranked list the id appears in.
    pub fn reciprocal_rank_fuse(ranked_lists: &[Vec<ChunkId>], rrf_k: f64) -> Vec<(ChunkId, f64)> {
        let mut scores: std::collections::HashMap<ChunkId, f64> = std::collections::HashMap::new();
        for list in ranked_lists {
            for (rank, id) in list.iter().enumerate() {
                *scores.entry(*id).or_default() += 1.0 / (rrf_k + rank as f64 + 1.0);
            }
        }
        let mut fused: Vec<(ChunkId, f64)> = scores.into_iter().collect();
        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_bytes_roundtrip() {
        let v = vec![1.0f32, -2.5, 0.0, 3.25];
        let bytes = f32_vec_to_bytes(&v);
        assert_eq!(bytes_to_f32_vec(&bytes), v);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_mismatched_length_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
    }

    #[test]
    fn rrf_rewards_ids_present_in_both_lists() {
        let a = vec![ChunkId::new(), ChunkId::new()];
        let b = vec![a[1], a[0]];
        let fused = VectorStore::reciprocal_rank_fuse(&[a.clone(), b], 60.0);
        assert_eq!(fused.len(), 2);
        // Both ids appear once per list at different ranks; total score ties,
        // but both must exceed any single-list contribution.
        assert!(fused[0].1 > 1.0 / 61.0);
    }

    #[test]
    fn knn_orders_by_similarity_descending() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let vs = VectorStore::new(store.clone());
        let project_id = ProjectId::new();
        let file = crate::atoms::types::FileRecord {
            id: crate::atoms::ids::FileId::new(),
            project_id,
            collection_id: None,
            original_filename: "a.txt".into(),
            size: 1,
            content_type: "text/plain".into(),
            storage_provider: "local".into(),
            storage_path: "/tmp/a.txt".into(),
            storage_metadata: Default::default(),
            status: crate::atoms::types::FileStatus::Pending,
            language: None,
            description: None,
            tags: vec![],
            document_count: None,
            total_tokens: None,
            error_message: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            deleted_at: None,
        };
        store.create_file(&file).unwrap();

        let near = crate::atoms::ids::ChunkId::new();
        let far = crate::atoms::ids::ChunkId::new();
        let doc_near = crate::atoms::types::FileDocument {
            id: near, project_id, file_id: Some(file.id), collection_id: None,
            content: "near".into(), content_length: 4, token_count: None, chunk_index: Some(0),
            section_title: None, page_number: None, content_type: "paragraph".into(), language: None,
            confidence_score: None, tags: Default::default(), embedding_model: None, embedding_dimensions: None,
            created_at: chrono::Utc::now(),
        };
        let mut doc_far = doc_near.clone();
        doc_far.id = far;
        doc_far.chunk_index = Some(1);
        store.insert_documents(&[doc_near, doc_far]).unwrap();

        store.set_document_embedding(project_id, near, &f32_vec_to_bytes(&[1.0, 0.0]), "m", 2).unwrap();
        store.set_document_embedding(project_id, far, &f32_vec_to_bytes(&[0.0, 1.0]), "m", 2).unwrap();

        let results = vs.knn(project_id, None, &[1.0, 0.0], 2).unwrap();
        assert_eq!(results[0].0, near);
        assert_eq!(results[1].0, far);
    }
}
