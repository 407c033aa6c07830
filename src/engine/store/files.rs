use super::{enum_from_str, enum_str, from_json, map_missing, parse_ts, to_json, to_ts, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::{ChunkId, CollectionId, FileId, ProjectId};
use crate::atoms::types::{FileDocument, FileRecord, FileStatus};
use chrono::Utc;
use rusqlite::{params, Row};

fn row_to_file(row: &Row) -> rusqlite::Result<FileRecord> {
    let status_raw: String = row.get("status")?;
    let metadata_raw: String = row.get("storage_metadata")?;
    let tags_raw: String = row.get("tags")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;
    let deleted_raw: Option<String> = row.get("deleted_at")?;

    Ok(FileRecord {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        collection_id: row.get("collection_id")?,
        original_filename: row.get("original_filename")?,
        size: row.get("size")?,
        content_type: row.get("content_type")?,
        storage_provider: row.get("storage_provider")?,
        storage_path: row.get("storage_path")?,
        storage_metadata: from_json(&metadata_raw),
        status: enum_from_str::<FileStatus>(&status_raw).unwrap_or(FileStatus::Pending),
        language: row.get("language")?,
        description: row.get("description")?,
        tags: from_json(&tags_raw),
        document_count: row.get("document_count")?,
        total_tokens: row.get("total_tokens")?,
        error_message: row.get("error_message")?,
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
        updated_at: parse_ts(&updated_raw).unwrap_or_else(|_| Utc::now()),
        deleted_at: deleted_raw.and_then(|s| parse_ts(&s).ok()),
    })
}

fn row_to_document(row: &Row) -> rusqlite::Result<FileDocument> {
    let tags_raw: String = row.get("tags")?;
    let created_raw: String = row.get("created_at")?;
    Ok(FileDocument {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        file_id: row.get("file_id")?,
        collection_id: row.get("collection_id")?,
        content: row.get("content")?,
        content_length: row.get("content_length")?,
        token_count: row.get("token_count")?,
        chunk_index: row.get("chunk_index")?,
        section_title: row.get("section_title")?,
        page_number: row.get("page_number")?,
        content_type: row.get("content_type")?,
        language: row.get("language")?,
        confidence_score: row.get("confidence_score")?,
        tags: from_json(&tags_raw),
        embedding_model: row.get("embedding_model")?,
        embedding_dimensions: row.get("embedding_dimensions")?,
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
    })
}

impl Store {
    pub fn create_file(&self, file: &FileRecord) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files (id, project_id, collection_id, original_filename, size, content_type,
                storage_provider, storage_path, storage_metadata, status, language, description, tags,
                document_count, total_tokens, error_message, created_at, updated_at, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                file.id, file.project_id, file.collection_id, file.original_filename, file.size,
                file.content_type, file.storage_provider, file.storage_path, to_json(&file.storage_metadata),
                enum_str(&file.status), file.language, file.description, to_json(&file.tags),
                file.document_count, file.total_tokens, file.error_message,
                to_ts(file.created_at), to_ts(file.updated_at), file.deleted_at.map(to_ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, project_id: ProjectId, id: FileId) -> EngineResult<FileRecord> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM files WHERE project_id = ?1 AND id = ?2 AND deleted_at IS NULL",
            params![project_id, id],
            row_to_file,
        )
        .map_err(|e| map_missing("file", e))
    }

    pub fn list_files(&self, project_id: ProjectId, collection_id: Option<CollectionId>) -> EngineResult<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM files WHERE project_id = ?1 AND deleted_at IS NULL
             AND (?2 IS NULL OR collection_id = ?2) ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![project_id, collection_id], row_to_file)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Transitions `status`, validating against `FileStatus::can_transition_to`.
    pub fn transition_file_status(
        &self,
        project_id: ProjectId,
        id: FileId,
        next: FileStatus,
        error_message: Option<&str>,
    ) -> EngineResult<()> {
        let current = self.get_file(project_id, id)?;
        if !current.status.can_transition_to(next) {
            return Err(crate::atoms::error::EngineError::invalid(format!(
                "file {id} cannot move from {:?} to {:?}",
                current.status, next
            )));
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE files SET status = ?1, error_message = ?2, updated_at = ?3 WHERE project_id = ?4 AND id = ?5",
            params![enum_str(&next), error_message, to_ts(Utc::now()), project_id, id],
        )?;
        Ok(())
    }

    pub fn soft_delete_file(&self, project_id: ProjectId, id: FileId) -> EngineResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE files SET deleted_at = ?1, updated_at = ?1 WHERE project_id = ?2 AND id = ?3 AND deleted_at IS NULL",
            params![to_ts(Utc::now()), project_id, id],
        )?;
        if affected == 0 {
            return Err(map_missing("file", rusqlite::Error::QueryReturnedNoRows));
        }
        conn.execute("DELETE FROM file_documents WHERE project_id = ?1 AND file_id = ?2", params![project_id, id])?;
        Ok(())
    }

    pub fn insert_documents(&self, documents: &[FileDocument]) -> EngineResult<()> {
        let conn = self.conn.lock();
        for doc in documents {
            conn.execute(
                "INSERT INTO file_documents (id, project_id, file_id, collection_id, content, content_length,
                    token_count, chunk_index, section_title, page_number, content_type, language,
                    confidence_score, tags, embedding_model, embedding_dimensions, embedding, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
                params![
                    doc.id, doc.project_id, doc.file_id, doc.collection_id, doc.content, doc.content_length,
                    doc.token_count, doc.chunk_index, doc.section_title, doc.page_number, doc.content_type,
                    doc.language, doc.confidence_score, to_json(&doc.tags), doc.embedding_model,
                    doc.embedding_dimensions, None::<Vec<u8>>, to_ts(doc.created_at),
                ],
            )?;
        }
        Ok(())
    }

    pub fn set_document_embedding(&self, project_id: ProjectId, id: ChunkId, embedding: &[u8], model: &str, dimensions: i64) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE file_documents SET embedding = ?1, embedding_model = ?2, embedding_dimensions = ?3
             WHERE project_id = ?4 AND id = ?5",
            params![embedding, model, dimensions, project_id, id],
        )?;
        Ok(())
    }

    pub fn list_documents_for_file(&self, project_id: ProjectId, file_id: FileId) -> EngineResult<Vec<FileDocument>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM file_documents WHERE project_id = ?1 AND file_id = ?2 ORDER BY chunk_index ASC",
        )?;
        let rows = stmt.query_map(params![project_id, file_id], row_to_document)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn delete_documents_for_file(&self, project_id: ProjectId, file_id: FileId) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM file_documents WHERE project_id = ?1 AND file_id = ?2", params![project_id, file_id])?;
        Ok(())
    }

    pub fn get_document(&self, project_id: ProjectId, id: ChunkId) -> EngineResult<FileDocument> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM file_documents WHERE project_id = ?1 AND id = ?2",
            params![project_id, id],
            row_to_document,
        )
        .map_err(|e| map_missing("document", e))
    }

    /// Candidate rows for in-process cosine scoring: `(id, embedding)` for
    /// every embedded document in scope, optionally narrowed to one collection.
    pub fn embedded_document_vectors(&self, project_id: ProjectId, collection_id: Option<CollectionId>) -> EngineResult<Vec<(ChunkId, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, embedding FROM file_documents
             WHERE project_id = ?1 AND embedding IS NOT NULL AND (?2 IS NULL OR collection_id = ?2)",
        )?;
        let rows = stmt.query_map(params![project_id, collection_id], |row| {
            Ok((row.get::<_, ChunkId>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn delete_document(&self, project_id: ProjectId, id: ChunkId) -> EngineResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute("DELETE FROM file_documents WHERE project_id = ?1 AND id = ?2", params![project_id, id])?;
        if affected == 0 {
            return Err(map_missing("document", rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    pub fn finalize_file_completion(&self, project_id: ProjectId, id: FileId, document_count: i64, total_tokens: i64) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE files SET status = ?1, document_count = ?2, total_tokens = ?3, error_message = NULL, updated_at = ?4
             WHERE project_id = ?5 AND id = ?6",
            params![enum_str(&FileStatus::Completed), document_count, total_tokens, to_ts(Utc::now()), project_id, id],
        )?;
        Ok(())
    }

    /// `(document id, bm25 rank score)` rows matching `query`, most relevant first.
    pub fn lexical_search_documents(&self, project_id: ProjectId, collection_id: Option<CollectionId>, query: &str, limit: usize) -> EngineResult<Vec<ChunkId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT fd.id FROM file_documents_fts fts
             JOIN file_documents fd ON fd.rowid = fts.rowid
             WHERE file_documents_fts MATCH ?1 AND fd.project_id = ?2 AND (?3 IS NULL OR fd.collection_id = ?3)
             ORDER BY fts.rank
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![query, project_id, collection_id, limit as i64], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_file(project_id: ProjectId) -> FileRecord {
        FileRecord {
            id: FileId::new(),
            project_id,
            collection_id: None,
            original_filename: "notes.pdf".into(),
            size: 1024,
            content_type: "application/pdf".into(),
            storage_provider: "local".into(),
            storage_path: "/tmp/notes.pdf".into(),
            storage_metadata: HashMap::new(),
            status: FileStatus::Pending,
            language: None,
            description: None,
            tags: vec![],
            document_count: None,
            total_tokens: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn status_transitions_enforce_forward_only() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let file = sample_file(project_id);
        store.create_file(&file).unwrap();

        store.transition_file_status(project_id, file.id, FileStatus::Processing, None).unwrap();
        assert!(store.transition_file_status(project_id, file.id, FileStatus::Pending, None).is_err());
        store.transition_file_status(project_id, file.id, FileStatus::Chunking, None).unwrap();

        let fetched = store.get_file(project_id, file.id).unwrap();
        assert_eq!(fetched.status, FileStatus::Chunking);
    }

    #[test]
    fn soft_delete_file_cascades_documents() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let file = sample_file(project_id);
        store.create_file(&file).unwrap();

        let doc = FileDocument {
            id: ChunkId::new(),
            project_id,
            file_id: Some(file.id),
            collection_id: None,
            content: "hello world".into(),
            content_length: 11,
            token_count: Some(2),
            chunk_index: Some(0),
            section_title: None,
            page_number: None,
            content_type: "paragraph".into(),
            language: None,
            confidence_score: None,
            tags: HashMap::new(),
            embedding_model: None,
            embedding_dimensions: None,
            created_at: Utc::now(),
        };
        store.insert_documents(&[doc]).unwrap();
        assert_eq!(store.list_documents_for_file(project_id, file.id).unwrap().len(), 1);

        store.soft_delete_file(project_id, file.id).unwrap();
        assert_eq!(store.list_documents_for_file(project_id, file.id).unwrap().len(), 0);
    }
}
