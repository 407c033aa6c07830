use super::{enum_from_str, enum_str, from_json, map_missing, parse_ts, to_json, to_ts, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::{CollectionId, ProjectId, QaPairId};
use crate::atoms::types::{QaPair, QaStatus};
use chrono::Utc;
use rusqlite::{params, Row};

fn row_to_qa_pair(row: &Row) -> rusqlite::Result<QaPair> {
    let status_raw: String = row.get("status")?;
    let tags_raw: String = row.get("tags")?;
    let metadata_raw: Option<String> = row.get("qa_metadata")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;
    let deleted_raw: Option<String> = row.get("deleted_at")?;

    Ok(QaPair {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        collection_id: row.get("collection_id")?,
        question: row.get("question")?,
        answer: row.get("answer")?,
        question_hash: row.get("question_hash")?,
        category: row.get("category")?,
        subcategory: row.get("subcategory")?,
        tags: from_json(&tags_raw),
        qa_metadata: metadata_raw.and_then(|s| serde_json::from_str(&s).ok()),
        source_type: row.get("source_type")?,
        status: enum_from_str::<QaStatus>(&status_raw).unwrap_or(QaStatus::Pending),
        document_id: row.get("document_id")?,
        priority: row.get("priority")?,
        error_message: row.get("error_message")?,
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
        updated_at: parse_ts(&updated_raw).unwrap_or_else(|_| Utc::now()),
        deleted_at: deleted_raw.and_then(|s| parse_ts(&s).ok()),
    })
}

impl Store {
    /// Inserts, or no-ops (`Ok(false)`) on a live duplicate `(collection_id, question_hash)`.
    pub fn create_qa_pair(&self, qa: &QaPair) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT OR IGNORE INTO qa_pairs (id, project_id, collection_id, question, answer, question_hash,
                category, subcategory, tags, qa_metadata, source_type, status, document_id, priority,
                error_message, created_at, updated_at, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                qa.id, qa.project_id, qa.collection_id, qa.question, qa.answer, qa.question_hash,
                qa.category, qa.subcategory, to_json(&qa.tags), qa.qa_metadata.as_ref().map(to_json),
                qa.source_type, enum_str(&qa.status), qa.document_id, qa.priority, qa.error_message,
                to_ts(qa.created_at), to_ts(qa.updated_at), qa.deleted_at.map(to_ts),
            ],
        )?;
        Ok(result == 1)
    }

    pub fn get_qa_pair(&self, project_id: ProjectId, id: QaPairId) -> EngineResult<QaPair> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM qa_pairs WHERE project_id = ?1 AND id = ?2 AND deleted_at IS NULL",
            params![project_id, id],
            row_to_qa_pair,
        )
        .map_err(|e| map_missing("qa_pair", e))
    }

    pub fn list_qa_pairs(&self, project_id: ProjectId, collection_id: CollectionId) -> EngineResult<Vec<QaPair>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM qa_pairs WHERE project_id = ?1 AND collection_id = ?2 AND deleted_at IS NULL ORDER BY priority DESC, created_at DESC",
        )?;
        let rows = stmt.query_map(params![project_id, collection_id], row_to_qa_pair)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn update_qa_pair(&self, qa: &QaPair) -> EngineResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE qa_pairs SET question = ?1, answer = ?2, question_hash = ?3, category = ?4, subcategory = ?5,
                tags = ?6, qa_metadata = ?7, priority = ?8, updated_at = ?9
             WHERE project_id = ?10 AND id = ?11 AND deleted_at IS NULL",
            params![
                qa.question, qa.answer, qa.question_hash, qa.category, qa.subcategory,
                to_json(&qa.tags), qa.qa_metadata.as_ref().map(to_json), qa.priority, to_ts(qa.updated_at),
                qa.project_id, qa.id,
            ],
        )?;
        if affected == 0 {
            return Err(map_missing("qa_pair", rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    pub fn transition_qa_status(&self, project_id: ProjectId, id: QaPairId, next: QaStatus, error_message: Option<&str>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE qa_pairs SET status = ?1, error_message = ?2, updated_at = ?3 WHERE project_id = ?4 AND id = ?5",
            params![enum_str(&next), error_message, to_ts(Utc::now()), project_id, id],
        )?;
        Ok(())
    }

    pub fn link_qa_document(&self, project_id: ProjectId, id: QaPairId, document_id: crate::atoms::ids::ChunkId) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE qa_pairs SET document_id = ?1, updated_at = ?2 WHERE project_id = ?3 AND id = ?4",
            params![document_id, to_ts(Utc::now()), project_id, id],
        )?;
        Ok(())
    }

    pub fn soft_delete_qa_pair(&self, project_id: ProjectId, id: QaPairId) -> EngineResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE qa_pairs SET deleted_at = ?1, updated_at = ?1 WHERE project_id = ?2 AND id = ?3 AND deleted_at IS NULL",
            params![to_ts(Utc::now()), project_id, id],
        )?;
        if affected == 0 {
            return Err(map_missing("qa_pair", rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(project_id: ProjectId, collection_id: CollectionId) -> QaPair {
        QaPair {
            id: QaPairId::new(),
            project_id,
            collection_id,
            question: "What are your hours?".into(),
            answer: "9am to 6pm.".into(),
            question_hash: "abc123".into(),
            category: None,
            subcategory: None,
            tags: vec![],
            qa_metadata: None,
            source_type: "manual".into(),
            status: QaStatus::Pending,
            document_id: None,
            priority: 0,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn duplicate_question_hash_in_same_collection_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let collection_id = CollectionId::new();
        let first = sample(project_id, collection_id);
        assert!(store.create_qa_pair(&first).unwrap());

        let mut second = sample(project_id, collection_id);
        second.id = QaPairId::new();
        assert!(!store.create_qa_pair(&second).unwrap());

        assert_eq!(store.list_qa_pairs(project_id, collection_id).unwrap().len(), 1);
    }
}
