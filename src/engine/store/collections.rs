use super::{enum_from_str, enum_str, from_json, map_missing, parse_ts, to_json, to_ts, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::{CollectionId, ProjectId};
use crate::atoms::types::{Collection, CollectionType};
use chrono::Utc;
use rusqlite::{params, Row};

fn row_to_collection(row: &Row) -> rusqlite::Result<Collection> {
    let collection_type_raw: String = row.get("type")?;
    let metadata_raw: String = row.get("metadata")?;
    let tags_raw: String = row.get("tags")?;
    let crawl_config_raw: Option<String> = row.get("crawl_config")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;
    let deleted_raw: Option<String> = row.get("deleted_at")?;

    Ok(Collection {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        collection_type: enum_from_str::<CollectionType>(&collection_type_raw)
            .unwrap_or(CollectionType::File),
        display_name: row.get("display_name")?,
        description: row.get("description")?,
        metadata: from_json(&metadata_raw),
        tags: from_json(&tags_raw),
        crawl_config: crawl_config_raw.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
        updated_at: parse_ts(&updated_raw).unwrap_or_else(|_| Utc::now()),
        deleted_at: deleted_raw.and_then(|s| parse_ts(&s).ok()),
    })
}

impl Store {
    pub fn create_collection(&self, collection: &Collection) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO collections (id, project_id, type, display_name, description, metadata, tags, crawl_config, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                collection.id,
                collection.project_id,
                enum_str(&collection.collection_type),
                collection.display_name,
                collection.description,
                to_json(&collection.metadata),
                to_json(&collection.tags),
                collection.crawl_config.as_ref().map(to_json),
                to_ts(collection.created_at),
                to_ts(collection.updated_at),
                collection.deleted_at.map(to_ts),
            ],
        )?;
        Ok(())
    }

    pub fn update_collection(&self, collection: &Collection) -> EngineResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE collections SET display_name = ?1, description = ?2, tags = ?3, updated_at = ?4
             WHERE project_id = ?5 AND id = ?6 AND deleted_at IS NULL",
            params![
                collection.display_name,
                collection.description,
                to_json(&collection.tags),
                to_ts(collection.updated_at),
                collection.project_id,
                collection.id,
            ],
        )?;
        if affected == 0 {
            return Err(map_missing("collection", rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }

    pub fn get_collection(&self, project_id: ProjectId, id: CollectionId) -> EngineResult<Collection> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM collections WHERE project_id = ?1 AND id = ?2 AND deleted_at IS NULL",
            params![project_id, id],
            row_to_collection,
        )
        .map_err(|e| map_missing("collection", e))
    }

    pub fn list_collections(&self, project_id: ProjectId) -> EngineResult<Vec<Collection>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM collections WHERE project_id = ?1 AND deleted_at IS NULL ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![project_id], row_to_collection)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn soft_delete_collection(&self, project_id: ProjectId, id: CollectionId) -> EngineResult<()> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE collections SET deleted_at = ?1, updated_at = ?1 WHERE project_id = ?2 AND id = ?3 AND deleted_at IS NULL",
            params![to_ts(Utc::now()), project_id, id],
        )?;
        if affected == 0 {
            return Err(map_missing("collection", rusqlite::Error::QueryReturnedNoRows));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample(project_id: ProjectId) -> Collection {
        Collection {
            id: CollectionId::new(),
            project_id,
            collection_type: CollectionType::File,
            display_name: "Docs".into(),
            description: None,
            metadata: HashMap::new(),
            tags: vec!["kb".into()],
            crawl_config: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn create_get_list_and_soft_delete_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let collection = sample(project_id);
        store.create_collection(&collection).unwrap();

        let fetched = store.get_collection(project_id, collection.id).unwrap();
        assert_eq!(fetched.display_name, "Docs");
        assert_eq!(fetched.tags, vec!["kb".to_string()]);

        assert_eq!(store.list_collections(project_id).unwrap().len(), 1);

        store.soft_delete_collection(project_id, collection.id).unwrap();
        assert!(store.get_collection(project_id, collection.id).is_err());
        assert_eq!(store.list_collections(project_id).unwrap().len(), 0);
    }

    #[test]
    fn update_collection_changes_name_and_tags() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let mut collection = sample(project_id);
        store.create_collection(&collection).unwrap();

        collection.display_name = "Renamed".into();
        collection.tags = vec!["new-tag".into()];
        store.update_collection(&collection).unwrap();

        let fetched = store.get_collection(project_id, collection.id).unwrap();
        assert_eq!(fetched.display_name, "Renamed");
        assert_eq!(fetched.tags, vec!["new-tag".to_string()]);
    }

    #[test]
    fn scoping_prevents_cross_project_read() {
        let store = Store::open_in_memory().unwrap();
        let collection = sample(ProjectId::new());
        store.create_collection(&collection).unwrap();
        assert!(store.get_collection(ProjectId::new(), collection.id).is_err());
    }
}
