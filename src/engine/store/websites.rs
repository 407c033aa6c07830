use super::{enum_from_str, enum_str, from_json, map_missing, parse_ts, to_json, to_ts, Store};
use crate::atoms::error::EngineResult;
use crate::atoms::ids::{CollectionId, FileId, ProjectId, WebsiteId, WebsitePageId};
use crate::atoms::types::{CrawlJobStatus, WebsiteCrawlJob, WebsitePage, WebsitePageStatus};
use chrono::Utc;
use rusqlite::{params, Row};

fn row_to_job(row: &Row) -> rusqlite::Result<WebsiteCrawlJob> {
    let status_raw: String = row.get("status")?;
    let include_raw: String = row.get("include_patterns")?;
    let exclude_raw: String = row.get("exclude_patterns")?;
    let options_raw: Option<String> = row.get("crawl_options")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;
    let deleted_raw: Option<String> = row.get("deleted_at")?;

    Ok(WebsiteCrawlJob {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        collection_id: row.get("collection_id")?,
        start_url: row.get("start_url")?,
        max_pages: row.get("max_pages")?,
        max_depth: row.get("max_depth")?,
        include_patterns: from_json(&include_raw),
        exclude_patterns: from_json(&exclude_raw),
        status: enum_from_str::<CrawlJobStatus>(&status_raw).unwrap_or(CrawlJobStatus::Pending),
        pages_discovered: row.get("pages_discovered")?,
        pages_crawled: row.get("pages_crawled")?,
        pages_processed: row.get("pages_processed")?,
        pages_failed: row.get("pages_failed")?,
        crawl_options: options_raw.and_then(|s| serde_json::from_str(&s).ok()),
        error_message: row.get("error_message")?,
        task_id: row.get("task_id")?,
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
        updated_at: parse_ts(&updated_raw).unwrap_or_else(|_| Utc::now()),
        deleted_at: deleted_raw.and_then(|s| parse_ts(&s).ok()),
    })
}

fn row_to_page(row: &Row) -> rusqlite::Result<WebsitePage> {
    let status_raw: String = row.get("status")?;
    let metadata_raw: String = row.get("page_metadata")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;

    Ok(WebsitePage {
        id: row.get("id")?,
        crawl_job_id: row.get("crawl_job_id")?,
        collection_id: row.get("collection_id")?,
        project_id: row.get("project_id")?,
        file_id: row.get("file_id")?,
        url: row.get("url")?,
        url_hash: row.get("url_hash")?,
        title: row.get("title")?,
        depth: row.get("depth")?,
        content_markdown: row.get("content_markdown")?,
        content_length: row.get("content_length")?,
        content_hash: row.get("content_hash")?,
        meta_description: row.get("meta_description")?,
        page_metadata: from_json(&metadata_raw),
        status: enum_from_str::<WebsitePageStatus>(&status_raw).unwrap_or(WebsitePageStatus::Pending),
        http_status_code: row.get("http_status_code")?,
        error_message: row.get("error_message")?,
        created_at: parse_ts(&created_raw).unwrap_or_else(|_| Utc::now()),
        updated_at: parse_ts(&updated_raw).unwrap_or_else(|_| Utc::now()),
    })
}

impl Store {
    pub fn create_crawl_job(&self, job: &WebsiteCrawlJob) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO website_crawl_jobs (id, project_id, collection_id, start_url, max_pages, max_depth,
                include_patterns, exclude_patterns, status, pages_discovered, pages_crawled, pages_processed,
                pages_failed, crawl_options, error_message, task_id, created_at, updated_at, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                job.id, job.project_id, job.collection_id, job.start_url, job.max_pages, job.max_depth,
                to_json(&job.include_patterns), to_json(&job.exclude_patterns), enum_str(&job.status),
                job.pages_discovered, job.pages_crawled, job.pages_processed, job.pages_failed,
                job.crawl_options.as_ref().map(to_json), job.error_message, job.task_id,
                to_ts(job.created_at), to_ts(job.updated_at), job.deleted_at.map(to_ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_crawl_job(&self, project_id: ProjectId, id: WebsiteId) -> EngineResult<WebsiteCrawlJob> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM website_crawl_jobs WHERE project_id = ?1 AND id = ?2 AND deleted_at IS NULL",
            params![project_id, id],
            row_to_job,
        )
        .map_err(|e| map_missing("crawl_job", e))
    }

    pub fn update_crawl_job_status(&self, project_id: ProjectId, id: WebsiteId, status: CrawlJobStatus, error_message: Option<&str>) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE website_crawl_jobs SET status = ?1, error_message = ?2, updated_at = ?3 WHERE project_id = ?4 AND id = ?5",
            params![enum_str(&status), error_message, to_ts(Utc::now()), project_id, id],
        )?;
        Ok(())
    }

    pub fn bump_crawl_counters(&self, project_id: ProjectId, id: WebsiteId, discovered: i32, crawled: i32, processed: i32, failed: i32) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE website_crawl_jobs SET pages_discovered = pages_discovered + ?1, pages_crawled = pages_crawled + ?2,
                pages_processed = pages_processed + ?3, pages_failed = pages_failed + ?4, updated_at = ?5
             WHERE project_id = ?6 AND id = ?7",
            params![discovered, crawled, processed, failed, to_ts(Utc::now()), project_id, id],
        )?;
        Ok(())
    }

    /// Inserts a page, returning `false` if `(crawl_job_id, url_hash)` was already seen.
    pub fn insert_page_if_new(&self, page: &WebsitePage) -> EngineResult<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "INSERT OR IGNORE INTO website_pages (id, crawl_job_id, collection_id, project_id, file_id, url,
                url_hash, title, depth, content_markdown, content_length, content_hash, meta_description,
                page_metadata, status, http_status_code, error_message, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                page.id, page.crawl_job_id, page.collection_id, page.project_id, page.file_id, page.url,
                page.url_hash, page.title, page.depth, page.content_markdown, page.content_length,
                page.content_hash, page.meta_description, to_json(&page.page_metadata), enum_str(&page.status),
                page.http_status_code, page.error_message, to_ts(page.created_at), to_ts(page.updated_at),
            ],
        )?;
        Ok(affected == 1)
    }

    pub fn update_page(&self, page: &WebsitePage) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE website_pages SET title = ?1, content_markdown = ?2, content_length = ?3, content_hash = ?4,
                meta_description = ?5, page_metadata = ?6, status = ?7, http_status_code = ?8, error_message = ?9,
                file_id = ?10, updated_at = ?11
             WHERE project_id = ?12 AND id = ?13",
            params![
                page.title, page.content_markdown, page.content_length, page.content_hash, page.meta_description,
                to_json(&page.page_metadata), enum_str(&page.status), page.http_status_code, page.error_message,
                page.file_id, to_ts(Utc::now()), page.project_id, page.id,
            ],
        )?;
        Ok(())
    }

    pub fn list_pages(&self, project_id: ProjectId, crawl_job_id: WebsiteId) -> EngineResult<Vec<WebsitePage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM website_pages WHERE project_id = ?1 AND crawl_job_id = ?2 ORDER BY depth ASC, created_at ASC",
        )?;
        let rows = stmt.query_map(params![project_id, crawl_job_id], row_to_page)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_page(&self, project_id: ProjectId, page_id: WebsitePageId) -> EngineResult<WebsitePage> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM website_pages WHERE project_id = ?1 AND id = ?2",
            params![project_id, page_id],
            row_to_page,
        )
        .map_err(|e| map_missing("website_page", e))
    }

    /// Used by the crawl engine to check if a page file already exists before re-fetching.
    #[allow(dead_code)]
    pub fn page_file_id(&self, project_id: ProjectId, page_id: WebsitePageId) -> EngineResult<Option<FileId>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT file_id FROM website_pages WHERE project_id = ?1 AND id = ?2",
            params![project_id, page_id],
            |row| row.get(0),
        )
        .map_err(|e| map_missing("website_page", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(project_id: ProjectId, collection_id: CollectionId) -> WebsiteCrawlJob {
        WebsiteCrawlJob {
            id: WebsiteId::new(),
            project_id,
            collection_id,
            start_url: "https://example.com".into(),
            max_pages: 50,
            max_depth: 2,
            include_patterns: vec![],
            exclude_patterns: vec![],
            status: CrawlJobStatus::Pending,
            pages_discovered: 0,
            pages_crawled: 0,
            pages_processed: 0,
            pages_failed: 0,
            crawl_options: None,
            error_message: None,
            task_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn dedup_by_url_hash_within_job() {
        let store = Store::open_in_memory().unwrap();
        let project_id = ProjectId::new();
        let collection_id = CollectionId::new();
        let job = sample_job(project_id, collection_id);
        store.create_crawl_job(&job).unwrap();

        let page = WebsitePage {
            id: WebsitePageId::new(),
            crawl_job_id: job.id,
            collection_id,
            project_id,
            file_id: None,
            url: "https://example.com/a".into(),
            url_hash: "hash-a".into(),
            title: None,
            depth: 0,
            content_markdown: None,
            content_length: 0,
            content_hash: None,
            meta_description: None,
            page_metadata: Default::default(),
            status: WebsitePageStatus::Pending,
            http_status_code: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(store.insert_page_if_new(&page).unwrap());

        let mut duplicate = page.clone();
        duplicate.id = WebsitePageId::new();
        assert!(!store.insert_page_if_new(&duplicate).unwrap());

        assert_eq!(store.list_pages(project_id, job.id).unwrap().len(), 1);
    }
}
