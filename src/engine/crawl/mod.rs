// ── Crawl Engine (C4) ───────────────────────────────────────────────────────
// Breadth-first website crawl that feeds discovered pages into the document
// pipeline. Mirrors the original crawl task's flow: fetch a page, record it,
// write its rendered content to disk as a `File`, then hand it to the same
// pipeline that processes uploads, updating job counters as each page
// completes rather than only at the end.

pub mod fetch;
pub mod filters;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::ids::{FileId, ProjectId, WebsiteId, WebsitePageId};
use crate::atoms::types::{CrawlJobStatus, FileRecord, FileStatus, WebsitePage, WebsitePageStatus};
use crate::engine::embedding::EmbeddingConfigSource;
use crate::engine::pipeline::Pipeline;
use crate::engine::store::Store;
use chrono::Utc;
use log::{info, warn};
use reqwest::Client;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

pub struct CrawlEngine<S: EmbeddingConfigSource> {
    store: Arc<Store>,
    pipeline: Arc<Pipeline<S>>,
    http: Client,
    upload_dir: PathBuf,
}

impl<S: EmbeddingConfigSource> CrawlEngine<S> {
    pub fn new(store: Arc<Store>, pipeline: Arc<Pipeline<S>>, upload_dir: impl Into<PathBuf>) -> Self {
        Self { store, pipeline, http: Client::new(), upload_dir: upload_dir.into() }
    }

    /// Runs `job_id` to completion (or cancellation). Errors from setup
    /// (bad `start_url`, unparseable glob patterns) mark the job failed and
    /// are returned; per-page fetch/pipeline failures are recorded on the
    /// page and job counters instead of aborting the crawl.
    pub async fn run_crawl_job(&self, project_id: ProjectId, job_id: WebsiteId, cancel: CancellationToken) -> EngineResult<()> {
        match self.run_crawl_job_inner(project_id, job_id, &cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.store.update_crawl_job_status(project_id, job_id, CrawlJobStatus::Failed, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_crawl_job_inner(&self, project_id: ProjectId, job_id: WebsiteId, cancel: &CancellationToken) -> EngineResult<()> {
        let job = self.store.get_crawl_job(project_id, job_id)?;
        self.store.update_crawl_job_status(project_id, job_id, CrawlJobStatus::Crawling, None)?;

        let origin = Url::parse(&job.start_url).map_err(|e| EngineError::invalid(format!("invalid start_url {:?}: {e}", job.start_url)))?;
        let include = filters::build_matcher(&job.include_patterns)?;
        let exclude = filters::build_matcher(&job.exclude_patterns)?;

        let mut queue: VecDeque<(Url, i32)> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(fetch::url_hash(origin.as_str()));
        queue.push_back((origin.clone(), 0));

        let mut pages_crawled = 0i32;

        while let Some((url, depth)) = queue.pop_front() {
            if cancel.is_cancelled() {
                info!("crawl job {job_id} cancelled (token)");
                break;
            }
            if self.store.get_crawl_job(project_id, job_id)?.status == CrawlJobStatus::Cancelled {
                info!("crawl job {job_id} cancelled externally");
                return Ok(());
            }
            if pages_crawled >= job.max_pages {
                break;
            }
            if depth > job.max_depth || !filters::passes_filters(url.as_str(), &include, &exclude) {
                continue;
            }

            let fetched = match fetch::fetch_page(&self.http, url.as_str()).await {
                Ok(f) => f,
                Err(e) => {
                    warn!("failed to crawl {url}: {e}");
                    continue;
                }
            };
            pages_crawled += 1;

            let mut discovered = 0i32;
            for link in &fetched.links {
                if let Some(next) = filters::normalize_link(&url, link) {
                    if filters::same_origin(&origin, &next) && depth + 1 <= job.max_depth {
                        let hash = fetch::url_hash(next.as_str());
                        if seen.insert(hash) {
                            discovered += 1;
                            queue.push_back((next, depth + 1));
                        }
                    }
                }
            }

            let (processed_delta, failed_delta) = self.ingest_fetched_page(&job, url.as_str(), depth, fetched).await?;
            self.store.bump_crawl_counters(project_id, job_id, discovered, 1, processed_delta, failed_delta)?;
        }

        let final_status = self.store.get_crawl_job(project_id, job_id)?.status;
        if final_status != CrawlJobStatus::Cancelled {
            self.store.update_crawl_job_status(project_id, job_id, CrawlJobStatus::Completed, None)?;
        }
        Ok(())
    }

    /// Persists one fetched page and, if it has content, runs it through the
    /// document pipeline. Returns `(processed_delta, failed_delta)` for the
    /// caller to fold into the job's running counters.
    async fn ingest_fetched_page(
        &self,
        job: &crate::atoms::types::WebsiteCrawlJob,
        url: &str,
        depth: i32,
        fetched: fetch::FetchedPage,
    ) -> EngineResult<(i32, i32)> {
        let now = Utc::now();
        let mut page = WebsitePage {
            id: WebsitePageId::new(),
            crawl_job_id: job.id,
            collection_id: job.collection_id,
            project_id: job.project_id,
            file_id: None,
            url: url.to_string(),
            url_hash: fetch::url_hash(url),
            title: fetched.title,
            depth,
            content_length: fetched.content_markdown.len() as i64,
            content_hash: Some(fetch::content_hash(&fetched.content_markdown)),
            content_markdown: Some(fetched.content_markdown),
            meta_description: fetched.meta_description,
            page_metadata: Default::default(),
            status: WebsitePageStatus::Fetched,
            http_status_code: Some(fetched.http_status_code),
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        if !self.store.insert_page_if_new(&page)? {
            return Ok((0, 0));
        }

        if page.content_length == 0 {
            page.status = WebsitePageStatus::Failed;
            page.error_message = Some("no content extracted".into());
            self.store.update_page(&page)?;
            return Ok((0, 1));
        }

        let file = self.write_page_file(&page).await?;
        self.store.create_file(&file)?;
        page.file_id = Some(file.id);
        page.status = WebsitePageStatus::Extracted;
        self.store.update_page(&page)?;

        match self.pipeline.process_crawled_page(job.project_id, file.id, page).await {
            Ok(_) => Ok((1, 0)),
            Err(e) => {
                warn!("pipeline failed for crawled page {url}: {e}");
                Ok((0, 1))
            }
        }
    }

    async fn write_page_file(&self, page: &WebsitePage) -> EngineResult<FileRecord> {
        let file_id = FileId::new();
        let filename = format!("{file_id}.md");
        let storage_path = self.upload_dir.join("crawl").join(&filename);
        if let Some(parent) = storage_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| EngineError::invalid(format!("cannot create upload dir: {e}")))?;
        }
        let content = page.content_markdown.as_deref().unwrap_or_default();
        tokio::fs::write(&storage_path, content)
            .await
            .map_err(|e| EngineError::invalid(format!("cannot write crawled page to disk: {e}")))?;

        let now = Utc::now();
        Ok(FileRecord {
            id: file_id,
            project_id: page.project_id,
            collection_id: Some(page.collection_id),
            original_filename: filename,
            size: content.len() as i64,
            content_type: "text/markdown".into(),
            storage_provider: "local".into(),
            storage_path: storage_path.to_string_lossy().into_owned(),
            storage_metadata: std::collections::HashMap::from([
                ("source".to_string(), serde_json::json!("website_crawl")),
                ("source_url".to_string(), serde_json::json!(page.url)),
            ]),
            status: FileStatus::Pending,
            language: None,
            description: page.meta_description.clone(),
            tags: vec![],
            document_count: None,
            total_tokens: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    /// Adds a single URL to an existing job outside the BFS loop, as a
    /// one-off operation. Dedup mirrors the BFS frontier's rule: a page with
    /// the same `(crawl_job_id, url_hash)` already in a non-terminal status
    /// is left alone and reported back without creating a duplicate.
    pub async fn add_page(&self, project_id: ProjectId, job_id: WebsiteId, url: &str) -> EngineResult<WebsitePageId> {
        let job = self.store.get_crawl_job(project_id, job_id)?;
        let parsed = Url::parse(url).map_err(|e| EngineError::invalid(format!("invalid url {url:?}: {e}")))?;
        let hash = fetch::url_hash(parsed.as_str());

        for existing in self.store.list_pages(project_id, job_id)? {
            if existing.url_hash == hash && !matches!(existing.status, WebsitePageStatus::Processed | WebsitePageStatus::Failed) {
                return Ok(existing.id);
            }
        }

        let fetched = fetch::fetch_page(&self.http, parsed.as_str()).await?;
        let (_, _) = self.ingest_fetched_page(&job, parsed.as_str(), 0, fetched).await?;
        let page = self
            .store
            .list_pages(project_id, job_id)?
            .into_iter()
            .find(|p| p.url_hash == hash)
            .ok_or_else(|| EngineError::invalid("page vanished immediately after insert"))?;
        self.store.bump_crawl_counters(project_id, job_id, 0, 1, 0, 0)?;
        Ok(page.id)
    }

    /// Re-parses page `page_id`'s own links one level deeper and enqueues
    /// whichever of them aren't already recorded on the job, fetching each
    /// immediately rather than re-running the whole BFS from the start URL.
    pub async fn crawl_deeper(&self, project_id: ProjectId, page_id: WebsitePageId, cancel: CancellationToken) -> EngineResult<CrawlDeeperOutcome> {
        let page = self.store.get_page(project_id, page_id)?;
        let job = self.store.get_crawl_job(project_id, page.crawl_job_id)?;
        let origin = Url::parse(&job.start_url).map_err(|e| EngineError::invalid(format!("invalid start_url {:?}: {e}", job.start_url)))?;
        let page_url = Url::parse(&page.url).map_err(|e| EngineError::invalid(format!("invalid page url {:?}: {e}", page.url)))?;
        let include = filters::build_matcher(&job.include_patterns)?;
        let exclude = filters::build_matcher(&job.exclude_patterns)?;
        let next_depth = page.depth + 1;

        let refetched = fetch::fetch_page(&self.http, page_url.as_str()).await?;
        let links_found = refetched.links.len() as i32;

        let existing: HashSet<String> = self.store.list_pages(project_id, job.id)?.into_iter().map(|p| p.url_hash).collect();

        let mut pages_added = 0i32;
        let mut pages_skipped = 0i32;

        for link in &refetched.links {
            if cancel.is_cancelled() {
                break;
            }
            let Some(next) = filters::normalize_link(&page_url, link) else {
                pages_skipped += 1;
                continue;
            };
            if !filters::same_origin(&origin, &next) || next_depth > job.max_depth || !filters::passes_filters(next.as_str(), &include, &exclude) {
                pages_skipped += 1;
                continue;
            }
            if existing.contains(&fetch::url_hash(next.as_str())) {
                pages_skipped += 1;
                continue;
            }

            let fetched = match fetch::fetch_page(&self.http, next.as_str()).await {
                Ok(f) => f,
                Err(e) => {
                    warn!("failed to crawl {next}: {e}");
                    pages_skipped += 1;
                    continue;
                }
            };
            let (processed_delta, failed_delta) = self.ingest_fetched_page(&job, next.as_str(), next_depth, fetched).await?;
            self.store.bump_crawl_counters(project_id, job.id, 0, 1, processed_delta, failed_delta)?;
            pages_added += 1;
        }

        Ok(CrawlDeeperOutcome { pages_added, pages_skipped, links_found })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CrawlDeeperOutcome {
    pub pages_added: i32,
    pub pages_skipped: i32,
    pub links_found: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::config::ChunkingConfig;
    use crate::atoms::ids::{CollectionId, ProjectId};
    use crate::atoms::types::EmbeddingConfig;
    use crate::engine::embedding::{EmbeddingConfigSource, EmbeddingResolver};
    use async_trait::async_trait;

    struct NoEmbeddingConfig;

    #[async_trait]
    impl EmbeddingConfigSource for NoEmbeddingConfig {
        async fn active_embedding_config(&self, _project_id: ProjectId) -> EngineResult<Option<EmbeddingConfig>> {
            Ok(None)
        }
    }

    fn engine(store: Arc<Store>) -> CrawlEngine<NoEmbeddingConfig> {
        let resolver = Arc::new(EmbeddingResolver::new(NoEmbeddingConfig));
        let pipeline = Arc::new(Pipeline::new(store.clone(), resolver, ChunkingConfig { chunk_size: 500, chunk_overlap: 50, batch_size: 10 }, 5));
        CrawlEngine::new(store, pipeline, std::env::temp_dir().join(format!("deskpilot-crawl-test-{}", uuid::Uuid::new_v4())))
    }

    fn sample_job(project_id: ProjectId, collection_id: CollectionId, start_url: &str) -> crate::atoms::types::WebsiteCrawlJob {
        crate::atoms::types::WebsiteCrawlJob {
            id: WebsiteId::new(),
            project_id,
            collection_id,
            start_url: start_url.to_string(),
            max_pages: 10,
            max_depth: 1,
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

    #[tokio::test]
    async fn run_crawl_job_fails_job_on_bad_start_url() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project_id = ProjectId::new();
        let collection_id = CollectionId::new();
        let job = sample_job(project_id, collection_id, "not a url");
        store.create_crawl_job(&job).unwrap();

        let crawl = engine(store.clone());
        let err = crawl.run_crawl_job(project_id, job.id, CancellationToken::new()).await;
        assert!(err.is_err());

        let reloaded = store.get_crawl_job(project_id, job.id).unwrap();
        assert_eq!(reloaded.status, CrawlJobStatus::Failed);
    }

    #[tokio::test]
    async fn run_crawl_job_observes_pre_set_cancellation() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project_id = ProjectId::new();
        let collection_id = CollectionId::new();
        let job = sample_job(project_id, collection_id, "https://example.invalid/start");
        store.create_crawl_job(&job).unwrap();

        let crawl = engine(store.clone());
        let token = CancellationToken::new();
        token.cancel();
        crawl.run_crawl_job(project_id, job.id, token).await.unwrap();

        let reloaded = store.get_crawl_job(project_id, job.id).unwrap();
        assert_eq!(reloaded.pages_crawled, 0);
    }
}
