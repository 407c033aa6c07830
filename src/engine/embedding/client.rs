// ── Embedding Client ────────────────────────────────────────────────────────
// One client per `EmbeddingConfig` row. Dispatches to the provider's wire
// format and enforces the provider's batch cap regardless of what the
// caller asks for.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{EmbeddingConfig, EmbeddingProvider};
use reqwest::Client;
use serde_json::{json, Value};

pub struct EmbeddingClient {
    http: Client,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { http: Client::new(), config }
    }

    pub fn provider(&self) -> EmbeddingProvider {
        self.config.provider
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn dimensions(&self) -> i32 {
        self.config.dimensions
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
    }

    pub async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut vectors = self.embed_documents(std::slice::from_ref(&text.to_string())).await?;
        vectors.pop().ok_or_else(|| EngineError::upstream(self.upstream_name(), "empty embedding response"))
    }

    /// Embeds a batch of documents, splitting into provider-safe sub-batches
    /// and preserving input order in the output.
    pub async fn embed_documents(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let cap = self.config.provider.max_batch_size();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(cap) {
            let mut vectors = match self.config.provider {
                EmbeddingProvider::Qwen3 => self.embed_ollama(chunk).await?,
                EmbeddingProvider::OpenAi | EmbeddingProvider::OpenAiCompatible => {
                    self.embed_openai(chunk).await?
                }
            };
            out.append(&mut vectors);
        }
        Ok(out)
    }

    fn upstream_name(&self) -> &'static str {
        match self.config.provider {
            EmbeddingProvider::Qwen3 => "qwen3",
            EmbeddingProvider::OpenAi => "openai",
            EmbeddingProvider::OpenAiCompatible => "openai_compatible",
        }
    }

    /// Ollama-family wire format. Tries the batched `/api/embed` endpoint
    /// (Ollama 0.4+, accepts `input` as an array), falls back to the legacy
    /// `/api/embeddings` endpoint which only accepts one `prompt` at a time.
    async fn embed_ollama(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let new_url = format!("{}/api/embed", self.base_url().trim_end_matches('/'));
        let new_body = json!({ "model": self.config.model, "input": texts });

        let new_result = self
            .http
            .post(&new_url)
            .json(&new_body)
            .timeout(std::time::Duration::from_secs(60))
            .send()
            .await;

        if let Ok(resp) = new_result {
            if resp.status().is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    if let Some(vectors) = v["embeddings"].as_array() {
                        let parsed: Vec<Vec<f32>> = vectors
                            .iter()
                            .filter_map(|row| row.as_array())
                            .map(|row| row.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
                            .collect();
                        if parsed.len() == texts.len() {
                            return Ok(parsed);
                        }
                    }
                }
            }
        }

        // Legacy endpoint embeds one text per request.
        let legacy_url = format!("{}/api/embeddings", self.base_url().trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let body = json!({ "model": self.config.model, "prompt": text });
            let resp = self
                .http
                .post(&legacy_url)
                .json(&body)
                .timeout(std::time::Duration::from_secs(60))
                .send()
                .await
                .map_err(|e| EngineError::upstream(self.upstream_name(), format!("not reachable: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(EngineError::upstream(self.upstream_name(), format!("{status} — {text}")));
            }

            let v: Value = resp
                .json()
                .await
                .map_err(|e| EngineError::upstream(self.upstream_name(), format!("parse error: {e}")))?;
            let embedding = v["embedding"]
                .as_array()
                .ok_or_else(|| EngineError::upstream(self.upstream_name(), "no 'embedding' array in response"))?;
            let vec: Vec<f32> = embedding.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
            if vec.is_empty() {
                return Err(EngineError::upstream(self.upstream_name(), "empty embedding vector"));
            }
            out.push(vec);
        }
        Ok(out)
    }

    /// OpenAI-compatible wire format. `input` accepts an array for batch calls.
    async fn embed_openai(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url().trim_end_matches('/'));
        let body = json!({ "model": self.config.model, "input": texts });

        let mut req = self.http.post(&url).json(&body).timeout(std::time::Duration::from_secs(30));
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::upstream(self.upstream_name(), format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(EngineError::upstream(self.upstream_name(), format!("{status} — {text}")));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::upstream(self.upstream_name(), format!("parse error: {e}")))?;

        let data = v["data"]
            .as_array()
            .ok_or_else(|| EngineError::upstream(self.upstream_name(), "no 'data' array in response"))?;

        let mut rows: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for item in data {
            let index = item["index"].as_u64().unwrap_or(0) as usize;
            let embedding = item["embedding"]
                .as_array()
                .ok_or_else(|| EngineError::upstream(self.upstream_name(), "missing 'embedding' in data row"))?;
            let vec: Vec<f32> = embedding.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect();
            rows.push((index, vec));
        }
        rows.sort_by_key(|(index, _)| *index);
        let out: Vec<Vec<f32>> = rows.into_iter().map(|(_, v)| v).collect();

        if out.len() != texts.len() {
            return Err(EngineError::upstream(
                self.upstream_name(),
                format!("expected {} embeddings, got {}", texts.len(), out.len()),
            ));
        }
        Ok(out)
    }
}
