//! Uniform search/scrape provider contract (C4).
//!
//! Generalizes the teacher's per-vendor LLM client shape (`AnthropicClient`,
//! `OpenAIClient` behind the `LLMClient` trait in `llm/client.rs`) to
//! external search and scrape providers instead of model providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::error::{Error, Result};

/// One search result returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// One scraped page returned by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub content: String,
    pub truncated: bool,
}

/// Per-provider usage stats, surfaced by `get_recommendations`-style
/// reporting in the cost optimizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub total_cost: f64,
}

impl ProviderStats {
    pub fn record(&mut self, cost: f64, succeeded: bool) {
        self.total_calls += 1;
        self.total_cost += cost;
        if !succeeded {
            self.failed_calls += 1;
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

/// Uniform contract for one search/scrape provider.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn initialize(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    async fn is_available(&self) -> bool;
    fn cost_per_request(&self) -> f64;
    /// Requests still allowed in the current rate-limit window, or `None`
    /// if the provider has no limit.
    async fn rate_limit_remaining(&self) -> Option<u32>;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
    async fn scrape(&self, url: &str) -> Result<ScrapedPage>;

    async fn stats(&self) -> ProviderStats;
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    match catch_unwind(AssertUnwindSafe(|| {
        reqwest::Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client"),
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    content: String,
    #[serde(default)]
    truncated: bool,
}

/// HTTP-backed search/scrape provider.
pub struct HttpProvider {
    name: String,
    base_url: String,
    http: reqwest::Client,
    cost_per_request: f64,
    stats: tokio::sync::RwLock<ProviderStats>,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, cost_per_request: f64) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http: build_http_client(Duration::from_secs(15)),
            cost_per_request,
            stats: tokio::sync::RwLock::new(ProviderStats::default()),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(self.http.get(&url).send().await, Ok(r) if r.status().is_success())
    }

    fn cost_per_request(&self) -> f64 {
        self.cost_per_request
    }

    async fn rate_limit_remaining(&self) -> Option<u32> {
        None
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&SearchRequest {
                q: query,
                limit: max_results,
            })
            .send()
            .await;

        let outcome: Result<Vec<SearchHit>> = async {
            let response = response
                .map_err(|e| Error::upstream_unavailable(self.name.clone(), e.to_string()))?;
            if !response.status().is_success() {
                return Err(Error::upstream_unavailable(
                    self.name.clone(),
                    format!("status {}", response.status()),
                ));
            }
            let body: SearchResponse = response
                .json()
                .await
                .map_err(|e| Error::upstream_unavailable(self.name.clone(), e.to_string()))?;
            Ok(body.results)
        }
        .await;

        self.stats
            .write()
            .await
            .record(self.cost_per_request, outcome.is_ok());
        outcome
    }

    async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        let request_url = format!("{}/scrape", self.base_url);
        let response = self
            .http
            .post(&request_url)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await;

        let outcome: Result<ScrapedPage> = async {
            let response = response
                .map_err(|e| Error::upstream_unavailable(self.name.clone(), e.to_string()))?;
            if !response.status().is_success() {
                return Err(Error::upstream_unavailable(
                    self.name.clone(),
                    format!("status {}", response.status()),
                ));
            }
            let body: ScrapeResponse = response
                .json()
                .await
                .map_err(|e| Error::upstream_unavailable(self.name.clone(), e.to_string()))?;
            Ok(ScrapedPage {
                url: url.to_string(),
                content: body.content,
                truncated: body.truncated,
            })
        }
        .await;

        self.stats
            .write()
            .await
            .record(self.cost_per_request, outcome.is_ok());
        outcome
    }

    async fn stats(&self) -> ProviderStats {
        self.stats.read().await.clone()
    }
}

/// Scripted provider for tests.
pub struct MockProvider {
    pub name: String,
    pub search_results: tokio::sync::RwLock<Vec<Result<Vec<SearchHit>>>>,
    pub scrape_results: tokio::sync::RwLock<Vec<Result<ScrapedPage>>>,
    pub available: std::sync::atomic::AtomicBool,
    stats: tokio::sync::RwLock<ProviderStats>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search_results: tokio::sync::RwLock::new(Vec::new()),
            scrape_results: tokio::sync::RwLock::new(Vec::new()),
            available: std::sync::atomic::AtomicBool::new(true),
            stats: tokio::sync::RwLock::new(ProviderStats::default()),
        }
    }

    pub async fn push_search_result(&self, result: Result<Vec<SearchHit>>) {
        self.search_results.write().await.push(result);
    }

    pub async fn push_scrape_result(&self, result: Result<ScrapedPage>) {
        self.scrape_results.write().await.push(result);
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn cost_per_request(&self) -> f64 {
        0.001
    }

    async fn rate_limit_remaining(&self) -> Option<u32> {
        None
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
        let mut results = self.search_results.write().await;
        let outcome = if results.is_empty() {
            Err(Error::upstream_unavailable(self.name.clone(), "no scripted result"))
        } else {
            results.remove(0)
        };
        self.stats.write().await.record(0.001, outcome.is_ok());
        outcome
    }

    async fn scrape(&self, _url: &str) -> Result<ScrapedPage> {
        let mut results = self.scrape_results.write().await;
        let outcome = if results.is_empty() {
            Err(Error::upstream_unavailable(self.name.clone(), "no scripted result"))
        } else {
            results.remove(0)
        };
        self.stats.write().await.record(0.001, outcome.is_ok());
        outcome
    }

    async fn stats(&self) -> ProviderStats {
        self.stats.read().await.clone()
    }
}
