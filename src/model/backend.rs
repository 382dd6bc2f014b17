//! Client for a single local inference daemon (C2).
//!
//! Mirrors the teacher's `AnthropicClient`/`OpenAIClient` shape (a thin
//! `reqwest`-backed struct implementing a provider trait) but generalized to
//! one local backend endpoint with retry, per-call deadlines, and a cached
//! model listing instead of a hosted multi-model API.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::types::{GenerationResult, ModelDescriptor};

/// Uniform contract for one local inference daemon endpoint.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    async fn health(&self) -> bool;
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>>;

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        stop: Option<Vec<String>>,
        deadline: Duration,
    ) -> Result<GenerationResult>;
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    // Sandboxed environments can panic during proxy auto-detection in
    // reqwest's default client builder; fall back to no-proxy in that case.
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

struct CachedModelList {
    models: Vec<ModelDescriptor>,
    fetched_at: Instant,
}

/// HTTP client for a local inference daemon exposing an Ollama-shaped API
/// (`/api/tags`, `/api/generate`).
pub struct HttpModelBackend {
    base_url: String,
    http: reqwest::Client,
    max_retries: u32,
    model_list_ttl: Duration,
    cached_models: RwLock<Option<CachedModelList>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    done: bool,
}

impl HttpModelBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            base_url: base_url.into(),
            http: build_http_client(timeout),
            max_retries,
            model_list_ttl: Duration::from_secs(60),
            cached_models: RwLock::new(None),
        }
    }

    pub fn with_model_list_ttl(mut self, ttl: Duration) -> Self {
        self.model_list_ttl = ttl;
        self
    }

    async fn generate_once(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        stop: &Option<Vec<String>>,
    ) -> Result<GenerationResult> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: max_tokens,
                temperature,
            },
            stop: stop.clone(),
        };

        let started = Instant::now();
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::upstream_unavailable("model_backend", e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::invalid_request(format!(
                "model backend rejected request ({status}): {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream_unavailable(
                "model_backend",
                format!("status {status}: {body}"),
            ));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream_unavailable("model_backend", e.to_string()))?;

        if !body.done {
            return Err(Error::upstream_unavailable(
                "model_backend",
                "generation did not complete",
            ));
        }

        if body.response.trim().is_empty() {
            return Err(Error::empty_generation(model));
        }

        Ok(GenerationResult::ok(
            body.response,
            body.eval_count,
            body.prompt_eval_count,
        )
        .with_duration(started.elapsed()))
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    async fn initialize(&self) -> Result<()> {
        self.list_models().await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        matches!(
            self.http.get(&url).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        {
            let cache = self.cached_models.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.model_list_ttl {
                    return Ok(cached.models.clone());
                }
            }
        }

        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::upstream_unavailable("model_backend", e.to_string()))?;
        let body: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream_unavailable("model_backend", e.to_string()))?;

        let models = body
            .models
            .into_iter()
            .map(|entry| {
                ModelDescriptor::new(entry.name, crate::model::types::ModelTier::T1, 0.0)
                    .with_memory_footprint(entry.size)
            })
            .collect::<Vec<_>>();

        let mut cache = self.cached_models.write().await;
        *cache = Some(CachedModelList {
            models: models.clone(),
            fetched_at: Instant::now(),
        });

        Ok(models)
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        stop: Option<Vec<String>>,
        deadline: Duration,
    ) -> Result<GenerationResult> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let call = self.generate_once(model, prompt, max_tokens, temperature, &stop);
            let outcome = tokio::time::timeout(deadline, call).await;

            let result = match outcome {
                Ok(result) => result,
                Err(_) => {
                    return Err(Error::timeout(deadline.as_millis() as u64));
                }
            };

            match result {
                Ok(generation) => return Ok(generation),
                Err(err) if !err.is_retryable() || attempt == self.max_retries => {
                    return Err(err);
                }
                Err(err) => {
                    last_error = Some(err);
                    let backoff = backoff_with_jitter(attempt);
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::internal("retry loop exited without a result")))
    }
}

/// Exponential backoff with full jitter, capped at 2 seconds.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 100u64.saturating_mul(1u64 << attempt.min(4));
    let capped_ms = base_ms.min(2_000);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped_ms);
    Duration::from_millis(jitter_ms)
}

/// A `ModelBackend` used in tests to script generation outcomes without a
/// live inference daemon.
#[derive(Default)]
pub struct MockModelBackend {
    pub models: Vec<ModelDescriptor>,
    pub responses: Arc<RwLock<Vec<Result<GenerationResult>>>>,
    pub healthy: std::sync::atomic::AtomicBool,
}

impl MockModelBackend {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            models,
            responses: Arc::new(RwLock::new(Vec::new())),
            healthy: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub async fn push_response(&self, result: Result<GenerationResult>) {
        self.responses.write().await.push(result);
    }
}

#[async_trait]
impl ModelBackend for MockModelBackend {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(self.models.clone())
    }

    async fn generate(
        &self,
        model: &str,
        _prompt: &str,
        _max_tokens: u32,
        _temperature: f64,
        _stop: Option<Vec<String>>,
        _deadline: Duration,
    ) -> Result<GenerationResult> {
        let mut responses = self.responses.write().await;
        if responses.is_empty() {
            return Err(Error::upstream_unavailable(
                "mock_backend",
                format!("no scripted response left for {model}"),
            ));
        }
        responses.remove(0)
    }
}
