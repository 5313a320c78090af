//! The LLM Gateway: the single chokepoint through which the rest of the
//! simulation asks a language model to generate text or embed a string.
//!
//! Every other crate calls [`safe_generate`] rather than talking to a
//! backend directly — it is the only place that blocks on network I/O, and
//! the only place a transient failure is allowed to happen without
//! propagating up to the tick loop.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

/// A backend capable of raw text generation and text embedding.
///
/// `OllamaBackend` is the only implementation shipped here, but the trait
/// exists so a test double can be swapped in without touching callers.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate_raw(&self, model: &str, prompt: &str, params: &GenerationParams) -> Result<String>;
    async fn embed_raw(&self, model: &str, text: &str) -> Result<Vec<f32>>;
}

/// Sampling knobs threaded through to the backend. Mirrors the handful of
/// fields every prompt template in this codebase actually sets.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
            stop: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(call_timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn generate_raw(&self, model: &str, prompt: &str, params: &GenerationParams) -> Result<String> {
        let payload = json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
                "stop": params.stop,
            }
        });

        let response = self.client.post(self.endpoint("/api/generate")).json(&payload).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            anyhow::bail!("generation backend error ({status}): {body}");
        }

        body.get("response")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("generation backend response missing 'response' field: {body}"))
    }

    async fn embed_raw(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let payload = json!({ "model": model, "prompt": text });
        let response = self.client.post(self.endpoint("/api/embeddings")).json(&payload).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            anyhow::bail!("embedding backend error ({status}): {body}");
        }

        let values = body
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("embedding backend response missing 'embedding' field: {body}"))?;

        Ok(values.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
    }
}

/// The gateway bound to a specific model pair. Holds no simulation state —
/// it is constructed once and shared by every persona.
pub struct LlmGateway {
    backend: Box<dyn GenerationBackend>,
    generation_model: String,
    embedding_model: String,
}

impl LlmGateway {
    pub fn new(backend: Box<dyn GenerationBackend>, generation_model: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            backend,
            generation_model: generation_model.into(),
            embedding_model: embedding_model.into(),
        }
    }

    pub fn ollama(base_url: impl Into<String>, call_timeout: Duration, generation_model: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self::new(Box::new(OllamaBackend::new(base_url, call_timeout)), generation_model, embedding_model)
    }

    /// Raw, unvalidated generation. Callers almost always want
    /// [`safe_generate`] instead.
    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        self.backend.generate_raw(&self.generation_model, prompt, params).await
    }

    /// Embed `text`, coercing blank input to a sentinel and flattening
    /// newlines so the embedding key stays a single line on disk.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let coerced = coerce_embeddable(text);
        self.backend.embed_raw(&self.embedding_model, &coerced).await
    }
}

/// Blank embedding input is replaced with this sentinel (mirrors the
/// behavior of treating an empty description as "still a concept").
fn coerce_embeddable(text: &str) -> String {
    let flattened = text.replace('\n', " ");
    let trimmed = flattened.trim();
    if trimmed.is_empty() {
        "this is blank".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The bounded-retry contract every prompt call in this codebase goes
/// through: try up to `retries` times, validating and cleaning each raw
/// completion; on exhaustion return `fail_safe` rather than propagating an
/// error. No exception ever crosses this boundary.
pub async fn safe_generate<V, C>(
    gateway: &LlmGateway,
    prompt: &str,
    params: &GenerationParams,
    retries: u32,
    fail_safe: impl Into<String>,
    validate: V,
    clean_up: C,
) -> String
where
    V: Fn(&str) -> bool,
    C: Fn(&str) -> String,
{
    let fail_safe = fail_safe.into();
    let attempts = retries.max(1);

    for attempt in 0..attempts {
        match gateway.generate(prompt, params).await {
            Ok(raw) if validate(&raw) => return clean_up(&raw),
            Ok(raw) => {
                tracing::debug!(attempt, raw = %raw, "safe_generate: validator rejected output");
            }
            Err(error) => {
                tracing::debug!(attempt, %error, "safe_generate: generation backend failed");
            }
        }
    }

    tracing::warn!(retries = attempts, "safe_generate: exhausted retries, returning fail-safe");
    fail_safe
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyBackend {
        failures_before_success: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl GenerationBackend for FlakyBackend {
        async fn generate_raw(&self, _model: &str, _prompt: &str, _params: &GenerationParams) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                anyhow::bail!("simulated transient failure");
            }
            Ok("GOOD RESULT".to_string())
        }

        async fn embed_raw(&self, _model: &str, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    #[tokio::test]
    async fn safe_generate_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let gateway = LlmGateway::new(
            Box::new(FlakyBackend { failures_before_success: 2, calls: calls.clone() }),
            "test-model",
            "test-embed",
        );

        let out = safe_generate(
            &gateway,
            "prompt",
            &GenerationParams::default(),
            5,
            "FAIL_SAFE",
            |raw| raw.contains("GOOD"),
            |raw| raw.to_lowercase(),
        )
        .await;

        assert_eq!(out, "good result");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn safe_generate_returns_fail_safe_on_exhaustion() {
        let calls = Arc::new(AtomicU32::new(0));
        let gateway = LlmGateway::new(
            Box::new(FlakyBackend { failures_before_success: 100, calls }),
            "test-model",
            "test-embed",
        );

        let out = safe_generate(
            &gateway,
            "prompt",
            &GenerationParams::default(),
            3,
            "FAIL_SAFE",
            |_| true,
            |raw| raw.to_string(),
        )
        .await;

        assert_eq!(out, "FAIL_SAFE");
    }

    #[test]
    fn coerce_embeddable_replaces_blank_and_flattens_newlines() {
        assert_eq!(coerce_embeddable("   "), "this is blank");
        assert_eq!(coerce_embeddable("a\nb\nc"), "a b c");
    }
}
