//! Workspace configuration: simulation metadata, LLM routing, and the
//! retrieval/perception hyperparameter defaults new personas are seeded with.

use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `reverie/meta.json` on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimMeta {
    pub fork_sim_code: String,
    /// `"Month D, YYYY"`.
    pub start_date: String,
    /// `"Month D, YYYY, HH:MM:SS"`.
    pub curr_time: String,
    pub sec_per_step: u32,
    pub maze_name: String,
    pub persona_names: Vec<String>,
    pub step: u64,
}

impl Default for SimMeta {
    fn default() -> Self {
        Self {
            fork_sim_code: "base_the_ville_isabella_maria_klaus".to_string(),
            start_date: "February 13, 2023".to_string(),
            curr_time: "February 13, 2023, 00:00:00".to_string(),
            sec_per_step: 10,
            maze_name: "the_ville".to_string(),
            persona_names: Vec::new(),
            step: 0,
        }
    }
}

/// LLM provider selection and retry policy for the generation gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub base_url: String,
    /// `retries` parameter threaded through `safe_generate`.
    pub max_retries: u32,
    /// Per-call deadline enforced around each generation/embedding request.
    pub call_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            generation_model: "llama3.1:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:11434".to_string(),
            max_retries: 3,
            call_timeout_secs: 30,
        }
    }
}

/// Default hyperparameters a freshly-bootstrapped `Scratch` is seeded
/// with: perception hyperparameters and retrieval weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaDefaults {
    pub vision_r: i32,
    pub att_bandwidth: usize,
    pub retention: usize,
    pub recency_w: f32,
    pub relevance_w: f32,
    pub importance_w: f32,
    pub recency_decay: f32,
    pub importance_trigger_max: i32,
    /// `n_count` default for focal-point retrieval.
    pub retrieval_n_count: usize,
    /// Ticks a chat partner stays on cooldown after a conversation ends,
    /// tracked per-pair in `chatting_with_buffer`.
    pub chat_cooldown_ticks: i32,
    /// Upper bound on converse exchanges.
    pub max_chat_rounds: usize,
}

impl Default for PersonaDefaults {
    fn default() -> Self {
        Self {
            vision_r: 4,
            att_bandwidth: 3,
            retention: 5,
            recency_w: 1.0,
            relevance_w: 1.0,
            importance_w: 1.0,
            recency_decay: 0.99,
            importance_trigger_max: 150,
            retrieval_n_count: 30,
            chat_cooldown_ticks: 800,
            max_chat_rounds: 8,
        }
    }
}

/// Group weights applied on top of the per-persona `w_*` weights in the
/// focal-point scoring formula: `(g_rec, g_rel, g_imp)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalGroupWeights {
    pub recency: f32,
    pub relevance: f32,
    pub importance: f32,
}

impl Default for RetrievalGroupWeights {
    fn default() -> Self {
        Self {
            recency: 0.5,
            relevance: 3.0,
            importance: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory under which `<sim_code>/` simulation directories live.
    pub storage_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub persona_defaults: PersonaDefaults,
    pub retrieval_weights: RetrievalGroupWeights,
    pub paths: PathsConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = std::env::var("OLLAMA_BASE_URL") {
            if !value.is_empty() {
                config.llm.base_url = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

/// Format a `DateTime<Utc>` as the `"Month D, YYYY, HH:MM:SS"` form used by
/// `meta.json`'s `curr_time`/`start_date` fields.
pub fn format_sim_time(t: DateTime<Utc>) -> String {
    t.format("%B %-d, %Y, %H:%M:%S").to_string()
}

/// Parse the `"Month D, YYYY, HH:MM:SS"` form back into a `DateTime<Utc>`.
pub fn parse_sim_time(s: &str) -> Result<DateTime<Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%B %-d, %Y, %H:%M:%S")?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// The `"Month D, YYYY"` date identity used to detect a new simulated day
/// by comparing consecutive date strings.
pub fn sim_date_key(t: DateTime<Utc>) -> String {
    t.format("%B %-d, %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sim_time() {
        let t = parse_sim_time("February 13, 2023, 00:00:10").unwrap();
        assert_eq!(format_sim_time(t), "February 13, 2023, 00:00:10");
    }

    #[test]
    fn sim_date_key_ignores_time_of_day() {
        let a = parse_sim_time("February 13, 2023, 00:00:00").unwrap();
        let b = parse_sim_time("February 13, 2023, 23:50:00").unwrap();
        assert_eq!(sim_date_key(a), sim_date_key(b));
    }

    #[test]
    fn app_config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.persona_defaults.vision_r = 6;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.persona_defaults.vision_r, 6);
    }
}
