//! On-disk interchange with the frontend: `environment/<step>.json`,
//! `movement/<step>.json`, and the global handshake files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use townsim_maze::Coord;
use townsim_memory::ChatLine;

use crate::clock::ClockSource;
use crate::error::RuntimeError;

/// `environment/<step>.json`: `{name: {x:int, y:int}}` per agent.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentFile(pub HashMap<String, EnvironmentPos>);

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EnvironmentPos {
    pub x: i32,
    pub y: i32,
}

impl EnvironmentFile {
    pub fn tile_for(&self, name: &str) -> Option<Coord> {
        self.0.get(name).map(|p| (p.x, p.y))
    }
}

/// `movement/<step>.json`: per-agent tile delta plus a chat transcript.
#[derive(Debug, Clone, Serialize)]
pub struct MovementFile {
    pub persona: HashMap<String, PersonaMovement>,
    pub meta: MovementMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonaMovement {
    pub movement: [i32; 2],
    pub pronunciatio: String,
    pub description: String,
    pub chat: Option<Vec<ChatLine>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovementMeta {
    pub curr_time: String,
}

fn environment_path(sim_dir: &Path, step: u64) -> PathBuf {
    sim_dir.join("environment").join(format!("{step}.json"))
}

fn movement_path(sim_dir: &Path, step: u64) -> PathBuf {
    sim_dir.join("movement").join(format!("{step}.json"))
}

/// Poll `environment/<step>.json` until the frontend publishes it.
/// `max_attempts = None` waits indefinitely; tests and diagnostic tooling
/// pass `Some(n)` to bound the wait instead of hanging forever on a
/// frontend that never connects.
pub async fn poll_environment(
    sim_dir: &Path,
    step: u64,
    clock: &dyn ClockSource,
    interval: Duration,
    max_attempts: Option<usize>,
) -> Result<EnvironmentFile, RuntimeError> {
    let path = environment_path(sim_dir, step);
    let mut attempts = 0usize;
    loop {
        if let Ok(raw) = tokio::fs::read_to_string(&path).await {
            return Ok(serde_json::from_str(&raw)?);
        }
        if let Some(max) = max_attempts {
            if attempts >= max {
                return Err(RuntimeError::FrontendDesync(step));
            }
        }
        attempts += 1;
        clock.tick(interval).await;
    }
}

pub async fn write_movement(sim_dir: &Path, step: u64, file: &MovementFile) -> Result<(), RuntimeError> {
    let path = movement_path(sim_dir, step);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let rendered = serde_json::to_string_pretty(file)?;
    tokio::fs::write(&path, rendered).await?;
    Ok(())
}

/// Write the two global handshake marker files signaling a fresh simulation
/// boot: `curr_sim_code.json` and `curr_step.json`. The frontend deletes
/// `curr_step.json` once it has consumed it.
pub async fn write_handshake(temp_storage_dir: &Path, sim_code: &str, step: u64) -> Result<(), RuntimeError> {
    tokio::fs::create_dir_all(temp_storage_dir).await?;
    let sim_code_path = temp_storage_dir.join("curr_sim_code.json");
    tokio::fs::write(&sim_code_path, serde_json::to_string(&serde_json::json!({ "sim_code": sim_code }))?).await?;
    let step_path = temp_storage_dir.join("curr_step.json");
    tokio::fs::write(&step_path, serde_json::to_string(&serde_json::json!({ "step": step }))?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn poll_environment_reads_once_published() {
        let tmp = tempfile::tempdir().unwrap();
        let env_dir = tmp.path().join("environment");
        tokio::fs::create_dir_all(&env_dir).await.unwrap();
        tokio::fs::write(env_dir.join("0.json"), r#"{"Isabella Rodriguez": {"x": 3, "y": 4}}"#).await.unwrap();

        let clock = ManualClock::default();
        let env = poll_environment(tmp.path(), 0, &clock, Duration::from_millis(1), Some(5)).await.unwrap();
        assert_eq!(env.tile_for("Isabella Rodriguez"), Some((3, 4)));
    }

    #[tokio::test]
    async fn poll_environment_times_out_when_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let clock = ManualClock::default();
        let result = poll_environment(tmp.path(), 0, &clock, Duration::from_millis(1), Some(3)).await;
        assert!(matches!(result, Err(RuntimeError::FrontendDesync(0))));
        assert_eq!(clock.ticks(), 4);
    }

    #[tokio::test]
    async fn write_movement_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut persona = HashMap::new();
        persona.insert(
            "Isabella Rodriguez".to_string(),
            PersonaMovement {
                movement: [3, 4],
                pronunciatio: "\u{2615}".to_string(),
                description: "getting coffee @ the ville:cafe:counter".to_string(),
                chat: None,
            },
        );
        let file = MovementFile { persona, meta: MovementMeta { curr_time: "February 13, 2023, 00:00:10".to_string() } };
        write_movement(tmp.path(), 0, &file).await.unwrap();

        let raw = tokio::fs::read_to_string(tmp.path().join("movement").join("0.json")).await.unwrap();
        assert!(raw.contains("Isabella Rodriguez"));
    }
}
