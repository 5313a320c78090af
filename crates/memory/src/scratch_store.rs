//! On-disk persistence for a persona's `Scratch`:
//! `bootstrap_memory/scratch.json`. Same atomic temp-file + rename pattern
//! as [`crate::event_log::AssociativeMemoryStore`] — a scratch write is a
//! single JSON blob, so there is no index to rebuild on load.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::scratch::Scratch;

#[derive(Debug, Clone)]
pub struct ScratchStore {
    path: PathBuf,
}

impl ScratchStore {
    pub fn new(bootstrap_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: bootstrap_dir.into().join("scratch.json"),
        }
    }

    pub async fn save(&self, scratch: &Scratch) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let rendered = serde_json::to_string_pretty(scratch)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &rendered).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<Scratch> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
