//! On-disk persistence for a persona's `SpatialMemory`:
//! `bootstrap_memory/spatial_memory.json`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::spatial::SpatialMemory;

#[derive(Debug, Clone)]
pub struct SpatialMemoryStore {
    path: PathBuf,
}

impl SpatialMemoryStore {
    pub fn new(bootstrap_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: bootstrap_dir.into().join("spatial_memory.json"),
        }
    }

    pub async fn save(&self, memory: &SpatialMemory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let rendered = serde_json::to_string_pretty(memory)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &rendered).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// A missing file yields an empty spatial memory so a fresh persona
    /// bootstraps cleanly, mirroring `AssociativeMemoryStore::load`.
    pub async fn load(&self) -> Result<SpatialMemory> {
        if !self.path.exists() {
            return Ok(SpatialMemory::new());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_spatial_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SpatialMemoryStore::new(tmp.path());
        let mut memory = SpatialMemory::new();
        memory.add_discovery("the ville", "cafe", "counter", "coffee machine");

        store.save(&memory).await.unwrap();
        let reloaded = store.load().await.unwrap();
        assert_eq!(
            reloaded.get_str_accessible_arena_game_objects("the ville:cafe:counter"),
            "coffee machine"
        );
    }

    #[tokio::test]
    async fn missing_file_yields_empty_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SpatialMemoryStore::new(tmp.path().join("nope"));
        let memory = store.load().await.unwrap();
        assert_eq!(memory.get_str_accessible_sectors("anything"), "");
    }
}
