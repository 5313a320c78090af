//! On-disk persistence for a persona's associative memory: the
//! `nodes.json` / `kw_strength.json` / `embeddings.json` trio under
//! `bootstrap_memory/associative_memory/`.
//!
//! Every write goes through the same atomic temp-file + fsync + rename
//! sequence so a crash mid-save never corrupts the last good snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::associative::AssociativeMemory;
use crate::schema::{ConceptNode, NodeId};

#[derive(Debug, Serialize, Deserialize)]
struct KwStrengthFile {
    kw_strength_event: HashMap<String, u32>,
    kw_strength_thought: HashMap<String, u32>,
}

#[derive(Debug, Clone)]
pub struct AssociativeMemoryStore {
    dir: PathBuf,
}

impl AssociativeMemoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn nodes_path(&self) -> PathBuf {
        self.dir.join("nodes.json")
    }

    fn kw_strength_path(&self) -> PathBuf {
        self.dir.join("kw_strength.json")
    }

    fn embeddings_path(&self) -> PathBuf {
        self.dir.join("embeddings.json")
    }

    /// Atomically write `contents` to `path` via a `.tmp` sibling,
    /// `fsync`'d then renamed over the destination.
    async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = {
            let filename = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
            path.with_file_name(format!("{filename}.tmp"))
        };

        let write_result: Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(contents.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }

    /// Snapshot `memory` to the three on-disk files, newest-first, keyed
    /// `node_1..node_N` in `nodes.json` as the format requires.
    pub async fn save(&self, memory: &AssociativeMemory) -> Result<()> {
        let mut newest_first: Vec<&ConceptNode> = memory.all_nodes().collect();
        newest_first.sort_by(|a, b| b.id.cmp(&a.id));

        let mut nodes_map: serde_json::Map<String, serde_json::Value> = serde_json::Map::new();
        for node in &newest_first {
            nodes_map.insert(node.id.to_string(), serde_json::to_value(node)?);
        }
        let nodes_json = serde_json::to_string_pretty(&nodes_map)?;
        Self::write_atomic(&self.nodes_path(), &nodes_json).await?;

        let kw_strength = KwStrengthFile {
            kw_strength_event: memory.kw_strength_event_snapshot(),
            kw_strength_thought: memory.kw_strength_thought_snapshot(),
        };
        let kw_json = serde_json::to_string_pretty(&kw_strength)?;
        Self::write_atomic(&self.kw_strength_path(), &kw_json).await?;

        let embeddings_json = serde_json::to_string_pretty(&memory.embeddings)?;
        Self::write_atomic(&self.embeddings_path(), &embeddings_json).await?;

        Ok(())
    }

    /// Rebuild an `AssociativeMemory` from a previously-saved snapshot. A
    /// missing directory yields an empty memory rather than an error, so a
    /// fresh persona bootstraps cleanly.
    pub async fn load(&self) -> Result<AssociativeMemory> {
        if !self.nodes_path().exists() {
            return Ok(AssociativeMemory::new());
        }

        let nodes_raw = tokio::fs::read_to_string(self.nodes_path()).await?;
        let nodes_map: HashMap<String, ConceptNode> = serde_json::from_str(&nodes_raw)?;

        let kw_strength: KwStrengthFile = if self.kw_strength_path().exists() {
            let raw = tokio::fs::read_to_string(self.kw_strength_path()).await?;
            serde_json::from_str(&raw)?
        } else {
            KwStrengthFile {
                kw_strength_event: HashMap::new(),
                kw_strength_thought: HashMap::new(),
            }
        };

        let embeddings: HashMap<String, Vec<f32>> = if self.embeddings_path().exists() {
            let raw = tokio::fs::read_to_string(self.embeddings_path()).await?;
            serde_json::from_str(&raw)?
        } else {
            HashMap::new()
        };

        let mut nodes: Vec<ConceptNode> = nodes_map.into_values().collect();
        nodes.sort_by_key(|n| n.id);

        Ok(AssociativeMemory::rebuild(
            nodes,
            kw_strength.kw_strength_event,
            kw_strength.kw_strength_thought,
            embeddings,
        ))
    }
}

/// A single id -> node pair, handy for callers that want to persist or
/// inspect one node without pulling in the whole store.
pub fn node_file_name(id: NodeId) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn kw(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[tokio::test]
    async fn round_trips_nodes_keywords_and_embeddings() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AssociativeMemoryStore::new(tmp.path());

        let mut memory = AssociativeMemory::new();
        let id = memory.add_event(
            "February 13, 2023, 00:00:00", None, "Isabella", "is", "reading",
            "Isabella is reading a book", kw(&["reading"]), 4,
        );
        memory.embeddings.insert("Isabella is reading a book".to_string(), vec![0.1, 0.2, 0.3]);

        store.save(&memory).await.unwrap();
        let reloaded = store.load().await.unwrap();

        assert_eq!(reloaded.node(id).unwrap().description, "Isabella is reading a book");
        assert_eq!(reloaded.keyword_strength_event("reading"), 1);
        assert_eq!(
            reloaded.embeddings.get("Isabella is reading a book"),
            Some(&vec![0.1, 0.2, 0.3])
        );
    }

    #[tokio::test]
    async fn load_on_missing_directory_returns_empty_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AssociativeMemoryStore::new(tmp.path().join("does-not-exist"));
        let memory = store.load().await.unwrap();
        assert!(memory.all_nodes().next().is_none());
    }

    #[tokio::test]
    async fn save_is_atomic_via_tmp_rename() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AssociativeMemoryStore::new(tmp.path());
        let memory = AssociativeMemory::new();
        store.save(&memory).await.unwrap();
        assert!(store.nodes_path().exists());
        assert!(!store.nodes_path().with_extension("json.tmp").exists());
    }
}
