//! Simulation boot: fork a source simulation directory into a fresh target,
//! rewrite `reverie/meta.json`, and load/save each persona's bootstrap
//! memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use townsim_agent::Persona;
use townsim_config::SimMeta;
use townsim_maze::Maze;
use townsim_memory::{AssociativeMemoryStore, ScratchStore, SpatialMemoryStore};

use crate::error::RuntimeError;

fn meta_path(sim_dir: &Path) -> PathBuf {
    sim_dir.join("reverie").join("meta.json")
}

fn maze_path(sim_dir: &Path) -> PathBuf {
    sim_dir.join("reverie").join("maze.json")
}

fn persona_dir(sim_dir: &Path, name: &str) -> PathBuf {
    sim_dir.join("personas").join(name).join("bootstrap_memory")
}

async fn copy_dir_recursive(source: &Path, target: &Path) -> Result<(), RuntimeError> {
    tokio::fs::create_dir_all(target).await?;
    let mut entries = tokio::fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        let dest = target.join(entry.file_name());
        if entry.file_type().await?.is_dir() {
            Box::pin(copy_dir_recursive(&entry.path(), &dest)).await?;
        } else {
            tokio::fs::copy(entry.path(), &dest).await?;
        }
    }
    Ok(())
}

/// Fork `<storage_root>/<source_sim_code>` into `<storage_root>/<new_sim_code>`,
/// rewriting `meta.json`'s `fork_sim_code` to record where it came from.
/// Returns the new simulation directory and its loaded meta.
pub async fn fork_simulation(
    storage_root: &Path,
    source_sim_code: &str,
    new_sim_code: &str,
) -> Result<(PathBuf, SimMeta), RuntimeError> {
    let source_dir = storage_root.join(source_sim_code);
    let target_dir = storage_root.join(new_sim_code);
    copy_dir_recursive(&source_dir, &target_dir).await?;

    let path = meta_path(&target_dir);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|_| RuntimeError::MissingMeta(path.clone()))?;
    let mut meta: SimMeta = serde_json::from_str(&raw)?;
    meta.fork_sim_code = source_sim_code.to_string();
    tokio::fs::write(&path, serde_json::to_string_pretty(&meta)?).await?;
    Ok((target_dir, meta))
}

pub async fn load_meta(sim_dir: &Path) -> Result<SimMeta, RuntimeError> {
    let path = meta_path(sim_dir);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|_| RuntimeError::MissingMeta(path))?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn save_meta(sim_dir: &Path, meta: &SimMeta) -> Result<(), RuntimeError> {
    let path = meta_path(sim_dir);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, serde_json::to_string_pretty(meta)?).await?;
    Ok(())
}

/// Load the grid maze a simulation directory was booted with. Map asset
/// loading (the original CSV matrices + foundation JSON) is out of scope;
/// this reads back whatever `save_maze` last wrote under `reverie/maze.json`.
pub async fn load_maze(sim_dir: &Path) -> Result<Maze, RuntimeError> {
    let path = maze_path(sim_dir);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|_| RuntimeError::MissingMeta(path))?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn save_maze(sim_dir: &Path, maze: &Maze) -> Result<(), RuntimeError> {
    let path = maze_path(sim_dir);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, serde_json::to_string_pretty(maze)?).await?;
    Ok(())
}

/// Load every named persona's `scratch.json` / `spatial_memory.json` /
/// `associative_memory/*` trio into a `Persona` aggregate.
pub async fn load_personas(sim_dir: &Path, names: &[String]) -> Result<HashMap<String, Persona>, RuntimeError> {
    let mut personas = HashMap::new();
    for name in names {
        let dir = persona_dir(sim_dir, name);
        let scratch = ScratchStore::new(&dir).load().await.map_err(|_| RuntimeError::UnknownPersona(name.clone()))?;
        let associative = AssociativeMemoryStore::new(dir.join("associative_memory")).load().await?;
        let spatial = SpatialMemoryStore::new(&dir).load().await?;
        personas.insert(name.clone(), Persona::new(scratch, associative, spatial));
    }
    Ok(personas)
}

pub async fn save_personas(sim_dir: &Path, personas: &HashMap<String, Persona>) -> Result<(), RuntimeError> {
    for (name, persona) in personas {
        let dir = persona_dir(sim_dir, name);
        ScratchStore::new(&dir).save(&persona.scratch).await?;
        AssociativeMemoryStore::new(dir.join("associative_memory")).save(&persona.associative).await?;
        SpatialMemoryStore::new(&dir).save(&persona.spatial).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use townsim_memory::{AssociativeMemory, Scratch, SpatialMemory};

    #[tokio::test]
    async fn fork_simulation_copies_tree_and_rewrites_fork_code() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().join("base_the_ville");
        tokio::fs::create_dir_all(source_dir.join("reverie")).await.unwrap();
        let meta = SimMeta { persona_names: vec!["Isabella Rodriguez".to_string()], ..SimMeta::default() };
        tokio::fs::write(source_dir.join("reverie").join("meta.json"), serde_json::to_string(&meta).unwrap())
            .await
            .unwrap();

        let (target_dir, loaded) = fork_simulation(tmp.path(), "base_the_ville", "july_1_run").await.unwrap();
        assert_eq!(target_dir, tmp.path().join("july_1_run"));
        assert_eq!(loaded.fork_sim_code, "base_the_ville");
        assert_eq!(loaded.persona_names, vec!["Isabella Rodriguez".to_string()]);
    }

    #[tokio::test]
    async fn save_then_load_personas_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut personas = HashMap::new();
        let scratch = Scratch::new("Isabella Rodriguez", "February 13, 2023, 00:00:00", (3, 4));
        personas.insert("Isabella Rodriguez".to_string(), Persona::new(scratch, AssociativeMemory::new(), SpatialMemory::new()));

        save_personas(tmp.path(), &personas).await.unwrap();
        let names = vec!["Isabella Rodriguez".to_string()];
        let reloaded = load_personas(tmp.path(), &names).await.unwrap();
        assert_eq!(reloaded["Isabella Rodriguez"].scratch.curr_tile, (3, 4));
    }

    #[tokio::test]
    async fn save_then_load_maze_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let maze = Maze::new(3, 3);
        save_maze(tmp.path(), &maze).await.unwrap();
        let reloaded = load_maze(tmp.path()).await.unwrap();
        assert_eq!(reloaded.width(), 3);
        assert_eq!(reloaded.height(), 3);
    }
}
