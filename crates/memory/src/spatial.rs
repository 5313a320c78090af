//! Spatial memory: a per-agent tree of `world -> sector -> arena ->
//! [game_object]`, populated only by perception. Insertion-only; a place
//! once discovered is never forgotten.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpatialMemory {
    /// world -> sector -> arena -> game objects discovered there.
    tree: BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>,
}

impl SpatialMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `game_object` exists at `world:sector:arena`. A no-op if
    /// already known.
    pub fn add_discovery(&mut self, world: &str, sector: &str, arena: &str, game_object: &str) {
        let objects = self
            .tree
            .entry(world.to_string())
            .or_default()
            .entry(sector.to_string())
            .or_default()
            .entry(arena.to_string())
            .or_default();
        if !game_object.is_empty() && !objects.iter().any(|o| o == game_object) {
            objects.push(game_object.to_string());
        } else if game_object.is_empty() {
            // still register the arena as known even with no object on this tile
        }
    }

    /// Comma-joined sectors known within `world`.
    pub fn get_str_accessible_sectors(&self, world: &str) -> String {
        self.tree
            .get(world)
            .map(|sectors| sectors.keys().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default()
    }

    /// Comma-joined arenas known within `world:sector`.
    pub fn get_str_accessible_sector_arenas(&self, world_sector: &str) -> String {
        let Some((world, sector)) = world_sector.split_once(':') else {
            return String::new();
        };
        self.lookup_sector(world, sector)
            .map(|arenas| arenas.keys().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default()
    }

    /// Comma-joined game objects known within `world:sector:arena`.
    pub fn get_str_accessible_arena_game_objects(&self, world_sector_arena: &str) -> String {
        let parts: Vec<&str> = world_sector_arena.splitn(3, ':').collect();
        let [world, sector, arena] = parts[..] else {
            return String::new();
        };
        self.lookup_arena(world, sector, arena)
            .map(|objects| objects.join(", "))
            .unwrap_or_default()
    }

    /// Render the full `world:sector:arena -> [objects]` tree, one line per
    /// arena, for operator inspection.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        for (world, sectors) in &self.tree {
            for (sector, arenas) in sectors {
                for (arena, objects) in arenas {
                    lines.push(format!("{world}:{sector}:{arena} -> [{}]", objects.join(", ")));
                }
            }
        }
        lines.join("\n")
    }

    fn lookup_sector(&self, world: &str, sector: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.tree.get(world)?.get(sector).or_else(|| {
            // Case-insensitive fallback when the exact key is absent.
            self.tree
                .get(world)?
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(sector))
                .map(|(_, value)| value)
        })
    }

    fn lookup_arena(&self, world: &str, sector: &str, arena: &str) -> Option<&Vec<String>> {
        let arenas = self.lookup_sector(world, sector)?;
        arenas.get(arena).or_else(|| {
            arenas
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(arena))
                .map(|(_, value)| value)
        })
    }
}
