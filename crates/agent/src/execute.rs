//! Execute: resolve a persona's committed action address into the next tile
//! to move to this step.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use townsim_exec::{find_path, resolve_address_to_path, step_along_path};
use townsim_maze::{Coord, Maze};
use townsim_memory::Scratch;

const MAX_PATH_ITERATIONS: usize = 10_000;

/// `act_address` strings are tagged variants, not free-form text — parse
/// once here, and render back to a string only at the scratch/LLM boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Go(String),
    ChaseAgent(String),
    Wait(Coord),
    Random(String),
}

impl Address {
    pub fn parse(raw: &str) -> Self {
        if let Some(name) = raw.strip_prefix("<persona> ") {
            return Address::ChaseAgent(name.to_string());
        }
        if let Some(rest) = raw.strip_prefix("<waiting> ") {
            let mut parts = rest.split_whitespace();
            let x = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let y = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            return Address::Wait((x, y));
        }
        if let Some(prefix) = raw.strip_suffix(":<random>") {
            return Address::Random(prefix.to_string());
        }
        if raw == "<random>" {
            return Address::Random(String::new());
        }
        Address::Go(raw.to_string())
    }
}

/// Everything path acquisition needs beyond the persona's own scratch.
pub struct ExecuteContext<'a> {
    pub maze: &'a Maze,
    pub curr_tile: Coord,
    pub occupied: &'a HashSet<Coord>,
    /// The chased persona's current tile, when `act_address` is `<persona> name`.
    pub chase_target_tile: Option<Coord>,
    /// Substituted for `Address::Go` when the address has no registered tiles.
    pub fallback_address: &'a str,
}

/// Of a full start-exclusive/end-inclusive path, the prefix up to the
/// earlier midpoint tile when the path length is even. A length-2 path
/// yields a single-step prefix; a length-10 path yields a 5-tile prefix.
pub fn path_to_midpoint(full_path: &[Coord]) -> Vec<Coord> {
    if full_path.is_empty() {
        return Vec::new();
    }
    let mid_index = (full_path.len() - 1) / 2;
    full_path[..=mid_index].to_vec()
}

/// Acquire a fresh `planned_path` for `address`. `None` means no reachable
/// candidate tile exists; callers treat that as "stay put" this tick.
pub fn acquire_path(ctx: &ExecuteContext<'_>, address: &Address) -> Option<Vec<Coord>> {
    match address {
        Address::ChaseAgent(_name) => {
            let target = ctx.chase_target_tile?;
            let full = find_path(ctx.maze, ctx.curr_tile, target, MAX_PATH_ITERATIONS);
            if full.is_empty() {
                return None;
            }
            Some(path_to_midpoint(&full))
        }
        Address::Wait((x, y)) => {
            let path = find_path(ctx.maze, ctx.curr_tile, (*x, *y), MAX_PATH_ITERATIONS);
            if path.is_empty() { None } else { Some(path) }
        }
        Address::Random(prefix) => {
            let candidates: Vec<Coord> = ctx
                .maze
                .tiles_for_address(prefix)
                .into_iter()
                .filter(|tile| !ctx.occupied.contains(tile))
                .collect();
            let target = *candidates.choose(&mut rand::thread_rng())?;
            let path = find_path(ctx.maze, ctx.curr_tile, target, MAX_PATH_ITERATIONS);
            if path.is_empty() { None } else { Some(path) }
        }
        Address::Go(address) => {
            let target_address = if ctx.maze.tiles_for_address(address).is_empty() {
                ctx.fallback_address
            } else {
                address.as_str()
            };
            resolve_address_to_path(ctx.maze, ctx.curr_tile, target_address, ctx.occupied, MAX_PATH_ITERATIONS)
        }
    }
}

/// Outcome of one execute-stage tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub next_tile: Coord,
    pub pronunciatio: String,
    pub description: String,
}

/// Run the execute stage for one tick: replan when `act_path_set` is false,
/// or when the address is `<random>` and `planned_path` has run dry, then
/// pop the next step.
pub fn execute(scratch: &mut Scratch, ctx: &ExecuteContext<'_>) -> ExecuteOutcome {
    let address = Address::parse(&scratch.act_address);
    let random_exhausted = matches!(address, Address::Random(_)) && scratch.planned_path.is_empty();

    if !scratch.act_path_set || random_exhausted {
        scratch.planned_path = acquire_path(ctx, &address).unwrap_or_default();
        scratch.act_path_set = true;
    }

    let step = step_along_path(ctx.curr_tile, &mut scratch.planned_path);

    ExecuteOutcome {
        next_tile: step.next_tile,
        pronunciatio: scratch.act_pronunciatio.clone(),
        description: format!("{} @ {}", scratch.act_description, scratch.act_address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use townsim_maze::Tile;

    fn open_maze(w: i32, h: i32) -> Maze {
        Maze::new(w, h)
    }

    #[test]
    fn parses_all_address_kinds() {
        assert_eq!(Address::parse("<persona> Klaus Mueller"), Address::ChaseAgent("Klaus Mueller".to_string()));
        assert_eq!(Address::parse("<waiting> 3 4"), Address::Wait((3, 4)));
        assert_eq!(Address::parse("the ville:cafe:counter:<random>"), Address::Random("the ville:cafe:counter".to_string()));
        assert_eq!(Address::parse("the ville:cafe:counter"), Address::Go("the ville:cafe:counter".to_string()));
    }

    #[test]
    fn midpoint_of_ten_tile_path_is_five_tiles() {
        let full: Vec<Coord> = (1..=10).map(|x| (x, 0)).collect();
        assert_eq!(path_to_midpoint(&full).len(), 5);
    }

    #[test]
    fn midpoint_of_two_tile_path_is_a_single_step() {
        let full: Vec<Coord> = vec![(1, 0), (2, 0)];
        assert_eq!(path_to_midpoint(&full).len(), 1);
    }

    #[test]
    fn chase_agent_acquires_midpoint_path() {
        let maze = open_maze(12, 2);
        let occupied = HashSet::new();
        let ctx = ExecuteContext {
            maze: &maze,
            curr_tile: (0, 0),
            occupied: &occupied,
            chase_target_tile: Some((9, 0)),
            fallback_address: "",
        };
        let path = acquire_path(&ctx, &Address::ChaseAgent("Klaus".to_string())).unwrap();
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn wait_targets_exact_coordinate() {
        let maze = open_maze(5, 5);
        let occupied = HashSet::new();
        let ctx = ExecuteContext {
            maze: &maze,
            curr_tile: (0, 0),
            occupied: &occupied,
            chase_target_tile: None,
            fallback_address: "",
        };
        let path = acquire_path(&ctx, &Address::Wait((3, 0))).unwrap();
        assert_eq!(*path.last().unwrap(), (3, 0));
    }

    #[test]
    fn execute_replans_when_path_not_set_and_steps_once() {
        let maze = open_maze(5, 5);
        let occupied = HashSet::new();
        let mut tile = Tile::empty();
        tile.world = "w".into();
        tile.sector = "s".into();
        tile.arena = "a".into();
        tile.game_object = "o".into();
        let mut maze_with_target = maze.clone();
        maze_with_target.set_tile((4, 0), tile);

        let ctx = ExecuteContext {
            maze: &maze_with_target,
            curr_tile: (0, 0),
            occupied: &occupied,
            chase_target_tile: None,
            fallback_address: "",
        };

        let mut scratch = Scratch::new("Isabella", "February 13, 2023, 09:00:00", (0, 0));
        scratch.act_address = "w:s:a:o".to_string();
        scratch.act_description = "walking to the cafe".to_string();
        scratch.act_pronunciatio = "\u{2615}".to_string();

        let outcome = execute(&mut scratch, &ctx);
        assert_eq!(outcome.next_tile, (1, 0));
        assert!(scratch.act_path_set);
        assert_eq!(scratch.planned_path.len(), 2);
    }

    #[test]
    fn execute_stays_put_when_no_path_reachable() {
        let maze = open_maze(3, 3);
        let occupied = HashSet::new();
        let ctx = ExecuteContext {
            maze: &maze,
            curr_tile: (0, 0),
            occupied: &occupied,
            chase_target_tile: None,
            fallback_address: "",
        };
        let mut scratch = Scratch::new("Isabella", "February 13, 2023, 09:00:00", (0, 0));
        scratch.act_address = "nowhere:registered:address".to_string();

        let outcome = execute(&mut scratch, &ctx);
        assert_eq!(outcome.next_tile, (0, 0));
    }
}
