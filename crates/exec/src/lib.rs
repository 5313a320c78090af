//! Path Finder and Execute: turning a planned address into the next step on
//! the grid.
//!
//! The path finder is a plain breadth-first flood fill over the maze's
//! collision grid — no persona state, no I/O, just coordinates in and
//! coordinates out. `execute` sits one layer up: it resolves a plan's target
//! address to concrete candidate tiles, asks the path finder for a route,
//! and hands the caller the single next tile to move to this tick.

use std::collections::{HashSet, VecDeque};

use townsim_maze::{Coord, Granularity, Maze};

// ── Path Finder ──────────────────────────────────────────────────────────────

/// Breadth-first flood fill from `start` to `end` over `maze`'s collision
/// grid. Returns a path start-exclusive, end-inclusive; empty when no path
/// exists or when the flood exhausts `max_iterations` before reaching `end`.
/// `start == end` returns `[start]` per the edge-case contract every caller
/// relies on.
///
/// Internally this works in (row, col); the public API stays in (x, y) so
/// callers never have to think about the conversion.
pub fn find_path(maze: &Maze, start: Coord, end: Coord, max_iterations: usize) -> Vec<Coord> {
    if start == end {
        return vec![start];
    }

    let width = maze.width();
    let height = maze.height();
    if width <= 0 || height <= 0 {
        return Vec::new();
    }

    // labels[row][col]: 0 = unvisited, >0 = BFS distance from start + 1.
    let mut labels = vec![vec![0u32; width as usize]; height as usize];
    let (sx, sy) = start;
    if sx < 0 || sy < 0 || sx >= width || sy >= height {
        return Vec::new();
    }
    labels[sy as usize][sx as usize] = 1;

    let mut frontier = VecDeque::new();
    frontier.push_back(start);
    let mut iterations = 0usize;
    let mut reached_end = false;

    while let Some((x, y)) = frontier.pop_front() {
        if (x, y) == end {
            reached_end = true;
            break;
        }
        iterations += 1;
        if iterations > max_iterations {
            break;
        }

        let current_label = labels[y as usize][x as usize];
        for (nx, ny) in four_neighbors((x, y)) {
            if nx < 0 || ny < 0 || nx >= width || ny >= height {
                continue;
            }
            if labels[ny as usize][nx as usize] != 0 {
                continue;
            }
            if maze.is_collision((nx, ny)) && (nx, ny) != end {
                continue;
            }
            labels[ny as usize][nx as usize] = current_label + 1;
            frontier.push_back((nx, ny));
        }
    }

    if !reached_end && labels[end.1 as usize][end.0 as usize] == 0 {
        return Vec::new();
    }

    backtrack(&labels, start, end)
}

fn four_neighbors((x, y): Coord) -> [Coord; 4] {
    [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
}

/// Walk end -> start by strictly decreasing the distance label at each step,
/// then reverse to get a start-exclusive, end-inclusive path.
fn backtrack(labels: &[Vec<u32>], start: Coord, end: Coord) -> Vec<Coord> {
    let mut path = vec![end];
    let mut current = end;

    while current != start {
        let current_label = labels[current.1 as usize][current.0 as usize];
        let next = four_neighbors(current)
            .into_iter()
            .filter(|&(x, y)| {
                y >= 0
                    && (y as usize) < labels.len()
                    && x >= 0
                    && (x as usize) < labels[y as usize].len()
                    && labels[y as usize][x as usize] != 0
                    && labels[y as usize][x as usize] < current_label
            })
            .min_by_key(|&(x, y)| labels[y as usize][x as usize]);

        let Some(next) = next else {
            return Vec::new();
        };
        path.push(next);
        current = next;
    }

    path.reverse();
    path.remove(0); // drop `start`, keep start-exclusive/end-inclusive
    path
}

/// Midpoint variant: run the full path and return only its midpoint tile.
pub fn find_path_midpoint(maze: &Maze, start: Coord, end: Coord, max_iterations: usize) -> Option<Coord> {
    let path = find_path(maze, start, end, max_iterations);
    if path.is_empty() {
        return None;
    }
    Some(path[path.len() / 2])
}

/// Approach variant: of the four neighbors of `target`, path to the one
/// closest (Euclidean) to `start`, discarding out-of-bounds neighbors.
pub fn find_path_approach(maze: &Maze, start: Coord, target: Coord, max_iterations: usize) -> Vec<Coord> {
    let closest = four_neighbors(target)
        .into_iter()
        .filter(|&(x, y)| x >= 0 && y >= 0 && x < maze.width() && y < maze.height())
        .min_by(|&a, &b| euclidean(start, a).total_cmp(&euclidean(start, b)));

    match closest {
        Some(tile) => find_path(maze, start, tile, max_iterations),
        None => Vec::new(),
    }
}

fn euclidean((ax, ay): Coord, (bx, by): Coord) -> f64 {
    (((ax - bx).pow(2) + (ay - by).pow(2)) as f64).sqrt()
}

/// Nearest of `candidates` to `from`, by Euclidean distance.
pub fn closest_coordinate(from: Coord, candidates: &[Coord]) -> Option<Coord> {
    candidates
        .iter()
        .copied()
        .min_by(|&a, &b| euclidean(from, a).total_cmp(&euclidean(from, b)))
}

// ── Execute ──────────────────────────────────────────────────────────────────

/// Outcome of one execute-stage tick: the tile to move to this step, plus
/// whatever planned path remains for next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteStep {
    pub next_tile: Coord,
    pub remaining_path: Vec<Coord>,
}

/// Resolve `target_address` to a concrete next tile.
///
/// Mirrors the plan -> tile resolution in the original execute stage: the
/// default case samples candidate tiles registered under the target
/// address, filters out tiles other agents currently occupy, and paths to
/// the closest remaining candidate. `occupied` is every tile some other
/// agent is standing on this tick (the "persona occupancy" filter).
///
/// Returns `None` when no reachable, unoccupied candidate tile exists —
/// callers treat that as "stay put".
pub fn resolve_address_to_path(
    maze: &Maze,
    curr_tile: Coord,
    target_address: &str,
    occupied: &HashSet<Coord>,
    max_iterations: usize,
) -> Option<Vec<Coord>> {
    let candidates: Vec<Coord> = maze
        .tiles_for_address(target_address)
        .into_iter()
        .filter(|tile| !occupied.contains(tile))
        .collect();

    if candidates.is_empty() {
        return None;
    }

    // Cap the candidate pool the way the original execute stage samples at
    // most 4 target tiles before picking the shortest path among them.
    let capped: Vec<Coord> = candidates.into_iter().take(4).collect();

    capped
        .into_iter()
        .map(|target| find_path(maze, curr_tile, target, max_iterations))
        .filter(|path| !path.is_empty())
        .min_by_key(|path| path.len())
}

/// Advance one tick along `planned_path`. Pops the next tile off the front
/// (start-exclusive path already has the current tile stripped by the
/// caller) and returns it; an empty path means "stay at `curr_tile`".
pub fn step_along_path(curr_tile: Coord, planned_path: &mut Vec<Coord>) -> ExecuteStep {
    if planned_path.is_empty() {
        return ExecuteStep {
            next_tile: curr_tile,
            remaining_path: Vec::new(),
        };
    }
    let next_tile = planned_path.remove(0);
    ExecuteStep {
        next_tile,
        remaining_path: planned_path.clone(),
    }
}

/// Address granularity used when comparing "same place" for the midpoint
/// heuristic: two agents pathing to the same arena should rendezvous rather
/// than both walk to the exact same game object tile.
pub fn same_arena(maze: &Maze, a: Coord, b: Coord) -> bool {
    maze.get_tile_path(a, Granularity::Arena) == maze.get_tile_path(b, Granularity::Arena)
}

#[cfg(test)]
mod tests {
    use super::*;
    use townsim_maze::Tile;

    fn open_maze(width: i32, height: i32) -> Maze {
        Maze::new(width, height)
    }

    #[test]
    fn start_equals_end_returns_single_tile() {
        let maze = open_maze(5, 5);
        assert_eq!(find_path(&maze, (2, 2), (2, 2), 1000), vec![(2, 2)]);
    }

    #[test]
    fn straight_line_path_has_expected_length() {
        let maze = open_maze(5, 5);
        let path = find_path(&maze, (0, 0), (3, 0), 1000);
        assert_eq!(path, vec![(1, 0), (2, 0), (3, 0)]);
    }

    #[test]
    fn path_round_trip_has_equal_length_both_directions() {
        let maze = open_maze(6, 6);
        let forward = find_path(&maze, (0, 0), (5, 5), 1000);
        let backward = find_path(&maze, (5, 5), (0, 0), 1000);
        assert!(!forward.is_empty());
        assert_eq!(forward.len(), backward.len());
    }

    #[test]
    fn collision_tiles_are_routed_around() {
        let mut maze = open_maze(3, 3);
        maze.set_collision((1, 0), true);
        maze.set_collision((1, 1), true);
        // (1,2) stays open, forcing the route south around the wall.
        let path = find_path(&maze, (0, 0), (2, 0), 1000);
        assert!(!path.is_empty());
        assert!(path.contains(&(1, 2)));
    }

    #[test]
    fn unreachable_target_returns_empty_path() {
        let mut maze = open_maze(3, 3);
        for y in 0..3 {
            maze.set_collision((1, y), true);
        }
        assert!(find_path(&maze, (0, 0), (2, 0), 1000).is_empty());
    }

    #[test]
    fn midpoint_picks_the_middle_of_the_route() {
        let maze = open_maze(5, 5);
        let midpoint = find_path_midpoint(&maze, (0, 0), (4, 0), 1000).unwrap();
        let full = find_path(&maze, (0, 0), (4, 0), 1000);
        assert_eq!(midpoint, full[full.len() / 2]);
    }

    #[test]
    fn closest_coordinate_picks_nearest_by_euclidean_distance() {
        let candidates = vec![(5, 5), (1, 1), (10, 10)];
        assert_eq!(closest_coordinate((0, 0), &candidates), Some((1, 1)));
    }

    #[test]
    fn resolve_address_skips_occupied_tiles() {
        let mut maze = open_maze(4, 4);
        let mut tile_a = Tile::empty();
        tile_a.world = "w".into();
        tile_a.sector = "s".into();
        tile_a.arena = "a".into();
        tile_a.game_object = "piano".into();
        maze.set_tile((3, 0), tile_a.clone());
        maze.set_tile((3, 3), tile_a);

        let mut occupied = HashSet::new();
        occupied.insert((3, 0));

        let path = resolve_address_to_path(&maze, (0, 0), "w:s:a:piano", &occupied, 1000).unwrap();
        assert_eq!(*path.last().unwrap(), (3, 3));
    }

    #[test]
    fn step_along_path_pops_front_and_stay_put_on_empty() {
        let mut path = vec![(1, 0), (2, 0)];
        let step = step_along_path((0, 0), &mut path);
        assert_eq!(step.next_tile, (1, 0));
        assert_eq!(step.remaining_path, vec![(2, 0)]);

        let mut empty = Vec::new();
        let step = step_along_path((5, 5), &mut empty);
        assert_eq!(step.next_tile, (5, 5));
        assert!(step.remaining_path.is_empty());
    }
}
