//! The grid maze: immutable per-tile metadata plus the mutable event layer
//! agents perceive and act on.
//!
//! A tile's `world:sector:arena:game_object` address is how every other
//! module — spatial memory, planning, execution — names a place. The maze
//! is the single mutator of the event layer within a tick; every other
//! component treats it as read-mostly.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Granularity at which an address can be requested from a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    World,
    Sector,
    Arena,
    GameObject,
}

/// `(subject, predicate, object, description)`. `subject` is either a
/// persona name or a tile-address-qualified object name. An idle event has
/// `predicate == "is"` and `object == "idle"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub description: String,
}

impl Event {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            description: description.into(),
        }
    }

    /// The idle form of an event: `(subject, "is", "idle", "")`.
    pub fn idle(subject: impl Into<String>) -> Self {
        Self::new(subject, "is", "idle", "")
    }

    pub fn is_idle(&self) -> bool {
        self.predicate == "is" && self.object == "idle"
    }

    /// The blank `(addr, None, None, None)` form used to clear an object's
    /// event back to its resting state, expressed with empty strings rather
    /// than an `Option` so it interns cleanly as a reverse-index key.
    pub fn blank(address: impl Into<String>) -> Self {
        Self::new(address, "", "", "")
    }
}

/// A single grid cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tile {
    pub world: String,
    pub sector: String,
    pub arena: String,
    pub game_object: String,
    pub collision: bool,
    pub events: HashSet<Event>,
}

impl Tile {
    pub fn empty() -> Self {
        Self {
            world: String::new(),
            sector: String::new(),
            arena: String::new(),
            game_object: String::new(),
            collision: false,
            events: HashSet::new(),
        }
    }

    /// The colon-joined address prefix at `granularity`.
    pub fn address(&self, granularity: Granularity) -> String {
        let parts: Vec<&str> = match granularity {
            Granularity::World => vec![&self.world],
            Granularity::Sector => vec![&self.world, &self.sector],
            Granularity::Arena => vec![&self.world, &self.sector, &self.arena],
            Granularity::GameObject => {
                vec![&self.world, &self.sector, &self.arena, &self.game_object]
            }
        };
        parts.join(":")
    }
}

/// Grid coordinate, `(x, y)` — the convention every external caller uses.
/// The maze stores tiles row-major (`grid[row][col]`); conversion to/from
/// `(row, col)` happens only at the two call sites that need it
/// ([`Maze::access_tile`]/[`Maze::set_collision`] and the path finder).
pub type Coord = (i32, i32);

/// The grid maze: per-tile metadata plus the `address -> {tiles}` reverse
/// index kept in sync with every event mutation.
#[derive(Debug, Clone)]
pub struct Maze {
    grid: Vec<Vec<Tile>>,
    width: i32,
    height: i32,
    address_tiles: HashMap<String, HashSet<Coord>>,
}

/// On-disk shape for a maze: `width`/`height` plus the row-major tile grid.
/// `address_tiles` is derived state, rebuilt by `set_tile` on load rather
/// than serialized — this is the CLI's own save format, not the original
/// CSV-matrix/foundation-JSON asset pipeline (out of scope).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MazeData {
    width: i32,
    height: i32,
    grid: Vec<Vec<Tile>>,
}

impl From<&Maze> for MazeData {
    fn from(maze: &Maze) -> Self {
        Self { width: maze.width, height: maze.height, grid: maze.grid.clone() }
    }
}

impl From<MazeData> for Maze {
    fn from(data: MazeData) -> Self {
        let mut maze = Maze::new(data.width, data.height);
        for (y, row) in data.grid.into_iter().enumerate() {
            for (x, tile) in row.into_iter().enumerate() {
                maze.set_tile((x as i32, y as i32), tile);
            }
        }
        maze
    }
}

impl Serialize for Maze {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        MazeData::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Maze {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        MazeData::deserialize(deserializer).map(Maze::from)
    }
}

impl Maze {
    pub fn new(width: i32, height: i32) -> Self {
        let grid = (0..height)
            .map(|_| (0..width).map(|_| Tile::empty()).collect())
            .collect();
        Self {
            grid,
            width,
            height,
            address_tiles: HashMap::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn in_bounds(&self, (x, y): Coord) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.height
    }

    /// Replace the tile at `(x, y)`, re-indexing its address for every
    /// granularity and re-registering any events it already carries.
    pub fn set_tile(&mut self, coord: Coord, tile: Tile) {
        let (x, y) = coord;
        debug_assert!(self.in_bounds(coord));
        let events: Vec<Event> = tile.events.iter().cloned().collect();
        self.grid[y as usize][x as usize] = tile;
        for granularity in [Granularity::World, Granularity::Sector, Granularity::Arena, Granularity::GameObject] {
            let addr = self.grid[y as usize][x as usize].address(granularity);
            if !addr.is_empty() && !addr.ends_with(':') {
                self.address_tiles.entry(addr).or_default().insert(coord);
            }
        }
        for event in events {
            self.add_event_from_tile(event, coord);
        }
    }

    pub fn set_collision(&mut self, coord: Coord, collision: bool) {
        if self.in_bounds(coord) {
            self.grid[coord.1 as usize][coord.0 as usize].collision = collision;
        }
    }

    pub fn is_collision(&self, coord: Coord) -> bool {
        if !self.in_bounds(coord) {
            return true;
        }
        self.grid[coord.1 as usize][coord.0 as usize].collision
    }

    /// Return the tile at `(x, y)`.
    pub fn access_tile(&self, coord: Coord) -> Option<&Tile> {
        if !self.in_bounds(coord) {
            return None;
        }
        Some(&self.grid[coord.1 as usize][coord.0 as usize])
    }

    /// The colon-joined address prefix of the tile at `coord`, at `granularity`.
    pub fn get_tile_path(&self, coord: Coord, granularity: Granularity) -> Option<String> {
        self.access_tile(coord).map(|tile| tile.address(granularity))
    }

    /// Every tile within Chebyshev radius `r` of `coord`, clipped to the grid.
    pub fn get_nearby_tiles(&self, coord: Coord, r: i32) -> Vec<Coord> {
        let (cx, cy) = coord;
        let mut tiles = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                let candidate = (cx + dx, cy + dy);
                if self.in_bounds(candidate) {
                    tiles.push(candidate);
                }
            }
        }
        tiles
    }

    /// Tiles currently registered under `address` (any granularity).
    pub fn tiles_for_address(&self, address: &str) -> HashSet<Coord> {
        self.address_tiles.get(address).cloned().unwrap_or_default()
    }

    /// Register `event` on the tile at `coord` and in the reverse index for
    /// every non-empty granularity prefix of that tile's address.
    pub fn add_event_from_tile(&mut self, event: Event, coord: Coord) {
        if !self.in_bounds(coord) {
            return;
        }
        let tile = &mut self.grid[coord.1 as usize][coord.0 as usize];
        tile.events.insert(event);
    }

    /// Remove `event` from the tile at `coord`.
    pub fn remove_event_from_tile(&mut self, event: &Event, coord: Coord) {
        if !self.in_bounds(coord) {
            return;
        }
        self.grid[coord.1 as usize][coord.0 as usize].events.remove(event);
    }

    /// Remove every event on the tile at `coord` whose subject is `subject`.
    pub fn remove_subject_events_from_tile(&mut self, subject: &str, coord: Coord) {
        if !self.in_bounds(coord) {
            return;
        }
        self.grid[coord.1 as usize][coord.0 as usize]
            .events
            .retain(|event| event.subject != subject);
    }

    /// Replace every event belonging to the game object at `coord` with its
    /// blank idle form, keyed by the tile's own address.
    pub fn turn_event_from_tile_idle(&mut self, coord: Coord) {
        if !self.in_bounds(coord) {
            return;
        }
        let address = self.grid[coord.1 as usize][coord.0 as usize].address(Granularity::GameObject);
        let tile = &mut self.grid[coord.1 as usize][coord.0 as usize];
        tile.events.clear();
        tile.events.insert(Event::blank(address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_maze() -> Maze {
        let mut maze = Maze::new(4, 4);
        let mut tile = Tile::empty();
        tile.world = "the ville".to_string();
        tile.sector = "artist's co-living space".to_string();
        tile.arena = "common room".to_string();
        tile.game_object = "piano".to_string();
        maze.set_tile((2, 2), tile);
        maze
    }

    #[test]
    fn address_reverse_index_tracks_every_granularity() {
        let maze = sample_maze();
        assert!(maze.tiles_for_address("the ville").contains(&(2, 2)));
        assert!(maze
            .tiles_for_address("the ville:artist's co-living space:common room:piano")
            .contains(&(2, 2)));
    }

    #[test]
    fn get_nearby_tiles_clips_to_grid() {
        let maze = Maze::new(4, 4);
        let nearby = maze.get_nearby_tiles((0, 0), 1);
        assert!(nearby.iter().all(|&(x, y)| x >= 0 && y >= 0));
        assert!(nearby.contains(&(0, 0)));
        assert!(nearby.contains(&(1, 1)));
    }

    #[test]
    fn add_and_remove_event_round_trips() {
        let mut maze = sample_maze();
        let ev = Event::new("piano", "plays", "jazz", "the piano plays jazz");
        maze.add_event_from_tile(ev.clone(), (2, 2));
        assert!(maze.access_tile((2, 2)).unwrap().events.contains(&ev));

        maze.remove_event_from_tile(&ev, (2, 2));
        assert!(!maze.access_tile((2, 2)).unwrap().events.contains(&ev));
    }

    #[test]
    fn remove_subject_events_only_removes_matching_subject() {
        let mut maze = sample_maze();
        maze.add_event_from_tile(Event::new("Isabella", "is", "idle", ""), (2, 2));
        maze.add_event_from_tile(Event::new("piano", "plays", "jazz", ""), (2, 2));

        maze.remove_subject_events_from_tile("Isabella", (2, 2));
        let events = &maze.access_tile((2, 2)).unwrap().events;
        assert!(!events.iter().any(|e| e.subject == "Isabella"));
        assert!(events.iter().any(|e| e.subject == "piano"));
    }

    #[test]
    fn turn_event_from_tile_idle_replaces_with_blank() {
        let mut maze = sample_maze();
        maze.add_event_from_tile(Event::new("piano", "plays", "jazz", ""), (2, 2));

        maze.turn_event_from_tile_idle((2, 2));
        let events = &maze.access_tile((2, 2)).unwrap().events;
        assert_eq!(events.len(), 1);
        let blank = events.iter().next().unwrap();
        assert_eq!(blank.predicate, "");
        assert_eq!(blank.subject, "the ville:artist's co-living space:common room:piano");
    }

    #[test]
    fn collision_defaults_false_and_is_settable() {
        let mut maze = Maze::new(2, 2);
        assert!(!maze.is_collision((0, 0)));
        maze.set_collision((0, 0), true);
        assert!(maze.is_collision((0, 0)));
    }

    #[test]
    fn out_of_bounds_is_treated_as_collision() {
        let maze = Maze::new(2, 2);
        assert!(maze.is_collision((5, 5)));
    }

    #[test]
    fn maze_round_trips_through_json_with_reverse_index_rebuilt() {
        let maze = sample_maze();
        let json = serde_json::to_string(&maze).unwrap();
        let reloaded: Maze = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.width(), 4);
        assert_eq!(reloaded.height(), 4);
        assert!(reloaded.tiles_for_address("the ville:artist's co-living space:common room:piano").contains(&(2, 2)));
    }
}
