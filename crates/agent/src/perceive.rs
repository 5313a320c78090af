//! Perceive: vision-bounded event capture, writing discoveries into spatial
//! memory and freshly-noticed events into associative memory.

use std::collections::HashSet;

use townsim_llm::{GenerationParams, LlmGateway, safe_generate};
use townsim_maze::{Coord, Event, Granularity, Maze};
use townsim_memory::{AssociativeMemory, NodeId, Scratch, SpatialMemory, compress_for_embedding_key};

fn chebyshev(a: Coord, b: Coord) -> i32 {
    (a.0 - b.0).abs().max((a.1 - b.1).abs())
}

fn event_keywords(event: &Event) -> HashSet<String> {
    [event.subject.as_str(), event.predicate.as_str(), event.object.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

async fn score_poignancy(gateway: &LlmGateway, event: &Event) -> u8 {
    if event.is_idle() {
        return 1;
    }
    let prompt = format!(
        "On a scale of 1 to 10, how significant is this moment for the subject: \"{}\"? \
         Respond with only the integer.",
        event.description
    );
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        "3".to_string(),
        |raw| raw.trim().chars().all(|c| c.is_ascii_digit()) && !raw.trim().is_empty(),
        |raw| raw.trim().to_string(),
    )
    .await;
    raw.parse::<u8>().unwrap_or(3).clamp(1, 10)
}

/// One tick of perception: populate spatial memory from everything in
/// vision range, then write through the closest `att_bandwidth` events in
/// the current arena that aren't already in the retention window.
///
/// `self_chat_transcript` is threaded in separately from `scratch` (rather
/// than read off it) so the caller decides exactly which event, if any,
/// counts as "the agent's own self-chat" for the filling-link rule.
pub async fn perceive(
    scratch: &mut Scratch,
    memory: &mut AssociativeMemory,
    spatial: &mut SpatialMemory,
    maze: &Maze,
    gateway: &LlmGateway,
    self_chat_transcript: Option<&[(String, String)]>,
) -> Vec<NodeId> {
    let nearby = maze.get_nearby_tiles(scratch.curr_tile, scratch.vision_r);

    // 1. Space: register every discovered place in spatial memory.
    for coord in &nearby {
        if let Some(tile) = maze.access_tile(*coord) {
            if tile.world.is_empty() {
                continue;
            }
            spatial.add_discovery(&tile.world, &tile.sector, &tile.arena, &tile.game_object);
        }
    }

    // 2. Events: restrict to the agent's current arena, sort by distance,
    // dedup, keep the closest `att_bandwidth`.
    let Some(current_arena) = maze.get_tile_path(scratch.curr_tile, Granularity::Arena) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut scored: Vec<(i32, Event)> = Vec::new();
    for coord in &nearby {
        let Some(tile) = maze.access_tile(*coord) else { continue };
        if tile.address(Granularity::Arena) != current_arena {
            continue;
        }
        let distance = chebyshev(scratch.curr_tile, *coord);
        for event in &tile.events {
            if seen.insert(event.clone()) {
                scored.push((distance, event.clone()));
            }
        }
    }
    scored.sort_by_key(|(distance, _)| *distance);
    scored.truncate(scratch.att_bandwidth);

    // 3. Write-through: embed + score + commit anything new.
    let retained = memory.get_summarized_latest_events(scratch.retention);
    let mut fresh_ids = Vec::new();

    for (_, event) in scored {
        let triple = (event.subject.clone(), event.predicate.clone(), event.object.clone());
        if retained.contains(&triple) {
            continue;
        }

        let poignancy = score_poignancy(gateway, &event).await;
        let embedding_key = compress_for_embedding_key(&event.description);
        let embedding = gateway.embed(&embedding_key).await.unwrap_or_default();

        let id = memory.add_event(
            scratch.curr_time.clone(),
            None,
            event.subject.clone(),
            event.predicate.clone(),
            event.object.clone(),
            event.description.clone(),
            event_keywords(&event),
            poignancy,
        );
        memory.embeddings.insert(embedding_key, embedding);

        let is_self_chat = event.subject == scratch.name && event.predicate == "chat with";
        if is_self_chat {
            if let Some(transcript) = self_chat_transcript {
                let chat_id = memory.add_chat(
                    scratch.curr_time.clone(),
                    None,
                    event.subject.clone(),
                    event.predicate.clone(),
                    event.object.clone(),
                    event.description.clone(),
                    event_keywords(&event),
                    poignancy,
                    transcript.to_vec(),
                );
                memory.set_event_filling(id, chat_id);
            }
        }

        scratch.importance_trigger_curr -= poignancy as i32;
        scratch.importance_ele_n += 1;
        fresh_ids.push(id);
    }

    fresh_ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use townsim_maze::Tile;

    fn sample_maze() -> Maze {
        let mut maze = Maze::new(5, 5);
        let mut tile = Tile::empty();
        tile.world = "the ville".to_string();
        tile.sector = "cafe".to_string();
        tile.arena = "counter".to_string();
        tile.game_object = "espresso machine".to_string();
        maze.set_tile((2, 2), tile.clone());
        maze.add_event_from_tile(Event::new("Maria", "is", "ordering coffee", "Maria is ordering coffee"), (2, 2));

        let mut self_tile = Tile::empty();
        self_tile.world = "the ville".to_string();
        self_tile.sector = "cafe".to_string();
        self_tile.arena = "counter".to_string();
        maze.set_tile((2, 1), self_tile);
        maze
    }

    fn gateway() -> LlmGateway {
        LlmGateway::ollama("http://127.0.0.1:1", std::time::Duration::from_millis(20), "m", "e")
    }

    #[tokio::test]
    async fn perceive_populates_spatial_memory_and_writes_new_events() {
        let maze = sample_maze();
        let mut scratch = Scratch::new("Isabella", "February 13, 2023, 09:00:00", (2, 1));
        let mut memory = AssociativeMemory::new();
        let mut spatial = SpatialMemory::new();

        let fresh = perceive(&mut scratch, &mut memory, &mut spatial, &maze, &gateway(), None).await;

        assert_eq!(fresh.len(), 1);
        assert_eq!(
            spatial.get_str_accessible_arena_game_objects("the ville:cafe:counter"),
            "espresso machine"
        );
        assert!(scratch.importance_trigger_curr < 150);
    }

    #[tokio::test]
    async fn perceive_skips_events_already_in_retention_window() {
        let maze = sample_maze();
        let mut scratch = Scratch::new("Isabella", "February 13, 2023, 09:00:00", (2, 1));
        let mut memory = AssociativeMemory::new();
        memory.add_event(
            "t0", None, "Maria", "is", "ordering coffee", "already known", HashSet::new(), 3,
        );
        let mut spatial = SpatialMemory::new();

        let fresh = perceive(&mut scratch, &mut memory, &mut spatial, &maze, &gateway(), None).await;
        assert!(fresh.is_empty());
    }
}
