//! `WorldRuntime`: owns the maze, the agent map, and the simulated clock
//! driving one tick at a time. A single `WorldRuntime` owns the world and
//! runs per-agent cognition, returning a tile-event delta each step. Agents
//! are processed in fixed order within a tick so later agents observe
//! earlier agents' freshly-committed events.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Timelike;

use townsim_agent::tick::{tick, OtherAgentSnapshot, PendingReaction, TickInputs};
use townsim_agent::Persona;
use townsim_config::{format_sim_time, parse_sim_time, sim_date_key, PersonaDefaults, SimMeta};
use townsim_llm::{safe_generate, GenerationParams, LlmGateway};
use townsim_maze::{Coord, Event, Granularity, Maze};
use townsim_thinker::converse::{converse, Speaker};
use townsim_thinker::plan::{create_react, NewDay, PlanContext};

use crate::clock::ClockSource;
use crate::error::RuntimeError;
use crate::io::{poll_environment, write_movement, MovementFile, MovementMeta, PersonaMovement};
use crate::meta::{fork_simulation, load_personas, load_meta, save_meta, save_personas};

pub struct WorldRuntime {
    pub sim_dir: PathBuf,
    pub meta: SimMeta,
    pub maze: Maze,
    pub personas: HashMap<String, Persona>,
    pub gateway: LlmGateway,
    pub persona_defaults: PersonaDefaults,
    /// Tiles whose object event must be blanked at the start of the next
    /// tick.
    object_cleanup: Vec<Coord>,
    last_day_key: String,
}

/// One fully-processed tick.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: u64,
    pub curr_time: String,
}

/// A snapshot of one persona's reactive-relevant scratch fields, owned so it
/// can outlive the per-persona mutable borrow taken to run that persona's
/// own tick.
struct PersonaSnapshot {
    name: String,
    curr_tile: Coord,
    act_address: String,
    act_description: String,
    act_start_time: String,
    act_duration: u32,
    chatting_with: Option<String>,
    planned_path_is_set: bool,
}

impl PersonaSnapshot {
    fn of(persona: &Persona) -> Self {
        Self {
            name: persona.scratch.name.clone(),
            curr_tile: persona.scratch.curr_tile,
            act_address: persona.scratch.act_address.clone(),
            act_description: persona.scratch.act_description.clone(),
            act_start_time: persona.scratch.act_start_time.clone(),
            act_duration: persona.scratch.act_duration,
            chatting_with: persona.scratch.chatting_with.clone(),
            planned_path_is_set: persona.scratch.act_path_set,
        }
    }
}

impl WorldRuntime {
    pub fn new(
        sim_dir: PathBuf,
        meta: SimMeta,
        maze: Maze,
        personas: HashMap<String, Persona>,
        gateway: LlmGateway,
        persona_defaults: PersonaDefaults,
    ) -> Self {
        let last_day_key = parse_sim_time(&meta.curr_time).map(sim_date_key).unwrap_or_default();
        Self { sim_dir, meta, maze, personas, gateway, persona_defaults, object_cleanup: Vec::new(), last_day_key }
    }

    /// Fork a source simulation directory into a fresh target and load
    /// every persona's bootstrap memory into it.
    pub async fn boot(
        storage_root: &Path,
        source_sim_code: &str,
        new_sim_code: &str,
        maze: Maze,
        gateway: LlmGateway,
        persona_defaults: PersonaDefaults,
    ) -> Result<Self, RuntimeError> {
        let (sim_dir, meta) = fork_simulation(storage_root, source_sim_code, new_sim_code).await?;
        let personas = load_personas(&sim_dir, &meta.persona_names).await?;
        Ok(Self::new(sim_dir, meta, maze, personas, gateway, persona_defaults))
    }

    /// Resume a previously-saved simulation directory without forking.
    pub async fn resume(
        sim_dir: PathBuf,
        maze: Maze,
        gateway: LlmGateway,
        persona_defaults: PersonaDefaults,
    ) -> Result<Self, RuntimeError> {
        let meta = load_meta(&sim_dir).await?;
        let personas = load_personas(&sim_dir, &meta.persona_names).await?;
        Ok(Self::new(sim_dir, meta, maze, personas, gateway, persona_defaults))
    }

    pub async fn save(&self) -> Result<(), RuntimeError> {
        save_meta(&self.sim_dir, &self.meta).await?;
        save_personas(&self.sim_dir, &self.personas).await?;
        Ok(())
    }

    fn current_new_day(&self, day_key_now: &str) -> NewDay {
        if self.meta.step == 0 {
            NewDay::First
        } else if day_key_now != self.last_day_key {
            NewDay::New
        } else {
            NewDay::No
        }
    }

    /// Run one tick: poll `environment/<step>.json`, advance every agent's
    /// cognition in fixed order, pair up any chat reactions, write
    /// `movement/<step>.json`, then advance `step`/`curr_time`.
    pub async fn run_step(
        &mut self,
        clock: &dyn ClockSource,
        poll_interval: Duration,
        max_poll_attempts: Option<usize>,
    ) -> Result<StepOutcome, RuntimeError> {
        let env = poll_environment(&self.sim_dir, self.meta.step, clock, poll_interval, max_poll_attempts).await?;

        for coord in self.object_cleanup.drain(..) {
            self.maze.turn_event_from_tile_idle(coord);
        }

        let curr_time_at_start = self.meta.curr_time.clone();
        let day_key_now = parse_sim_time(&curr_time_at_start).map(sim_date_key).unwrap_or_else(|_| self.last_day_key.clone());
        let new_day = self.current_new_day(&day_key_now);
        let tick_zero_of_day = new_day != NewDay::No;
        let curr_hour = parse_sim_time(&curr_time_at_start).map(|t| t.hour()).unwrap_or(0);

        let names: Vec<String> = self.meta.persona_names.clone();
        let occupied: HashSet<Coord> = names.iter().filter_map(|n| self.personas.get(n)).map(|p| p.scratch.curr_tile).collect();
        let mut snapshots: Vec<PersonaSnapshot> =
            names.iter().filter_map(|n| self.personas.get(n)).map(PersonaSnapshot::of).collect();

        let mut movements = HashMap::new();
        let mut pending_chats: Vec<(String, String)> = Vec::new();

        for (index, name) in names.iter().enumerate() {
            let Some(persona) = self.personas.get(name) else { continue };
            let new_tile = env.tile_for(name).unwrap_or(persona.scratch.curr_tile);
            let old_tile = persona.scratch.curr_tile;

            self.maze.remove_subject_events_from_tile(name, old_tile);
            let event = if persona.scratch.act_event.0.is_empty() {
                Event::idle(name.as_str())
            } else {
                Event::new(
                    persona.scratch.act_event.0.clone(),
                    persona.scratch.act_event.1.clone(),
                    persona.scratch.act_event.2.clone(),
                    persona.scratch.act_description.clone(),
                )
            };
            self.maze.add_event_from_tile(event, new_tile);

            if persona.scratch.planned_path.is_empty() && !persona.scratch.act_obj_event.0.is_empty() {
                let obj_matches = self.maze.access_tile(new_tile).map(|t| t.address(Granularity::GameObject)) == Some(persona.scratch.act_address.clone());
                if obj_matches {
                    let obj_event = Event::new(
                        persona.scratch.act_obj_event.0.clone(),
                        persona.scratch.act_obj_event.1.clone(),
                        persona.scratch.act_obj_event.2.clone(),
                        persona.scratch.act_obj_description.clone(),
                    );
                    self.maze.add_event_from_tile(obj_event, new_tile);
                    self.object_cleanup.push(new_tile);
                }
            }

            let others: Vec<OtherAgentSnapshot> = snapshots
                .iter()
                .filter(|s| &s.name != name)
                .map(|s| OtherAgentSnapshot {
                    name: &s.name,
                    curr_tile: s.curr_tile,
                    act_address: &s.act_address,
                    act_description: &s.act_description,
                    act_start_time: &s.act_start_time,
                    act_duration: s.act_duration,
                    chatting_with: s.chatting_with.as_deref(),
                    planned_path_is_set: s.planned_path_is_set,
                })
                .collect();

            let persona = self.personas.get_mut(name).expect("persona present");
            persona.scratch.curr_tile = new_tile;

            let inputs = TickInputs {
                maze: &self.maze,
                gateway: &self.gateway,
                world: &self.meta.maze_name,
                curr_time: &curr_time_at_start,
                curr_hour,
                new_day,
                tick_zero_of_day,
                occupied: &occupied,
                others: &others,
            };
            let outcome = tick(persona, &inputs).await;

            snapshots[index] = PersonaSnapshot::of(persona);

            movements.insert(
                name.clone(),
                PersonaMovement {
                    movement: [outcome.next_tile.0, outcome.next_tile.1],
                    pronunciatio: outcome.pronunciatio,
                    description: outcome.description,
                    chat: if persona.scratch.chat.is_empty() { None } else { Some(persona.scratch.chat.clone()) },
                },
            );

            if let PendingReaction::ChatWith(other) = outcome.pending_reaction {
                pending_chats.push((name.clone(), other));
            }
        }

        for (initiator, target) in pending_chats {
            self.apply_chat_reaction(&initiator, &target).await;
        }

        write_movement(
            &self.sim_dir,
            self.meta.step,
            &MovementFile { persona: movements, meta: MovementMeta { curr_time: curr_time_at_start.clone() } },
        )
        .await?;

        let step_run = self.meta.step;
        self.meta.step += 1;
        self.last_day_key = day_key_now;
        if let Ok(t) = parse_sim_time(&self.meta.curr_time) {
            self.meta.curr_time = format_sim_time(t + chrono::Duration::seconds(self.meta.sec_per_step as i64));
        }

        Ok(StepOutcome { step: step_run, curr_time: curr_time_at_start })
    }

    pub async fn run_n(
        &mut self,
        n: u32,
        clock: &dyn ClockSource,
        poll_interval: Duration,
        max_poll_attempts: Option<usize>,
    ) -> Result<Vec<StepOutcome>, RuntimeError> {
        let mut outcomes = Vec::with_capacity(n as usize);
        for _ in 0..n {
            outcomes.push(self.run_step(clock, poll_interval, max_poll_attempts).await?);
        }
        Ok(outcomes)
    }

    /// Run the two-agent dialogue for an initiator's `Reaction::Chat`
    /// decision, then rewrite both sides' schedules via `create_react` and
    /// commit the chat action for both.
    async fn apply_chat_reaction(&mut self, initiator: &str, target: &str) {
        let (Some(mut a), Some(mut b)) = (self.personas.remove(initiator), self.personas.remove(target)) else {
            if let Some(a) = self.personas.remove(initiator) {
                self.personas.insert(initiator.to_string(), a);
            }
            return;
        };

        let transcript = {
            let weights_a = a.retrieval_weights();
            let weights_b = b.retrieval_weights();
            let mut speaker_a =
                Speaker { name: &a.scratch.name, act_description: &a.scratch.act_description, memory: &mut a.associative, retrieval_weights: weights_a };
            let mut speaker_b =
                Speaker { name: &b.scratch.name, act_description: &b.scratch.act_description, memory: &mut b.associative, retrieval_weights: weights_b };
            converse(&self.gateway, &mut speaker_a, &mut speaker_b).await
        };

        let summary = summarize_conversation(&self.gateway, &a.scratch.name, &b.scratch.name, &transcript).await;
        let total_chars: usize = transcript.iter().map(|(_, utterance)| utterance.len()).sum();
        let duration = (((total_chars as f64 / 8.0).ceil()) / 30.0).ceil().max(1.0) as u32;
        let cooldown = self.persona_defaults.chat_cooldown_ticks;

        for (persona, other_name) in [(&mut a, target), (&mut b, initiator)] {
            {
                let weights = persona.retrieval_weights();
                let mut ctx = PlanContext { scratch: &mut persona.scratch, memory: &mut persona.associative, spatial: &persona.spatial, weights };
                create_react(&mut ctx, &self.gateway, &summary, duration).await;
            }

            let mut buffer = HashMap::new();
            buffer.insert(other_name.to_string(), cooldown);
            let event = (persona.scratch.name.clone(), "chat with".to_string(), other_name.to_string());
            persona.scratch.add_new_action(
                format!("<persona> {other_name}"),
                duration,
                summary.clone(),
                "\u{1F4AC}",
                event,
                Some(other_name.to_string()),
                transcript.clone(),
                buffer,
                None,
                "",
                "",
                (String::new(), String::new(), String::new()),
                None,
            );
        }

        self.personas.insert(initiator.to_string(), a);
        self.personas.insert(target.to_string(), b);
    }
}

async fn summarize_conversation(gateway: &LlmGateway, first: &str, second: &str, transcript: &[(String, String)]) -> String {
    if transcript.is_empty() {
        return format!("chatting with {second}");
    }
    let joined = transcript.iter().map(|(speaker, line)| format!("{speaker}: {line}")).collect::<Vec<_>>().join("\n");
    let prompt = format!("Summarize this conversation between {first} and {second} in one short activity phrase:\n{joined}\n\nSummary:");
    safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        format!("chatting with {second}"),
        |raw| !raw.trim().is_empty(),
        |raw| raw.trim().to_string(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use townsim_memory::{AssociativeMemory, Scratch, SpatialMemory};

    fn gateway() -> LlmGateway {
        LlmGateway::ollama("http://127.0.0.1:1", StdDuration::from_millis(20), "m", "e")
    }

    fn sample_meta() -> SimMeta {
        SimMeta {
            persona_names: vec!["Isabella Rodriguez".to_string()],
            curr_time: "February 13, 2023, 08:00:00".to_string(),
            sec_per_step: 10,
            step: 0,
            ..SimMeta::default()
        }
    }

    fn sample_personas() -> HashMap<String, Persona> {
        let mut map = HashMap::new();
        let scratch = Scratch::new("Isabella Rodriguez", "February 13, 2023, 08:00:00", (0, 0));
        map.insert("Isabella Rodriguez".to_string(), Persona::new(scratch, AssociativeMemory::new(), SpatialMemory::new()));
        map
    }

    #[tokio::test]
    async fn run_step_advances_time_and_writes_movement() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(tmp.path().join("environment")).await.unwrap();
        tokio::fs::write(tmp.path().join("environment").join("0.json"), r#"{"Isabella Rodriguez": {"x": 0, "y": 0}}"#)
            .await
            .unwrap();

        let mut world = WorldRuntime::new(
            tmp.path().to_path_buf(),
            sample_meta(),
            Maze::new(4, 4),
            sample_personas(),
            gateway(),
            PersonaDefaults::default(),
        );

        let outcome = world.run_step(&crate::clock::ManualClock::default(), StdDuration::from_millis(1), Some(5)).await.unwrap();
        assert_eq!(outcome.step, 0);
        assert_eq!(world.meta.step, 1);
        assert_eq!(world.meta.curr_time, "February 13, 2023, 08:00:10");
        assert!(tmp.path().join("movement").join("0.json").exists());
    }

    #[tokio::test]
    async fn run_step_times_out_when_environment_never_arrives() {
        let tmp = tempfile::tempdir().unwrap();
        let mut world = WorldRuntime::new(
            tmp.path().to_path_buf(),
            sample_meta(),
            Maze::new(4, 4),
            sample_personas(),
            gateway(),
            PersonaDefaults::default(),
        );

        let result = world.run_step(&crate::clock::ManualClock::default(), StdDuration::from_millis(1), Some(2)).await;
        assert!(result.is_err());
        assert_eq!(world.meta.step, 0);
    }
}
