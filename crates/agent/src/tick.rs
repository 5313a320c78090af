//! Per-tick orchestration: perceive -> reflect -> plan -> reactive gate ->
//! execute, wired together the way one simulated tick exercises a persona's
//! cognition end to end.
//!
//! A tick reads world state (the maze, snapshots of other personas) but
//! mutates only this persona's own scratch/memory, returning a movement and
//! event delta for the world loop to apply. `Chat` reactions are surfaced
//! rather than executed here, since running a conversation mutates both
//! sides at once.

use std::collections::HashSet;

use chrono::Timelike;
use townsim_config::parse_sim_time;
use townsim_llm::LlmGateway;
use townsim_maze::{Coord, Maze};
use townsim_memory::EventTriple;
use townsim_thinker::plan::{self, NewDay, OtherAgentState, PlanContext, Reaction};

use crate::execute::{Address, ExecuteContext, ExecuteOutcome, execute};
use crate::perceive::perceive;
use crate::reflect::{reflect, should_reflect};
use crate::Persona;

/// Read-only snapshot of another persona: as much as the reactive stage and
/// chase-agent path acquisition need, without borrowing its `Persona`.
pub struct OtherAgentSnapshot<'a> {
    pub name: &'a str,
    pub curr_tile: Coord,
    pub act_address: &'a str,
    pub act_description: &'a str,
    pub act_start_time: &'a str,
    pub act_duration: u32,
    pub chatting_with: Option<&'a str>,
    pub planned_path_is_set: bool,
}

pub struct TickInputs<'a> {
    pub maze: &'a Maze,
    pub gateway: &'a LlmGateway,
    pub world: &'a str,
    pub curr_time: &'a str,
    pub curr_hour: u32,
    pub new_day: NewDay,
    pub tick_zero_of_day: bool,
    pub occupied: &'a HashSet<Coord>,
    pub others: &'a [OtherAgentSnapshot<'a>],
}

/// A reaction decided on this tick that the world loop must finish carrying
/// out (pairing a `ChatWith` against the other side's own decision, then
/// running the two-agent conversation).
#[derive(Debug, Clone)]
pub enum PendingReaction {
    None,
    ChatWith(String),
}

pub struct TickOutcome {
    pub next_tile: Coord,
    pub pronunciatio: String,
    pub description: String,
    pub act_event: EventTriple,
    pub reflected: bool,
    pub pending_reaction: PendingReaction,
}

fn minutes_since_midnight(time: &str) -> i64 {
    parse_sim_time(time).map(|t| t.hour() as i64 * 60 + t.minute() as i64).unwrap_or(0)
}

/// Run one full tick for `persona`.
pub async fn tick(persona: &mut Persona, inputs: &TickInputs<'_>) -> TickOutcome {
    persona.scratch.curr_time = inputs.curr_time.to_string();
    persona.scratch.decrement_chat_cooldowns();

    let fresh_ids = perceive(
        &mut persona.scratch,
        &mut persona.associative,
        &mut persona.spatial,
        inputs.maze,
        inputs.gateway,
        None,
    )
    .await;

    let mut reflected = false;
    if should_reflect(&persona.scratch) {
        let weights = persona.retrieval_weights();
        reflect(&mut persona.scratch, &mut persona.associative, inputs.gateway, weights).await;
        reflected = true;
    }

    {
        let weights = persona.retrieval_weights();
        let mut ctx = PlanContext {
            scratch: &mut persona.scratch,
            memory: &mut persona.associative,
            spatial: &persona.spatial,
            weights,
        };
        plan::long_term_plan(&mut ctx, inputs.gateway, inputs.new_day).await;

        let curr_minutes = minutes_since_midnight(inputs.curr_time);
        let act_start_minutes = minutes_since_midnight(&ctx.scratch.act_start_time);
        if ctx.scratch.act_address.is_empty() || ctx.scratch.act_check_finished(curr_minutes, act_start_minutes) {
            plan::determine_action(&mut ctx, inputs.gateway, inputs.world, inputs.tick_zero_of_day).await;
        }
    }

    let pending_reaction = react_to_others(persona, inputs, &fresh_ids).await;

    if persona.scratch.act_event.1 != "chat with" {
        persona.scratch.chatting_with = None;
        persona.scratch.chat.clear();
        persona.scratch.chatting_end_time = None;
    }

    let chase_target_tile = match Address::parse(&persona.scratch.act_address) {
        Address::ChaseAgent(name) => inputs.others.iter().find(|o| o.name == name).map(|o| o.curr_tile),
        _ => None,
    };

    let fallback_address = persona.scratch.living_area.clone();
    let exec_ctx = ExecuteContext {
        maze: inputs.maze,
        curr_tile: persona.scratch.curr_tile,
        occupied: inputs.occupied,
        chase_target_tile,
        fallback_address: &fallback_address,
    };
    let ExecuteOutcome { next_tile, pronunciatio, description } = execute(&mut persona.scratch, &exec_ctx);
    persona.scratch.curr_tile = next_tile;

    TickOutcome {
        next_tile,
        pronunciatio,
        description,
        act_event: persona.scratch.act_event.clone(),
        reflected,
        pending_reaction,
    }
}

/// Reactive stage: choose the most salient freshly-perceived event about
/// another persona, gate it through `should_react`, and dispatch.
async fn react_to_others(
    persona: &mut Persona,
    inputs: &TickInputs<'_>,
    fresh_ids: &[townsim_memory::NodeId],
) -> PendingReaction {
    let candidates: Vec<&townsim_memory::ConceptNode> =
        fresh_ids.iter().filter_map(|id| persona.associative.node(*id)).collect();
    let Some(chosen) = plan::choose_retrieved(&persona.scratch.name, &candidates) else {
        return PendingReaction::None;
    };
    let Some(other) = inputs.others.iter().find(|o| o.name == chosen.subject) else {
        return PendingReaction::None;
    };

    let other_state = OtherAgentState {
        name: other.name,
        act_address: other.act_address,
        act_description: other.act_description,
        act_start_time: other.act_start_time,
        act_duration: other.act_duration,
        chatting_with: other.chatting_with,
        planned_path_is_set: other.planned_path_is_set,
    };

    let reaction = plan::should_react(inputs.gateway, &persona.scratch, inputs.curr_hour, &other_state).await;
    match reaction {
        Reaction::Chat(name) => PendingReaction::ChatWith(name),
        Reaction::Wait(end_time) => {
            apply_wait_reaction(persona, inputs, &end_time).await;
            PendingReaction::None
        }
        Reaction::None => PendingReaction::None,
    }
}

/// Self-contained "wait" dispatch: stop in place until `end_time`, splicing
/// the pause into the schedule via `create_react`. Unlike `Chat`, this never
/// needs the other side's memory, so it can run directly inside this tick.
async fn apply_wait_reaction(persona: &mut Persona, inputs: &TickInputs<'_>, end_time: &str) {
    let curr_minutes = minutes_since_midnight(inputs.curr_time);
    let end_minutes = minutes_since_midnight(end_time);
    let duration = (end_minutes - curr_minutes + 1).max(1) as u32;
    let (x, y) = persona.scratch.curr_tile;

    {
        let weights = persona.retrieval_weights();
        let mut ctx = PlanContext {
            scratch: &mut persona.scratch,
            memory: &mut persona.associative,
            spatial: &persona.spatial,
            weights,
        };
        plan::create_react(&mut ctx, inputs.gateway, "waiting", duration).await;
    }

    let event = (persona.scratch.name.clone(), "is".to_string(), "waiting".to_string());
    persona.scratch.add_new_action(
        format!("<waiting> {x} {y}"),
        duration,
        "waiting",
        "\u{231B}",
        event,
        None,
        Vec::new(),
        Default::default(),
        None,
        "",
        "",
        (String::new(), String::new(), String::new()),
        None,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use townsim_memory::{AssociativeMemory, Scratch, SpatialMemory};

    fn gateway() -> LlmGateway {
        LlmGateway::ollama("http://127.0.0.1:1", Duration::from_millis(20), "m", "e")
    }

    fn persona() -> Persona {
        Persona::new(
            Scratch::new("Isabella Rodriguez", "February 13, 2023, 08:00:00", (0, 0)),
            AssociativeMemory::new(),
            SpatialMemory::new(),
        )
    }

    #[tokio::test]
    async fn tick_runs_end_to_end_with_no_one_else_around() {
        let maze = Maze::new(6, 6);
        let occupied = HashSet::new();
        let others: Vec<OtherAgentSnapshot> = Vec::new();
        let gateway = gateway();

        let inputs = TickInputs {
            maze: &maze,
            gateway: &gateway,
            world: "the ville",
            curr_time: "February 13, 2023, 08:00:00",
            curr_hour: 8,
            new_day: NewDay::First,
            tick_zero_of_day: true,
            occupied: &occupied,
            others: &others,
        };

        let mut p = persona();
        let outcome = tick(&mut p, &inputs).await;
        assert_eq!(outcome.next_tile, (0, 0));
        assert!(matches!(outcome.pending_reaction, PendingReaction::None));
    }
}
