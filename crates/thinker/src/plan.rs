//! Plan: long-term daily scheduling, short-term action determination, and
//! the reactive stage that lets a perceived event interrupt a plan.

use std::collections::HashSet;

use chrono::Timelike;
use rand::seq::SliceRandom;
use serde::Deserialize;
use townsim_config::{format_sim_time, parse_sim_time};
use townsim_llm::{GenerationParams, LlmGateway, safe_generate};
use townsim_memory::{AssociativeMemory, ConceptNode, RetrievalWeights, ScoredNode, Scratch, SpatialMemory};

use crate::extract_json;
use crate::retrieve::resolve;

/// Why today's long-term plan needs to be (re)built, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewDay {
    No,
    First,
    New,
}

/// Everything `plan` needs about the persona it's planning for, borrowed
/// for the duration of one tick.
pub struct PlanContext<'a> {
    pub scratch: &'a mut Scratch,
    pub memory: &'a mut AssociativeMemory,
    pub spatial: &'a SpatialMemory,
    pub weights: RetrievalWeights,
}

const SECONDS_PER_MINUTE: i64 = 60;

fn minutes_since_midnight(time: &str) -> i64 {
    parse_sim_time(time)
        .map(|t| (t.hour() as i64) * 60 + t.minute() as i64)
        .unwrap_or(0)
}

fn add_minutes(time: &str, minutes: i64) -> String {
    match parse_sim_time(time) {
        Ok(t) => format_sim_time(t + chrono::Duration::seconds(minutes * SECONDS_PER_MINUTE)),
        Err(_) => time.to_string(),
    }
}

fn schedule_sum(schedule: &[(String, u32)]) -> u32 {
    schedule.iter().map(|(_, m)| *m).sum()
}

async fn retrieve_summaries(ctx: &mut PlanContext<'_>, gateway: &LlmGateway, focal_point: &str, n_count: usize) -> Vec<String> {
    let embedding = gateway.embed(focal_point).await.unwrap_or_default();
    let scored: Vec<ScoredNode> = townsim_memory::retrieve_focal_points(ctx.memory, &embedding, ctx.weights, n_count, &ctx.scratch.curr_time);
    resolve(ctx.memory, &scored).into_iter().map(ConceptNode::spo_summary).collect()
}

// ── long-term planning ──────────────────────────────────────────────────────

async fn generate_wake_up_hour(gateway: &LlmGateway, lifestyle: &str) -> u32 {
    let prompt = format!("Given this lifestyle: \"{lifestyle}\", what hour (0-11) does this person wake up? Respond with only the integer.");
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        "7".to_string(),
        |raw| raw.trim().parse::<u32>().is_ok(),
        |raw| raw.trim().to_string(),
    )
    .await;
    raw.parse().unwrap_or(7).min(11)
}

async fn generate_daily_req(gateway: &LlmGateway, currently: &str, lifestyle: &str) -> Vec<String> {
    let prompt = format!(
        "{currently}\nLifestyle: {lifestyle}\nList 4-6 broad-stroke activities for today, one per line, no numbering."
    );
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        "wake up and complete the morning routine\ngo about the day".to_string(),
        |raw| !raw.trim().is_empty(),
        |raw| raw.trim().to_string(),
    )
    .await;
    raw.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect()
}

#[derive(Debug, Deserialize)]
struct IdentityRevision {
    #[serde(default)]
    remembered: String,
    #[serde(default)]
    feelings: String,
    currently: String,
    daily_plan_req: Vec<String>,
}

async fn revise_identity(ctx: &mut PlanContext<'_>, gateway: &LlmGateway) -> IdentityRevision {
    let plan_summaries = retrieve_summaries(ctx, gateway, "plan for today", 10).await;
    let event_summaries = retrieve_summaries(ctx, gateway, "important recent events", 10).await;

    let prompt = format!(
        "{name} was: {currently}\nPlan-related memories:\n{plan}\nRecent important events:\n{events}\n\n\
         Respond with JSON {{\"remembered\": \"...\", \"feelings\": \"...\", \"currently\": \"...\", \
         \"daily_plan_req\": [\"...\", ...]}} (4-6 items) describing {name}'s revised status for today.",
        name = ctx.scratch.name,
        currently = ctx.scratch.currently,
        plan = plan_summaries.join("\n"),
        events = event_summaries.join("\n"),
    );

    let fail_safe = serde_json::json!({
        "remembered": "",
        "feelings": "",
        "currently": ctx.scratch.currently,
        "daily_plan_req": ["go about the day as usual"],
    })
    .to_string();

    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        fail_safe,
        |raw| serde_json::from_str::<IdentityRevision>(extract_json(raw)).is_ok(),
        |raw| raw.to_string(),
    )
    .await;

    serde_json::from_str(extract_json(&raw)).unwrap_or(IdentityRevision {
        remembered: String::new(),
        feelings: String::new(),
        currently: ctx.scratch.currently.clone(),
        daily_plan_req: vec!["go about the day as usual".to_string()],
    })
}

async fn generate_hourly_activities(gateway: &LlmGateway, daily_req: &[String], wake_up_hour: u32) -> Vec<String> {
    let plan = daily_req.join(", ");
    let mut best: Vec<String> = Vec::new();
    for _attempt in 0..3 {
        let mut hours = Vec::with_capacity(24);
        for hour in wake_up_hour..24 {
            let prompt = format!("Today's broad plan: {plan}. What is this person doing at hour {hour}? One short phrase.");
            let activity = safe_generate(
                gateway,
                &prompt,
                &GenerationParams::default(),
                2,
                "going about their day".to_string(),
                |raw| !raw.trim().is_empty(),
                |raw| raw.trim().to_string(),
            )
            .await;
            hours.push(activity);
        }
        let distinct: HashSet<&String> = hours.iter().collect();
        let distinct_count = distinct.len();
        best = hours;
        if distinct_count >= 5 {
            break;
        }
    }
    best
}

/// Compress consecutive duplicate hourly activities, expand hours -> 60
/// minute slots, with sleep pre-filled from midnight to `wake_up_hour`.
fn build_hourly_schedule(wake_up_hour: u32, hourly_activities: &[String]) -> Vec<(String, u32)> {
    let mut schedule: Vec<(String, u32)> = Vec::new();
    if wake_up_hour > 0 {
        schedule.push(("sleeping".to_string(), wake_up_hour));
    }

    for activity in hourly_activities {
        match schedule.last_mut() {
            Some((last_activity, hours)) if last_activity == activity => *hours += 1,
            _ => schedule.push((activity.clone(), 1)),
        }
    }

    schedule.into_iter().map(|(activity, hours)| (activity, hours * 60)).collect()
}

/// Run long-term planning: wake-up hour, daily requirements (first day) or
/// identity revision (new day), the hourly schedule, and a "plan" thought
/// node recording the outcome.
pub async fn long_term_plan(ctx: &mut PlanContext<'_>, gateway: &LlmGateway, new_day: NewDay) {
    if new_day == NewDay::No {
        return;
    }

    let wake_up_hour = generate_wake_up_hour(gateway, &ctx.scratch.lifestyle).await;

    let daily_plan_req = match new_day {
        NewDay::First => {
            let daily_req = generate_daily_req(gateway, &ctx.scratch.currently, &ctx.scratch.lifestyle).await;
            ctx.scratch.daily_req = daily_req.clone();
            daily_req
        }
        NewDay::New => {
            let revision = revise_identity(ctx, gateway).await;
            ctx.scratch.currently = revision.currently;
            ctx.scratch.daily_plan_req = revision.daily_plan_req.clone();
            revision.daily_plan_req
        }
        NewDay::No => unreachable!(),
    };

    let hourly_activities = generate_hourly_activities(gateway, &daily_plan_req, wake_up_hour).await;
    let mut schedule = build_hourly_schedule(wake_up_hour, &hourly_activities);

    let total = schedule_sum(&schedule);
    if total < 1440 {
        schedule.push(("sleeping".to_string(), 1440 - total));
    } else if total > 1440 {
        // Trim the final slot down rather than overrun the day.
        if let Some(last) = schedule.last_mut() {
            last.1 -= total - 1440;
        }
    }

    ctx.scratch.f_daily_schedule_hourly_org = schedule.clone();
    ctx.scratch.f_daily_schedule = schedule;

    let plan_note = format!("{} made a plan for today: {}", ctx.scratch.name, daily_plan_req.join("; "));
    ctx.memory.add_thought(
        ctx.scratch.curr_time.clone(),
        None,
        ctx.scratch.name.clone(),
        "planned",
        "today",
        plan_note,
        HashSet::new(),
        5,
        Vec::new(),
    );
}

// ── short-term action determination ─────────────────────────────────────────

fn slot_should_decompose(description: &str, minutes: u32) -> bool {
    let lower = description.to_lowercase();
    let is_sleep = lower.contains("sleep") || lower.contains("bed");
    minutes >= 60 && !is_sleep
}

async fn decompose_slot(gateway: &LlmGateway, description: &str, minutes: u32) -> Vec<(String, u32)> {
    let prompt = format!(
        "Break \"{description}\" (lasting {minutes} minutes) into shorter sub-activities. \
         Respond with JSON [[\"sub-activity\", minutes], ...] whose minutes sum to exactly {minutes}."
    );
    let fail_safe = serde_json::json!([[description, minutes]]).to_string();
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        fail_safe,
        |raw| serde_json::from_str::<Vec<(String, u32)>>(extract_json(raw)).is_ok(),
        |raw| raw.to_string(),
    )
    .await;

    let parsed: Vec<(String, u32)> = serde_json::from_str(extract_json(&raw)).unwrap_or_else(|_| vec![(description.to_string(), minutes)]);
    let sum: u32 = parsed.iter().map(|(_, m)| *m).sum();
    if sum == minutes && !parsed.is_empty() {
        parsed
    } else {
        vec![(description.to_string(), minutes)]
    }
}

async fn resolve_level(
    gateway: &LlmGateway,
    level_name: &str,
    accessible: &str,
    activity: &str,
    current: &str,
    fallback: &str,
) -> String {
    let prompt = format!(
        "{activity}\nAccessible {level_name}s: {accessible}\nCurrent {level_name}: {current}\n\
         Which {level_name} best fits this activity? Respond with only its name."
    );
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        fallback.to_string(),
        |raw| !raw.trim().is_empty(),
        |raw| raw.trim().to_string(),
    )
    .await;

    let options: Vec<&str> = accessible.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if options.iter().any(|o| o.eq_ignore_ascii_case(&raw)) {
        return raw;
    }
    if options.is_empty() {
        return fallback.to_string();
    }
    options.choose(&mut rand::thread_rng()).map(|s| s.to_string()).unwrap_or_else(|| fallback.to_string())
}

/// Resolve the active schedule slot into a concrete `world:sector:arena` (or
/// `world:sector:arena:object`) address, with random fallbacks within the
/// accessible sets when the LLM's pick isn't one of them.
async fn resolve_address(ctx: &PlanContext<'_>, gateway: &LlmGateway, activity: &str, world: &str) -> String {
    let sectors = ctx.spatial.get_str_accessible_sectors(world);
    let current_sector = ctx.scratch.act_address.split(':').nth(1).unwrap_or_default();
    let sector = resolve_level(gateway, "sector", &sectors, activity, current_sector, &ctx.scratch.living_area).await;

    let world_sector = format!("{world}:{sector}");
    let arenas = ctx.spatial.get_str_accessible_sector_arenas(&world_sector);
    let current_arena = ctx.scratch.act_address.split(':').nth(2).unwrap_or_default();
    let arena = resolve_level(gateway, "arena", &arenas, activity, current_arena, "common room").await;

    let world_sector_arena = format!("{world_sector}:{arena}");
    let objects = ctx.spatial.get_str_accessible_arena_game_objects(&world_sector_arena);
    if objects.trim().is_empty() {
        return format!("{world_sector_arena}:<random>");
    }
    let object = resolve_level(gateway, "object", &objects, activity, "", "<random>").await;
    format!("{world_sector_arena}:{object}")
}

async fn generate_pronunciatio(gateway: &LlmGateway, description: &str) -> String {
    let prompt = format!("Represent this activity with a single emoji: \"{description}\"");
    safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        2,
        "\u{1F4AD}".to_string(),
        |raw| !raw.trim().is_empty(),
        |raw| raw.trim().chars().take(2).collect(),
    )
    .await
}

/// Short-term action determination: build `act_address` for the currently
/// active schedule slot and commit it via `scratch.add_new_action`.
pub async fn determine_action(ctx: &mut PlanContext<'_>, gateway: &LlmGateway, world: &str, tick_zero_of_day: bool) {
    let curr_minutes = minutes_since_midnight(&ctx.scratch.curr_time);
    let Some(i) = ctx.scratch.get_f_daily_schedule_index(curr_minutes, 0) else {
        return;
    };
    let i60 = ctx.scratch.get_f_daily_schedule_index(curr_minutes, 60);

    let mut to_decompose = vec![i];
    if tick_zero_of_day {
        to_decompose.push(0);
        if let Some(i60) = i60 {
            to_decompose.push(i60 + 1);
        }
    }
    to_decompose.sort_unstable();
    to_decompose.dedup();

    // Decompose from the highest index down so earlier indices stay valid
    // as later slots in the list.
    for &index in to_decompose.iter().rev() {
        if let Some((description, minutes)) = ctx.scratch.f_daily_schedule.get(index).cloned() {
            if slot_should_decompose(&description, minutes) {
                let parts = decompose_slot(gateway, &description, minutes).await;
                ctx.scratch.f_daily_schedule.splice(index..=index, parts);
            }
        }
    }

    let total = schedule_sum(&ctx.scratch.f_daily_schedule);
    if total < 1440 {
        ctx.scratch.f_daily_schedule.push(("sleeping".to_string(), 1440 - total));
    }

    let curr_minutes = minutes_since_midnight(&ctx.scratch.curr_time);
    let Some(active_index) = ctx.scratch.get_f_daily_schedule_index(curr_minutes, 0) else {
        return;
    };
    let (description, duration) = ctx.scratch.f_daily_schedule[active_index].clone();

    let address = resolve_address(ctx, gateway, &description, world).await;
    let pronunciatio = generate_pronunciatio(gateway, &description).await;
    let event = (ctx.scratch.name.clone(), "is".to_string(), description.clone());

    ctx.scratch.add_new_action(
        address,
        duration,
        description,
        pronunciatio,
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

// ── reactive stage ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Reaction {
    None,
    Chat(String),
    Wait(String),
}

/// `_choose_retrieved`: drop self-subject events; prefer another persona's
/// event over a non-idle environmental one; else none.
pub fn choose_retrieved<'a>(self_name: &str, candidates: &[&'a ConceptNode]) -> Option<&'a ConceptNode> {
    let others: Vec<&&ConceptNode> = candidates.iter().filter(|n| n.subject != self_name).collect();
    if let Some(persona_event) = others.iter().find(|n| !n.subject.contains(':')) {
        return Some(**persona_event);
    }
    others.into_iter().find(|n| !n.is_idle()).map(|n| *n)
}

/// Minimal cross-persona state the reactive gate needs about the *other*
/// agent, independent of the `agent` crate's aggregate `Persona` type.
pub struct OtherAgentState<'a> {
    pub name: &'a str,
    pub act_address: &'a str,
    pub act_description: &'a str,
    pub act_start_time: &'a str,
    pub act_duration: u32,
    pub chatting_with: Option<&'a str>,
    pub planned_path_is_set: bool,
}

async fn decide_to_talk(gateway: &LlmGateway, self_name: &str, other: &OtherAgentState<'_>) -> bool {
    let prompt = format!(
        "{self_name} sees {other_name} who is {other_desc}. Should {self_name} strike up a conversation? yes or no.",
        other_name = other.name,
        other_desc = other.act_description,
    );
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        2,
        "no".to_string(),
        |raw| !raw.trim().is_empty(),
        |raw| raw.trim().to_lowercase(),
    )
    .await;
    raw.starts_with('y')
}

async fn decide_to_react(gateway: &LlmGateway, self_name: &str, other: &OtherAgentState<'_>) -> Option<u8> {
    let prompt = format!(
        "{self_name} and {other_name} are both doing: {desc}. Should {self_name} (1) wait for {other_name} to \
         finish or (2) keep going? Respond with only 1 or 2.",
        other_name = other.name,
        desc = other.act_description,
    );
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        2,
        "2".to_string(),
        |raw| raw.trim() == "1" || raw.trim() == "2",
        |raw| raw.trim().to_string(),
    )
    .await;
    raw.parse::<u8>().ok()
}

/// `_should_react`: apply the "let's talk?" then "let's react?" gates.
pub async fn should_react(
    gateway: &LlmGateway,
    self_scratch: &Scratch,
    curr_hour: u32,
    other: &OtherAgentState<'_>,
) -> Reaction {
    let self_sleeping = self_scratch.act_description.to_lowercase().contains("sleep");
    let other_sleeping = other.act_description.to_lowercase().contains("sleep");
    let target_waiting = other.act_address.starts_with("<waiting>");
    let sane = !self_scratch.act_address.is_empty()
        && !self_scratch.act_description.is_empty()
        && !other.act_address.is_empty()
        && !other.act_description.is_empty()
        && !self_sleeping
        && !other_sleeping
        && curr_hour != 23
        && !target_waiting;

    if sane
        && self_scratch.chatting_with.is_none()
        && other.chatting_with.is_none()
        && self_scratch.chatting_with_buffer.get(other.name).copied().unwrap_or(0) <= 0
        && decide_to_talk(gateway, &self_scratch.name, other).await
    {
        return Reaction::Chat(other.name.to_string());
    }

    if sane && self_scratch.act_address == other.act_address && other.planned_path_is_set {
        if let Some(1) = decide_to_react(gateway, &self_scratch.name, other).await {
            let end_time = add_minutes(other.act_start_time, other.act_duration as i64 - 1);
            return Reaction::Wait(end_time);
        }
    }

    Reaction::None
}

/// `_create_react`: splice a new activity into the hourly schedule around
/// the current moment, with an LLM-revised block covering the affected
/// window and a fail-safe truncate-and-trim path if it can't be parsed.
pub async fn create_react(ctx: &mut PlanContext<'_>, gateway: &LlmGateway, inserted_activity: &str, inserted_minutes: u32) {
    let curr_minutes = minutes_since_midnight(&ctx.scratch.curr_time);
    let Some(h) = ctx.scratch.get_f_daily_schedule_hourly_org_index(curr_minutes, 0) else {
        return;
    };

    let cumulative_before: u32 = ctx.scratch.f_daily_schedule_hourly_org[..h].iter().map(|(_, m)| m).sum();
    let start_hour = cumulative_before / 60;
    let this_slot_minutes = ctx.scratch.f_daily_schedule_hourly_org[h].1;
    let span_hours = if this_slot_minutes >= 120 { this_slot_minutes / 60 } else { (this_slot_minutes / 60) + 1 };
    let end_hour = start_hour + span_hours.max(1);

    let start_minute = start_hour * 60;
    let end_minute = (end_hour * 60).min(1440);

    let mut elapsed = 0u32;
    let mut start_index = 0usize;
    let mut end_index = ctx.scratch.f_daily_schedule.len();
    for (idx, (_, minutes)) in ctx.scratch.f_daily_schedule.iter().enumerate() {
        if elapsed <= start_minute && start_minute < elapsed + minutes {
            start_index = idx;
        }
        if elapsed < end_minute && end_minute <= elapsed + minutes {
            end_index = idx + 1;
            break;
        }
        elapsed += minutes;
    }

    let window_minutes = end_minute - start_minute;
    let prefix: Vec<(String, u32)> = ctx.scratch.f_daily_schedule[..start_index].to_vec();
    let suffix: Vec<(String, u32)> = ctx.scratch.f_daily_schedule[end_index..].to_vec();
    let mut affected: Vec<(String, u32)> = ctx.scratch.f_daily_schedule[start_index..end_index].to_vec();
    affected.push((inserted_activity.to_string(), inserted_minutes));

    let affected_desc = affected.iter().map(|(a, m)| format!("{a} ({m} min)")).collect::<Vec<_>>().join(", ");
    let prompt = format!(
        "Revise this block of activities so the total is exactly {window_minutes} minutes: {affected_desc}. \
         Respond with JSON [[\"activity\", minutes], ...]."
    );
    let fail_safe = serde_json::to_string(&affected).unwrap_or_default();
    let raw = safe_generate(
        gateway,
        &prompt,
        &GenerationParams::default(),
        3,
        fail_safe,
        |raw| serde_json::from_str::<Vec<(String, u32)>>(extract_json(raw)).is_ok(),
        |raw| raw.to_string(),
    )
    .await;

    let mut revised: Vec<(String, u32)> = serde_json::from_str(extract_json(&raw)).unwrap_or_else(|_| affected.clone());
    let revised_sum: u32 = revised.iter().map(|(_, m)| *m).sum();
    if revised_sum != window_minutes {
        // Fail-safe: fall back to the original affected block plus the new
        // activity, trimming the tail so the total matches exactly.
        revised = affected;
        let sum: u32 = revised.iter().map(|(_, m)| *m).sum();
        if sum > window_minutes {
            if let Some(last) = revised.last_mut() {
                last.1 = last.1.saturating_sub(sum - window_minutes);
            }
        }
    }

    let mut rebuilt = prefix;
    rebuilt.extend(revised);
    rebuilt.extend(suffix);
    ctx.scratch.f_daily_schedule = rebuilt;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn build_hourly_schedule_compresses_duplicates_and_prefills_sleep() {
        let activities = vec![
            "eating breakfast".to_string(),
            "eating breakfast".to_string(),
            "working".to_string(),
        ];
        let schedule = build_hourly_schedule(7, &activities);
        assert_eq!(schedule[0], ("sleeping".to_string(), 420));
        assert_eq!(schedule[1], ("eating breakfast".to_string(), 120));
        assert_eq!(schedule[2], ("working".to_string(), 60));
    }

    #[test]
    fn slot_should_decompose_skips_sleep_slots() {
        assert!(!slot_should_decompose("sleeping in bed", 480));
        assert!(slot_should_decompose("working on a painting", 120));
        assert!(!slot_should_decompose("quick errand", 30));
    }

    #[test]
    fn choose_retrieved_prefers_other_persona_event_over_idle() {
        let idle = sample_node("Isabella", "is", "idle", false);
        let other = sample_node("Klaus Mueller", "is", "reading", false);
        let candidates = vec![&idle, &other];
        let chosen = choose_retrieved("Isabella", &candidates).unwrap();
        assert_eq!(chosen.subject, "Klaus Mueller");
    }

    #[test]
    fn choose_retrieved_drops_self_subject_events() {
        let own = sample_node("Isabella", "is", "reading", false);
        let candidates = vec![&own];
        assert!(choose_retrieved("Isabella", &candidates).is_none());
    }

    fn sample_node(subject: &str, predicate: &str, object: &str, idle: bool) -> ConceptNode {
        let _ = idle;
        ConceptNode {
            id: townsim_memory::NodeId(1),
            type_count: 1,
            kind: townsim_memory::NodeKind::Event,
            depth: 0,
            created: "t".to_string(),
            expiration: None,
            last_accessed: "t".to_string(),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            description: String::new(),
            embedding_key: String::new(),
            poignancy: 1,
            keywords: HashMap::new().into_keys().collect(),
            filling: Default::default(),
        }
    }
}
