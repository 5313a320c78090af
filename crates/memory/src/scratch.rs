//! Scratch: per-agent mutable short-term state — identity, schedules, the
//! currently-committed action, chat state, and the retrieval
//! hyperparameters every other module reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schema::ChatLine;
use townsim_maze::Coord;

/// `(description, minutes)`. The daily schedule is a flat slot list whose
/// minutes must sum to 1440.
pub type ScheduleSlot = (String, u32);

/// `(subject, predicate, object)` — the committed action event triple.
pub type EventTriple = (String, String, String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scratch {
    // ── identity ─────────────────────────────────────────────────────────
    pub name: String,
    pub first_name: String,
    pub age: u32,
    pub innate: String,
    pub learned: String,
    pub currently: String,
    pub lifestyle: String,
    pub living_area: String,

    // ── time & space ─────────────────────────────────────────────────────
    pub curr_time: String,
    pub curr_tile: Coord,

    // ── perception hyperparameters ───────────────────────────────────────
    pub vision_r: i32,
    pub att_bandwidth: usize,
    pub retention: usize,

    // ── retrieval weights ────────────────────────────────────────────────
    pub recency_w: f32,
    pub relevance_w: f32,
    pub importance_w: f32,
    pub recency_decay: f32,

    // ── importance trigger (reflection gating) ──────────────────────────
    pub importance_trigger_max: i32,
    pub importance_trigger_curr: i32,
    pub importance_ele_n: i32,

    // ── plan ──────────────────────────────────────────────────────────────
    pub daily_plan_req: Vec<String>,
    pub daily_req: Vec<String>,
    pub f_daily_schedule: Vec<ScheduleSlot>,
    pub f_daily_schedule_hourly_org: Vec<ScheduleSlot>,

    // ── current action ───────────────────────────────────────────────────
    pub act_address: String,
    pub act_start_time: String,
    pub act_duration: u32,
    pub act_description: String,
    pub act_pronunciatio: String,
    pub act_event: EventTriple,
    pub act_obj_description: String,
    pub act_obj_pronunciatio: String,
    pub act_obj_event: EventTriple,

    // ── reactive/chat ────────────────────────────────────────────────────
    pub chatting_with: Option<String>,
    pub chat: Vec<ChatLine>,
    pub chatting_with_buffer: HashMap<String, i32>,
    pub chatting_end_time: Option<String>,

    // ── movement ──────────────────────────────────────────────────────────
    pub planned_path: Vec<Coord>,
    pub act_path_set: bool,
}

impl Scratch {
    pub fn new(name: impl Into<String>, curr_time: impl Into<String>, curr_tile: Coord) -> Self {
        let name = name.into();
        let first_name = name.split_whitespace().next().unwrap_or(&name).to_string();
        Self {
            first_name,
            name,
            age: 0,
            innate: String::new(),
            learned: String::new(),
            currently: String::new(),
            lifestyle: String::new(),
            living_area: String::new(),
            curr_time: curr_time.into(),
            curr_tile,
            vision_r: 4,
            att_bandwidth: 3,
            retention: 5,
            recency_w: 1.0,
            relevance_w: 1.0,
            importance_w: 1.0,
            recency_decay: 0.99,
            importance_trigger_max: 150,
            importance_trigger_curr: 150,
            importance_ele_n: 0,
            daily_plan_req: Vec::new(),
            daily_req: Vec::new(),
            f_daily_schedule: Vec::new(),
            f_daily_schedule_hourly_org: Vec::new(),
            act_address: String::new(),
            act_start_time: String::new(),
            act_duration: 0,
            act_description: String::new(),
            act_pronunciatio: String::new(),
            act_event: (String::new(), String::new(), String::new()),
            act_obj_description: String::new(),
            act_obj_pronunciatio: String::new(),
            act_obj_event: (String::new(), String::new(), String::new()),
            chatting_with: None,
            chat: Vec::new(),
            chatting_with_buffer: HashMap::new(),
            chatting_end_time: None,
            planned_path: Vec::new(),
            act_path_set: false,
        }
    }

    /// Commit a newly-determined action. `start_time` defaults to
    /// `curr_time` when omitted. Clears `planned_path`/`act_path_set` so the
    /// executor re-derives a route on the next tick.
    #[allow(clippy::too_many_arguments)]
    pub fn add_new_action(
        &mut self,
        address: impl Into<String>,
        duration: u32,
        description: impl Into<String>,
        pronunciatio: impl Into<String>,
        event: EventTriple,
        chatting_with: Option<String>,
        chat: Vec<ChatLine>,
        chatting_with_buffer: HashMap<String, i32>,
        chatting_end_time: Option<String>,
        obj_description: impl Into<String>,
        obj_pronunciatio: impl Into<String>,
        obj_event: EventTriple,
        start_time: Option<String>,
    ) {
        self.act_start_time = start_time.unwrap_or_else(|| self.curr_time.clone());
        self.act_address = address.into();
        self.act_duration = duration;
        self.act_description = description.into();
        self.act_pronunciatio = pronunciatio.into();
        self.act_event = event;
        self.chatting_with = chatting_with;
        self.chat = chat;
        for (name, ticks) in chatting_with_buffer {
            self.chatting_with_buffer.insert(name, ticks);
        }
        self.chatting_end_time = chatting_end_time;
        self.act_obj_description = obj_description.into();
        self.act_obj_pronunciatio = obj_pronunciatio.into();
        self.act_obj_event = obj_event;
        self.planned_path.clear();
        self.act_path_set = false;
    }

    /// `true` iff `curr_time` (parsed as sim time) has reached
    /// `act_start_time + act_duration` minutes.
    pub fn act_check_finished(&self, curr_minutes_since_midnight_total: i64, act_start_minutes_since_midnight_total: i64) -> bool {
        curr_minutes_since_midnight_total >= act_start_minutes_since_midnight_total + self.act_duration as i64
    }

    /// Index of the `f_daily_schedule` slot containing simulated minute
    /// `minutes_since_midnight + advance_min`.
    pub fn get_f_daily_schedule_index(&self, minutes_since_midnight: i64, advance_min: i64) -> Option<usize> {
        Self::slot_index(&self.f_daily_schedule, minutes_since_midnight + advance_min)
    }

    pub fn get_f_daily_schedule_hourly_org_index(&self, minutes_since_midnight: i64, advance_min: i64) -> Option<usize> {
        Self::slot_index(&self.f_daily_schedule_hourly_org, minutes_since_midnight + advance_min)
    }

    fn slot_index(schedule: &[ScheduleSlot], target_minute: i64) -> Option<usize> {
        if target_minute < 0 {
            return None;
        }
        let mut elapsed = 0i64;
        for (index, (_, minutes)) in schedule.iter().enumerate() {
            elapsed += *minutes as i64;
            if target_minute < elapsed {
                return Some(index);
            }
        }
        None
    }

    pub fn decrement_chat_cooldowns(&mut self) {
        let current_partner = self.chatting_with.clone();
        for (name, ticks) in self.chatting_with_buffer.iter_mut() {
            if Some(name.as_str()) != current_partner.as_deref() && *ticks > 0 {
                *ticks -= 1;
            }
        }
    }
}
