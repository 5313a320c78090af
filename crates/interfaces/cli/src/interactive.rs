//! The operator console's command loop: a plain stdin REPL over a running
//! `WorldRuntime`, one line per command, dispatched by string prefix.

use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use townsim_exec::find_path;
use townsim_maze::Granularity;
use townsim_runtime::{RealClock, WorldRuntime};
use townsim_thinker::converse::{Speaker, analysis_turn, load_history_via_whisper};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const MAX_POLL_ATTEMPTS: usize = 150;
const PATH_MAX_ITERATIONS: usize = 20_000;

pub async fn run_operator_console(world: &mut WorldRuntime) -> Result<()> {
    println!("townsim operator console — type 'help' for commands, 'exit' to leave without saving");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "exit" {
            if let Err(err) = tokio::fs::remove_dir_all(&world.sim_dir).await {
                println!("warning: could not delete '{}': {err:#}", world.sim_dir.display());
            }
            break;
        }
        if line == "fin" || line == "finish" {
            world.save().await?;
            println!("saved '{}' at step {}", world.sim_dir.display(), world.meta.step);
            break;
        }
        if line == "save" {
            world.save().await?;
            println!("saved '{}' at step {}", world.sim_dir.display(), world.meta.step);
            continue;
        }
        if line == "help" || line == "?" {
            print_help();
            continue;
        }
        if let Some(rest) = line.strip_prefix("run ") {
            run_steps(world, rest.trim()).await?;
            continue;
        }
        if line == "print current time" {
            println!("{}", world.meta.curr_time);
            continue;
        }
        if line == "print all persona schedule" {
            for name in world.meta.persona_names.clone() {
                print_schedule(world, &name, false);
            }
            continue;
        }
        if let Some(name) = line.strip_prefix("print persona schedule ") {
            print_schedule(world, name.trim(), false);
            continue;
        }
        if let Some(name) = line.strip_prefix("print hourly org persona schedule ") {
            print_schedule(world, name.trim(), true);
            continue;
        }
        if let Some(name) = line.strip_prefix("print persona current tile ") {
            print_current_tile(world, name.trim());
            continue;
        }
        if let Some(name) = line.strip_prefix("print persona chatting with buffer ") {
            print_chat_buffer(world, name.trim());
            continue;
        }
        if let Some(name) = line.strip_prefix("print persona associative memory event ") {
            print_associative(world, name.trim(), AssociativeKind::Event);
            continue;
        }
        if let Some(name) = line.strip_prefix("print persona associative memory thought ") {
            print_associative(world, name.trim(), AssociativeKind::Thought);
            continue;
        }
        if let Some(name) = line.strip_prefix("print persona associative memory chat ") {
            print_associative(world, name.trim(), AssociativeKind::Chat);
            continue;
        }
        if let Some(name) = line.strip_prefix("print persona spatial memory ") {
            print_spatial(world, name.trim());
            continue;
        }
        if let Some(rest) = line.strip_prefix("print tile event ") {
            print_tile(world, rest.trim(), false);
            continue;
        }
        if let Some(rest) = line.strip_prefix("print tile details ") {
            print_tile(world, rest.trim(), true);
            continue;
        }
        if let Some(name) = line.strip_prefix("call -- analysis ") {
            run_analysis_session(world, &stdin, name.trim()).await?;
            continue;
        }
        if let Some(path) = line.strip_prefix("call -- load history ") {
            run_load_history(world, path.trim()).await?;
            continue;
        }
        if line == "start path tester mode" {
            run_path_tester(world, &stdin)?;
            continue;
        }

        println!("unrecognized command; type 'help'");
    }

    Ok(())
}

fn print_help() {
    println!("run <N>                                             -- advance the simulation N steps");
    println!("save                                                 -- write meta.json and every persona to disk");
    println!("fin | finish                                         -- save and leave");
    println!("exit                                                 -- leave without saving");
    println!("print current time");
    println!("print all persona schedule");
    println!("print persona schedule <Name>");
    println!("print hourly org persona schedule <Name>");
    println!("print persona current tile <Name>");
    println!("print persona chatting with buffer <Name>");
    println!("print persona associative memory event|thought|chat <Name>");
    println!("print persona spatial memory <Name>");
    println!("print tile event <x>, <y>");
    println!("print tile details <x>, <y>");
    println!("call -- analysis <Name>                              -- stateless safety-gated interview");
    println!("call -- load history <file.csv>                     -- ingest persona,statement rows as memories");
    println!("start path tester mode                               -- flood-fill between two tiles");
}

async fn run_steps(world: &mut WorldRuntime, raw: &str) -> Result<()> {
    let n: u32 = match raw.parse() {
        Ok(n) => n,
        Err(_) => {
            println!("expected an integer step count, got '{raw}'");
            return Ok(());
        }
    };
    let clock = RealClock;
    let outcomes = world.run_n(n, &clock, POLL_INTERVAL, Some(MAX_POLL_ATTEMPTS)).await?;
    for outcome in &outcomes {
        println!("step {} -> {}", outcome.step, outcome.curr_time);
    }
    Ok(())
}

fn print_schedule(world: &WorldRuntime, name: &str, hourly_org: bool) {
    let Some(persona) = world.personas.get(name) else {
        println!("unknown persona '{name}'");
        return;
    };
    let schedule = if hourly_org { &persona.scratch.f_daily_schedule_hourly_org } else { &persona.scratch.f_daily_schedule };
    if schedule.is_empty() {
        println!("{name}: (no schedule yet)");
        return;
    }
    println!("{name}'s schedule:");
    for (description, minutes) in schedule {
        println!("  {description} ({minutes} min)");
    }
}

fn print_current_tile(world: &WorldRuntime, name: &str) {
    match world.personas.get(name) {
        Some(persona) => println!("{name} @ {:?}", persona.scratch.curr_tile),
        None => println!("unknown persona '{name}'"),
    }
}

fn print_chat_buffer(world: &WorldRuntime, name: &str) {
    let Some(persona) = world.personas.get(name) else {
        println!("unknown persona '{name}'");
        return;
    };
    if persona.scratch.chatting_with_buffer.is_empty() {
        println!("{name}: (no cooldowns)");
        return;
    }
    let mut entries: Vec<_> = persona.scratch.chatting_with_buffer.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (other, ticks) in entries {
        println!("  {other}: {ticks} ticks remaining");
    }
}

enum AssociativeKind {
    Event,
    Thought,
    Chat,
}

fn print_associative(world: &WorldRuntime, name: &str, kind: AssociativeKind) {
    let Some(persona) = world.personas.get(name) else {
        println!("unknown persona '{name}'");
        return;
    };
    let nodes = match kind {
        AssociativeKind::Event => persona.associative.seq_event(),
        AssociativeKind::Thought => persona.associative.seq_thought(),
        AssociativeKind::Chat => persona.associative.seq_chat(),
    };
    if nodes.is_empty() {
        println!("{name}: (none)");
        return;
    }
    for node in nodes {
        println!("  [{}] {} (poignancy {})", node.created, node.spo_summary(), node.poignancy);
    }
}

fn print_spatial(world: &WorldRuntime, name: &str) {
    match world.personas.get(name) {
        Some(persona) => {
            let rendered = persona.spatial.render();
            if rendered.is_empty() {
                println!("{name}: (nothing discovered yet)");
            } else {
                println!("{rendered}");
            }
        }
        None => println!("unknown persona '{name}'"),
    }
}

fn parse_xy(raw: &str) -> Option<(i32, i32)> {
    let (x, y) = raw.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn print_tile(world: &WorldRuntime, raw: &str, details: bool) {
    let Some(coord) = parse_xy(raw) else {
        println!("expected 'x, y', got '{raw}'");
        return;
    };
    let Some(tile) = world.maze.access_tile(coord) else {
        println!("{coord:?} is outside the maze");
        return;
    };
    if details {
        println!(
            "{coord:?}: {} (collision: {})",
            tile.address(Granularity::GameObject),
            tile.collision
        );
    } else if tile.events.is_empty() {
        println!("{coord:?}: (no events)");
    } else {
        for event in &tile.events {
            println!("  {}: {} {} ({})", event.subject, event.predicate, event.object, event.description);
        }
    }
}

async fn run_analysis_session(world: &mut WorldRuntime, stdin: &io::Stdin, name: &str) -> Result<()> {
    if !world.personas.contains_key(name) {
        println!("unknown persona '{name}'");
        return Ok(());
    }
    println!("entering analysis session with {name}; blank line ends it");

    let weights = world.personas[name].retrieval_weights();
    let mut transcript = Vec::new();
    loop {
        print!("whisper> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let persona = world.personas.get_mut(name).expect("checked above");
        let mut speaker = Speaker {
            name,
            act_description: &persona.scratch.act_description,
            memory: &mut persona.associative,
            retrieval_weights: weights,
        };
        let outcome = analysis_turn(&world.gateway, &mut speaker, &mut transcript, line).await;
        if outcome.refused {
            println!("  [refused: safety score too high to answer in character]");
        } else {
            println!("  {name}: {}", outcome.reply.unwrap_or_default());
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    persona: String,
    statement: String,
}

async fn run_load_history(world: &mut WorldRuntime, path: &str) -> Result<()> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut per_persona: HashMap<String, Vec<String>> = HashMap::new();
    for result in reader.deserialize() {
        let row: HistoryRow = result?;
        per_persona.entry(row.persona).or_default().push(row.statement);
    }

    let curr_time = world.meta.curr_time.clone();
    let expiration = expire_in_30_days(&curr_time);
    for (name, statements) in per_persona {
        let Some(persona) = world.personas.get_mut(&name) else {
            println!("skipping unknown persona '{name}'");
            continue;
        };
        load_history_via_whisper(&mut persona.associative, &world.gateway, &name, &curr_time, &expiration, &statements).await;
        println!("ingested {} statement(s) for {name}", statements.len());
    }
    Ok(())
}

fn expire_in_30_days(curr_time: &str) -> String {
    match townsim_config::parse_sim_time(curr_time) {
        Ok(t) => townsim_config::format_sim_time(t + chrono::Duration::days(30)),
        Err(_) => curr_time.to_string(),
    }
}

fn run_path_tester(world: &WorldRuntime, stdin: &io::Stdin) -> Result<()> {
    println!("path tester mode; enter 'x1, y1 -> x2, y2', blank line to leave");
    loop {
        print!("path> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((from_raw, to_raw)) = line.split_once("->") else {
            println!("expected 'x1, y1 -> x2, y2'");
            continue;
        };
        let (Some(start), Some(end)) = (parse_xy(from_raw.trim()), parse_xy(to_raw.trim())) else {
            println!("expected 'x1, y1 -> x2, y2'");
            continue;
        };
        let path = find_path(&world.maze, start, end, PATH_MAX_ITERATIONS);
        if path.is_empty() {
            println!("  no path found");
        } else {
            println!("  {} tile(s): {path:?}", path.len());
        }
    }
    Ok(())
}
