mod interactive;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use townsim_config::AppConfig;
use townsim_llm::LlmGateway;
use townsim_runtime::{WorldRuntime, load_maze};

#[derive(Debug, Parser)]
#[command(name = "townsim", version, about = "Operator console for a generative-agent town simulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fork `<storage_root>/<source>` into `<storage_root>/<target>` and open the operator console.
    Boot {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
    },
    /// Resume `<storage_root>/<sim>` without forking and open the operator console.
    Resume {
        #[arg(long)]
        sim: String,
    },
}

fn build_gateway(config: &AppConfig) -> LlmGateway {
    LlmGateway::ollama(
        config.llm.base_url.clone(),
        std::time::Duration::from_secs(config.llm.call_timeout_secs),
        config.llm.generation_model.clone(),
        config.llm.embedding_model.clone(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = AppConfig::load_from("config/default.toml")?;
    let storage_root = if config.paths.storage_root.is_empty() {
        PathBuf::from("storage")
    } else {
        PathBuf::from(&config.paths.storage_root)
    };

    let cli = Cli::parse();
    let mut world = match cli.command {
        Commands::Boot { source, target } => {
            let maze = load_maze(&storage_root.join(&source))
                .await
                .context("no reverie/maze.json under the source simulation; seed one before booting")?;
            let gateway = build_gateway(&config);
            let world = WorldRuntime::boot(&storage_root, &source, &target, maze, gateway, config.persona_defaults).await?;
            println!("booted '{target}' from '{source}' — {} personas loaded", world.meta.persona_names.len());
            world
        }
        Commands::Resume { sim } => {
            let sim_dir = storage_root.join(&sim);
            let maze = load_maze(&sim_dir)
                .await
                .context("no reverie/maze.json under this simulation; boot it first")?;
            let gateway = build_gateway(&config);
            let world = WorldRuntime::resume(sim_dir, maze, gateway, config.persona_defaults).await?;
            println!("resumed '{sim}' at step {}, {}", world.meta.step, world.meta.curr_time);
            world
        }
    };

    interactive::run_operator_console(&mut world).await
}
