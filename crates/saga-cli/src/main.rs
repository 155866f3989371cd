//! Saga CLI - multi-agent story simulation.
//!
//! Single binary that provides:
//! - `saga init` - write a default project config and sample scene
//! - `saga run --scene <file>` - simulate and render one scene
//! - `saga logs` - inspect recorded rounds

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use saga_core::adapters::ScriptStep;
use saga_core::config::DEFAULT_CONFIG_YAML;
use saga_core::model::{Anchor, SceneContext};
use saga_core::store::SceneEntityIndex;
use saga_core::{
    AgentDecider, DependencyMatrixCache, JsonlStore, MemoryStore, PlainRenderer, SagaConfig,
    ScriptedAgent, SimulationEngine, SimulationStore,
};

#[derive(Parser)]
#[command(name = "saga")]
#[command(about = "Multi-agent story simulation", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a scene and print the rendered result
    Run {
        /// Scene file (YAML)
        #[arg(long)]
        scene: PathBuf,

        /// Override the configured round limit
        #[arg(long)]
        max_rounds: Option<u32>,
    },

    /// Show recorded rounds
    Logs {
        /// Only rounds of this scene
        #[arg(long)]
        scene: Option<String>,

        /// Number of entries to show when no scene is given
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Initialize a new project
    Init,
}

/// A scene file: the scene context, its cast, and the story structure it needs.
#[derive(Debug, Deserialize)]
struct SceneFile {
    scene: serde_json::Value,
    #[serde(default)]
    agents: Vec<AgentSpec>,
    #[serde(default)]
    anchors: Vec<Anchor>,
    #[serde(default)]
    scene_entities: Option<SceneEntityIndex>,
}

#[derive(Debug, Deserialize)]
struct AgentSpec {
    id: String,
    #[serde(default)]
    script: Vec<ScriptStep>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Find project root
    let project_root = match cli.project {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Some(Commands::Run { scene, max_rounds }) => {
            run_scene(&project_root, &scene, max_rounds).await
        }
        Some(Commands::Logs { scene, limit }) => show_logs(&project_root, scene, limit).await,
        Some(Commands::Init) => init_project(&project_root),
        None => {
            println!("Saga - Multi-agent story simulation");
            println!();
            println!("Usage: saga <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run   Simulate a scene");
            println!("  logs  Show recorded rounds");
            println!("  init  Initialize a new project");
            println!();
            println!("Run 'saga --help' for more information.");
            Ok(())
        }
    }
}

async fn run_scene(project_root: &Path, scene_path: &Path, max_rounds: Option<u32>) -> Result<()> {
    tracing::info!(project = %project_root.display(), scene = %scene_path.display(), "Starting scene");

    let mut config = SagaConfig::load_from_project(project_root)?;
    if let Some(rounds) = max_rounds {
        config.simulation.max_rounds = rounds;
    }
    let backend = config.generation.backend.clone().unwrap_or_default();
    if backend != "scripted" {
        bail!("llm backend `{backend}` is not available in this build; use `scripted`");
    }

    let content = std::fs::read_to_string(scene_path)
        .with_context(|| format!("Failed to read scene from {}", scene_path.display()))?;
    let file: SceneFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse scene from {}", scene_path.display()))?;
    let mut scene = SceneContext::from_value(file.scene)?;

    let structure = MemoryStore::new();
    for anchor in file.anchors {
        structure.add_anchor(anchor)?;
    }
    if let (Some(index), Some(root_id), Some(branch_id)) =
        (file.scene_entities, scene.root_id(), scene.branch_id())
    {
        structure.set_scene_entities(root_id, branch_id, index)?;
    }
    let store: Arc<dyn SimulationStore> = Arc::new(JsonlStore::with_structure(project_root, structure));

    let agents: Vec<Arc<dyn AgentDecider>> = file
        .agents
        .iter()
        .map(|spec| Arc::new(ScriptedAgent::from_steps(&spec.id, &spec.script)) as Arc<dyn AgentDecider>)
        .collect();

    let engine = SimulationEngine::new(config, store)?
        .with_renderer(Arc::new(PlainRenderer))
        .with_matrix_cache(Arc::new(DependencyMatrixCache::new()));

    let rendered = engine.run_scene(&mut scene, &agents).await?;
    println!("{rendered}");
    Ok(())
}

async fn show_logs(project_root: &Path, scene: Option<String>, limit: usize) -> Result<()> {
    let store = JsonlStore::new(project_root);
    let entries = match &scene {
        Some(scene_id) => store.list_simulation_logs(scene_id).await?,
        None => store.read_recent(limit).await?,
    };

    println!("Simulation log: {}", store.log_path().display());
    println!();
    if entries.is_empty() {
        println!("No rounds recorded.");
        return Ok(());
    }
    for entry in &entries {
        let round = &entry.round;
        println!(
            "  [{}] {} - {} actions, {} conflicts, convergence {:.2}, info gain {:.2}, stagnation {}",
            entry.recorded_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            entry.id,
            round.agent_actions.len(),
            round.dm_arbitration.conflicts_resolved.len(),
            round.convergence_score,
            round.info_gain,
            round.stagnation_count,
        );
    }
    Ok(())
}

const SAMPLE_SCENE_YAML: &str = r#"# Sample scene: two agents race for the vault.
scene:
  scene_id: vault-heist
  scene_version_id: vault-heist-v1
  scene_seq: 1
  root_id: heist
  branch_id: main
  mood: tense
  weather: rain
  conflict_escalation: 0.2
  events: []
  world_state:
    power_levels:
      alice: 3
      bob: 2

anchors:
  - id: vault-opened
    root_id: heist
    branch_id: main
    sequence: 1
    description: The vault is opened
    constraint_type: hard
    required_conditions: ["investigate:vault", "negotiate:guard"]

agents:
  - id: alice
    script:
      - action_type: investigate
        target: vault
        dialogue: "The lock is older than it looks."
  - id: bob
    script:
      - action_type: investigate
        target: vault
      - action_type: negotiate
        target: guard
        dialogue: "Nobody needs to get hurt."
"#;

fn init_project(project_root: &Path) -> Result<()> {
    let saga_dir = project_root.join(".saga");
    let scenes_dir = saga_dir.join("scenes");

    std::fs::create_dir_all(&scenes_dir)?;

    let config_path = saga_dir.join("config.yaml");
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG_YAML)?;
    }

    let scene_path = scenes_dir.join("vault-heist.yaml");
    if !scene_path.exists() {
        std::fs::write(&scene_path, SAMPLE_SCENE_YAML)?;
    }

    println!("Initialized Saga project at {}", project_root.display());
    println!();
    println!("Created:");
    println!("  .saga/config.yaml - simulation configuration");
    println!("  .saga/scenes/vault-heist.yaml - sample scene");
    println!();
    println!("Next steps:");
    println!("  1. Edit the scene or add your own");
    println!("  2. Run: saga run --scene .saga/scenes/vault-heist.yaml");

    Ok(())
}
