//! `workflow-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`     start the API server and run engine.
//! - `migrate`   run pending database migrations.
//! - `validate`  validate a workflow graph JSON file.
//! - `compile`   print the step chain a graph would publish as.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::{MemoryStore, PgStore, Store};
use engine::{compile, default_registry, validate, ExecutorConfig, RunEngine, WorkflowGraph};
use queue::Dispatcher;

#[derive(Parser)]
#[command(
    name = "workflow-engine",
    about = "Event-driven workflow automation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Postgres URL. Without one, state is kept in memory.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
        max_connections: u32,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow graph JSON file.
    Validate {
        /// Path to the graph JSON file.
        path: PathBuf,
    },
    /// Validate and compile a workflow graph JSON file, printing the steps.
    Compile {
        path: PathBuf,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Retries after the first failed attempt of a step.
    #[arg(long, env = "ENGINE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,
    /// Base back-off; doubles per retry.
    #[arg(long, env = "ENGINE_RETRY_BASE_DELAY_MS", default_value_t = 100)]
    retry_base_delay_ms: u64,
    #[arg(long, env = "ENGINE_STEP_TIMEOUT_MS", default_value_t = 30_000)]
    step_timeout_ms: u64,
}

impl From<&EngineArgs> for ExecutorConfig {
    fn from(args: &EngineArgs) -> Self {
        Self {
            max_retries: args.max_retries,
            retry_base_delay: Duration::from_millis(args.retry_base_delay_ms),
            step_timeout: Duration::from_millis(args.step_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database_url, max_connections, engine } => {
            let store: Arc<dyn Store> = match database_url {
                Some(url) => {
                    let pool = db::pool::connect_and_migrate(&url, max_connections)
                        .await
                        .context("failed to prepare database")?;
                    Arc::new(PgStore::new(pool))
                }
                None => {
                    warn!("DATABASE_URL not set; using in-memory store");
                    Arc::new(MemoryStore::new())
                }
            };
            let engine = RunEngine::new(store, default_registry(), ExecutorConfig::from(&engine));
            let state = api::AppState::new(Dispatcher::new(Arc::new(engine)));

            info!("Starting API server on {bind}");
            api::serve(&bind, state).await.context("server error")?;
        }
        Command::Migrate { database_url } => {
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let graph = read_graph(&path)?;
            match validate(&graph) {
                Ok(trigger) => println!("✅ Workflow is valid. Trigger: {}", trigger.id),
                Err(e) => bail!("❌ Validation failed ({}): {e}", e.reason()),
            }
        }
        Command::Compile { path } => {
            let graph = read_graph(&path)?;
            let trigger = validate(&graph).map_err(|e| anyhow::anyhow!("{} ({})", e, e.reason()))?;
            let chain = compile(&graph, trigger)?;
            for edge in &chain.dropped_edges {
                eprintln!("⚠️  dropped edge {edge}: it would re-enter an earlier step");
            }
            println!("{}", serde_json::to_string_pretty(&chain.steps)?);
        }
    }

    Ok(())
}

fn read_graph(path: &Path) -> Result<WorkflowGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("invalid workflow graph JSON")
}
