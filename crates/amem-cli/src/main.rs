//! AMEM - Agent Memory Engine CLI
//!
//! The `amem` command manages the memory backend and lets operators read
//! and curate what agents have remembered.
//!
//! ## Commands
//!
//! - `up` / `status` / `down`: backend container lifecycle
//! - `health`: round-trip the backend and report circuit health
//! - `remember` / `recall` / `invalidate`: memory records
//! - `reinforce` / `decay`: quality scores
//! - `summary` / `patterns`: aggregate views
//!
//! ## Backend selection
//!
//! 1. `--local <dir>`: embedded database persisted in `<dir>`
//! 2. `AMEM_DB_ENDPOINT` (+ `AMEM_DB_USERNAME`, `AMEM_DB_PASSWORD`): existing server
//! 3. otherwise the managed container, started on demand

use std::path::{Path, PathBuf};

use amem_core::{
    EngineConfig, InvalidationOutcome, MemoryCategory, MemoryEngine, NewMemory, RecallQuery,
    METRICS,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use container_manager::{default_state_dir, ContainerConfig, ContainerManager, ContainerStatus};
use graph_state::BackendConfig;
use serde::Serialize;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "amem")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Agent Memory Engine (AMEM)", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "AMEM_CONFIG")]
    config: Option<PathBuf>,

    /// Use an embedded database stored in this directory
    #[arg(long, global = true, env = "AMEM_LOCAL_PATH")]
    local: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the backend container if needed
    Up,

    /// Show the backend container state
    Status,

    /// Check that the backend answers and report circuit health
    Health,

    /// Stop the backend container
    Down {
        /// Also remove the container, its data volume and the credential
        #[arg(long)]
        remove: bool,
    },

    /// Store a memory
    Remember {
        /// Agent role, e.g. architect
        agent_type: String,

        content: String,

        /// episodic, semantic, procedural or pattern
        #[arg(short, long, default_value = "semantic")]
        category: MemoryCategory,

        /// Tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        #[arg(long, default_value = "0.8")]
        confidence: f64,

        #[arg(short, long)]
        project: Option<String>,

        #[arg(long)]
        session: Option<String>,

        /// Structure to deduplicate for pattern memories (default: content)
        #[arg(long)]
        structure: Option<String>,
    },

    /// Recall memories for an agent type
    Recall {
        agent_type: String,

        /// Free text to rank against
        #[arg(long)]
        context: Option<String>,

        #[arg(short, long)]
        category: Option<MemoryCategory>,

        /// Required tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        #[arg(long, default_value = "0.0")]
        min_quality: f64,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Mark a memory as no longer valid
    Invalidate { id: String },

    /// Raise a memory's quality score
    Reinforce {
        id: String,

        #[arg(long, default_value = "0.1")]
        amount: f64,
    },

    /// Multiply the quality of every active memory by a factor
    Decay {
        #[arg(long, default_value = "0.95")]
        factor: f64,
    },

    /// Show store-wide counts
    Summary,

    /// List code patterns, or the occurrences of one
    Patterns {
        /// Signature hash to inspect
        signature: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    amem_core::init_tracing(cli.json, level);

    let out = Output { json: cli.json };

    let result = match cli.command {
        Commands::Up => cmd_up(&out).await,
        Commands::Status => cmd_status(&out).await,
        Commands::Down { remove } => cmd_down(remove).await,
        command => {
            let config = load_config(cli.config.as_deref())?;
            let engine = open_engine(cli.local.as_deref(), config).await?;
            run_memory_command(&engine, command, &out).await
        }
    };

    METRICS.flush();
    result
}

async fn run_memory_command(engine: &MemoryEngine, command: Commands, out: &Output) -> Result<()> {
    match command {
        Commands::Health => cmd_health(engine, out).await,
        Commands::Remember {
            agent_type,
            content,
            category,
            tags,
            confidence,
            project,
            session,
            structure,
        } => {
            let mut memory = NewMemory::new(agent_type, content, category, confidence).with_tags(tags);
            if let Some(project) = project {
                memory = memory.with_project(project);
            }
            if let Some(session) = session {
                memory = memory.with_session(session);
            }
            if let Some(structure) = structure {
                memory = memory.with_structure(structure);
            }
            cmd_remember(engine, memory, out).await
        }
        Commands::Recall {
            agent_type,
            context,
            category,
            tags,
            min_quality,
            limit,
        } => {
            let mut query = RecallQuery::new(agent_type)
                .with_tags(tags)
                .with_min_quality(min_quality)
                .with_limit(limit);
            if let Some(context) = context {
                query = query.with_context(context);
            }
            if let Some(category) = category {
                query = query.with_category(category);
            }
            cmd_recall(engine, query, out).await
        }
        Commands::Invalidate { id } => cmd_invalidate(engine, &id, out).await,
        Commands::Reinforce { id, amount } => cmd_reinforce(engine, &id, amount, out).await,
        Commands::Decay { factor } => cmd_decay(engine, factor, out).await,
        Commands::Summary => cmd_summary(engine, out).await,
        Commands::Patterns { signature } => cmd_patterns(engine, signature.as_deref(), out).await,
        Commands::Up | Commands::Status | Commands::Down { .. } => {
            unreachable!("container commands are dispatched before the engine opens")
        }
    }
}

/// Human-readable or JSON command output on stdout.
struct Output {
    json: bool,
}

impl Output {
    /// Print `value` as JSON, or run `human` for plain text.
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_state_dir().join("amem.toml"));
    EngineConfig::from_toml_file(&path)
        .and_then(EngineConfig::with_env_overrides)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

async fn open_engine(local: Option<&Path>, config: EngineConfig) -> Result<MemoryEngine> {
    if let Some(path) = local {
        debug!(path = %path.display(), "Using embedded store");
        return MemoryEngine::open_local(path, config)
            .await
            .with_context(|| format!("Failed to open local store at {}", path.display()));
    }

    if std::env::var("AMEM_DB_ENDPOINT").is_ok() {
        let backend = BackendConfig::from_env().map_err(anyhow::Error::msg)?;
        debug!(endpoint = %backend.endpoint, "Using configured server");
        return MemoryEngine::connect(&backend, config)
            .await
            .with_context(|| format!("Failed to connect to {}", backend.endpoint));
    }

    let container = ContainerConfig::from_env().context("Invalid container configuration")?;
    MemoryEngine::start(container, config)
        .await
        .context("Failed to start the memory backend")
}

fn container_manager() -> Result<ContainerManager> {
    let config = ContainerConfig::from_env().context("Invalid container configuration")?;
    ContainerManager::new(config).context("Failed to set up container manager")
}

async fn cmd_up(out: &Output) -> Result<()> {
    let manager = container_manager()?;
    let info = manager
        .ensure_running()
        .await
        .context("Failed to start the memory backend")?;

    #[derive(Serialize)]
    struct Up<'a> {
        endpoint: &'a str,
        health_url: &'a str,
        username: &'a str,
        credential_path: String,
    }
    let credential_path = manager.config().credential_path.display().to_string();
    out.emit(
        &Up {
            endpoint: &info.endpoint,
            health_url: &info.health_url,
            username: &info.username,
            credential_path: credential_path.clone(),
        },
        || {
            println!("Backend running at {}", info.endpoint);
            println!("Credential: {}", credential_path);
        },
    )
}

async fn cmd_status(out: &Output) -> Result<()> {
    let manager = container_manager()?;
    let status = manager
        .status()
        .await
        .context("Failed to inspect the backend container")?;

    #[derive(Serialize)]
    struct Status<'a> {
        container: &'a str,
        status: ContainerStatus,
        endpoint: String,
        credential_present: bool,
    }
    let config = manager.config();
    let report = Status {
        container: &config.name,
        status,
        endpoint: config.endpoint(),
        credential_present: config.credential_path.exists(),
    };
    out.emit(&report, || {
        println!("Container:  {}", report.container);
        println!("Status:     {}", report.status);
        println!("Endpoint:   {}", report.endpoint);
        println!(
            "Credential: {}",
            if report.credential_present { "present" } else { "missing" }
        );
    })
}

async fn cmd_down(remove: bool) -> Result<()> {
    let manager = container_manager()?;
    if remove {
        manager.cleanup().await;
        println!("Backend container removed");
    } else {
        manager.stop().await;
        println!("Backend container stopped");
    }
    Ok(())
}

async fn cmd_health(engine: &MemoryEngine, out: &Output) -> Result<()> {
    let ping = engine.store().ping().await;
    let report = engine.health();

    #[derive(Serialize)]
    struct Health<'a> {
        reachable: bool,
        health: &'a amem_core::HealthReport,
        breaker: amem_core::BreakerSnapshot,
    }
    out.emit(
        &Health {
            reachable: ping.is_ok(),
            health: &report,
            breaker: engine.connector().snapshot(),
        },
        || {
            println!("Reachable: {}", if ping.is_ok() { "yes" } else { "no" });
            println!("Status:  {}", report.status);
            println!("Circuit: {}", report.circuit_state);
            println!("Failure rate: {:.2}", report.recent_failure_rate);
        },
    )?;

    ping.context("Backend did not answer")
}

async fn cmd_remember(engine: &MemoryEngine, memory: NewMemory, out: &Output) -> Result<()> {
    let id = engine
        .store()
        .remember(memory)
        .await
        .context("Failed to remember")?;
    out.emit(&serde_json::json!({ "id": id }), || println!("{}", id))
}

async fn cmd_recall(engine: &MemoryEngine, query: RecallQuery, out: &Output) -> Result<()> {
    let results = engine
        .store()
        .recall(query)
        .await
        .context("Failed to recall")?;

    out.emit(&results, || {
        if results.is_empty() {
            println!("No memories found");
            return;
        }
        for scored in &results {
            let r = &scored.record;
            println!("memory {}", r.id);
            println!(
                "Score: {:.3}  Quality: {:.2}  Category: {}",
                scored.score, r.quality_score, r.category
            );
            if !r.tags.is_empty() {
                println!("Tags:  {}", r.tags.join(", "));
            }
            println!("Date:  {}", r.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!();
            println!("    {}", r.content);
            println!();
        }
    })
}

async fn cmd_invalidate(engine: &MemoryEngine, id: &str, out: &Output) -> Result<()> {
    let outcome = engine
        .store()
        .invalidate(id)
        .await
        .with_context(|| format!("Failed to invalidate {}", id))?;

    let (already, at) = match outcome {
        InvalidationOutcome::Invalidated { at } => (false, at),
        InvalidationOutcome::AlreadyInvalid { at } => (true, at),
    };
    out.emit(
        &serde_json::json!({ "id": id, "already_invalid": already, "valid_until": at }),
        || {
            if already {
                println!("{} was already invalid since {}", id, at);
            } else {
                println!("{} invalidated at {}", id, at);
            }
        },
    )
}

async fn cmd_reinforce(engine: &MemoryEngine, id: &str, amount: f64, out: &Output) -> Result<()> {
    let quality = engine
        .store()
        .reinforce(id, amount)
        .await
        .with_context(|| format!("Failed to reinforce {}", id))?;
    out.emit(&serde_json::json!({ "id": id, "quality_score": quality }), || {
        println!("{} quality now {:.2}", id, quality)
    })
}

async fn cmd_decay(engine: &MemoryEngine, factor: f64, out: &Output) -> Result<()> {
    let touched = engine
        .store()
        .decay_sweep(factor)
        .await
        .context("Decay sweep failed")?;
    out.emit(&serde_json::json!({ "factor": factor, "touched": touched }), || {
        println!("Decayed {} active memories by {}", touched, factor)
    })
}

async fn cmd_summary(engine: &MemoryEngine, out: &Output) -> Result<()> {
    let summary = engine
        .store()
        .get_memory_summary()
        .await
        .context("Failed to summarise the store")?;
    let agents = engine
        .store()
        .list_agent_types()
        .await
        .context("Failed to list agent types")?;

    out.emit(
        &serde_json::json!({ "summary": summary, "agent_types": agents }),
        || {
            println!(
                "Memories: {} total, {} active, {} invalidated",
                summary.total_records, summary.active_records, summary.invalidated_records
            );
            println!("Mean active quality: {:.2}", summary.mean_active_quality);
            println!(
                "Patterns: {} ({} occurrences)",
                summary.pattern_count, summary.occurrence_count
            );
            for (category, count) in &summary.by_category {
                println!("  {:<12} {}", category, count);
            }
            println!();
            for agent in &agents {
                println!(
                    "agent {}  records: {}  since {}",
                    agent.name,
                    agent.record_count,
                    agent.first_seen.format("%Y-%m-%d")
                );
            }
        },
    )
}

async fn cmd_patterns(engine: &MemoryEngine, signature: Option<&str>, out: &Output) -> Result<()> {
    let patterns = engine.patterns();

    let Some(signature) = signature else {
        let all = patterns
            .list_patterns()
            .await
            .context("Failed to list patterns")?;
        return out.emit(&all, || {
            if all.is_empty() {
                println!("No patterns recorded");
            }
            for p in &all {
                println!("pattern {}", p.signature);
                println!("First seen: {}", p.first_seen.format("%Y-%m-%d %H:%M:%S UTC"));
                println!();
                for line in p.sample.lines().take(5) {
                    println!("    {}", line);
                }
                println!();
            }
        });
    };

    let Some(pattern) = patterns
        .get_pattern(signature)
        .await
        .context("Failed to read pattern")?
    else {
        bail!("No pattern with signature {}", signature);
    };
    let occurrences = patterns
        .find_cross_project(signature)
        .await
        .context("Failed to read occurrences")?;

    out.emit(
        &serde_json::json!({ "pattern": pattern, "occurrences": occurrences }),
        || {
            println!("pattern {}", pattern.signature);
            println!();
            for o in &occurrences {
                println!(
                    "  {}  project {}  record {}",
                    o.observed_at.format("%Y-%m-%d %H:%M:%S"),
                    o.project_id,
                    o.record_id
                );
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_remember() {
        let cli = Cli::try_parse_from([
            "amem",
            "remember",
            "architect",
            "Use token-based auth",
            "--category",
            "semantic",
            "--tag",
            "auth",
            "--tag",
            "api",
            "--confidence",
            "0.9",
        ])
        .unwrap();
        match cli.command {
            Commands::Remember {
                agent_type,
                category,
                tags,
                confidence,
                ..
            } => {
                assert_eq!(agent_type, "architect");
                assert_eq!(category, MemoryCategory::Semantic);
                assert_eq!(tags, vec!["auth".to_string(), "api".to_string()]);
                assert_eq!(confidence, 0.9);
            }
            _ => panic!("expected remember"),
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        assert!(Cli::try_parse_from(["amem", "recall", "architect", "-c", "dream"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["amem", "summary", "--json", "-v"]).unwrap();
        assert!(cli.json);
        assert!(cli.verbose);
    }
}
