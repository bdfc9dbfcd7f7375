/// Descartes CLI - command-line front end for the task queue core.
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use descartes_core::{
    tool_server, Config, EnqueueInput, PruneFilter, QueueService, TaskFilter, TaskSource,
    TaskStatus,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "descartes")]
#[command(about = "Task queue core: enqueue, schedule, and resolve agent work", long_about = None)]
#[command(version = "0.1.0")]
struct Args {
    /// Path to a TOML config file (defaults to $DESCARTES_QUEUE_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ToolServer, reading one JSON request per line on stdin and
    /// writing one JSON response per line on stdout.
    Serve,

    /// Enqueue a new task.
    Enqueue {
        description: String,
        #[arg(long, default_value = "human")]
        source: String,
        #[arg(long)]
        agent_type: Option<String>,
        #[arg(long, default_value_t = 5.0)]
        base_priority: f64,
        #[arg(long, value_delimiter = ',')]
        depends_on: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show a single task.
    Get {
        task_id: String,
        #[arg(long)]
        json: bool,
    },

    /// List tasks, optionally filtered.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },

    /// Print aggregate queue statistics.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Cancel a task, cascading to its dependents.
    Cancel { task_id: String },

    /// Compute a layered execution plan for a set of tasks.
    Plan {
        #[arg(value_delimiter = ',')]
        task_ids: Vec<String>,
    },

    /// Delete terminal tasks older than `--older-than-days`, reclaiming space per `vacuum_mode`.
    Prune {
        #[arg(long)]
        older_than_days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    init_tracing(&config);

    let request_timeout = std::time::Duration::from_secs(config.request_timeout_seconds);
    let service = QueueService::new(config).await?;

    match args.command {
        Commands::Serve => serve_stdio(&service, request_timeout).await,
        Commands::Enqueue {
            description,
            source,
            agent_type,
            base_priority,
            depends_on,
            json,
        } => enqueue(&service, description, source, agent_type, base_priority, depends_on, json).await,
        Commands::Get { task_id, json } => get(&service, &task_id, json).await,
        Commands::List { status, limit, json } => list(&service, status, limit, json).await,
        Commands::Status { json } => status(&service, json).await,
        Commands::Cancel { task_id } => cancel(&service, &task_id).await,
        Commands::Plan { task_ids } => plan(&service, task_ids).await,
        Commands::Prune { older_than_days } => prune(&service, older_than_days).await,
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    match config.log_format {
        descartes_core::config::LogFormat::Json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        descartes_core::config::LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Line-delimited JSON request/response loop over stdio, per the
/// tool-server boundary's transport framing. Each request is given
/// `request_timeout` to complete before the client sees `Timeout`.
async fn serve_stdio(service: &QueueService, request_timeout: std::time::Duration) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<tool_server::ToolRequest>(&line) {
            Ok(request) => match tokio::time::timeout(request_timeout, tool_server::dispatch(service, request)).await {
                Ok(response) => response,
                Err(_) => tool_server::ToolResponse::failure(descartes_core::QueueError::Timeout),
            },
            Err(e) => tool_server::ToolResponse::failure(
                descartes_core::QueueError::Validation(format!("malformed request: {e}")),
            ),
        };

        let out = serde_json::to_string(&response)?;
        stdout.write_all(out.as_bytes())?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
    }

    Ok(())
}

async fn enqueue(
    service: &QueueService,
    description: String,
    source: String,
    agent_type: Option<String>,
    base_priority: f64,
    depends_on: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let source: TaskSource = source.parse().map_err(|e: descartes_core::QueueError| anyhow::anyhow!(e))?;
    let mut prerequisites = Vec::new();
    for raw in depends_on.iter().filter(|s| !s.is_empty()) {
        prerequisites.push(uuid::Uuid::parse_str(raw)?);
    }

    let input = EnqueueInput {
        description,
        source,
        agent_type: agent_type.unwrap_or_else(|| descartes_core::types::DEFAULT_AGENT_TYPE.to_string()),
        base_priority,
        prerequisites,
        ..Default::default()
    };

    let task = service.enqueue(input).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!(
            "{} {} [{}]",
            "enqueued".green().bold(),
            task.id.to_string().cyan(),
            task.status.as_str()
        );
    }
    Ok(())
}

async fn get(service: &QueueService, task_id: &str, json: bool) -> anyhow::Result<()> {
    let id = uuid::Uuid::parse_str(task_id)?;
    let task = service.get(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!("{:<15} {}", "ID:".bold(), task.id);
        println!("{:<15} {}", "Status:".bold(), status_colored(task.status));
        println!("{:<15} {}", "Description:".bold(), task.description);
        println!("{:<15} {:.2}", "Priority:".bold(), task.calculated_priority);
        println!("{:<15} {}", "Depth:".bold(), task.dependency_depth);
    }
    Ok(())
}

async fn list(service: &QueueService, status: Option<String>, limit: i64, json: bool) -> anyhow::Result<()> {
    let status: Option<TaskStatus> = status.map(|s| s.parse()).transpose().map_err(|e: descartes_core::QueueError| anyhow::anyhow!(e))?;
    let filter = TaskFilter {
        status,
        ..Default::default()
    };
    let tasks = service.list(filter, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    println!("{:<38} {:<10} {:<8} {:<40}", "ID".bold(), "STATUS".bold(), "PRIO".bold(), "DESCRIPTION".bold());
    println!("{}", "-".repeat(96).dimmed());
    for task in &tasks {
        let description = if task.description.len() > 38 {
            format!("{}...", &task.description[..35])
        } else {
            task.description.clone()
        };
        println!(
            "{:<38} {:<10} {:<8.2} {:<40}",
            task.id.to_string().cyan(),
            status_colored(task.status),
            task.calculated_priority,
            description
        );
    }
    println!("\nTotal: {}", tasks.len().to_string().cyan());
    Ok(())
}

async fn status(service: &QueueService, json: bool) -> anyhow::Result<()> {
    let status = service.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("{:<12} {}", "Total:".bold(), status.total);
    println!("{:<12} {}", "Blocked:".bold(), status.blocked);
    println!("{:<12} {}", "Ready:".bold(), status.ready);
    println!("{:<12} {}", "Running:".bold(), status.running);
    println!("{:<12} {}", "Completed:".bold(), status.completed.to_string().green());
    println!("{:<12} {}", "Failed:".bold(), status.failed.to_string().red());
    println!("{:<12} {}", "Cancelled:".bold(), status.cancelled);
    println!("{:<12} {:.2}", "Avg prio:".bold(), status.average_calculated_priority);
    Ok(())
}

async fn cancel(service: &QueueService, task_id: &str) -> anyhow::Result<()> {
    let id = uuid::Uuid::parse_str(task_id)?;
    let cancelled = service.cancel(id).await?;
    println!(
        "{} {} (+{} cascaded)",
        "cancelled".yellow().bold(),
        id,
        cancelled.len().saturating_sub(1)
    );
    Ok(())
}

async fn plan(service: &QueueService, task_ids: Vec<String>) -> anyhow::Result<()> {
    let ids = task_ids
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| uuid::Uuid::parse_str(s))
        .collect::<Result<Vec<_>, _>>()?;
    let batches = service.execution_plan(ids).await?;
    for (i, batch) in batches.iter().enumerate() {
        println!("{} {}", format!("batch {i}:").bold(), batch.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", "));
    }
    Ok(())
}

async fn prune(service: &QueueService, older_than_days: Option<i64>) -> anyhow::Result<()> {
    let filter = PruneFilter {
        older_than: older_than_days.map(|days| chrono::Utc::now() - chrono::Duration::days(days)),
        statuses: Vec::new(),
    };
    let pruned = service.prune(filter).await?;
    println!("{} {} tasks", "pruned".green().bold(), pruned);
    Ok(())
}

fn status_colored(status: TaskStatus) -> colored::ColoredString {
    let s = status.as_str();
    match status {
        TaskStatus::Completed => s.green(),
        TaskStatus::Failed => s.red(),
        TaskStatus::Cancelled => s.dimmed(),
        TaskStatus::Running => s.cyan(),
        TaskStatus::Ready => s.white().bold(),
        TaskStatus::Blocked | TaskStatus::Pending => s.yellow(),
    }
}
