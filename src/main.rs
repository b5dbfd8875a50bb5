//! # toxit CLI
//!
//! The `toxit` binary schedules scoring tasks, runs the task processor, and
//! prints stored results.
//!
//! ## Usage
//!
//! ```bash
//! toxit --config ./config/toxit.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `toxit init` | Create the SQLite database and run schema migrations |
//! | `toxit task add <community>...` | Schedule a task |
//! | `toxit task list` | List tasks and their status |
//! | `toxit task cancel <id>` | Cancel a task that has not started |
//! | `toxit run` | Start the poll loop |
//! | `toxit stats <id>` | Print a task's stored results |
//!
//! Logging goes to stderr and follows `RUST_LOG` (default `toxit=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use toxit::processor::{PollOutcome, TaskProcessor};
use toxit::task_cmd::AddTaskOptions;
use toxit::{config, db, migrate, stats, task_cmd};

/// toxit: scheduled toxicity scoring and community overlap graphs.
#[derive(Parser)]
#[command(name = "toxit", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/toxit.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Manage scheduled tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Run the task processor.
    ///
    /// Polls for due tasks, claims them, and runs the pipeline. Ctrl-C stops
    /// the loop once the current task (if any) has finished.
    Run {
        /// Process at most one due task and exit.
        #[arg(long)]
        once: bool,
    },

    /// Print stored results of a task.
    Stats {
        /// Task id.
        task_id: i64,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Schedule a new task.
    Add {
        /// Communities to analyze, in processing order.
        #[arg(required = true)]
        communities: Vec<String>,

        /// Start time: `now`, RFC 3339, or `YYYY-MM-DD HH:MM` (UTC).
        #[arg(long)]
        start: Option<String>,

        /// Harvest window: hour, day, week, month, year, all.
        #[arg(long, default_value = "week")]
        scope: String,

        /// Comments need more words than this.
        #[arg(long, default_value_t = 20)]
        min_words: u32,

        /// Maximum comments kept per post.
        #[arg(long, default_value_t = 1000)]
        per_post: u32,

        /// Maximum comments kept per community.
        #[arg(long, default_value_t = 1000)]
        comments: u32,
    },

    /// List all tasks.
    List,

    /// Cancel a task that is still scheduled.
    Cancel {
        /// Task id.
        id: i64,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("toxit=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Task { action } => match action {
            TaskAction::Add {
                communities,
                start,
                scope,
                min_words,
                per_post,
                comments,
            } => {
                task_cmd::run_task_add(
                    &cfg,
                    AddTaskOptions {
                        communities,
                        start,
                        scope,
                        min_words,
                        per_post,
                        comments,
                    },
                )
                .await?;
            }
            TaskAction::List => {
                task_cmd::run_task_list(&cfg).await?;
            }
            TaskAction::Cancel { id } => {
                task_cmd::run_task_cancel(&cfg, id).await?;
            }
        },
        Commands::Run { once } => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;
            let processor = TaskProcessor::from_config(&cfg, pool.clone())?;

            if once {
                match processor.poll_once().await? {
                    PollOutcome::Idle => println!("no due task"),
                    PollOutcome::Lost { task_id } => {
                        println!("task {} was claimed by another processor", task_id)
                    }
                    PollOutcome::Finished { task_id, status } => {
                        println!("task {} {}", task_id, status)
                    }
                }
            } else {
                let (stop_tx, stop_rx) = watch::channel(false);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("shutdown requested, finishing current work");
                        let _ = stop_tx.send(true);
                    }
                });
                processor.run_until(stop_rx).await?;
            }

            pool.close().await;
        }
        Commands::Stats { task_id } => {
            stats::run_stats(&cfg, task_id).await?;
        }
    }

    Ok(())
}
