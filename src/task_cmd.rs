//! Task administration commands: `toxit task add | list | cancel`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db;
use crate::models::{TaskParams, TimeScale};
use crate::store;

/// Options for `toxit task add`.
#[derive(Debug, Clone)]
pub struct AddTaskOptions {
    pub communities: Vec<String>,
    pub start: Option<String>,
    pub scope: String,
    pub min_words: u32,
    pub per_post: u32,
    pub comments: u32,
}

pub async fn run_task_add(config: &Config, opts: AddTaskOptions) -> Result<()> {
    let scheduled_at = match opts.start.as_deref() {
        Some(start) => parse_start(start, Utc::now())?,
        None => Utc::now(),
    };
    let time_scale: TimeScale = opts.scope.parse()?;

    let params = TaskParams {
        scheduled_at,
        time_scale,
        min_words: opts.min_words,
        per_post_n: opts.per_post,
        comments_n: opts.comments,
        communities: opts.communities,
    };

    let pool = db::connect(config).await?;
    let id = store::insert_task(&pool, &params).await;
    pool.close().await;
    let id = id?;

    println!("task {} scheduled", id);
    println!("  start:       {}", format_ts(scheduled_at));
    println!("  scope:       {}", params.time_scale);
    println!("  communities: {}", params.communities.join(", "));
    Ok(())
}

pub async fn run_task_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let tasks = store::list_tasks(&pool).await;
    pool.close().await;
    let tasks = tasks?;

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<20}  {:<12}  {:<6}  {}",
        "ID", "START", "STATUS", "SCOPE", "COMMUNITIES"
    );
    println!("{}", "-".repeat(72));
    for task in &tasks {
        println!(
            "{:>5}  {:<20}  {:<12}  {:<6}  {}",
            task.id,
            format_ts(task.params.scheduled_at),
            task.status.label(),
            task.params.time_scale.as_str(),
            task.params.communities.join(",")
        );
    }

    Ok(())
}

pub async fn run_task_cancel(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let task = store::get_task(&pool, id).await?;
    let Some(task) = task else {
        pool.close().await;
        bail!("task not found: {}", id);
    };

    let cancelled = store::cancel_task(&pool, id).await;
    pool.close().await;

    if !cancelled? {
        bail!(
            "task {} is {} and can no longer be cancelled",
            id,
            task.status.label()
        );
    }

    println!("task {} cancelled", id);
    Ok(())
}

/// Parse `--start`: `now`, an RFC 3339 timestamp, or `YYYY-MM-DD HH:MM` (UTC).
fn parse_start(value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if value.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .with_context(|| format!("invalid start time '{}': expected now, RFC 3339, or YYYY-MM-DD HH:MM", value))?;
    Ok(naive.and_utc())
}

fn format_ts(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
