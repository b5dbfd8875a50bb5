//! Task queue and result persistence.
//!
//! The `inference_tasks.status` column is the only state shared between
//! processor instances. Every transition is a compare-and-set `UPDATE` that
//! names the status it expects to replace, so two processors racing for the
//! same task cannot both claim it.
//!
//! Results of a run are written by [`persist_run`] inside one transaction:
//! either every community of the run is stored, or nothing is.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};

use crate::graph::EdgeGraph;
use crate::models::{
    CommunityHarvest, CommunityResult, TaskDefinition, TaskParams, TaskStatus,
};

const TASK_COLUMNS: &str =
    "id, scheduled_at, time_scale, min_words, per_post_n, comments_n, communities_json, status";

/// Everything one successful run hands to persistence.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Harvests in task order, with scores filled in.
    pub harvests: Vec<CommunityHarvest>,
    pub results: BTreeMap<String, CommunityResult>,
    pub mod_edges: EdgeGraph,
    pub author_edges: EdgeGraph,
}

/// Insert a new task in the `Scheduled` state and return its id.
pub async fn insert_task(pool: &SqlitePool, params: &TaskParams) -> Result<i64> {
    params.validate()?;

    let communities_json = serde_json::to_string(&params.communities)?;
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO inference_tasks
            (scheduled_at, time_scale, min_words, per_post_n, comments_n, communities_json, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(params.scheduled_at.timestamp())
    .bind(params.time_scale.as_str())
    .bind(params.min_words as i64)
    .bind(params.per_post_n as i64)
    .bind(params.comments_n as i64)
    .bind(communities_json)
    .bind(TaskStatus::Scheduled.code())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_task(pool: &SqlitePool, id: i64) -> Result<Option<TaskDefinition>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM inference_tasks WHERE id = ?",
        TASK_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_task).transpose()
}

pub async fn list_tasks(pool: &SqlitePool) -> Result<Vec<TaskDefinition>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM inference_tasks ORDER BY scheduled_at ASC, id ASC",
        TASK_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_task).collect()
}

/// The earliest `Scheduled` task whose start time is at or before `now`.
pub async fn next_due_task(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Option<TaskDefinition>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {} FROM inference_tasks
        WHERE status = ? AND scheduled_at <= ?
        ORDER BY scheduled_at ASC, id ASC
        LIMIT 1
        "#,
        TASK_COLUMNS
    ))
    .bind(TaskStatus::Scheduled.code())
    .bind(now.timestamp())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_task).transpose()
}

/// Move a task from `Scheduled` to `InProgress`.
///
/// Returns `false` if the task was no longer `Scheduled` (claimed by another
/// processor, or cancelled in the meantime).
pub async fn claim_task(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE inference_tasks SET status = ?, started_at = ? WHERE id = ? AND status = ?",
    )
    .bind(TaskStatus::InProgress.code())
    .bind(now.timestamp())
    .bind(id)
    .bind(TaskStatus::Scheduled.code())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a claimed task to its terminal status (`Completed` or `Error`).
pub async fn finish_task(
    pool: &SqlitePool,
    id: i64,
    status: TaskStatus,
    error_message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !matches!(status, TaskStatus::Completed | TaskStatus::Error) {
        anyhow::bail!("'{}' is not a terminal status for a claimed task", status);
    }

    let result = sqlx::query(
        r#"
        UPDATE inference_tasks
        SET status = ?, finished_at = ?, error_message = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(status.code())
    .bind(now.timestamp())
    .bind(error_message)
    .bind(id)
    .bind(TaskStatus::InProgress.code())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Administrative cancel. Only a task that has not been claimed can be cancelled.
pub async fn cancel_task(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE inference_tasks SET status = ? WHERE id = ? AND status = ?")
        .bind(TaskStatus::Cancelled.code())
        .bind(id)
        .bind(TaskStatus::Scheduled.code())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Store every row produced by one run, attributed to `task_id`.
pub async fn persist_run(pool: &SqlitePool, task_id: i64, output: &RunOutput) -> Result<()> {
    let mut tx = pool.begin().await?;
    let mut result_ids: HashMap<&str, String> = HashMap::new();

    for harvest in &output.harvests {
        let result = output
            .results
            .get(&harvest.name)
            .with_context(|| format!("no aggregated result for community '{}'", harvest.name))?;

        sqlx::query(
            r#"
            INSERT INTO communities (key, display_name)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET display_name = excluded.display_name
            "#,
        )
        .bind(&harvest.key)
        .bind(&harvest.name)
        .execute(&mut *tx)
        .await?;

        let result_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO community_results
                (id, task_id, community_key, min_result, max_result, mean_result, std_result,
                 sample_count, scored_count, collected_at, edges_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result_id)
        .bind(task_id)
        .bind(&harvest.key)
        .bind(result.stats.min)
        .bind(result.stats.max)
        .bind(result.stats.mean)
        .bind(result.stats.std)
        .bind(result.sample_count as i64)
        .bind(result.scored_count as i64)
        .bind(result.collected_at.timestamp())
        .bind(serde_json::to_string(&result.edges)?)
        .execute(&mut *tx)
        .await?;

        for username in &harvest.moderators {
            sqlx::query(
                "INSERT INTO community_moderators (result_id, community_key, username) VALUES (?, ?, ?)",
            )
            .bind(&result_id)
            .bind(&harvest.key)
            .bind(username)
            .execute(&mut *tx)
            .await?;
        }

        for sample in &harvest.samples {
            sqlx::query(
                r#"
                INSERT INTO comment_results (result_id, community_key, permalink, body, username, edited, score)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&result_id)
            .bind(&harvest.key)
            .bind(&sample.permalink)
            .bind(&sample.body)
            .bind(&sample.author)
            .bind(sample.edited)
            .bind(sample.score)
            .execute(&mut *tx)
            .await?;
        }

        result_ids.insert(harvest.name.as_str(), result_id);
    }

    for graph in [&output.mod_edges, &output.author_edges] {
        let table = graph.kind.edge_table();
        for (from, to, weight) in graph.iter() {
            let from_id = result_ids
                .get(from)
                .with_context(|| format!("edge references unknown community '{}'", from))?;
            let to_id = result_ids
                .get(to)
                .with_context(|| format!("edge references unknown community '{}'", to))?;

            sqlx::query(&format!(
                "INSERT INTO {} (task_id, from_result, to_result, weight) VALUES (?, ?, ?, ?)",
                table
            ))
            .bind(task_id)
            .bind(from_id)
            .bind(to_id)
            .bind(weight as i64)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

fn row_to_task(row: &SqliteRow) -> Result<TaskDefinition> {
    let id: i64 = row.get("id");
    let scheduled_ts: i64 = row.get("scheduled_at");
    let time_scale: String = row.get("time_scale");
    let communities_json: String = row.get("communities_json");

    let scheduled_at = DateTime::from_timestamp(scheduled_ts, 0)
        .with_context(|| format!("task {} has an invalid scheduled_at: {}", id, scheduled_ts))?;
    let communities: Vec<String> = serde_json::from_str(&communities_json)
        .with_context(|| format!("task {} has a malformed community list", id))?;

    Ok(TaskDefinition {
        id,
        params: TaskParams {
            scheduled_at,
            time_scale: time_scale.parse()?,
            min_words: row.get::<i64, _>("min_words") as u32,
            per_post_n: row.get::<i64, _>("per_post_n") as u32,
            comments_n: row.get::<i64, _>("comments_n") as u32,
            communities,
        },
        status: TaskStatus::from_code(row.get("status"))?,
    })
}
