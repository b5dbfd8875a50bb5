//! Per-task result summary.
//!
//! Prints what a run stored: per-community statistics, sample counts, and
//! the overlap edges of both kinds. Used by `toxit stats <task-id>`.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::MembershipKind;
use crate::store;

/// One stored community result, as read back for display.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub community: String,
    pub key: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub sample_count: i64,
    pub scored_count: i64,
    pub moderator_count: i64,
}

/// One stored edge with community names resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEdge {
    pub from: String,
    pub to: String,
    pub weight: i64,
}

pub async fn task_results(pool: &SqlitePool, task_id: i64) -> Result<Vec<StoredResult>> {
    let rows = sqlx::query(
        r#"
        SELECT c.display_name, r.community_key, r.min_result, r.max_result, r.mean_result,
               r.std_result, r.sample_count, r.scored_count,
               (SELECT COUNT(*) FROM community_moderators m WHERE m.result_id = r.id) AS moderator_count
        FROM community_results r
        JOIN communities c ON c.key = r.community_key
        WHERE r.task_id = ?
        ORDER BY c.display_name ASC
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| StoredResult {
            community: row.get("display_name"),
            key: row.get("community_key"),
            min: row.get("min_result"),
            max: row.get("max_result"),
            mean: row.get("mean_result"),
            std: row.get("std_result"),
            sample_count: row.get("sample_count"),
            scored_count: row.get("scored_count"),
            moderator_count: row.get("moderator_count"),
        })
        .collect())
}

/// Stored edges of one membership kind for a task.
pub async fn task_edges(
    pool: &SqlitePool,
    kind: MembershipKind,
    task_id: i64,
) -> Result<Vec<StoredEdge>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT cf.display_name AS from_name, ct.display_name AS to_name, e.weight
        FROM {} e
        JOIN community_results rf ON rf.id = e.from_result
        JOIN communities cf ON cf.key = rf.community_key
        JOIN community_results rt ON rt.id = e.to_result
        JOIN communities ct ON ct.key = rt.community_key
        WHERE e.task_id = ?
        ORDER BY e.weight DESC, from_name ASC, to_name ASC
        "#,
        kind.edge_table()
    ))
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| StoredEdge {
            from: row.get("from_name"),
            to: row.get("to_name"),
            weight: row.get("weight"),
        })
        .collect())
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, task_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;

    let Some(task) = store::get_task(&pool, task_id).await? else {
        pool.close().await;
        bail!("task not found: {}", task_id);
    };

    let results = task_results(&pool, task_id).await?;
    let mod_edges = task_edges(&pool, MembershipKind::Moderators, task_id).await?;
    let author_edges = task_edges(&pool, MembershipKind::Authors, task_id).await?;
    pool.close().await;

    println!("Task {}: {}", task.id, task.status.label());
    println!("================================");
    println!();

    if results.is_empty() {
        println!("  no stored results");
        println!();
        return Ok(());
    }

    println!(
        "  {:<24} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6}",
        "COMMUNITY", "SAMPLES", "MIN", "MAX", "MEAN", "STD", "MODS"
    );
    println!("  {}", "-".repeat(76));
    for r in &results {
        println!(
            "  {:<24} {:>8} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>6}",
            r.community,
            format!("{}/{}", r.scored_count, r.sample_count),
            r.min,
            r.max,
            r.mean,
            r.std,
            r.moderator_count
        );
    }

    for (title, edges) in [("Moderator overlap", &mod_edges), ("Author overlap", &author_edges)] {
        println!();
        println!("  {} ({} edges):", title, edges.len());
        for e in edges {
            println!("    {} - {}  {}", e.from, e.to, e.weight);
        }
    }

    println!();
    Ok(())
}
