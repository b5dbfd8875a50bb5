use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index if missing. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Communities, keyed by the collector's durable identifier
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS communities (
            key TEXT PRIMARY KEY,
            display_name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Task queue. status: 0 scheduled, 1 in progress, 2 completed, 3 error, 4 cancelled
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS inference_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scheduled_at INTEGER NOT NULL,
            time_scale TEXT NOT NULL,
            min_words INTEGER NOT NULL,
            per_post_n INTEGER NOT NULL,
            comments_n INTEGER NOT NULL,
            communities_json TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS community_results (
            id TEXT PRIMARY KEY,
            task_id INTEGER NOT NULL,
            community_key TEXT NOT NULL,
            min_result REAL NOT NULL,
            max_result REAL NOT NULL,
            mean_result REAL NOT NULL,
            std_result REAL NOT NULL,
            sample_count INTEGER NOT NULL,
            scored_count INTEGER NOT NULL,
            collected_at INTEGER NOT NULL,
            edges_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(task_id, community_key),
            FOREIGN KEY (task_id) REFERENCES inference_tasks(id),
            FOREIGN KEY (community_key) REFERENCES communities(key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS community_moderators (
            result_id TEXT NOT NULL,
            community_key TEXT NOT NULL,
            username TEXT NOT NULL,
            FOREIGN KEY (result_id) REFERENCES community_results(id),
            FOREIGN KEY (community_key) REFERENCES communities(key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comment_results (
            result_id TEXT NOT NULL,
            community_key TEXT NOT NULL,
            permalink TEXT NOT NULL,
            body TEXT NOT NULL,
            username TEXT NOT NULL,
            edited INTEGER NOT NULL DEFAULT 0,
            score REAL,
            FOREIGN KEY (result_id) REFERENCES community_results(id),
            FOREIGN KEY (community_key) REFERENCES communities(key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for table in ["moderator_edges", "author_edges"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                task_id INTEGER NOT NULL,
                from_result TEXT NOT NULL,
                to_result TEXT NOT NULL,
                weight INTEGER NOT NULL CHECK (weight > 0),
                FOREIGN KEY (task_id) REFERENCES inference_tasks(id),
                FOREIGN KEY (from_result) REFERENCES community_results(id),
                FOREIGN KEY (to_result) REFERENCES community_results(id)
            )
            "#
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_task_id ON {table}(task_id)"
        ))
        .execute(pool)
        .await?;
    }

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_inference_tasks_due ON inference_tasks(status, scheduled_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_community_results_task_id ON community_results(task_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_comment_results_result_id ON comment_results(result_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
