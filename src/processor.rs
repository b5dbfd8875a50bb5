//! Task processor: the scheduler loop and one full pipeline run.
//!
//! # Lifecycle
//!
//! ```text
//! Scheduled ──claim──▶ InProgress ──ok──▶ Completed
//!     │                    └──────err───▶ Error
//!     └──(admin)──▶ Cancelled   (never claimed)
//! ```
//!
//! # Run pipeline
//!
//! ```text
//! collect (per community, task order)
//!   → score all samples (one batched pass)
//!   → overlap graphs (moderators, authors)
//!   → aggregate
//!   → persist (one transaction)
//! ```
//!
//! A task is claimed before any work starts. Whatever goes wrong inside a
//! run is caught once, in [`TaskProcessor::poll_once`], and recorded as the
//! `Error` status; the loop then moves on to the next task.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::aggregate::aggregate;
use crate::collector::{Collector, FileCollector, HarvestLimits};
use crate::config::Config;
use crate::graph::build_edges;
use crate::models::{CommunityHarvest, MembershipKind, TaskDefinition, TaskStatus};
use crate::scoring::{HttpScorer, Scorer};
use crate::store::{self, RunOutput};

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No task was due.
    Idle,
    /// A due task was claimed by someone else first.
    Lost { task_id: i64 },
    /// A task was claimed and run to a terminal status.
    Finished { task_id: i64, status: TaskStatus },
}

/// Owns one deployment's polling loop. Construct once and keep it for the
/// life of the process.
pub struct TaskProcessor {
    pool: SqlitePool,
    collector: Arc<dyn Collector>,
    scorer: Arc<dyn Scorer>,
    batch_size: usize,
    poll_interval: Duration,
}

impl TaskProcessor {
    pub fn new(
        pool: SqlitePool,
        collector: Arc<dyn Collector>,
        scorer: Arc<dyn Scorer>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            collector,
            scorer,
            batch_size,
            poll_interval,
        }
    }

    /// Processor with the snapshot collector and HTTP scorer from `config`.
    pub fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        let scorer = HttpScorer::new(&config.scoring)?;
        let collector = FileCollector::new(config.collector.root.clone());

        Ok(Self::new(
            pool,
            Arc::new(collector),
            Arc::new(scorer),
            config.scoring.batch_size,
            Duration::from_secs(config.scheduler.poll_interval_secs),
        ))
    }

    /// Run the pipeline for `task` without touching its status or persisting.
    pub async fn run_task(&self, task: &TaskDefinition) -> Result<RunOutput> {
        let limits = HarvestLimits::from(&task.params);
        let mut harvests = Vec::with_capacity(task.params.communities.len());

        for community in &task.params.communities {
            let harvest = self
                .collector
                .collect(community, &limits)
                .await
                .with_context(|| format!("collector failed for community '{}'", community))?;

            tracing::info!(
                task_id = task.id,
                community = %community,
                samples = harvest.samples.len(),
                moderators = harvest.moderators.len(),
                "community collected"
            );
            harvests.push(harvest);
        }

        self.score(&mut harvests).await?;

        let mods: Vec<(String, BTreeSet<String>)> = harvests
            .iter()
            .map(|h| (h.name.clone(), h.moderators.clone()))
            .collect();
        let authors: Vec<(String, BTreeSet<String>)> = harvests
            .iter()
            .map(|h| (h.name.clone(), h.authors()))
            .collect();

        let mod_edges = build_edges(MembershipKind::Moderators, &mods);
        let author_edges = build_edges(MembershipKind::Authors, &authors);
        tracing::info!(
            task_id = task.id,
            pairs = mod_edges.pairs_evaluated,
            mod_edges = mod_edges.edge_count(),
            author_edges = author_edges.edge_count(),
            "overlap graphs built"
        );

        let results = aggregate(&harvests, &mod_edges, &author_edges, Utc::now());

        Ok(RunOutput {
            harvests,
            results,
            mod_edges,
            author_edges,
        })
    }

    /// Score every sample of the run in one batched pass and write the
    /// scores back in place.
    async fn score(&self, harvests: &mut [CommunityHarvest]) -> Result<()> {
        let texts: Vec<String> = harvests
            .iter()
            .flat_map(|h| h.samples.iter().map(|s| s.body.clone()))
            .collect();

        let scores = self.scorer.score(&texts, self.batch_size).await?;
        if scores.len() != texts.len() {
            bail!(
                "scorer returned {} scores for {} samples",
                scores.len(),
                texts.len()
            );
        }

        let unscored = scores.iter().filter(|s| s.is_none()).count();
        if unscored > 0 {
            tracing::warn!(unscored, total = texts.len(), "some samples could not be scored");
        }

        let mut scores = scores.into_iter();
        for sample in harvests.iter_mut().flat_map(|h| h.samples.iter_mut()) {
            sample.score = scores.next().flatten();
        }

        Ok(())
    }

    /// Look for one due task; if found, claim it, run it, and record the outcome.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let now = Utc::now();

        let Some(task) = store::next_due_task(&self.pool, now).await? else {
            return Ok(PollOutcome::Idle);
        };

        if !store::claim_task(&self.pool, task.id, now).await? {
            tracing::info!(task_id = task.id, "task claimed elsewhere, skipping");
            return Ok(PollOutcome::Lost { task_id: task.id });
        }

        tracing::info!(
            task_id = task.id,
            communities = task.params.communities.len(),
            scope = %task.params.time_scale,
            "task started"
        );

        let outcome = match self.run_task(&task).await {
            Ok(output) => store::persist_run(&self.pool, task.id, &output)
                .await
                .context("failed to persist run results"),
            Err(e) => Err(e),
        };

        let (status, message) = match outcome {
            Ok(()) => {
                tracing::info!(task_id = task.id, "task completed");
                (TaskStatus::Completed, None)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!(task_id = task.id, error = %message, "task failed");
                (TaskStatus::Error, Some(message))
            }
        };

        if !store::finish_task(&self.pool, task.id, status, message.as_deref(), Utc::now()).await? {
            tracing::warn!(task_id = task.id, %status, "task was no longer in progress");
        }

        Ok(PollOutcome::Finished {
            task_id: task.id,
            status,
        })
    }

    /// Poll until `shutdown` flips to `true`.
    ///
    /// Shutdown is honored only while idle or between tasks; a run in
    /// progress always finishes.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "task processor started"
        );
        let mut signals_closed = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.poll_once().await {
                Ok(PollOutcome::Idle) => {
                    tracing::debug!("no due task, idling");
                    true
                }
                Ok(PollOutcome::Lost { .. }) => false,
                Ok(PollOutcome::Finished { .. }) => false,
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "poll failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed(), if !signals_closed => {
                        if changed.is_err() {
                            signals_closed = true;
                        }
                    }
                }
            }
        }

        tracing::info!("task processor stopped");
        Ok(())
    }
}
