//! Core data models used throughout toxit.
//!
//! These types represent the scheduled tasks, harvested text samples, and
//! per-community results that flow through one task run.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a [`TaskDefinition`].
///
/// `Scheduled → InProgress → {Completed | Error}`. `Cancelled` is only ever
/// set by the administrative path and is never produced by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskStatus {
    Scheduled,
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    /// Integer code stored in the `inference_tasks.status` column.
    pub fn code(self) -> i64 {
        match self {
            TaskStatus::Scheduled => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed => 2,
            TaskStatus::Error => 3,
            TaskStatus::Cancelled => 4,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        Ok(match code {
            0 => TaskStatus::Scheduled,
            1 => TaskStatus::InProgress,
            2 => TaskStatus::Completed,
            3 => TaskStatus::Error,
            4 => TaskStatus::Cancelled,
            other => bail!("unknown task status code: {}", other),
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::InProgress => "in progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Period over which content is harvested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeScale {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeScale {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeScale::Hour => "hour",
            TimeScale::Day => "day",
            TimeScale::Week => "week",
            TimeScale::Month => "month",
            TimeScale::Year => "year",
            TimeScale::All => "all",
        }
    }

    /// Length of the harvesting window, `None` for [`TimeScale::All`].
    pub fn window(self) -> Option<Duration> {
        match self {
            TimeScale::Hour => Some(Duration::hours(1)),
            TimeScale::Day => Some(Duration::days(1)),
            TimeScale::Week => Some(Duration::weeks(1)),
            TimeScale::Month => Some(Duration::days(30)),
            TimeScale::Year => Some(Duration::days(365)),
            TimeScale::All => None,
        }
    }
}

impl FromStr for TimeScale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "hour" => TimeScale::Hour,
            "day" => TimeScale::Day,
            "week" => TimeScale::Week,
            "month" => TimeScale::Month,
            "year" => TimeScale::Year,
            "all" => TimeScale::All,
            other => bail!(
                "unknown time scale '{}': expected hour, day, week, month, year, or all",
                other
            ),
        })
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Harvesting parameters shared by a new task and a stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskParams {
    pub scheduled_at: DateTime<Utc>,
    pub time_scale: TimeScale,
    /// Samples must have strictly more words than this.
    pub min_words: u32,
    pub per_post_n: u32,
    pub comments_n: u32,
    /// Target communities, in processing order. Must be unique.
    pub communities: Vec<String>,
}

impl TaskParams {
    pub fn validate(&self) -> Result<()> {
        if self.communities.is_empty() {
            bail!("a task needs at least one community");
        }

        let mut seen = HashSet::new();
        for community in &self.communities {
            if community.trim().is_empty() {
                bail!("community names must not be blank");
            }
            if !seen.insert(community.as_str()) {
                bail!("community '{}' is listed more than once", community);
            }
        }

        if self.per_post_n == 0 {
            bail!("per-post comment limit must be >= 1");
        }
        if self.comments_n == 0 {
            bail!("total comment limit must be >= 1");
        }

        Ok(())
    }
}

/// One stored, scheduled run of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: i64,
    pub params: TaskParams,
    pub status: TaskStatus,
}

/// One unit of content to be scored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSample {
    pub body: String,
    pub author: String,
    pub permalink: String,
    pub edited: bool,
    /// Unset until scoring completes; stays `None` if the batch failed.
    pub score: Option<f64>,
}

impl TextSample {
    pub fn new(body: &str, author: &str, permalink: &str, edited: bool) -> Self {
        Self {
            body: body.to_string(),
            author: author.to_string(),
            permalink: permalink.to_string(),
            edited,
            score: None,
        }
    }
}

/// Everything collected for one community during a task run.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityHarvest {
    pub name: String,
    /// Durable external identifier used as the primary key downstream.
    pub key: String,
    pub moderators: BTreeSet<String>,
    pub samples: Vec<TextSample>,
}

impl CommunityHarvest {
    /// Distinct authors of the harvested samples.
    pub fn authors(&self) -> BTreeSet<String> {
        self.samples.iter().map(|s| s.author.clone()).collect()
    }
}

/// The two participant universes tracked per community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MembershipKind {
    Moderators,
    Authors,
}

impl MembershipKind {
    /// Table holding persisted edges of this kind.
    pub fn edge_table(self) -> &'static str {
        match self {
            MembershipKind::Moderators => "moderator_edges",
            MembershipKind::Authors => "author_edges",
        }
    }
}

/// Summary statistics over a community's non-null scores.
///
/// A community with no scored samples gets all-zero statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
}

/// Outgoing edges of both kinds for one community, keyed by the other community.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CommunityEdges {
    pub mods: BTreeMap<String, u32>,
    pub authors: BTreeMap<String, u32>,
}

/// Aggregated output for one community in one task run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityResult {
    pub community: String,
    pub stats: ScoreStats,
    pub sample_count: usize,
    pub scored_count: usize,
    pub collected_at: DateTime<Utc>,
    pub edges: CommunityEdges,
}
