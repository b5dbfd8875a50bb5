//! Content collection.
//!
//! The [`Collector`] trait is the seam between the pipeline and whatever
//! fetches posts, comments, and moderator lists from the social platform.
//! Collector failures are hard failures for the whole task run: membership
//! and content for a community cannot be made up.
//!
//! [`FileCollector`] serves snapshots from disk, one JSON file per community:
//!
//! ```text
//! <root>/<community>.json
//! {
//!   "key": "t5_2fwo",
//!   "moderators": ["alice", "bob"],
//!   "posts": [
//!     { "created_utc": 1700000000,
//!       "comments": [ { "body": "...", "author": "carol", "permalink": "/r/...", "edited": false } ] }
//!   ]
//! }
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::models::{CommunityHarvest, TaskParams, TextSample, TimeScale};

/// Harvesting limits for one community, taken from the task definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestLimits {
    pub time_scale: TimeScale,
    /// Comments need strictly more words than this.
    pub min_words: u32,
    pub per_post_n: u32,
    pub comments_n: u32,
}

impl From<&TaskParams> for HarvestLimits {
    fn from(params: &TaskParams) -> Self {
        Self {
            time_scale: params.time_scale,
            min_words: params.min_words,
            per_post_n: params.per_post_n,
            comments_n: params.comments_n,
        }
    }
}

/// Source of community content and membership.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Qualifying text samples for `community`, in collection order.
    async fn fetch_comments(&self, community: &str, limits: &HarvestLimits) -> Result<Vec<TextSample>>;

    /// Moderator usernames of `community`.
    async fn fetch_moderators(&self, community: &str) -> Result<BTreeSet<String>>;

    /// Stable external identifier of `community`.
    async fn fetch_community_key(&self, community: &str) -> Result<String>;

    /// Everything the pipeline needs from one community.
    ///
    /// The default asks for key, moderators, and comments in turn.
    /// Collectors that can read all three from one source override it.
    async fn collect(&self, community: &str, limits: &HarvestLimits) -> Result<CommunityHarvest> {
        let key = self.fetch_community_key(community).await?;
        let moderators = self.fetch_moderators(community).await?;
        let samples = self.fetch_comments(community, limits).await?;

        Ok(CommunityHarvest {
            name: community.to_string(),
            key,
            moderators,
            samples,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    key: String,
    #[serde(default)]
    moderators: Vec<String>,
    #[serde(default)]
    posts: Vec<SnapshotPost>,
}

#[derive(Debug, Deserialize)]
struct SnapshotPost {
    #[serde(default)]
    created_utc: Option<i64>,
    #[serde(default)]
    comments: Vec<SnapshotComment>,
}

#[derive(Debug, Deserialize)]
struct SnapshotComment {
    body: String,
    /// `None` for deleted accounts.
    #[serde(default)]
    author: Option<String>,
    permalink: String,
    #[serde(default)]
    edited: bool,
}

/// [`Collector`] reading per-community JSON snapshots from a directory.
pub struct FileCollector {
    root: PathBuf,
}

impl FileCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn snapshot_path(&self, community: &str) -> Result<PathBuf> {
        if community.is_empty()
            || community.contains('/')
            || community.contains('\\')
            || community.contains("..")
        {
            bail!("invalid community name: '{}'", community);
        }
        Ok(self.root.join(format!("{}.json", community)))
    }

    fn load(&self, community: &str) -> Result<Snapshot> {
        let path = self.snapshot_path(community)?;
        read_snapshot(&path).with_context(|| format!("Failed to collect community '{}'", community))
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse snapshot: {}", path.display()))
}

#[async_trait]
impl Collector for FileCollector {
    async fn fetch_comments(&self, community: &str, limits: &HarvestLimits) -> Result<Vec<TextSample>> {
        let snapshot = self.load(community)?;
        let samples = harvest(&snapshot.posts, limits, Utc::now());
        tracing::debug!(community, collected = samples.len(), "snapshot harvested");
        Ok(samples)
    }

    async fn fetch_moderators(&self, community: &str) -> Result<BTreeSet<String>> {
        Ok(self.load(community)?.moderators.into_iter().collect())
    }

    async fn fetch_community_key(&self, community: &str) -> Result<String> {
        snapshot_key(community, self.load(community)?.key)
    }

    /// One read of the snapshot serves key, moderators, and comments alike.
    async fn collect(&self, community: &str, limits: &HarvestLimits) -> Result<CommunityHarvest> {
        let snapshot = self.load(community)?;
        let samples = harvest(&snapshot.posts, limits, Utc::now());
        tracing::debug!(community, collected = samples.len(), "snapshot harvested");

        Ok(CommunityHarvest {
            name: community.to_string(),
            key: snapshot_key(community, snapshot.key)?,
            moderators: snapshot.moderators.into_iter().collect(),
            samples,
        })
    }
}

fn snapshot_key(community: &str, key: String) -> Result<String> {
    if key.trim().is_empty() {
        bail!("snapshot for '{}' has an empty key", community);
    }
    Ok(key)
}

/// Apply the harvesting limits to a community's posts.
fn harvest(posts: &[SnapshotPost], limits: &HarvestLimits, now: DateTime<Utc>) -> Vec<TextSample> {
    let cutoff = limits.time_scale.window().map(|w| (now - w).timestamp());
    let total = limits.comments_n as usize;
    let mut samples = Vec::new();

    for post in posts {
        if let (Some(cutoff), Some(created)) = (cutoff, post.created_utc) {
            if created < cutoff {
                continue;
            }
        }

        let mut kept_in_post = 0u32;
        for comment in &post.comments {
            if kept_in_post >= limits.per_post_n {
                break;
            }
            let Some(author) = comment.author.as_deref() else {
                continue;
            };
            if word_count(&comment.body) <= limits.min_words as usize {
                continue;
            }

            samples.push(TextSample::new(
                &sanitize(&comment.body),
                author,
                &comment.permalink,
                comment.edited,
            ));
            kept_in_post += 1;

            if samples.len() == total {
                return samples;
            }
        }
    }

    samples
}

/// Strip slashes and collapse runs of whitespace.
pub fn sanitize(text: &str) -> String {
    text.replace(['\\', '/'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
