//! Per-community result aggregation.
//!
//! Folds scored samples and both overlap graphs into one [`CommunityResult`]
//! per community. Pure: no I/O, the collection timestamp is passed in.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::graph::EdgeGraph;
use crate::models::{CommunityEdges, CommunityHarvest, CommunityResult, ScoreStats};

/// Min, max, mean, and population standard deviation of `scores`.
///
/// An empty input yields all-zero statistics.
pub fn summarize(scores: &[f64]) -> ScoreStats {
    if scores.is_empty() {
        return ScoreStats::default();
    }

    let n = scores.len() as f64;
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

    ScoreStats {
        min,
        max,
        mean,
        std: variance.sqrt(),
    }
}

/// Build one result per harvested community.
///
/// Every community in `harvests` appears in the output, including those
/// with no samples or no successfully scored samples.
pub fn aggregate(
    harvests: &[CommunityHarvest],
    mod_edges: &EdgeGraph,
    author_edges: &EdgeGraph,
    collected_at: DateTime<Utc>,
) -> BTreeMap<String, CommunityResult> {
    harvests
        .iter()
        .map(|harvest| {
            let scores: Vec<f64> = harvest.samples.iter().filter_map(|s| s.score).collect();

            let result = CommunityResult {
                community: harvest.name.clone(),
                stats: summarize(&scores),
                sample_count: harvest.samples.len(),
                scored_count: scores.len(),
                collected_at,
                edges: CommunityEdges {
                    mods: mod_edges.outgoing(&harvest.name),
                    authors: author_edges.outgoing(&harvest.name),
                },
            };
            (harvest.name.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_edges;
    use crate::models::{MembershipKind, TextSample};
    use std::collections::BTreeSet;

    fn sample(author: &str, score: Option<f64>) -> TextSample {
        TextSample {
            score,
            ..TextSample::new("some words here", author, "/p", false)
        }
    }

    fn harvest(name: &str, moderators: &[&str], samples: Vec<TextSample>) -> CommunityHarvest {
        CommunityHarvest {
            name: name.to_string(),
            key: format!("t5_{}", name),
            moderators: moderators.iter().map(|m| m.to_string()).collect(),
            samples,
        }
    }

    fn graphs(harvests: &[CommunityHarvest]) -> (EdgeGraph, EdgeGraph) {
        let mods: Vec<(String, BTreeSet<String>)> = harvests
            .iter()
            .map(|h| (h.name.clone(), h.moderators.clone()))
            .collect();
        let authors: Vec<(String, BTreeSet<String>)> = harvests
            .iter()
            .map(|h| (h.name.clone(), h.authors()))
            .collect();
        (
            build_edges(MembershipKind::Moderators, &mods),
            build_edges(MembershipKind::Authors, &authors),
        )
    }

    #[test]
    fn summarize_population_statistics() {
        let stats = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert!((stats.std - 2.0).abs() < 1e-12);
    }

    #[test]
    fn summarize_single_value_has_zero_spread() {
        let stats = summarize(&[-0.48]);
        assert_eq!(stats.min, -0.48);
        assert_eq!(stats.max, -0.48);
        assert_eq!(stats.mean, -0.48);
        assert_eq!(stats.std, 0.0);
    }

    #[test]
    fn empty_community_gets_all_zero_statistics() {
        let harvests = vec![
            harvest("busy", &["m1"], vec![sample("alice", Some(0.5))]),
            harvest("quiet", &["m1"], vec![]),
        ];
        let (mods, authors) = graphs(&harvests);
        let results = aggregate(&harvests, &mods, &authors, Utc::now());

        assert_eq!(results.len(), 2);
        let quiet = &results["quiet"];
        assert_eq!(quiet.stats, ScoreStats::default());
        assert_eq!(quiet.stats.min, 0.0);
        assert_eq!(quiet.stats.max, 0.0);
        assert_eq!(quiet.stats.mean, 0.0);
        assert_eq!(quiet.stats.std, 0.0);
        assert_eq!(quiet.sample_count, 0);
    }

    #[test]
    fn unscored_samples_are_ignored() {
        let harvests = vec![harvest(
            "mixed",
            &[],
            vec![
                sample("a", Some(0.2)),
                sample("b", None),
                sample("c", Some(0.4)),
            ],
        )];
        let (mods, authors) = graphs(&harvests);
        let result = &aggregate(&harvests, &mods, &authors, Utc::now())["mixed"];

        assert_eq!(result.sample_count, 3);
        assert_eq!(result.scored_count, 2);
        assert_eq!(result.stats.min, 0.2);
        assert_eq!(result.stats.max, 0.4);
        assert!((result.stats.mean - 0.3).abs() < 1e-12);
    }

    #[test]
    fn all_failed_scores_fall_back_to_zero() {
        let harvests = vec![harvest("down", &[], vec![sample("a", None), sample("b", None)])];
        let (mods, authors) = graphs(&harvests);
        let result = &aggregate(&harvests, &mods, &authors, Utc::now())["down"];
        assert_eq!(result.stats, ScoreStats::default());
        assert_eq!(result.scored_count, 0);
    }

    #[test]
    fn both_edge_kinds_are_merged_per_community() {
        let harvests = vec![
            harvest("A", &["m1", "m2"], vec![sample("alice", Some(0.1))]),
            harvest("B", &["m2"], vec![sample("alice", Some(0.2)), sample("bob", Some(0.3))]),
            harvest("C", &[], vec![sample("bob", Some(0.3))]),
        ];
        let (mods, authors) = graphs(&harvests);
        let results = aggregate(&harvests, &mods, &authors, Utc::now());

        let a = &results["A"].edges;
        assert_eq!(a.mods.get("B"), Some(&1));
        assert_eq!(a.authors.get("B"), Some(&1));
        assert!(a.authors.get("C").is_none());

        let b = &results["B"].edges;
        assert!(b.mods.is_empty());
        assert_eq!(b.authors.get("C"), Some(&1));

        assert!(results["C"].edges.mods.is_empty());
        assert!(results["C"].edges.authors.is_empty());
    }
}
