//! Top-K neighbor vote aggregation.
//!
//! Each neighbor votes for its identity with similarity `1 - d` and weight
//! `1 / (d + eps)`, where `d` is the neighbor's distance clamped to [0, 1].
//! An identity's score is its weighted mean similarity, so near neighbors
//! dominate and the score stays on the similarity scale. The winner's
//! distance is `1 - score`.

use std::collections::HashMap;

use tracing::debug;

use crate::config::MatcherConfig;
use crate::types::{MatchResult, NeighborMatch};

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    weighted_similarity: f64,
    total_weight: f64,
    votes: usize,
}

impl Tally {
    fn score(&self) -> f64 {
        if self.total_weight > 0.0 {
            self.weighted_similarity / self.total_weight
        } else {
            0.0
        }
    }
}

/// Turns a neighbor list into one match decision.
#[derive(Debug, Clone)]
pub struct VoteAggregator {
    config: MatcherConfig,
}

impl VoteAggregator {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Resolve the neighbors of one probe.
    ///
    /// Only the first `top_k` entries are considered. Entries with a
    /// non-finite distance are dropped; entries without an identity still
    /// count towards the hard-reject check but do not vote.
    pub fn resolve(&self, neighbors: &[NeighborMatch]) -> MatchResult {
        let cfg = &self.config;
        let candidates: Vec<&NeighborMatch> = neighbors
            .iter()
            .take(cfg.top_k)
            .filter(|n| n.distance.is_finite())
            .collect();

        let Some(nearest) = candidates
            .iter()
            .map(|n| n.distance)
            .min_by(|a, b| a.total_cmp(b))
        else {
            debug!("no usable neighbors");
            return MatchResult::unknown(f32::INFINITY);
        };

        if nearest > cfg.hard_reject_threshold {
            debug!(nearest, "nearest neighbor beyond hard reject threshold");
            return MatchResult::unknown(nearest);
        }

        let eps = f64::from(cfg.distance_epsilon);
        let mut tallies: HashMap<&str, Tally> = HashMap::new();
        for neighbor in &candidates {
            let Some(identity) = neighbor.identity.as_deref() else {
                continue;
            };
            let d = f64::from(neighbor.distance).clamp(0.0, 1.0);
            let weight = 1.0 / (d + eps);
            let tally = tallies.entry(identity).or_default();
            tally.weighted_similarity += (1.0 - d) * weight;
            tally.total_weight += weight;
            tally.votes += 1;
        }

        let mut ranked: Vec<(&str, Tally)> = tallies.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.score()
                .total_cmp(&a.1.score())
                .then_with(|| a.0.cmp(b.0))
        });

        let Some(&(winner, tally)) = ranked.first() else {
            debug!(nearest, "no neighbor carried an identity");
            return MatchResult::unknown(f32::INFINITY);
        };
        let score = tally.score();
        let distance = (1.0 - score) as f32;

        if tally.votes < cfg.min_votes {
            debug!(winner, votes = tally.votes, "not enough votes");
            return MatchResult::unknown(distance);
        }

        if let Some(&(runner_up, second)) = ranked.get(1) {
            let margin = score - second.score();
            if margin < f64::from(cfg.min_similarity_margin) {
                debug!(winner, runner_up, margin, "top identities too close");
                return MatchResult::uncertain(None, distance);
            }
        }

        let result = if distance < cfg.match_threshold {
            MatchResult::matched(winner, distance)
        } else if distance < cfg.uncertain_threshold {
            MatchResult::uncertain(Some(winner.to_string()), distance)
        } else {
            MatchResult::unknown(distance)
        };
        debug!(
            winner,
            distance,
            votes = tally.votes,
            decision = %result.decision(),
            "neighbors resolved"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Decision;

    fn aggregator() -> VoteAggregator {
        VoteAggregator::new(MatcherConfig::default())
    }

    fn n(identity: &str, distance: f32) -> NeighborMatch {
        NeighborMatch::new(identity, distance)
    }

    #[test]
    fn test_empty_neighbors_unknown_infinite() {
        let result = aggregator().resolve(&[]);
        assert_eq!(result.decision(), Decision::Unknown);
        assert!(result.identity().is_none());
        assert!(result.distance().is_infinite());
    }

    #[test]
    fn test_only_malformed_neighbors_unknown_infinite() {
        let result = aggregator().resolve(&[n("a", f32::NAN), n("b", f32::INFINITY)]);
        assert_eq!(result.decision(), Decision::Unknown);
        assert!(result.distance().is_infinite());
    }

    #[test]
    fn test_clear_match() {
        let result = aggregator().resolve(&[n("a", 0.20), n("a", 0.21), n("b", 0.40)]);
        assert_eq!(result.decision(), Decision::Match);
        assert_eq!(result.identity(), Some("a"));
        assert!((result.distance() - 0.205).abs() < 0.001);
    }

    #[test]
    fn test_single_close_neighbor_matches() {
        let result = aggregator().resolve(&[n("alice", 0.1)]);
        assert_eq!(result.decision(), Decision::Match);
        assert_eq!(result.identity(), Some("alice"));
        assert!((result.distance() - 0.1).abs() < 1e-4);
    }

    #[test]
    fn test_hard_reject_uses_nearest_distance() {
        let result = aggregator().resolve(&[n("a", 0.70), n("b", 0.80)]);
        assert_eq!(result.decision(), Decision::Unknown);
        assert!(result.identity().is_none());
        assert!((result.distance() - 0.70).abs() < 1e-6);
    }

    #[test]
    fn test_close_competitors_are_uncertain_without_identity() {
        let result = aggregator().resolve(&[n("userA", 0.30), n("userB", 0.31)]);
        assert_eq!(result.decision(), Decision::Uncertain);
        assert!(result.identity().is_none());
        assert!((result.distance() - 0.30).abs() < 1e-4);
    }

    #[test]
    fn test_count_normalization_lets_single_close_vote_compete() {
        // Two A votes at 0.20/0.25 average out below one B vote at 0.22,
        // leaving the pair inside the margin.
        let result = aggregator().resolve(&[n("userA", 0.20), n("userA", 0.25), n("userB", 0.22)]);
        assert_eq!(result.decision(), Decision::Uncertain);
        assert!(result.identity().is_none());
        assert!((result.distance() - 0.22).abs() < 1e-3);
    }

    #[test]
    fn test_uncertain_band_keeps_identity() {
        let result = aggregator().resolve(&[n("a", 0.40), n("a", 0.41)]);
        assert_eq!(result.decision(), Decision::Uncertain);
        assert_eq!(result.identity(), Some("a"));
    }

    #[test]
    fn test_beyond_uncertain_threshold_is_unknown() {
        let result = aggregator().resolve(&[n("a", 0.50)]);
        assert_eq!(result.decision(), Decision::Unknown);
        assert!(result.identity().is_none());
        assert!((result.distance() - 0.50).abs() < 1e-4);
    }

    #[test]
    fn test_min_votes_enforced() {
        let cfg = MatcherConfig {
            min_votes: 2,
            ..MatcherConfig::default()
        };
        let result = VoteAggregator::new(cfg.clone()).resolve(&[n("a", 0.1), n("b", 0.6)]);
        assert_eq!(result.decision(), Decision::Unknown);
        assert!(result.identity().is_none());

        let result = VoteAggregator::new(cfg).resolve(&[n("a", 0.1), n("a", 0.12), n("b", 0.6)]);
        assert_eq!(result.decision(), Decision::Match);
        assert_eq!(result.identity(), Some("a"));
    }

    #[test]
    fn test_tie_breaks_on_identity_order() {
        let cfg = MatcherConfig {
            min_similarity_margin: 0.0,
            ..MatcherConfig::default()
        };
        let agg = VoteAggregator::new(cfg);
        let forward = agg.resolve(&[n("zed", 0.2), n("amy", 0.2)]);
        let reverse = agg.resolve(&[n("amy", 0.2), n("zed", 0.2)]);
        assert_eq!(forward.identity(), Some("amy"));
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_only_top_k_considered() {
        let cfg = MatcherConfig {
            top_k: 2,
            ..MatcherConfig::default()
        };
        let result = VoteAggregator::new(cfg).resolve(&[
            n("a", 0.70),
            n("a", 0.72),
            n("b", 0.05),
        ]);
        assert_eq!(result.decision(), Decision::Unknown);
        assert!((result.distance() - 0.70).abs() < 1e-6);
    }

    #[test]
    fn test_anonymous_neighbor_counts_for_hard_reject_only() {
        let anonymous = NeighborMatch {
            identity: None,
            distance: 0.1,
            metadata: None,
        };
        let result = aggregator().resolve(&[anonymous.clone(), n("a", 0.2)]);
        assert_eq!(result.decision(), Decision::Match);
        assert_eq!(result.identity(), Some("a"));

        let result = aggregator().resolve(&[anonymous.clone(), anonymous]);
        assert_eq!(result.decision(), Decision::Unknown);
        assert!(result.identity().is_none());
        assert_eq!(result.distance(), f32::INFINITY);
        assert_eq!(crate::recognition::distance_to_confidence(result.distance()), 0.0);
    }

    #[test]
    fn test_negative_distance_clamped() {
        let result = aggregator().resolve(&[n("a", -0.01)]);
        assert_eq!(result.decision(), Decision::Match);
        assert!(result.distance() >= 0.0);
        assert!(result.distance() < 1e-4);
    }

    #[test]
    fn test_closer_neighbor_never_hurts() {
        // Moving one neighbor of the winner closer must not raise the
        // resolved distance.
        let base = aggregator().resolve(&[n("a", 0.30), n("a", 0.34)]);
        let closer = aggregator().resolve(&[n("a", 0.25), n("a", 0.34)]);
        assert!(closer.distance() <= base.distance());
    }
}
