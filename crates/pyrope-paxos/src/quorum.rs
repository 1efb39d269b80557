//! Quorum assessment.
//!
//! The core never assumes what a quorum is; it hands the votes it has
//! gathered for a slot to a [`QuorumAssessor`] and acts on the
//! [`Outcome`]. [`SimpleMajority`] is the stock implementation; weighted
//! or flexible-quorum schemes plug in at the same seam.

use pyrope_types::Slot;

use crate::message::Vote;

// ============================================================================
// Outcome
// ============================================================================

/// The verdict on a set of votes for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A quorum of yes votes.
    Win,

    /// Enough no votes that a winning quorum is already impossible.
    Lose,

    /// Insufficient evidence either way.
    Wait,
}

// ============================================================================
// QuorumAssessor
// ============================================================================

/// Pure vote-set assessment: votes in, verdict out.
///
/// Assessors see every response gathered so far for the slot, including
/// the node's own self-vote. They must be deterministic and must never
/// flip a `Win` or `Lose` verdict when shown a superset of the same
/// votes.
pub trait QuorumAssessor {
    /// Assesses the promises gathered during a prepare round.
    fn assess_promises(&self, slot: Slot, votes: &[Vote]) -> Outcome;

    /// Assesses the votes gathered during an accept round.
    fn assess_accepts(&self, slot: Slot, votes: &[Vote]) -> Outcome;
}

// ============================================================================
// SimpleMajority
// ============================================================================

/// Majority quorums over a fixed-size cluster.
///
/// With cluster size `n`, a slot wins on `n / 2 + 1` yes votes and loses
/// once `n / 2 + 1` no votes have been cast — at that point no superset
/// of the remaining voters can reach a winning quorum. An odd cluster
/// size gives the usual `f = (n - 1) / 2` failure tolerance.
#[derive(Debug, Clone, Copy)]
pub struct SimpleMajority {
    cluster_size: usize,
}

impl SimpleMajority {
    /// Creates an assessor for a cluster of `cluster_size` nodes.
    ///
    /// # Panics
    ///
    /// Panics on an empty cluster.
    pub fn new(cluster_size: usize) -> Self {
        assert!(cluster_size > 0, "cluster must have at least one node");
        Self { cluster_size }
    }

    /// Returns the number of votes a quorum requires.
    pub fn quorum_size(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    fn assess(&self, votes: &[Vote]) -> Outcome {
        let yes = votes.iter().filter(|v| v.yes).count();
        let no = votes.len() - yes;

        if yes >= self.quorum_size() {
            Outcome::Win
        } else if no >= self.quorum_size() {
            Outcome::Lose
        } else {
            Outcome::Wait
        }
    }
}

impl QuorumAssessor for SimpleMajority {
    fn assess_promises(&self, _slot: Slot, votes: &[Vote]) -> Outcome {
        self.assess(votes)
    }

    fn assess_accepts(&self, _slot: Slot, votes: &[Vote]) -> Outcome {
        self.assess(votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pyrope_types::{BallotNumber, NodeId};

    fn vote(voter: u8, yes: bool) -> Vote {
        Vote {
            voter: NodeId::new(voter),
            voted_for: NodeId::new(1),
            slot: Slot::new(1),
            yes,
            ballot: BallotNumber::new(1, NodeId::new(1)),
        }
    }

    #[test]
    fn single_node_cluster_wins_on_own_vote() {
        let majority = SimpleMajority::new(1);
        assert_eq!(majority.quorum_size(), 1);
        assert_eq!(
            majority.assess_promises(Slot::new(1), &[vote(1, true)]),
            Outcome::Win
        );
    }

    #[test]
    fn three_node_cluster_outcomes() {
        let majority = SimpleMajority::new(3);
        assert_eq!(majority.quorum_size(), 2);

        assert_eq!(
            majority.assess_accepts(Slot::new(1), &[vote(1, true)]),
            Outcome::Wait
        );
        assert_eq!(
            majority.assess_accepts(Slot::new(1), &[vote(1, true), vote(2, true)]),
            Outcome::Win
        );
        assert_eq!(
            majority.assess_accepts(Slot::new(1), &[vote(1, true), vote(2, false), vote(3, false)]),
            Outcome::Lose
        );
    }

    #[test]
    fn lose_requires_a_blocking_set() {
        let majority = SimpleMajority::new(5);
        assert_eq!(majority.quorum_size(), 3);

        // Two noes out of five still leave a possible winning quorum.
        assert_eq!(
            majority.assess_promises(Slot::new(1), &[vote(1, true), vote(2, false), vote(3, false)]),
            Outcome::Wait
        );
        assert_eq!(
            majority.assess_promises(
                Slot::new(1),
                &[vote(1, false), vote(2, false), vote(3, false)]
            ),
            Outcome::Lose
        );
    }

    #[test]
    fn verdicts_are_monotone_under_more_votes() {
        let majority = SimpleMajority::new(3);
        let winning = vec![vote(1, true), vote(2, true)];
        assert_eq!(
            majority.assess_accepts(Slot::new(1), &winning),
            Outcome::Win
        );

        let mut superset = winning.clone();
        superset.push(vote(3, false));
        assert_eq!(
            majority.assess_accepts(Slot::new(1), &superset),
            Outcome::Win
        );
    }
}
