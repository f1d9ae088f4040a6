//! Scoring
//!
//! Every peer judges its own answers. The generator is the only peer that
//! awards points: it credits each peer at most once per round and
//! re-broadcasts the whole scoreboard after every change. Other peers keep
//! a cached copy that only ever grows.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{names::Aliases, peer::PeerId};

/// A single answer, kept only until it has been scored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    /// Peer that answered
    pub peer: PeerId,
    /// Round the answer belongs to
    pub round: usize,
    /// The fact the peer picked
    pub chosen_fact: String,
    /// Whether the pick was the correct fact
    pub is_correct: bool,
    /// Time between the round start and the answer
    pub elapsed: Duration,
}

/// Reasons a local answer is rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No round is being played
    #[error("no round is being played")]
    NotInRound,
    /// The local peer already answered this round
    #[error("this round was already answered")]
    AlreadyAnswered,
    /// The answer is not one of the round's options
    #[error("answer is not an option of this round")]
    UnknownAnswer,
}

/// Points per peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scoreboard {
    points: HashMap<PeerId, u64>,
}

/// One line of the presented scoreboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    /// The peer
    pub peer: PeerId,
    /// Display alias of the peer
    pub alias: String,
    /// Total points
    pub points: u64,
}

impl Scoreboard {
    /// Points of `peer`, zero if unknown
    pub fn points(&self, peer: PeerId) -> u64 {
        self.points.get(&peer).copied().unwrap_or_default()
    }

    /// Gives `peer` one point and returns the new total
    pub fn award(&mut self, peer: PeerId) -> u64 {
        let points = self.points.entry(peer).or_default();
        *points += 1;
        *points
    }

    /// Folds a broadcast scoreboard into this one, keeping the larger value
    /// per peer
    ///
    /// Returns whether anything changed.
    pub fn merge(&mut self, incoming: &HashMap<PeerId, u64>) -> bool {
        let mut changed = false;
        for (peer, points) in incoming {
            let current = self.points.entry(*peer).or_default();
            if *points > *current {
                *current = *points;
                changed = true;
            }
        }
        changed
    }

    /// The raw mapping, as broadcast on the wire
    pub fn as_map(&self) -> &HashMap<PeerId, u64> {
        &self.points
    }

    /// Standings sorted by points, best first, ties by alias
    ///
    /// Peers without an alias are listed under their identifier.
    pub fn standings(&self, aliases: &Aliases) -> Vec<Standing> {
        self.points
            .iter()
            .map(|(peer, points)| Standing {
                peer: *peer,
                alias: aliases
                    .get_alias(peer)
                    .unwrap_or_else(|| peer.to_string()),
                points: *points,
            })
            .sorted_by(|a, b| b.points.cmp(&a.points).then_with(|| a.alias.cmp(&b.alias)))
            .collect_vec()
    }
}

/// The generator's authoritative scoring state
#[derive(Debug, Default)]
pub struct ScoreAggregator {
    scoreboard: Scoreboard,
    /// Every (round, peer) pair already scored
    scored: HashSet<(usize, PeerId)>,
}

impl ScoreAggregator {
    /// Scores an answer reported by `peer` for `round`
    ///
    /// Only the first answer of a peer per round counts; redelivered or
    /// repeated answers are ignored. Returns whether the scoreboard changed
    /// and must be re-broadcast.
    pub fn on_answer(&mut self, peer: PeerId, round: usize, is_correct: bool) -> bool {
        if !self.scored.insert((round, peer)) {
            tracing::debug!(peer = %peer, round, "ignoring repeated answer");
            return false;
        }

        if is_correct {
            let total = self.scoreboard.award(peer);
            tracing::debug!(peer = %peer, round, total, "point awarded");
        }

        is_correct
    }

    /// Caches a scoreboard broadcast by the generator
    pub fn merge(&mut self, incoming: &HashMap<PeerId, u64>) -> bool {
        self.scoreboard.merge(incoming)
    }

    /// The current scoreboard
    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_answer_awards_one_point() {
        let mut aggregator = ScoreAggregator::default();
        let peer = PeerId::new();

        assert!(aggregator.on_answer(peer, 0, true));
        assert_eq!(aggregator.scoreboard().points(peer), 1);
    }

    #[test]
    fn test_wrong_answer_changes_nothing() {
        let mut aggregator = ScoreAggregator::default();
        let peer = PeerId::new();

        assert!(!aggregator.on_answer(peer, 0, false));
        assert_eq!(aggregator.scoreboard().points(peer), 0);
        assert!(aggregator.scoreboard().as_map().is_empty());
    }

    #[test]
    fn test_only_first_answer_per_round_counts() {
        let mut aggregator = ScoreAggregator::default();
        let peer = PeerId::new();

        assert!(!aggregator.on_answer(peer, 0, false));
        assert!(!aggregator.on_answer(peer, 0, true));
        assert!(aggregator.on_answer(peer, 1, true));
        assert!(!aggregator.on_answer(peer, 1, true));

        assert_eq!(aggregator.scoreboard().points(peer), 1);
    }

    #[test]
    fn test_merge_is_monotonic() {
        let x = PeerId::new();
        let y = PeerId::new();
        let mut scoreboard = Scoreboard::default();

        assert!(scoreboard.merge(&HashMap::from([(x, 2), (y, 1)])));
        assert!(!scoreboard.merge(&HashMap::from([(x, 1)])));
        assert!(scoreboard.merge(&HashMap::from([(y, 3)])));

        assert_eq!(scoreboard.points(x), 2);
        assert_eq!(scoreboard.points(y), 3);
    }

    #[test]
    fn test_standings_order() {
        let mut aliases = Aliases::default();
        let x = PeerId::new();
        let y = PeerId::new();
        let z = PeerId::new();
        aliases.set_alias(x, "Xavier").unwrap();
        aliases.set_alias(y, "Yara").unwrap();

        let mut scoreboard = Scoreboard::default();
        scoreboard.merge(&HashMap::from([(x, 1), (y, 1), (z, 4)]));

        let standings = scoreboard.standings(&aliases);

        assert_eq!(
            standings
                .iter()
                .map(|standing| (standing.alias.as_str(), standing.points))
                .collect_vec(),
            vec![(z.to_string().as_str(), 4), ("Xavier", 1), ("Yara", 1)]
        );
    }
}
