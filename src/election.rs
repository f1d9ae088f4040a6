//! Leaderless host election
//!
//! Every peer rolls a [`Dice`] value and broadcasts it. Once a peer holds the
//! rolls of the whole group for an attempt, it evaluates them independently;
//! because the evaluation is a pure function of the rolls, all peers reach
//! the same verdict without further negotiation.
//!
//! Rolls are compared index by index: at each index every contender whose
//! value is below that index's maximum is eliminated. The last remaining
//! contender becomes the generator. If several contenders survive all
//! indices the attempt is a total tie and every peer rolls again under the
//! next attempt number.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::election::{DICE_LENGTH, MAX_DIE_VALUE},
    peer::PeerId,
};

/// One election roll: a fixed number of independently drawn large integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dice([u64; DICE_LENGTH]);

impl Dice {
    /// Draws a fresh roll
    pub fn roll() -> Self {
        let mut values = [0; DICE_LENGTH];
        for value in &mut values {
            *value = fastrand::u64(0..=MAX_DIE_VALUE);
        }
        Self(values)
    }

    /// Wraps explicit values
    pub fn from_values(values: [u64; DICE_LENGTH]) -> Self {
        Self(values)
    }

    /// The individual values of the roll
    pub fn values(&self) -> &[u64; DICE_LENGTH] {
        &self.0
    }

    /// Checks that every value lies within the die range
    pub fn is_valid(&self) -> bool {
        self.0.iter().all(|value| *value <= MAX_DIE_VALUE)
    }
}

/// Role assigned to a peer by the election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The single peer that generates rounds and owns the scoreboard
    Generator,
    /// Every other peer
    Follower,
}

/// Result of evaluating a complete set of rolls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Exactly one peer holds the highest roll
    Winner(PeerId),
    /// Several peers hold identical highest rolls
    Tie,
}

/// Evaluates a complete set of rolls
///
/// The result does not depend on the iteration order of `rolls`.
pub fn evaluate(rolls: &HashMap<PeerId, Dice>) -> Option<Verdict> {
    let mut contenders = rolls.iter().map(|(id, dice)| (*id, dice)).collect_vec();

    if contenders.is_empty() {
        return None;
    }

    for index in 0..DICE_LENGTH {
        if let [(winner, _)] = contenders.as_slice() {
            return Some(Verdict::Winner(*winner));
        }

        let highest = contenders
            .iter()
            .map(|(_, dice)| dice.0[index])
            .max()
            .unwrap_or_default();

        contenders.retain(|(_, dice)| dice.0[index] == highest);
    }

    match contenders.as_slice() {
        [(winner, _)] => Some(Verdict::Winner(*winner)),
        _ => Some(Verdict::Tie),
    }
}

/// What a peer should do after recording a roll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Rolls for the current attempt are still missing
    Pending,
    /// The election finished with this peer in the given role
    Decided {
        /// Role of the local peer
        role: Role,
        /// Peer that won the election
        generator: PeerId,
    },
    /// The attempt tied; the local peer must broadcast this fresh roll
    Reroll {
        /// Attempt number of the new roll
        attempt: u32,
        /// The new local roll
        dice: Dice,
    },
}

/// Election state of the local peer
#[derive(Debug, Clone)]
pub struct Election {
    /// The local peer
    local: PeerId,
    /// Number of peers that must roll, including the local peer
    peer_count: usize,
    /// Attempt currently being evaluated
    attempt: u32,
    /// Rolls per attempt; later attempts may arrive before the current one completes
    rolls: BTreeMap<u32, HashMap<PeerId, Dice>>,
    /// Final outcome, once decided
    outcome: Option<(Role, PeerId)>,
}

impl Election {
    /// Starts an election and rolls the local dice
    ///
    /// Returns the election together with the roll to broadcast.
    pub fn start(local: PeerId, peer_count: usize) -> (Self, Dice) {
        Self::start_with(local, peer_count, Dice::roll())
    }

    /// Starts an election with a predetermined local roll
    pub fn start_with(local: PeerId, peer_count: usize, dice: Dice) -> (Self, Dice) {
        let mut election = Self {
            local,
            peer_count,
            attempt: 0,
            rolls: BTreeMap::new(),
            outcome: None,
        };
        election.rolls.entry(0).or_default().insert(local, dice);
        (election, dice)
    }

    /// Attempt currently being evaluated
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Number of rolls collected for the current attempt
    pub fn collected(&self) -> usize {
        self.rolls.get(&self.attempt).map_or(0, HashMap::len)
    }

    /// The decided role and generator, if the election is over
    pub fn outcome(&self) -> Option<(Role, PeerId)> {
        self.outcome
    }

    /// Records a roll received from a peer and evaluates if complete
    ///
    /// Repeated rolls from the same peer for the same attempt are ignored,
    /// which makes duplicate deliveries harmless.
    pub fn record(&mut self, from: PeerId, attempt: u32, dice: Dice) -> Progress {
        self.record_with(from, attempt, dice, Dice::roll)
    }

    /// Same as [`Election::record`] with an explicit source of re-rolls
    pub fn record_with<R: FnMut() -> Dice>(
        &mut self,
        from: PeerId,
        attempt: u32,
        dice: Dice,
        reroll: R,
    ) -> Progress {
        if let Some((role, generator)) = self.outcome {
            return Progress::Decided { role, generator };
        }

        if attempt < self.attempt {
            return Progress::Pending;
        }

        self.rolls
            .entry(attempt)
            .or_default()
            .entry(from)
            .or_insert(dice);

        self.evaluate_current(reroll)
    }

    /// Re-evaluates the current attempt without recording a new roll
    ///
    /// Needed after a re-roll, since rolls for the new attempt may all have
    /// arrived before the local peer moved on to it.
    pub fn poll(&mut self) -> Progress {
        self.poll_with(Dice::roll)
    }

    /// Same as [`Election::poll`] with an explicit source of re-rolls
    pub fn poll_with<R: FnMut() -> Dice>(&mut self, reroll: R) -> Progress {
        if let Some((role, generator)) = self.outcome {
            return Progress::Decided { role, generator };
        }
        self.evaluate_current(reroll)
    }

    fn evaluate_current<R: FnMut() -> Dice>(&mut self, mut reroll: R) -> Progress {
        let Some(rolls) = self.rolls.get(&self.attempt) else {
            return Progress::Pending;
        };

        if rolls.len() < self.peer_count {
            return Progress::Pending;
        }

        match evaluate(rolls) {
            Some(Verdict::Winner(generator)) => {
                let role = if generator == self.local {
                    Role::Generator
                } else {
                    Role::Follower
                };
                self.outcome = Some((role, generator));
                self.rolls.clear();
                Progress::Decided { role, generator }
            }
            Some(Verdict::Tie) => {
                self.rolls.remove(&self.attempt);
                self.attempt += 1;
                let dice = reroll();
                self.rolls
                    .entry(self.attempt)
                    .or_default()
                    .insert(self.local, dice);
                Progress::Reroll {
                    attempt: self.attempt,
                    dice,
                }
            }
            None => Progress::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dice(first: u64, rest: u64) -> Dice {
        let mut values = [rest; DICE_LENGTH];
        values[0] = first;
        Dice::from_values(values)
    }

    #[test]
    fn test_roll_is_valid() {
        for _ in 0..100 {
            assert!(Dice::roll().is_valid());
        }
    }

    #[test]
    fn test_dice_serializes_as_plain_array() {
        let json = serde_json::to_string(&dice(7, 1)).unwrap();
        assert_eq!(json, "[7,1,1,1,1,1,1,1,1,1,1]");
        assert!(serde_json::from_str::<Dice>("[1,2,3]").is_err());
    }

    #[test]
    fn test_highest_first_index_wins() {
        let x = PeerId::new();
        let y = PeerId::new();
        let rolls = HashMap::from([(x, dice(9, 0)), (y, dice(3, 100))]);

        assert_eq!(evaluate(&rolls), Some(Verdict::Winner(x)));
    }

    #[test]
    fn test_tie_broken_by_later_index() {
        let x = PeerId::new();
        let y = PeerId::new();
        let mut later = [5; DICE_LENGTH];
        later[4] = 6;
        let rolls = HashMap::from([(x, dice(5, 5)), (y, Dice::from_values(later))]);

        assert_eq!(evaluate(&rolls), Some(Verdict::Winner(y)));
    }

    #[test]
    fn test_eliminated_peer_does_not_produce_second_winner() {
        let x = PeerId::new();
        let y = PeerId::new();
        let z = PeerId::new();
        let mut y_values = [1; DICE_LENGTH];
        y_values[0] = 5;
        y_values[1] = 9;
        let rolls = HashMap::from([
            (x, dice(5, 1)),
            (y, Dice::from_values(y_values)),
            (z, dice(1, 100)),
        ]);

        assert_eq!(evaluate(&rolls), Some(Verdict::Winner(y)));
    }

    #[test]
    fn test_total_tie() {
        let rolls = HashMap::from([(PeerId::new(), dice(4, 4)), (PeerId::new(), dice(4, 4))]);
        assert_eq!(evaluate(&rolls), Some(Verdict::Tie));
    }

    #[test]
    fn test_every_peer_agrees_on_the_winner() {
        for _ in 0..50 {
            let peers = (0..4).map(|_| PeerId::new()).collect_vec();
            let rolls: HashMap<_, _> = peers.iter().map(|id| (*id, Dice::roll())).collect();
            let expected = evaluate(&rolls);

            for permutation in peers.iter().permutations(peers.len()) {
                let reordered: HashMap<_, _> =
                    permutation.iter().map(|id| (**id, rolls[*id])).collect();
                assert_eq!(evaluate(&reordered), expected);
            }

            let winners = peers
                .iter()
                .map(|local| {
                    let (mut election, _) = Election::start_with(*local, peers.len(), rolls[local]);
                    let mut last = Progress::Pending;
                    for peer in peers.iter().filter(|peer| *peer != local) {
                        last = election.record(*peer, 0, rolls[peer]);
                    }
                    last
                })
                .filter(|progress| {
                    matches!(
                        progress,
                        Progress::Decided {
                            role: Role::Generator,
                            ..
                        }
                    )
                })
                .count();
            assert_eq!(winners, 1);
        }
    }

    #[test]
    fn test_election_waits_for_all_rolls() {
        let local = PeerId::new();
        let (mut election, _) = Election::start_with(local, 3, dice(1, 1));

        assert_eq!(election.record(PeerId::new(), 0, dice(2, 2)), Progress::Pending);
        assert_eq!(election.collected(), 2);
    }

    #[test]
    fn test_duplicate_roll_is_ignored() {
        let local = PeerId::new();
        let other = PeerId::new();
        let (mut election, _) = Election::start_with(local, 3, dice(1, 1));

        election.record(other, 0, dice(2, 2));
        assert_eq!(election.record(other, 0, dice(9, 9)), Progress::Pending);
        assert_eq!(election.collected(), 2);
    }

    #[test]
    fn test_local_follower_learns_generator() {
        let local = PeerId::new();
        let other = PeerId::new();
        let (mut election, _) = Election::start_with(local, 2, dice(1, 1));

        let progress = election.record(other, 0, dice(2, 0));

        assert_eq!(
            progress,
            Progress::Decided {
                role: Role::Follower,
                generator: other
            }
        );
        assert_eq!(election.outcome(), Some((Role::Follower, other)));
    }

    #[test]
    fn test_total_tie_rerolls() {
        let local = PeerId::new();
        let other = PeerId::new();
        let (mut election, _) = Election::start_with(local, 2, dice(4, 4));

        let progress = election.record_with(other, 0, dice(4, 4), || dice(8, 0));

        assert_eq!(
            progress,
            Progress::Reroll {
                attempt: 1,
                dice: dice(8, 0)
            }
        );
        assert_eq!(election.attempt(), 1);

        let progress = election.record(other, 1, dice(2, 0));
        assert_eq!(
            progress,
            Progress::Decided {
                role: Role::Generator,
                generator: local
            }
        );
    }

    #[test]
    fn test_early_roll_for_next_attempt_is_kept() {
        let local = PeerId::new();
        let other = PeerId::new();
        let (mut election, _) = Election::start_with(local, 2, dice(4, 4));

        assert_eq!(election.record(other, 1, dice(9, 9)), Progress::Pending);

        let progress = election.record_with(other, 0, dice(4, 4), || dice(1, 1));
        assert_eq!(
            progress,
            Progress::Reroll {
                attempt: 1,
                dice: dice(1, 1)
            }
        );

        assert_eq!(
            election.poll(),
            Progress::Decided {
                role: Role::Follower,
                generator: other
            }
        );
    }
}
