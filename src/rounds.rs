//! Round generation
//!
//! The elected host samples locations, fetches one fact per location and
//! turns every location into a round with one correct fact and three
//! distractors taken from the facts of the other locations.

use std::future::Future;

use futures::future::join_all;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    constants::rounds::{ANSWER_COUNT, DISTRACTOR_COUNT, MAX_FACT_LENGTH},
    geography::{Coordinate, Geography},
};

/// Failure to fetch a fact for a location
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("fact unavailable: {0}")]
pub struct FetchError(pub String);

/// Source of current-condition facts, such as the temperature at a location
pub trait FactSource {
    /// Fetches the fact string for a location
    fn fetch_fact(
        &self,
        location: Coordinate,
    ) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Errors that can occur while building rounds
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The geography dataset produced no location
    #[error("no location could be sampled")]
    NoLocations,
    /// A round does not have exactly four distinct answers
    #[error("a round needs {ANSWER_COUNT} distinct answers")]
    Answers,
    /// A fact is empty or too long
    #[error("fact is empty or longer than {MAX_FACT_LENGTH} characters")]
    Fact,
}

/// One question: a location plus one correct fact and three distractors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// Where the fact was observed
    pub location: Coordinate,
    /// The fact observed at the location
    correct_fact: String,
    /// Facts observed elsewhere
    distractors: [String; DISTRACTOR_COUNT],
}

fn is_valid_fact(fact: &str) -> bool {
    !fact.trim().is_empty() && fact.chars().count() <= MAX_FACT_LENGTH
}

impl Round {
    /// Builds a round from its answers, the correct one first
    ///
    /// # Errors
    ///
    /// Returns `Error::Answers` unless there are exactly four pairwise
    /// distinct answers, and `Error::Fact` if any answer is unusable.
    pub fn from_answers(location: Coordinate, answers: Vec<String>) -> Result<Self, Error> {
        if answers.len() != ANSWER_COUNT || !answers.iter().all_unique() {
            return Err(Error::Answers);
        }
        if !answers.iter().all(|answer| is_valid_fact(answer)) {
            return Err(Error::Fact);
        }

        let mut answers = answers.into_iter();
        let correct_fact = answers.next().ok_or(Error::Answers)?;
        let distractors: [String; DISTRACTOR_COUNT] = answers
            .collect_vec()
            .try_into()
            .map_err(|_| Error::Answers)?;

        Ok(Self {
            location,
            correct_fact,
            distractors,
        })
    }

    /// The fact that scores a point
    pub fn correct_fact(&self) -> &str {
        &self.correct_fact
    }

    /// The three wrong answers
    pub fn distractors(&self) -> &[String; DISTRACTOR_COUNT] {
        &self.distractors
    }

    /// All four answers, the correct one first
    pub fn answers(&self) -> Vec<String> {
        std::iter::once(&self.correct_fact)
            .chain(self.distractors.iter())
            .cloned()
            .collect_vec()
    }

    /// Checks a chosen answer against the correct fact
    pub fn is_correct(&self, chosen: &str) -> bool {
        self.correct_fact == chosen
    }
}

/// The ordered rounds of one session; never modified once broadcast
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundSet(Vec<Round>);

impl RoundSet {
    /// Wraps an ordered list of rounds
    pub fn new(rounds: Vec<Round>) -> Self {
        Self(rounds)
    }

    /// Number of rounds
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks whether there is no round at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The round at `index`
    pub fn get(&self, index: usize) -> Option<&Round> {
        self.0.get(index)
    }

    /// Iterates over the rounds in order
    pub fn iter(&self) -> std::slice::Iter<'_, Round> {
        self.0.iter()
    }
}

/// Builds round sets from a geography dataset and a fact source
#[derive(Debug, Clone)]
pub struct RoundGenerator<G, F> {
    geography: G,
    facts: F,
}

impl<G: Geography, F: FactSource> RoundGenerator<G, F> {
    /// Creates a generator over the given collaborators
    pub fn new(geography: G, facts: F) -> Self {
        Self { geography, facts }
    }

    /// Generates a round set from `point_count` sampled locations
    ///
    /// Facts are fetched concurrently. Locations whose fetch fails are
    /// dropped, so the set may hold fewer rounds than sampled points.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoLocations` if the dataset yields no location.
    pub async fn generate(&self, point_count: usize) -> Result<RoundSet, Error> {
        let locations = self.geography.sample_random_points(point_count);

        if locations.is_empty() {
            return Err(Error::NoLocations);
        }

        let fetched = join_all(locations.into_iter().map(|location| async move {
            (location, self.facts.fetch_fact(location).await)
        }))
        .await;

        let observations = fetched
            .into_iter()
            .filter_map(|(location, fact)| match fact {
                Ok(fact) if is_valid_fact(&fact) => Some((location, fact.trim().to_owned())),
                Ok(fact) => {
                    tracing::warn!(?location, fact = %fact, "dropping location with unusable fact");
                    None
                }
                Err(e) => {
                    tracing::warn!(?location, error = %e, "dropping location without fact");
                    None
                }
            })
            .collect_vec();

        Ok(build_rounds(observations))
    }
}

/// Locates the first number in `fact`
///
/// Returns the byte span of the number, including a leading minus sign,
/// and its count of decimal places.
fn first_number(fact: &str) -> Option<(usize, usize, usize)> {
    let digits_start = fact.find(|c: char| c.is_ascii_digit())?;
    let start = fact[..digits_start]
        .strip_suffix('-')
        .map_or(digits_start, str::len);

    let mut end = digits_start;
    let mut decimals: Option<usize> = None;
    for (offset, c) in fact[digits_start..].char_indices() {
        match (c, decimals) {
            (c, None) if c.is_ascii_digit() => end = digits_start + offset + 1,
            (c, Some(count)) if c.is_ascii_digit() => {
                decimals = Some(count + 1);
                end = digits_start + offset + 1;
            }
            ('.', None) => decimals = Some(0),
            _ => break,
        }
    }

    Some((start, end, decimals.unwrap_or(0)))
}

/// Yields wrong answers that look like `fact` by shifting its first number
///
/// "72°F" yields "75°F", "69°F", "78°F" and so on. Facts without a number
/// yield nothing.
pub fn plausible_variants(fact: &str) -> impl Iterator<Item = String> + '_ {
    first_number(fact)
        .and_then(|(start, end, decimals)| {
            let value: f64 = fact[start..end].parse().ok()?;
            Some((1..=25).flat_map(move |step| {
                let offset = f64::from(step) * 3.0;
                [offset, -offset].map(|offset| {
                    format!(
                        "{}{:.decimals$}{}",
                        &fact[..start],
                        value + offset,
                        &fact[end..]
                    )
                })
            }))
        })
        .into_iter()
        .flatten()
}

/// Turns observations into rounds, drawing distractors from the other facts
///
/// Distractors are drawn uniformly without replacement from the distinct
/// facts other than the correct one. When fewer than three such facts exist,
/// the remainder is filled with [`plausible_variants`] of the correct fact.
/// An observation that still lacks distractors is skipped.
pub fn build_rounds(observations: Vec<(Coordinate, String)>) -> RoundSet {
    let pool = observations
        .iter()
        .map(|(_, fact)| fact.clone())
        .unique()
        .collect_vec();

    let rounds = observations
        .into_iter()
        .filter_map(|(location, correct_fact)| {
            let candidates = pool.iter().filter(|fact| **fact != correct_fact);
            let mut distractors = fastrand::choose_multiple(candidates, DISTRACTOR_COUNT)
                .into_iter()
                .cloned()
                .collect_vec();

            for variant in plausible_variants(&correct_fact) {
                if distractors.len() == DISTRACTOR_COUNT {
                    break;
                }
                if variant != correct_fact && !distractors.contains(&variant) {
                    distractors.push(variant);
                }
            }

            if distractors.len() < DISTRACTOR_COUNT {
                tracing::warn!(
                    ?location,
                    distinct_facts = pool.len(),
                    "skipping round without enough distinct distractors"
                );
                return None;
            }

            fastrand::shuffle(&mut distractors);

            Some(Round {
                location,
                correct_fact,
                distractors: distractors.try_into().ok()?,
            })
        })
        .collect_vec();

    tracing::debug!(rounds = rounds.len(), "round set built");

    RoundSet(rounds)
}
