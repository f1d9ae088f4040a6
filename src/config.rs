//! Session options
//!
//! Options are supplied by the embedding application (usually deserialized
//! from its own settings) and validated once before a session is created.
//! Durations are expressed in whole seconds on the wire.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::constants::{
    self,
    session::{MAX_PLAYER_COUNT, MIN_PLAYER_COUNT},
};

type ValidationResult = garde::Result;

/// Errors produced while loading session options
#[derive(Error, Debug)]
pub enum Error {
    /// The options were syntactically valid but violate a limit
    #[error("invalid options: {0}")]
    Invalid(#[from] garde::Report),
    /// The options could not be parsed
    #[error("malformed options: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Validates that a duration falls within specified bounds, in seconds
fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    field: &'static str,
    val: &Duration,
) -> ValidationResult {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) && val.subsec_nanos() == 0 {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "{field} is outside of the bounds [{MIN_SECONDS},{MAX_SECONDS}] whole seconds",
        )))
    }
}

fn validate_round_duration(val: &Duration) -> ValidationResult {
    validate_duration::<
        { constants::schedule::MIN_ROUND_DURATION },
        { constants::schedule::MAX_ROUND_DURATION },
    >("round_duration", val)
}

fn validate_lead_time(val: &Duration) -> ValidationResult {
    validate_duration::<0, { constants::clock::MAX_LEAD_TIME }>("lead_time", val)
}

fn validate_grid_alignment(val: &Duration) -> ValidationResult {
    validate_duration::<1, { constants::clock::MAX_GRID_ALIGNMENT }>("grid_alignment", val)
}

/// Ensures the maximum player count does not undercut the minimum
fn at_least(min_players: usize) -> impl FnOnce(&usize, &()) -> ValidationResult {
    move |max_players: &usize, _: &()| {
        if *max_players >= min_players {
            Ok(())
        } else {
            Err(garde::Error::new(format!(
                "max_players ({max_players}) is smaller than min_players ({min_players})"
            )))
        }
    }
}

/// Options governing matchmaking, round generation and timing
#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Options {
    /// Smallest group the matchmaker may form
    #[garde(range(min = MIN_PLAYER_COUNT, max = MAX_PLAYER_COUNT))]
    pub min_players: usize,
    /// Largest group the matchmaker may form
    #[garde(
        range(min = MIN_PLAYER_COUNT, max = MAX_PLAYER_COUNT),
        custom(at_least(self.min_players))
    )]
    pub max_players: usize,
    /// Restricts matchmaking to peers requesting the same tag
    #[garde(length(min = 1, max = constants::session::MAX_GROUP_TAG_LENGTH))]
    pub group_tag: Option<String>,
    /// Number of points sampled when the host generates rounds
    #[garde(range(min = 1, max = constants::rounds::MAX_POINT_COUNT))]
    pub point_count: usize,
    /// Length of a single round
    #[garde(custom(|v, _| validate_round_duration(v)))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub round_duration: Duration,
    /// Number of one-second countdown ticks before the first round
    #[garde(range(min = 1, max = constants::schedule::MAX_COUNTDOWN_TICKS))]
    pub countdown_ticks: u32,
    /// Minimum slack between computing the start instant and reaching it
    #[garde(custom(|v, _| validate_lead_time(v)))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub lead_time: Duration,
    /// Coarse time grid the start instant is aligned to
    #[garde(custom(|v, _| validate_grid_alignment(v)))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub grid_alignment: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            min_players: MIN_PLAYER_COUNT,
            max_players: MAX_PLAYER_COUNT,
            group_tag: None,
            point_count: constants::rounds::DEFAULT_POINT_COUNT,
            round_duration: Duration::from_secs(constants::schedule::DEFAULT_ROUND_DURATION),
            countdown_ticks: constants::schedule::DEFAULT_COUNTDOWN_TICKS,
            lead_time: Duration::from_secs(constants::clock::DEFAULT_LEAD_TIME),
            grid_alignment: Duration::from_secs(constants::clock::DEFAULT_GRID_ALIGNMENT),
        }
    }
}

impl Options {
    /// Checks the options against the session limits
    ///
    /// # Errors
    ///
    /// Returns `Error::Invalid` describing every violated limit.
    pub fn validated(self) -> Result<Self, Error> {
        self.validate()?;
        Ok(self)
    }

    /// Parses options from JSON, filling unspecified fields with defaults
    ///
    /// # Errors
    ///
    /// Returns `Error::Malformed` if the JSON cannot be parsed and
    /// `Error::Invalid` if the parsed options violate a limit.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str::<Self>(json)?.validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = Options::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.round_duration, Duration::from_secs(5));
        assert_eq!(options.countdown_ticks, 3);
        assert_eq!(options.point_count, 10);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let options = Options::from_json(r#"{"round_duration": 8, "group_tag": "friends"}"#)
            .expect("valid options");

        assert_eq!(options.round_duration, Duration::from_secs(8));
        assert_eq!(options.group_tag.as_deref(), Some("friends"));
        assert_eq!(options.grid_alignment, Duration::from_secs(10));
    }

    #[test]
    fn test_round_duration_too_short() {
        let result = Options::from_json(r#"{"round_duration": 1}"#);
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_max_players_below_min_players() {
        let options = Options {
            min_players: 4,
            max_players: 3,
            ..Options::default()
        };
        assert!(matches!(options.validated(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_empty_group_tag_rejected() {
        let options = Options {
            group_tag: Some(String::new()),
            ..Options::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_grid_alignment_rejected() {
        let result = Options::from_json(r#"{"grid_alignment": 0}"#);
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result = Options::from_json("{not json");
        assert!(matches!(result, Err(Error::Malformed(_))));
    }
}
