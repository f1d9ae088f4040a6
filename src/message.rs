//! Peer wire messages
//!
//! Peers exchange JSON objects whose shape identifies their kind:
//!
//! - `{"dice": [int × 11]}`
//! - `{"rounds": [{"latitude", "longitude", "answers": [string × 4]}], "startDate": int}`
//! - `{"answer": string, "isRight": bool}`
//! - `{"points": {peer: int, ...}}`
//!
//! `dice` may carry an `attempt` number for re-rolls and `answer` may carry
//! the `round` it belongs to; both are omitted when not needed. Payloads are
//! validated at this boundary into [`Message`]; anything malformed is
//! logged and dropped by [`receive`].

use std::{collections::HashMap, time::Duration};

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use web_time::{SystemTime, UNIX_EPOCH};

use crate::{
    constants::{rounds::MAX_FACT_LENGTH, schedule::MAX_ROUND_DURATION},
    election::Dice,
    geography::Coordinate,
    peer::PeerId,
    rounds::{self, Round, RoundSet},
    session::Transport,
};

/// A validated message exchanged between peers
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// An election roll
    Dice {
        /// Election attempt the roll belongs to
        attempt: u32,
        /// The roll
        dice: Dice,
    },
    /// The session state chosen by the generator
    Session {
        /// The rounds every peer plays
        rounds: RoundSet,
        /// The instant the first round starts
        start: SystemTime,
    },
    /// A peer's answer to the current round
    Answer {
        /// The fact the peer picked
        chosen: String,
        /// Whether the peer judged its pick correct
        is_correct: bool,
        /// The round answered, when the sender included it
        round: Option<usize>,
    },
    /// The authoritative scoreboard
    Scoreboard(HashMap<PeerId, u64>),
}

/// Errors that can occur while decoding a payload
#[derive(Error, Debug)]
pub enum Error {
    /// The payload is not a JSON object of a known kind
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A dice value is out of range
    #[error("dice value out of range")]
    Dice,
    /// A round has an invalid location
    #[error("invalid round location: {0}")]
    Location(#[from] garde::Report),
    /// A round has invalid answers
    #[error("invalid round: {0}")]
    Round(#[from] rounds::Error),
    /// The start instant is before the epoch or too close to the end of time
    #[error("start date out of range")]
    StartDate,
    /// An answer is empty or too long
    #[error("invalid answer")]
    Answer,
}

/// Checks that a session starting at `start` can run to its end
fn start_in_range(start: SystemTime, round_count: usize) -> bool {
    let longest = Duration::from_secs(MAX_ROUND_DURATION)
        .checked_mul(u32::try_from(round_count).unwrap_or(u32::MAX));
    start >= UNIX_EPOCH && longest.is_some_and(|longest| start.checked_add(longest).is_some())
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRound {
    latitude: f64,
    longitude: f64,
    answers: Vec<String>,
}

#[serde_with::serde_as]
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireMessage {
    Dice {
        dice: Dice,
        #[serde(default, skip_serializing_if = "is_zero")]
        attempt: u32,
    },
    Session {
        rounds: Vec<WireRound>,
        #[serde(rename = "startDate")]
        #[serde_as(as = "serde_with::TimestampSeconds<i64>")]
        start_date: SystemTime,
    },
    Answer {
        answer: String,
        #[serde(rename = "isRight")]
        is_right: bool,
        #[serde(default)]
        round: Option<usize>,
    },
    Points {
        points: HashMap<PeerId, u64>,
    },
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        match message {
            Message::Dice { attempt, dice } => Self::Dice {
                dice: *dice,
                attempt: *attempt,
            },
            Message::Session { rounds, start } => Self::Session {
                rounds: rounds
                    .iter()
                    .map(|round| WireRound {
                        latitude: round.location.latitude,
                        longitude: round.location.longitude,
                        answers: round.answers(),
                    })
                    .collect_vec(),
                start_date: *start,
            },
            Message::Answer {
                chosen,
                is_correct,
                round,
            } => Self::Answer {
                answer: chosen.clone(),
                is_right: *is_correct,
                round: *round,
            },
            Message::Scoreboard(points) => Self::Points {
                points: points.clone(),
            },
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        Ok(match wire {
            WireMessage::Dice { dice, attempt } => {
                if !dice.is_valid() {
                    return Err(Error::Dice);
                }
                Self::Dice { attempt, dice }
            }
            WireMessage::Session { rounds, start_date } => {
                if !start_in_range(start_date, rounds.len()) {
                    return Err(Error::StartDate);
                }
                Self::Session {
                    rounds: RoundSet::new(
                        rounds
                            .into_iter()
                            .map(|round| -> Result<Round, Error> {
                                let location = Coordinate::new(round.latitude, round.longitude);
                                location.validate()?;
                                Ok(Round::from_answers(location, round.answers)?)
                            })
                            .collect::<Result<Vec<_>, Error>>()?,
                    ),
                    start: start_date,
                }
            }
            WireMessage::Answer {
                answer,
                is_right,
                round,
            } => {
                if answer.trim().is_empty() || answer.chars().count() > MAX_FACT_LENGTH {
                    return Err(Error::Answer);
                }
                Self::Answer {
                    chosen: answer,
                    is_correct: is_right,
                    round,
                }
            }
            WireMessage::Points { points } => Self::Scoreboard(points),
        })
    }
}

impl Message {
    /// Encodes the message as a JSON payload
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&WireMessage::from(self)).expect("default serializer cannot fail")
    }

    /// Decodes and validates a JSON payload
    ///
    /// # Errors
    ///
    /// Returns an error describing why the payload was rejected.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice::<WireMessage>(payload)?.try_into()
    }

    /// Short name of the message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dice { .. } => "dice",
            Self::Session { .. } => "session",
            Self::Answer { .. } => "answer",
            Self::Scoreboard(_) => "scoreboard",
        }
    }
}

/// Broadcasts a message to every peer of the group
pub fn send<T: Transport>(transport: &T, message: &Message) {
    tracing::debug!(kind = message.kind(), "broadcasting");
    transport.broadcast(&message.to_bytes());
}

/// Decodes an inbound payload, dropping anything malformed
pub fn receive(from: PeerId, payload: &[u8]) -> Option<Message> {
    match Message::from_bytes(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(peer = %from, error = %e, "dropping malformed payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(correct: &str) -> Round {
        Round::from_answers(
            Coordinate::new(59.4, 24.7),
            vec![
                correct.to_owned(),
                "50°F".to_owned(),
                "60°F".to_owned(),
                "80°F".to_owned(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_dice_wire_format() {
        let message = Message::Dice {
            attempt: 0,
            dice: Dice::from_values([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]),
        };
        let json = String::from_utf8(message.to_bytes()).unwrap();

        assert_eq!(json, r#"{"dice":[1,2,3,4,5,6,7,8,9,10,11]}"#);
        assert_eq!(Message::from_bytes(json.as_bytes()).unwrap(), message);
    }

    #[test]
    fn test_dice_with_attempt() {
        let message = Message::from_bytes(br#"{"dice":[0,0,0,0,0,0,0,0,0,0,0],"attempt":2}"#);
        assert!(matches!(message, Ok(Message::Dice { attempt: 2, .. })));
    }

    #[test]
    fn test_dice_with_wrong_length_is_rejected() {
        assert!(Message::from_bytes(br#"{"dice":[1,2,3]}"#).is_err());
    }

    #[test]
    fn test_dice_out_of_range_is_rejected() {
        let payload = format!(r#"{{"dice":[{},0,0,0,0,0,0,0,0,0,0]}}"#, u64::MAX);
        assert!(matches!(
            Message::from_bytes(payload.as_bytes()),
            Err(Error::Dice)
        ));
    }

    #[test]
    fn test_session_wire_format() {
        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_010);
        let message = Message::Session {
            rounds: RoundSet::new(vec![round("72°F")]),
            start,
        };
        let value: serde_json::Value = serde_json::from_slice(&message.to_bytes()).unwrap();

        assert_eq!(value["startDate"], 1_700_000_010);
        assert_eq!(value["rounds"][0]["latitude"], 59.4);
        assert_eq!(value["rounds"][0]["answers"][0], "72°F");
        assert_eq!(
            value["rounds"][0]["answers"].as_array().map(Vec::len),
            Some(4)
        );

        assert_eq!(Message::from_bytes(&message.to_bytes()).unwrap(), message);
    }

    #[test]
    fn test_session_with_duplicate_answers_is_rejected() {
        let payload = br#"{"rounds":[{"latitude":1.0,"longitude":2.0,"answers":["a","a","b","c"]}],"startDate":10}"#;
        assert!(matches!(
            Message::from_bytes(payload),
            Err(Error::Round(rounds::Error::Answers))
        ));
    }

    #[test]
    fn test_session_with_bad_location_is_rejected() {
        let payload = br#"{"rounds":[{"latitude":91.0,"longitude":2.0,"answers":["a","b","c","d"]}],"startDate":10}"#;
        assert!(matches!(
            Message::from_bytes(payload),
            Err(Error::Location(_))
        ));
    }

    #[test]
    fn test_session_past_the_end_of_time_is_rejected() {
        let payload = format!(
            r#"{{"rounds":[{{"latitude":1.0,"longitude":2.0,"answers":["a","b","c","d"]}}],"startDate":{}}}"#,
            i64::MAX
        );
        assert!(matches!(
            Message::from_bytes(payload.as_bytes()),
            Err(Error::StartDate)
        ));
        assert!(receive(PeerId::new(), payload.as_bytes()).is_none());
    }

    #[test]
    fn test_session_before_the_epoch_is_rejected() {
        let payload = br#"{"rounds":[],"startDate":-10}"#;
        assert!(matches!(Message::from_bytes(payload), Err(Error::StartDate)));
    }

    #[test]
    fn test_answer_wire_format() {
        let payload = r#"{"answer":"72°F","isRight":true}"#;
        let message = Message::from_bytes(payload.as_bytes()).unwrap();
        assert_eq!(
            message,
            Message::Answer {
                chosen: "72°F".to_owned(),
                is_correct: true,
                round: None
            }
        );

        let json = String::from_utf8(message.to_bytes()).unwrap();
        assert_eq!(json, r#"{"answer":"72°F","isRight":true}"#);
    }

    #[test]
    fn test_empty_answer_is_rejected() {
        assert!(matches!(
            Message::from_bytes(br#"{"answer":"","isRight":false}"#),
            Err(Error::Answer)
        ));
    }

    #[test]
    fn test_points_wire_format() {
        let peer = PeerId::new();
        let message = Message::Scoreboard(HashMap::from([(peer, 3)]));
        let value: serde_json::Value = serde_json::from_slice(&message.to_bytes()).unwrap();

        assert_eq!(value["points"][peer.to_string()], 3);
        assert_eq!(Message::from_bytes(&message.to_bytes()).unwrap(), message);
    }

    #[test]
    fn test_unknown_payloads_are_dropped() {
        let from = PeerId::new();
        assert!(receive(from, b"{}").is_none());
        assert!(receive(from, br#"{"hello":"world"}"#).is_none());
        assert!(receive(from, b"\xff\xfe").is_none());
        assert!(receive(from, br#"{"points":{"not-a-peer":1}}"#).is_none());
    }

    #[test]
    fn test_receive_accepts_valid_payload() {
        let message = receive(PeerId::new(), br#"{"answer":"x","isRight":false,"round":2}"#);
        assert!(matches!(message, Some(Message::Answer { round: Some(2), .. })));
    }
}
