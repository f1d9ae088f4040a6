//! Platform seams
//!
//! The matchmaking and transport layer is supplied by the embedding app.
//! This module defines the capabilities the game needs from it: forming a
//! group of peers, broadcasting payloads to that group and toggling voice
//! chat. Inbound traffic flows the other way, as events pushed onto the
//! reactor's queue through an [`EventSender`].

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::Options, peer::Peer, reactor::EventSender};

/// Trait for sending payloads to the connected peer group
///
/// Implementations are expected to deliver payloads reliably and in order
/// per sender. Sending is fire-and-forget: no call blocks on delivery.
pub trait Transport {
    /// Sends a payload to every other peer of the group
    ///
    /// # Arguments
    ///
    /// * `payload` - The encoded message to send
    fn broadcast(&self, payload: &[u8]);

    /// Turns the group's voice channel on or off
    ///
    /// Transports without voice support can keep the default, which does
    /// nothing.
    fn set_voice_chat(&self, active: bool) {
        let _ = active;
    }

    /// Leaves the peer group
    ///
    /// After this call no further events are expected from the group.
    fn disconnect(&self);
}

/// A request for a new peer group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    /// Smallest acceptable group, including the local peer
    pub min_players: usize,
    /// Largest acceptable group, including the local peer
    pub max_players: usize,
    /// Only match with peers using the same tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_tag: Option<String>,
}

impl From<&Options> for MatchRequest {
    fn from(options: &Options) -> Self {
        Self {
            min_players: options.min_players,
            max_players: options.max_players,
            group_tag: options.group_tag.clone(),
        }
    }
}

/// A formed peer group
#[derive(Debug)]
pub struct Group<T> {
    /// Handle used to talk to the group
    pub transport: T,
    /// The local participant
    pub local: Peer,
    /// Every other participant
    pub remotes: Vec<Peer>,
}

/// Errors reported by the matchmaking layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The user dismissed the matchmaking flow
    #[error("matchmaking was cancelled")]
    Cancelled,
    /// The platform failed to form a group
    #[error("matchmaking failed: {0}")]
    Failed(String),
}

/// Trait for the platform matchmaking service
pub trait Matchmaker {
    /// The transport of a formed group
    type Transport: Transport + Send + 'static;

    /// Asks the platform for a peer group
    ///
    /// The matchmaker keeps `events` and pushes every inbound payload and
    /// peer connection change of the formed group onto it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the user backed out and
    /// `Error::Failed` if no group could be formed.
    fn connect_to_session(
        &mut self,
        request: &MatchRequest,
        events: EventSender,
    ) -> impl Future<Output = Result<Group<Self::Transport>, Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_request_from_options() {
        let options = Options {
            min_players: 3,
            group_tag: Some("lobby".to_owned()),
            ..Options::default()
        };

        let request = MatchRequest::from(&options);

        assert_eq!(request.min_players, 3);
        assert_eq!(request.max_players, options.max_players);
        assert_eq!(request.group_tag.as_deref(), Some("lobby"));
    }

    #[test]
    fn test_match_request_serialization() {
        let request = MatchRequest {
            min_players: 2,
            max_players: 4,
            group_tag: None,
        };

        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"minPlayers":2,"maxPlayers":4}"#
        );
    }
}
