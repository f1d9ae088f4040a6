//! Peer identity and roster management
//!
//! This module tracks every participant of the peer group handed over by the
//! matchmaker: their stable identifier, display alias and whether the
//! transport currently reports them as connected.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

/// A unique identifier for a session participant
///
/// Identifiers are stable for the lifetime of a session and never reused.
/// On the wire they appear as hyphenated UUID strings, which is also how
/// scoreboard keys are encoded.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Creates a new random peer identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Connection state of a peer as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum ConnectionState {
    /// The peer can receive broadcasts
    Connected,
    /// The transport lost the peer; it never comes back within a session
    Disconnected,
}

/// A peer as announced by the matchmaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Stable identifier of the peer
    pub id: PeerId,
    /// Alias supplied by the platform, if any
    pub alias: Option<String>,
}

impl Peer {
    /// Creates a peer with a platform supplied alias
    pub fn new(id: PeerId, alias: impl Into<String>) -> Self {
        Self {
            id,
            alias: Some(alias.into()),
        }
    }

    /// Creates a peer without an alias; one is generated on admission
    pub fn anonymous(id: PeerId) -> Self {
        Self { id, alias: None }
    }
}

/// Errors that can occur while managing the roster
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The group is already at the maximum number of peers
    #[error("maximum number of players reached")]
    MaximumPlayers,
    /// The peer is already part of the roster
    #[error("peer is already part of the session")]
    Duplicate,
}

/// All peers of the session and their connection state
#[derive(Debug, Default)]
pub struct Roster {
    /// Primary mapping from peer to its connection state
    mapping: HashMap<PeerId, ConnectionState>,

    /// Reverse mapping by connection state
    reverse_mapping: EnumMap<ConnectionState, HashSet<PeerId>>,
}

impl Roster {
    /// Adds a connected peer
    ///
    /// # Errors
    ///
    /// Returns `Error::Duplicate` if the peer is already known and
    /// `Error::MaximumPlayers` if the roster is full.
    pub fn add_peer(&mut self, peer_id: PeerId) -> Result<(), Error> {
        if self.mapping.contains_key(&peer_id) {
            return Err(Error::Duplicate);
        }

        if self.mapping.len() >= crate::constants::session::MAX_PLAYER_COUNT {
            return Err(Error::MaximumPlayers);
        }

        self.mapping.insert(peer_id, ConnectionState::Connected);
        self.reverse_mapping[ConnectionState::Connected].insert(peer_id);

        Ok(())
    }

    /// Updates the connection state of a known peer
    ///
    /// Returns the previous state, or `None` if the peer is unknown.
    pub fn set_state(
        &mut self,
        peer_id: PeerId,
        state: ConnectionState,
    ) -> Option<ConnectionState> {
        let old_state = self.mapping.insert(peer_id, state);
        match old_state {
            Some(old_state) => {
                self.reverse_mapping[old_state].remove(&peer_id);
                self.reverse_mapping[state].insert(peer_id);
                Some(old_state)
            }
            None => {
                self.mapping.remove(&peer_id);
                None
            }
        }
    }

    /// Returns the connection state of a peer
    pub fn state(&self, peer_id: PeerId) -> Option<ConnectionState> {
        self.mapping.get(&peer_id).copied()
    }

    /// Checks whether the peer is part of the session
    pub fn has_peer(&self, peer_id: PeerId) -> bool {
        self.mapping.contains_key(&peer_id)
    }

    /// Number of peers ever admitted to the session
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Checks whether no peer has been admitted yet
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Number of peers in the given connection state
    pub fn count(&self, state: ConnectionState) -> usize {
        self.reverse_mapping[state].len()
    }

    /// Peers in the given connection state, in identifier order
    pub fn peers(&self, state: ConnectionState) -> Vec<PeerId> {
        self.reverse_mapping[state].iter().copied().sorted().collect_vec()
    }
}
