//! Peer alias management
//!
//! Every peer is presented by an alias. Platform supplied aliases are kept
//! when they are usable; otherwise a pet-style name is generated so that
//! aliases stay unique within a session.

use std::collections::{HashMap, HashSet, hash_map::Entry};

use heck::ToTitleCase;
use thiserror::Error;

use crate::{constants, peer::PeerId};

/// Generates a random title-cased alias (adjective + animal)
pub fn generated_alias() -> String {
    petname::petname(constants::alias::GENERATED_WORDS, " ")
        .unwrap_or_else(|| "Anonymous Player".to_owned())
        .to_title_case()
}

/// Bidirectional mapping between peers and their unique aliases
#[derive(Debug, Default, Clone)]
pub struct Aliases {
    /// Primary mapping from peer to alias
    mapping: HashMap<PeerId, String>,

    /// Reverse mapping from alias to peer
    reverse_mapping: HashMap<String, PeerId>,
    /// Set of aliases in use
    existing: HashSet<String>,
}

/// Errors that can occur during alias validation and assignment
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The alias is already in use by another peer
    #[error("alias already in-use")]
    Used,
    /// The peer already has an alias
    #[error("peer has an existing alias")]
    Assigned,
    /// The alias is empty or contains only whitespace
    #[error("alias cannot be empty")]
    Empty,
    /// The alias exceeds the maximum allowed length
    #[error("alias is too long")]
    TooLong,
}

impl Aliases {
    /// Retrieves the alias of a peer
    pub fn get_alias(&self, id: &PeerId) -> Option<String> {
        self.mapping.get(id).map(std::borrow::ToOwned::to_owned)
    }

    /// Retrieves the peer behind an alias
    pub fn get_id(&self, alias: &str) -> Option<PeerId> {
        self.reverse_mapping.get(alias).copied()
    }

    /// Assigns an alias to a peer after validation
    ///
    /// The alias is trimmed before it is checked and stored.
    ///
    /// # Errors
    ///
    /// * `Error::TooLong` - Alias exceeds the maximum length
    /// * `Error::Empty` - Alias is empty after trimming whitespace
    /// * `Error::Used` - Alias is already taken by another peer
    /// * `Error::Assigned` - Peer already has an alias
    pub fn set_alias(&mut self, id: PeerId, alias: &str) -> Result<String, Error> {
        let alias = alias.trim();
        if alias.chars().count() > constants::alias::MAX_LENGTH {
            return Err(Error::TooLong);
        }
        if alias.is_empty() {
            return Err(Error::Empty);
        }
        if self.existing.contains(alias) {
            return Err(Error::Used);
        }
        match self.mapping.entry(id) {
            Entry::Occupied(_) => Err(Error::Assigned),
            Entry::Vacant(v) => {
                v.insert(alias.to_owned());
                self.existing.insert(alias.to_owned());
                self.reverse_mapping.insert(alias.to_owned(), id);
                Ok(alias.to_owned())
            }
        }
    }

    /// Admits a peer, keeping the requested alias when possible
    ///
    /// Falls back to a generated alias when the requested one is missing
    /// or rejected. A peer that already has an alias keeps it.
    pub fn admit(&mut self, id: PeerId, requested: Option<&str>) -> String {
        if let Some(existing) = self.get_alias(&id) {
            return existing;
        }

        if let Some(requested) = requested {
            match self.set_alias(id, requested) {
                Ok(alias) => return alias,
                Err(e) => {
                    tracing::debug!(peer = %id, error = %e, "platform alias rejected");
                }
            }
        }

        loop {
            if let Ok(alias) = self.set_alias(id, &generated_alias()) {
                return alias;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_set_and_get() {
        let mut aliases = Aliases::default();
        let id = PeerId::new();

        let result = aliases.set_alias(id, "  Navigator ");
        assert_eq!(result, Ok("Navigator".to_string()));

        assert_eq!(aliases.get_alias(&id), Some("Navigator".to_string()));
        assert_eq!(aliases.get_id("Navigator"), Some(id));
    }

    #[test]
    fn test_alias_too_long() {
        let mut aliases = Aliases::default();
        let result = aliases.set_alias(PeerId::new(), &"a".repeat(31));
        assert_eq!(result, Err(Error::TooLong));
    }

    #[test]
    fn test_alias_empty() {
        let mut aliases = Aliases::default();
        assert_eq!(aliases.set_alias(PeerId::new(), "   "), Err(Error::Empty));
    }

    #[test]
    fn test_alias_used() {
        let mut aliases = Aliases::default();
        aliases.set_alias(PeerId::new(), "Twin").unwrap();
        assert_eq!(aliases.set_alias(PeerId::new(), "Twin"), Err(Error::Used));
    }

    #[test]
    fn test_alias_assigned_twice() {
        let mut aliases = Aliases::default();
        let id = PeerId::new();
        aliases.set_alias(id, "First").unwrap();
        assert_eq!(aliases.set_alias(id, "Second"), Err(Error::Assigned));
        assert_eq!(aliases.get_id("Second"), None);
    }

    #[test]
    fn test_admit_keeps_platform_alias() {
        let mut aliases = Aliases::default();
        let id = PeerId::new();
        assert_eq!(aliases.admit(id, Some("Captain")), "Captain");
        assert_eq!(aliases.admit(id, Some("Other")), "Captain");
    }

    #[test]
    fn test_admit_generates_alias_on_collision() {
        let mut aliases = Aliases::default();
        let first = PeerId::new();
        let second = PeerId::new();
        aliases.admit(first, Some("Same"));

        let generated = aliases.admit(second, Some("Same"));

        assert_ne!(generated, "Same");
        assert!(!generated.is_empty());
        assert_eq!(aliases.get_id(&generated), Some(second));
    }

    #[test]
    fn test_admit_generates_alias_when_missing() {
        let mut aliases = Aliases::default();
        let id = PeerId::new();
        let alias = aliases.admit(id, None);
        assert!(!alias.is_empty());
        assert_eq!(aliases.get_alias(&id), Some(alias));
    }
}
