//! # Geocast
//!
//! Core of a peer-to-peer geography trivia game. A matchmaker hands over a
//! group of connected peers; the peers elect a single generator with a dice
//! roll, the generator builds a shared set of rounds (a location plus four
//! current-condition facts) and broadcasts it with a start instant, and
//! every peer then plays the same rounds on the same clock while the
//! generator keeps the scoreboard.
//!
//! The crate is transport agnostic. The embedding app supplies the
//! matchmaking and transport ([`session`]), a geography dataset
//! ([`geography`]) and a fact source ([`rounds`]); [`reactor::Reactor`]
//! wires them to a [`game::Game`] and publishes its state.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]

pub mod clock;
pub mod config;
pub mod constants;
pub mod election;
pub mod game;
pub mod geography;
pub mod message;
pub mod names;
pub mod peer;
pub mod reactor;
pub mod rounds;
pub mod schedule;
pub mod scoreboard;
pub mod session;

pub use game::{Game, PublishedState};
pub use reactor::{Event, EventSender, Reactor};
pub use schedule::Phase;
