//! Configuration constants for the Geocast game system
//!
//! This module contains the limits and protocol constants used throughout
//! the session. Every peer must agree on the protocol constants, so they are
//! fixed here rather than configurable.

/// Session-wide limits
pub mod session {
    /// Minimum number of peers in a match
    pub const MIN_PLAYER_COUNT: usize = 2;
    /// Maximum number of peers in a match
    pub const MAX_PLAYER_COUNT: usize = 4;
    /// Maximum length of a matchmaking group tag
    pub const MAX_GROUP_TAG_LENGTH: usize = 64;
}

/// Host election constants
pub mod election {
    /// Number of independently drawn values in a dice roll
    pub const DICE_LENGTH: usize = 11;
    /// Largest value a single die can show (fits a signed JSON integer)
    pub const MAX_DIE_VALUE: u64 = i64::MAX as u64;
    /// Most rolls kept from peers whose group has not been handed over yet
    pub const MAX_EARLY_ROLLS: usize = super::session::MAX_PLAYER_COUNT * 4;
}

/// Round generation constants
pub mod rounds {
    /// Number of answer options presented for each round
    pub const ANSWER_COUNT: usize = 4;
    /// Number of wrong answers drawn for each round
    pub const DISTRACTOR_COUNT: usize = ANSWER_COUNT - 1;
    /// Default number of points sampled from the geography dataset
    pub const DEFAULT_POINT_COUNT: usize = 10;
    /// Maximum number of points sampled from the geography dataset
    pub const MAX_POINT_COUNT: usize = 50;
    /// Maximum length of a fact string accepted from the wire
    pub const MAX_FACT_LENGTH: usize = 64;
}

/// Timing constants for countdown and round advancement
pub mod schedule {
    /// Default length of a single round in seconds
    pub const DEFAULT_ROUND_DURATION: u64 = 5;
    /// Minimum length of a single round in seconds
    pub const MIN_ROUND_DURATION: u64 = 3;
    /// Maximum length of a single round in seconds
    pub const MAX_ROUND_DURATION: u64 = 60;
    /// Default number of countdown ticks before the first round
    pub const DEFAULT_COUNTDOWN_TICKS: u32 = 3;
    /// Maximum number of countdown ticks before the first round
    pub const MAX_COUNTDOWN_TICKS: u32 = 10;
}

/// Clock synchronization constants
pub mod clock {
    /// Default slack between computing the start instant and reaching it, in seconds
    pub const DEFAULT_LEAD_TIME: u64 = 5;
    /// Maximum slack between computing the start instant and reaching it, in seconds
    pub const MAX_LEAD_TIME: u64 = 60;
    /// Default coarse time grid the start instant is aligned to, in seconds
    pub const DEFAULT_GRID_ALIGNMENT: u64 = 10;
    /// Maximum coarse time grid the start instant is aligned to, in seconds
    pub const MAX_GRID_ALIGNMENT: u64 = 60;
}

/// Alias configuration constants
pub mod alias {
    /// Maximum length of a peer alias in characters
    pub const MAX_LENGTH: usize = 30;
    /// Number of words in a generated alias
    pub const GENERATED_WORDS: u8 = 2;
}
