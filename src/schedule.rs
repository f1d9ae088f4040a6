//! Round scheduling
//!
//! Every peer derives the whole session timeline from the broadcast start
//! instant: countdown ticks in the seconds before it, round `i` at
//! `start + i * duration` and gameover once the last round has run out.
//! The timeline is turned into alarms held in a [`Timers`] queue which the
//! reactor drains whenever a deadline passes. Cancelling the scheduler drops
//! every pending alarm at once.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

/// Errors that can occur while scheduling a session
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session would end past the largest representable instant
    #[error("session timeline is out of range")]
    OutOfRange,
}

/// Session phase of the local peer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Nothing requested yet
    #[default]
    #[display("idle")]
    Idle,
    /// Waiting for the matchmaker to form a group
    #[display("matching")]
    Matching,
    /// Exchanging dice with the group
    #[display("electing")]
    Electing,
    /// Elected; building the round set
    #[display("generating")]
    Generating,
    /// Not elected; waiting for the generator's session
    #[display("waiting")]
    Waiting,
    /// Session known; counting down to the start instant
    #[display("countdown")]
    Countdown,
    /// Playing the round at this index
    #[display("round({_0})")]
    Round(usize),
    /// The session is over
    #[display("gameover")]
    GameOver,
    /// Matchmaking failed
    #[display("invalid")]
    Invalid,
}

/// Timed events of a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// A countdown second has started; `remaining` seconds are left
    CountdownTick {
        /// Seconds until the first round
        remaining: u32,
    },
    /// The round at `index` starts
    StartRound {
        /// Index of the round
        index: usize,
    },
    /// The last round has ended
    GameOver,
}

/// A cancelable queue of alarms ordered by deadline
///
/// Alarms sharing a deadline fire in the order they were scheduled.
#[derive(Debug, Default)]
pub struct Timers {
    pending: BTreeMap<(SystemTime, u64), AlarmMessage>,
    sequence: u64,
}

impl Timers {
    /// Schedules `alarm` to fire at `at`
    pub fn schedule(&mut self, at: SystemTime, alarm: AlarmMessage) {
        self.pending.insert((at, self.sequence), alarm);
        self.sequence += 1;
    }

    /// Drops every pending alarm
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    /// Deadline of the earliest pending alarm
    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.pending.keys().next().map(|(at, _)| *at)
    }

    /// Removes and returns the earliest alarm if it is due at `now`
    pub fn pop_due(&mut self, now: SystemTime) -> Option<AlarmMessage> {
        let entry = self.pending.first_entry()?;
        if entry.key().0 <= now {
            Some(entry.remove())
        } else {
            None
        }
    }

    /// Number of pending alarms
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Checks whether no alarm is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Round boundaries derived from the shared start instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    /// When the first round starts
    pub start: SystemTime,
    /// Number of rounds
    pub round_count: usize,
    /// Length of every round
    pub round_duration: Duration,
}

impl Timeline {
    /// When the round at `index` starts
    ///
    /// Index `round_count` is the end of the session. Returns `None` if the
    /// instant cannot be represented.
    pub fn round_start(&self, index: usize) -> Option<SystemTime> {
        self.start
            .checked_add(self.round_duration.checked_mul(u32::try_from(index).ok()?)?)
    }

    /// When the last round ends
    pub fn end(&self) -> Option<SystemTime> {
        self.round_start(self.round_count)
    }

    /// The round being played at `now`, if any
    pub fn round_at(&self, now: SystemTime) -> Option<usize> {
        let elapsed = now.duration_since(self.start).ok()?;
        let index = (elapsed.as_millis() / self.round_duration.as_millis().max(1)) as usize;
        (index < self.round_count).then_some(index)
    }

    /// Time left in the round at `index`
    pub fn time_remaining(&self, index: usize, now: SystemTime) -> Duration {
        self.round_start(index + 1)
            .and_then(|end| end.duration_since(now).ok())
            .unwrap_or_default()
    }
}

/// Drives the local phase from a [`Timeline`]
#[derive(Debug, Default)]
pub struct RoundScheduler {
    timers: Timers,
    timeline: Option<Timeline>,
}

impl RoundScheduler {
    /// Replaces any running schedule with one for `timeline`
    ///
    /// Schedules `countdown_ticks` one-second ticks ending at the start
    /// instant, one alarm per round start and a final gameover alarm. Ticks
    /// whose instant already passed fire as soon as the queue is drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`], leaving the running schedule
    /// untouched, if the timeline ends past the largest representable
    /// instant.
    pub fn begin(&mut self, timeline: Timeline, countdown_ticks: u32) -> Result<(), Error> {
        let end = timeline.end().ok_or(Error::OutOfRange)?;
        self.timers.cancel_all();

        for remaining in (1..=countdown_ticks).rev() {
            let at = timeline
                .start
                .checked_sub(Duration::from_secs(u64::from(remaining)))
                .unwrap_or(timeline.start);
            self.timers
                .schedule(at, AlarmMessage::CountdownTick { remaining });
        }

        for index in 0..timeline.round_count {
            let at = timeline.round_start(index).ok_or(Error::OutOfRange)?;
            self.timers.schedule(at, AlarmMessage::StartRound { index });
        }

        self.timers.schedule(end, AlarmMessage::GameOver);
        self.timeline = Some(timeline);
        Ok(())
    }

    /// Cancels every pending alarm and forgets the timeline
    pub fn cancel(&mut self) {
        self.timers.cancel_all();
        self.timeline = None;
    }

    /// The running timeline, if any
    pub fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    /// Deadline of the next alarm
    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.timers.next_deadline()
    }

    /// Removes and returns the next alarm due at `now`
    pub fn pop_due(&mut self, now: SystemTime) -> Option<AlarmMessage> {
        self.timers.pop_due(now)
    }

    /// Number of pending alarms
    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}
