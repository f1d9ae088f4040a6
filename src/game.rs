//! Session state machine
//!
//! This module contains [`Game`], everything one peer knows about the
//! session it takes part in. The game moves through the phases of
//! [`Phase`]: it requests a group, runs the dice election, either generates
//! or waits for the round set, counts down to the shared start instant and
//! plays the rounds until gameover.
//!
//! The game never blocks and never reads a clock on its own. Its owner feeds
//! it inbound events together with the current time, drains its timers and
//! performs the [`Command`]s it returns.

use std::{
    collections::{HashMap, hash_map::Entry},
    time::Duration,
};

use itertools::Itertools;
use serde::Serialize;
use web_time::SystemTime;

use crate::{
    clock,
    config::Options,
    constants::election::MAX_EARLY_ROLLS,
    election::{Dice, Election, Progress, Role},
    message::{self, Message},
    names::Aliases,
    peer::{ConnectionState, Peer, PeerId, Roster},
    rounds::{self, Round, RoundSet},
    schedule::{AlarmMessage, Phase, RoundScheduler, Timeline},
    scoreboard::{self, AnswerRecord, ScoreAggregator, Scoreboard, Standing},
    session::{self, MatchRequest, Transport},
};

/// Work the game needs its owner to run off the event queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Build a round set and report it through [`Game::rounds_generated`]
    GenerateRounds {
        /// Number of locations to sample
        point_count: usize,
    },
}

/// Read-only snapshot of the session for the presentation layer
#[serde_with::serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedState {
    /// Current phase
    pub status: Phase,
    /// Role assigned by the election, once known
    pub role: Option<Role>,
    /// Whether the group's voice channel is on
    pub voicechat_active: bool,
    /// Index of the round being played
    pub current_round: Option<usize>,
    /// Number of rounds in the session, zero until known
    pub round_count: usize,
    /// The round being played
    pub round: Option<Round>,
    /// Time left in the round being played
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    pub time_remaining: Option<Duration>,
    /// Countdown text shown before the first round
    pub countdown_label: Option<String>,
    /// Scores, best first
    pub scoreboard: Vec<Standing>,
    /// The local answer to the current round
    pub my_answer: Option<String>,
    /// Answers other peers gave to the current round
    pub peer_answers: HashMap<PeerId, String>,
}

/// The session as seen by one peer
#[derive(Debug)]
pub struct Game {
    /// Session options
    options: Options,
    /// Current phase
    phase: Phase,
    /// The local peer, once a group has formed
    local: Option<PeerId>,
    /// All peers of the group and their connection state
    roster: Roster,
    /// Display aliases of the peers
    aliases: Aliases,
    /// Running election, if any
    election: Option<Election>,
    /// Rolls that arrived before the group was handed over
    early_dice: HashMap<(PeerId, u32), Dice>,
    /// Role assigned by the election
    role: Option<Role>,
    /// Peer that generates the rounds
    generator: Option<PeerId>,
    /// The session's rounds, once known
    rounds: Option<RoundSet>,
    /// Countdown and round timers
    scheduler: RoundScheduler,
    /// Label of the last countdown tick
    countdown_label: Option<String>,
    /// Scores; authoritative on the generator, a cache elsewhere
    scores: ScoreAggregator,
    /// The local answer to the current round
    my_answer: Option<AnswerRecord>,
    /// Answers other peers gave to the current round
    peer_answers: HashMap<PeerId, String>,
    /// Whether the group's voice channel is on
    voicechat_active: bool,
    /// Source of election rolls
    roll: fn() -> Dice,
}

impl Game {
    /// Creates an idle game
    ///
    /// # Arguments
    ///
    /// * `options` - Validated session options
    pub fn new(options: Options) -> Self {
        Self {
            options,
            phase: Phase::Idle,
            local: None,
            roster: Roster::default(),
            aliases: Aliases::default(),
            election: None,
            early_dice: HashMap::new(),
            role: None,
            generator: None,
            rounds: None,
            scheduler: RoundScheduler::default(),
            countdown_label: None,
            scores: ScoreAggregator::default(),
            my_answer: None,
            peer_answers: HashMap::new(),
            voicechat_active: false,
            roll: Dice::roll,
        }
    }

    /// Replaces the source of election rolls
    pub fn with_dice(mut self, roll: fn() -> Dice) -> Self {
        self.roll = roll;
        self
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, "phase transition");
            self.phase = phase;
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Role assigned by the election
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Peer that generates the rounds, once known
    pub fn generator(&self) -> Option<PeerId> {
        self.generator
    }

    /// The local peer, once a group has formed
    pub fn local_id(&self) -> Option<PeerId> {
        self.local
    }

    /// Session options
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The session's rounds, once known
    pub fn rounds(&self) -> Option<&RoundSet> {
        self.rounds.as_ref()
    }

    /// Scores as currently known
    pub fn scoreboard(&self) -> &Scoreboard {
        self.scores.scoreboard()
    }

    /// All peers of the group
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Display aliases of the peers
    pub fn aliases(&self) -> &Aliases {
        &self.aliases
    }

    /// When the next timer fires
    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.scheduler.next_deadline()
    }

    /// Starts looking for a group
    ///
    /// Only possible from `idle`, `invalid` or `gameover`; anything left
    /// from a previous session is discarded.
    ///
    /// # Returns
    ///
    /// The request to hand to the matchmaker, or `None` if a session is
    /// already under way
    pub fn request_match(&mut self) -> Option<MatchRequest> {
        match self.phase {
            Phase::Idle | Phase::Invalid | Phase::GameOver => {
                *self = Self::new(self.options.clone()).with_dice(self.roll);
                self.set_phase(Phase::Matching);
                Some(MatchRequest::from(&self.options))
            }
            phase => {
                tracing::debug!(%phase, "match already requested");
                None
            }
        }
    }

    /// Handles a matchmaking error
    ///
    /// A cancelled request returns to `idle`; a failed one moves to
    /// `invalid` so the user can retry.
    pub fn matchmaking_failed(&mut self, error: &session::Error) {
        if self.phase != Phase::Matching {
            return;
        }

        match error {
            session::Error::Cancelled => {
                tracing::info!("matchmaking cancelled");
                self.set_phase(Phase::Idle);
            }
            session::Error::Failed(reason) => {
                tracing::warn!(%reason, "matchmaking failed");
                self.set_phase(Phase::Invalid);
            }
        }
    }

    /// Takes over a formed group and starts the election
    ///
    /// Every peer is admitted to the roster with an alias, the local roll
    /// is broadcast and rolls that arrived early are replayed.
    ///
    /// # Arguments
    ///
    /// * `local` - The local participant
    /// * `remotes` - Every other participant
    /// * `transport` - Handle used to talk to the group
    ///
    /// # Returns
    ///
    /// A command to generate rounds if the election is already decided in
    /// favor of the local peer
    pub fn group_formed<T: Transport>(
        &mut self,
        local: &Peer,
        remotes: &[Peer],
        transport: &T,
    ) -> Option<Command> {
        if self.phase != Phase::Matching {
            tracing::warn!(phase = %self.phase, "ignoring group formed outside of matchmaking");
            return None;
        }

        for peer in std::iter::once(local).chain(remotes) {
            if let Err(e) = self.roster.add_peer(peer.id) {
                tracing::warn!(peer = %peer.id, error = %e, "peer not admitted");
                continue;
            }
            self.aliases.admit(peer.id, peer.alias.as_deref());
        }

        self.scores.merge(
            &self
                .roster
                .peers(ConnectionState::Connected)
                .into_iter()
                .map(|peer| (peer, 0))
                .collect(),
        );

        let (election, dice) = Election::start_with(local.id, self.roster.len(), (self.roll)());
        self.local = Some(local.id);
        self.election = Some(election);
        self.set_phase(Phase::Electing);
        tracing::info!(peers = self.roster.len(), "group formed");

        message::send(transport, &Message::Dice { attempt: 0, dice });

        let early_dice = std::mem::take(&mut self.early_dice)
            .into_iter()
            .sorted_by_key(|((_, attempt), _)| *attempt);
        for ((from, attempt), dice) in early_dice {
            if !self.roster.has_peer(from) {
                continue;
            }
            if let Some(command) = self.record_dice(from, attempt, dice, transport) {
                return Some(command);
            }
        }

        let progress = self.election.as_mut()?.poll_with(self.roll);
        self.advance_election(progress, transport)
    }

    fn record_dice<T: Transport>(
        &mut self,
        from: PeerId,
        attempt: u32,
        dice: Dice,
        transport: &T,
    ) -> Option<Command> {
        let progress = self
            .election
            .as_mut()?
            .record_with(from, attempt, dice, self.roll);
        self.advance_election(progress, transport)
    }

    fn advance_election<T: Transport>(
        &mut self,
        mut progress: Progress,
        transport: &T,
    ) -> Option<Command> {
        loop {
            match progress {
                Progress::Pending => return None,
                Progress::Reroll { attempt, dice } => {
                    tracing::info!(attempt, "election tied, rolling again");
                    message::send(transport, &Message::Dice { attempt, dice });
                    progress = self.election.as_mut()?.poll_with(self.roll);
                }
                Progress::Decided { role, generator } => {
                    self.election = None;
                    self.role = Some(role);
                    self.generator = Some(generator);
                    tracing::info!(%generator, ?role, "election decided");

                    return match role {
                        Role::Generator => {
                            self.set_phase(Phase::Generating);
                            Some(Command::GenerateRounds {
                                point_count: self.options.point_count,
                            })
                        }
                        Role::Follower => {
                            self.set_phase(Phase::Waiting);
                            None
                        }
                    };
                }
            }
        }
    }

    /// Handles a validated message from a peer
    ///
    /// Messages from unknown peers or from peers acting outside their role
    /// are logged and dropped.
    ///
    /// # Arguments
    ///
    /// * `from` - The sending peer
    /// * `message` - The decoded message
    /// * `transport` - Handle used to answer the group
    ///
    /// # Returns
    ///
    /// A command to generate rounds if the message decided the election in
    /// favor of the local peer
    pub fn receive<T: Transport>(
        &mut self,
        from: PeerId,
        message: Message,
        transport: &T,
    ) -> Option<Command> {
        if self.phase == Phase::Matching {
            match message {
                Message::Dice { attempt, dice } => self.buffer_early_dice(from, attempt, dice),
                message => {
                    tracing::debug!(peer = %from, kind = message.kind(), "dropping early message");
                }
            }
            return None;
        }

        if !self.roster.has_peer(from) || self.local == Some(from) {
            tracing::warn!(peer = %from, kind = message.kind(), "dropping message from stranger");
            return None;
        }

        match message {
            Message::Dice { attempt, dice } => {
                if self.phase == Phase::Electing {
                    return self.record_dice(from, attempt, dice, transport);
                }
                tracing::debug!(peer = %from, attempt, "ignoring dice outside of the election");
            }
            Message::Session { rounds, start } => self.receive_session(from, rounds, start),
            Message::Answer {
                chosen,
                is_correct,
                round,
            } => self.receive_answer(from, chosen, is_correct, round, transport),
            Message::Scoreboard(points) => self.receive_scoreboard(from, &points),
        }

        None
    }

    fn buffer_early_dice(&mut self, from: PeerId, attempt: u32, dice: Dice) {
        let full = self.early_dice.len() >= MAX_EARLY_ROLLS;
        match self.early_dice.entry((from, attempt)) {
            Entry::Occupied(_) => {}
            Entry::Vacant(_) if full => {
                tracing::warn!(peer = %from, attempt, "dropping dice, too many arrived early");
            }
            Entry::Vacant(entry) => {
                entry.insert(dice);
            }
        }
    }

    fn receive_session(&mut self, from: PeerId, rounds: RoundSet, start: SystemTime) {
        if !matches!(self.phase, Phase::Electing | Phase::Waiting) {
            tracing::debug!(peer = %from, phase = %self.phase, "ignoring session");
            return;
        }

        if self.generator.is_some_and(|generator| generator != from) {
            tracing::warn!(peer = %from, "dropping session from a peer that is not the generator");
            return;
        }

        if self.election.take().is_some() {
            tracing::info!(generator = %from, "session arrived before the local election finished");
        }
        self.generator = Some(from);
        self.role = Some(Role::Follower);

        self.install_session(rounds, start);
    }

    fn install_session(&mut self, rounds: RoundSet, start: SystemTime) {
        tracing::info!(
            rounds = rounds.len(),
            start = clock::unix_seconds(start),
            "session scheduled"
        );

        let timeline = Timeline {
            start,
            round_count: rounds.len(),
            round_duration: self.options.round_duration,
        };
        self.rounds = Some(rounds);

        if timeline.round_count == 0 {
            self.finish();
            return;
        }

        if let Err(e) = self.scheduler.begin(timeline, self.options.countdown_ticks) {
            tracing::warn!(error = %e, "session cannot be scheduled");
            self.finish();
            return;
        }
        self.set_phase(Phase::Countdown);
    }

    fn receive_answer<T: Transport>(
        &mut self,
        from: PeerId,
        chosen: String,
        is_correct: bool,
        round: Option<usize>,
        transport: &T,
    ) {
        let current = match self.phase {
            Phase::Round(index) => Some(index),
            _ => None,
        };

        let Some(round) = round.or(current) else {
            tracing::debug!(peer = %from, "dropping answer outside of a round");
            return;
        };

        if self.rounds.as_ref().is_none_or(|rounds| round >= rounds.len()) {
            tracing::warn!(peer = %from, round, "dropping answer to an unknown round");
            return;
        }

        if current == Some(round) {
            self.peer_answers.entry(from).or_insert(chosen);
        }

        if self.role == Some(Role::Generator) && self.scores.on_answer(from, round, is_correct) {
            self.broadcast_scoreboard(transport);
        }
    }

    fn receive_scoreboard(&mut self, from: PeerId, points: &HashMap<PeerId, u64>) {
        if self.role != Some(Role::Follower) || self.generator != Some(from) {
            tracing::warn!(peer = %from, "dropping scoreboard from a non-generator");
            return;
        }

        if self.scores.merge(points) {
            tracing::debug!("scoreboard updated");
        }
    }

    fn broadcast_scoreboard<T: Transport>(&self, transport: &T) {
        message::send(
            transport,
            &Message::Scoreboard(self.scores.scoreboard().as_map().clone()),
        );
    }

    /// Publishes a generated round set to the group
    ///
    /// The start instant is computed from `now` and broadcast together with
    /// the rounds. A failed generation publishes an empty set, which ends
    /// the session for every peer.
    ///
    /// # Arguments
    ///
    /// * `result` - Outcome of round generation
    /// * `now` - Current wall-clock time
    /// * `transport` - Handle used to talk to the group
    pub fn rounds_generated<T: Transport>(
        &mut self,
        result: Result<RoundSet, rounds::Error>,
        now: SystemTime,
        transport: &T,
    ) {
        if self.phase != Phase::Generating {
            tracing::debug!(phase = %self.phase, "discarding rounds generated too late");
            return;
        }

        let rounds = result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "round generation failed");
            RoundSet::default()
        });

        let start =
            clock::compute_start_instant(now, self.options.lead_time, self.options.grid_alignment);

        message::send(
            transport,
            &Message::Session {
                rounds: rounds.clone(),
                start,
            },
        );

        self.install_session(rounds, start);
    }

    /// Records a connection change reported by the transport
    ///
    /// Losing any peer during the election, or the generator afterwards,
    /// ends the session. Other disconnects only mark the roster.
    pub fn peer_state_changed(&mut self, peer: PeerId, state: ConnectionState) {
        let Some(previous) = self.roster.set_state(peer, state) else {
            tracing::debug!(peer = %peer, "connection change for unknown peer");
            return;
        };

        if previous == state || state == ConnectionState::Connected {
            return;
        }

        tracing::info!(peer = %peer, "peer disconnected");

        match self.phase {
            Phase::Electing => {
                tracing::warn!(peer = %peer, "peer left during the election");
                self.finish();
            }
            Phase::Waiting | Phase::Countdown | Phase::Round(_)
                if self.generator == Some(peer) =>
            {
                tracing::warn!(peer = %peer, "generator left the session");
                self.finish();
            }
            _ => {}
        }
    }

    /// Fires every timer due at `now`, in deadline order
    pub fn fire_due_alarms(&mut self, now: SystemTime) {
        while let Some(alarm) = self.scheduler.pop_due(now) {
            self.receive_alarm(alarm);
        }
    }

    /// Handles a single timer
    pub fn receive_alarm(&mut self, alarm: AlarmMessage) {
        match alarm {
            AlarmMessage::CountdownTick { remaining } => {
                if self.phase == Phase::Countdown {
                    self.countdown_label = Some(remaining.to_string());
                }
            }
            AlarmMessage::StartRound { index } => {
                self.countdown_label = None;
                self.my_answer = None;
                self.peer_answers.clear();
                self.set_phase(Phase::Round(index));
            }
            AlarmMessage::GameOver => self.finish(),
        }
    }

    /// Answers the current round
    ///
    /// The answer is judged locally and broadcast; on the generator it is
    /// also scored right away.
    ///
    /// # Arguments
    ///
    /// * `chosen` - One of the current round's answers
    /// * `now` - Current wall-clock time
    /// * `transport` - Handle used to talk to the group
    ///
    /// # Returns
    ///
    /// Whether the answer was correct
    ///
    /// # Errors
    ///
    /// Returns an error, without side effects, if no round is being played,
    /// the round was already answered or `chosen` is not one of its answers.
    pub fn submit_answer<T: Transport>(
        &mut self,
        chosen: &str,
        now: SystemTime,
        transport: &T,
    ) -> Result<bool, scoreboard::Error> {
        let Phase::Round(index) = self.phase else {
            return Err(scoreboard::Error::NotInRound);
        };

        if self.my_answer.is_some() {
            return Err(scoreboard::Error::AlreadyAnswered);
        }

        let (Some(round), Some(local)) = (
            self.rounds.as_ref().and_then(|rounds| rounds.get(index)),
            self.local,
        ) else {
            return Err(scoreboard::Error::NotInRound);
        };

        if !round.answers().iter().any(|answer| answer == chosen) {
            return Err(scoreboard::Error::UnknownAnswer);
        }

        let is_correct = round.is_correct(chosen);
        let elapsed = self
            .scheduler
            .timeline()
            .and_then(|timeline| now.duration_since(timeline.round_start(index)?).ok())
            .unwrap_or_default();

        tracing::debug!(round = index, is_correct, ?elapsed, "answer submitted");

        self.my_answer = Some(AnswerRecord {
            peer: local,
            round: index,
            chosen_fact: chosen.to_owned(),
            is_correct,
            elapsed,
        });

        message::send(
            transport,
            &Message::Answer {
                chosen: chosen.to_owned(),
                is_correct,
                round: Some(index),
            },
        );

        if self.role == Some(Role::Generator) && self.scores.on_answer(local, index, is_correct) {
            self.broadcast_scoreboard(transport);
        }

        Ok(is_correct)
    }

    /// Flips the voice channel and returns its new state
    pub fn toggle_voice_chat<T: Transport>(&mut self, transport: Option<&T>) -> bool {
        self.voicechat_active = !self.voicechat_active;
        if let Some(transport) = transport {
            transport.set_voice_chat(self.voicechat_active);
        }
        self.voicechat_active
    }

    /// Leaves the group and ends the session
    pub fn stop<T: Transport>(&mut self, transport: Option<&T>) {
        if let Some(transport) = transport {
            transport.disconnect();
        }
        tracing::info!(phase = %self.phase, "session stopped");
        self.finish();
    }

    fn finish(&mut self) {
        self.scheduler.cancel();
        self.election = None;
        self.countdown_label = None;
        self.set_phase(Phase::GameOver);
    }

    /// Snapshot of the session for the presentation layer
    pub fn published_state(&self, now: SystemTime) -> PublishedState {
        let current_round = match self.phase {
            Phase::Round(index) => Some(index),
            _ => None,
        };

        PublishedState {
            status: self.phase,
            role: self.role,
            voicechat_active: self.voicechat_active,
            current_round,
            round_count: self.rounds.as_ref().map_or(0, RoundSet::len),
            round: current_round.and_then(|index| self.rounds.as_ref()?.get(index).cloned()),
            time_remaining: current_round
                .and_then(|index| Some(self.scheduler.timeline()?.time_remaining(index, now))),
            countdown_label: self.countdown_label.clone(),
            scoreboard: self.scores.scoreboard().standings(&self.aliases),
            my_answer: self
                .my_answer
                .as_ref()
                .map(|answer| answer.chosen_fact.clone()),
            peer_answers: self.peer_answers.clone(),
        }
    }
}
