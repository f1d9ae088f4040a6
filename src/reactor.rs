//! Event loop
//!
//! The [`Reactor`] owns a [`Game`] together with its collaborators and
//! serializes everything that touches it: inbound peer traffic, connection
//! changes, user actions and timers are handled one at a time from a single
//! queue. Round generation runs as a separate task and its result is folded
//! back into the same loop before it touches the game. At most one
//! generation runs at a time; it is aborted as soon as the game leaves the
//! generating phase, and a result that still slips through is matched
//! against the generation that asked for it.
//!
//! ```ignore
//! let (reactor, events, mut state) = Reactor::new(game, matchmaker, generator, SystemClock);
//! events.send(Event::RequestMatch);
//! tokio::spawn(async move {
//!     while state.changed().await.is_ok() {
//!         render(&state.borrow());
//!     }
//! });
//! reactor.run().await;
//! ```

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use web_time::SystemTime;

use crate::{
    clock::Clock,
    game::{Command, Game, PublishedState},
    geography::Geography,
    message,
    peer::{ConnectionState, PeerId},
    rounds::{self, FactSource, RoundGenerator, RoundSet},
    schedule::Phase,
    session::{Group, Matchmaker, Transport},
};

/// Inputs of the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The user asked to play
    RequestMatch,
    /// A payload arrived from a peer of the group
    PeerMessage {
        /// The sending peer
        from: PeerId,
        /// The raw payload
        payload: Vec<u8>,
    },
    /// The transport reported a connection change
    PeerStateChanged {
        /// The peer concerned
        peer: PeerId,
        /// Its new state
        state: ConnectionState,
    },
    /// The user picked an answer
    SubmitAnswer(String),
    /// The user flipped the voice channel
    ToggleVoiceChat,
    /// The user left the match
    Stop,
    /// Stops the event loop
    Shutdown,
}

/// Handle used to push events onto a reactor's queue
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<Event>);

impl EventSender {
    /// Queues an event
    ///
    /// Returns `false` once the reactor has stopped.
    pub fn send(&self, event: Event) -> bool {
        self.0.send(event).is_ok()
    }
}

type Generated = (u64, Result<RoundSet, rounds::Error>);

/// The round generation task currently running
#[derive(Debug)]
struct Generation {
    epoch: u64,
    task: JoinHandle<()>,
}

/// Single-threaded event loop driving one [`Game`]
pub struct Reactor<M: Matchmaker, G, F, C> {
    game: Game,
    matchmaker: M,
    transport: Option<M::Transport>,
    generator: Arc<RoundGenerator<G, F>>,
    clock: C,
    sender: EventSender,
    events: mpsc::UnboundedReceiver<Event>,
    generated_tx: mpsc::UnboundedSender<Generated>,
    generated_rx: mpsc::UnboundedReceiver<Generated>,
    generation: Option<Generation>,
    epoch: u64,
    published: watch::Sender<PublishedState>,
}

async fn sleep(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

impl<M, G, F, C> Reactor<M, G, F, C>
where
    M: Matchmaker,
    G: Geography + Send + Sync + 'static,
    F: FactSource + Send + Sync + 'static,
    C: Clock,
{
    /// Creates a reactor around `game`
    ///
    /// # Returns
    ///
    /// The reactor, a sender for its event queue and a receiver of the
    /// published session state
    pub fn new(
        game: Game,
        matchmaker: M,
        generator: RoundGenerator<G, F>,
        clock: C,
    ) -> (Self, EventSender, watch::Receiver<PublishedState>) {
        let (sender, events) = mpsc::unbounded_channel();
        let (generated_tx, generated_rx) = mpsc::unbounded_channel();
        let (published, state) = watch::channel(game.published_state(clock.now()));
        let sender = EventSender(sender);

        (
            Self {
                game,
                matchmaker,
                transport: None,
                generator: Arc::new(generator),
                clock,
                sender: sender.clone(),
                events,
                generated_tx,
                generated_rx,
                generation: None,
                epoch: 0,
                published,
            },
            sender,
            state,
        )
    }

    /// Runs until [`Event::Shutdown`] is received
    ///
    /// Returns the game in its final state.
    pub async fn run(mut self) -> Game {
        loop {
            let now = self.clock.now();
            self.game.fire_due_alarms(now);
            if self.game.phase() != Phase::Generating {
                self.cancel_generation();
            }
            self.publish(now);

            let wait = self
                .game
                .next_deadline()
                .map(|deadline| deadline.duration_since(now).unwrap_or_default());

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(Event::Shutdown) | None => break,
                    Some(event) => self.handle(event).await,
                },
                Some((epoch, result)) = self.generated_rx.recv() => self.generated(epoch, result),
                () = sleep(wait) => {}
            }
        }

        self.cancel_generation();
        tracing::debug!(phase = %self.game.phase(), "reactor stopped");
        self.game
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::RequestMatch => {
                let Some(request) = self.game.request_match() else {
                    return;
                };
                if let Some(previous) = self.transport.take() {
                    previous.disconnect();
                }
                self.publish(self.clock.now());

                match self
                    .matchmaker
                    .connect_to_session(&request, self.sender.clone())
                    .await
                {
                    Ok(Group {
                        transport,
                        local,
                        remotes,
                    }) => {
                        let command = self.game.group_formed(&local, &remotes, &transport);
                        self.transport = Some(transport);
                        self.perform(command);
                    }
                    Err(e) => self.game.matchmaking_failed(&e),
                }
            }
            Event::PeerMessage { from, payload } => {
                let Some(transport) = &self.transport else {
                    tracing::debug!(peer = %from, "dropping payload without a group");
                    return;
                };
                let Some(message) = message::receive(from, &payload) else {
                    return;
                };
                let command = self.game.receive(from, message, transport);
                self.perform(command);
            }
            Event::PeerStateChanged { peer, state } => self.game.peer_state_changed(peer, state),
            Event::SubmitAnswer(chosen) => {
                let Some(transport) = &self.transport else {
                    return;
                };
                if let Err(e) = self
                    .game
                    .submit_answer(&chosen, self.clock.now(), transport)
                {
                    tracing::debug!(error = %e, "answer rejected");
                }
            }
            Event::ToggleVoiceChat => {
                self.game.toggle_voice_chat(self.transport.as_ref());
            }
            Event::Stop => {
                self.game.stop(self.transport.take().as_ref());
            }
            Event::Shutdown => {}
        }
    }

    fn perform(&mut self, command: Option<Command>) {
        let Some(Command::GenerateRounds { point_count }) = command else {
            return;
        };

        self.cancel_generation();
        self.epoch += 1;

        let epoch = self.epoch;
        let generator = Arc::clone(&self.generator);
        let results = self.generated_tx.clone();

        let task = tokio::spawn(async move {
            let result = generator.generate(point_count).await;
            if results.send((epoch, result)).is_err() {
                tracing::debug!("reactor stopped before rounds were generated");
            }
        });
        self.generation = Some(Generation { epoch, task });
    }

    fn generated(&mut self, epoch: u64, result: Result<RoundSet, rounds::Error>) {
        if self
            .generation
            .as_ref()
            .is_none_or(|generation| generation.epoch != epoch)
        {
            tracing::debug!(epoch, "discarding rounds of a cancelled generation");
            return;
        }
        self.generation = None;

        let now = self.clock.now();
        if let Some(transport) = &self.transport {
            self.game.rounds_generated(result, now, transport);
        }
    }

    fn cancel_generation(&mut self) {
        if let Some(Generation { epoch, task }) = self.generation.take() {
            tracing::debug!(epoch, "aborting round generation");
            task.abort();
        }
    }

    fn publish(&self, now: SystemTime) {
        let state = self.game.published_state(now);
        self.published.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}
