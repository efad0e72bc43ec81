//! Single-game session.
//!
//! Every state change goes through [`GameSession::commit`]:
//! append to the log, apply, notify, then maybe snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::game::action::Action;
use crate::game::events::{Event, EventFactory, EventPayload};
use crate::game::phase;
use crate::game::processor;
use crate::game::reducer::{apply_mut, ApplyOutcome};
use crate::game::rules;
use crate::game::state::{GameId, GameSettings, GameState};
use crate::store::{recover, EventLog, Snapshot, SnapshotStore};

use super::SessionError;

/// Listener invoked for every committed event, in order.
pub type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// Configuration for a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Events between snapshots.
    pub snapshot_interval: u64,
    /// Broadcast channel capacity (events).
    pub channel_capacity: usize,
    /// Actor command queue depth.
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 50,
            channel_capacity: 256,
            command_buffer: 64,
        }
    }
}

/// Counters kept by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Events the reducer applied.
    pub applied: u64,
    /// Events the reducer ignored (includes `unknown`).
    pub ignored: u64,
    /// Of the ignored, those of an unknown kind.
    pub unknown: u64,
    /// Actions the processor refused.
    pub rejected: u64,
    /// Snapshots written.
    pub snapshots: u64,
}

/// One live game.
pub struct GameSession {
    state: GameState,
    config: SessionConfig,
    log: Arc<dyn EventLog>,
    snapshots: Arc<dyn SnapshotStore>,
    callbacks: Vec<EventCallback>,
    event_tx: broadcast::Sender<Event>,
    stats: SessionStats,
    sequence: u64,
    snapshot_sequence: u64,
}

impl GameSession {
    fn with_state(
        state: GameState,
        sequence: u64,
        config: SessionConfig,
        log: Arc<dyn EventLog>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            state,
            config,
            log,
            snapshots,
            callbacks: Vec::new(),
            event_tx,
            stats: SessionStats::default(),
            sequence,
            snapshot_sequence: sequence,
        }
    }

    /// Open a new game in the lobby.
    ///
    /// Writes a genesis snapshot (so custom settings survive recovery), then
    /// commits GAME_CREATED.
    #[instrument(skip(settings, config, log, snapshots), fields(game_id = %game_id))]
    pub fn create(
        game_id: GameId,
        settings: GameSettings,
        now: DateTime<Utc>,
        config: SessionConfig,
        log: Arc<dyn EventLog>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self, SessionError> {
        let state = GameState::new(game_id.clone(), settings, now);
        snapshots.save(&Snapshot::capture(&state, 0))?;

        let mut session = Self::with_state(state, 0, config, log, snapshots);
        let mut events = EventFactory::new(game_id, now, "create");
        events.game(EventPayload::GameCreated {});
        session.commit(&events.finish())?;

        info!("Game created");
        Ok(session)
    }

    /// Rebuild a game from its stores.
    #[instrument(skip(config, log, snapshots))]
    pub fn restore(
        game_id: &str,
        config: SessionConfig,
        log: Arc<dyn EventLog>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self, SessionError> {
        let recovered = recover(game_id, log.as_ref(), snapshots.as_ref())?
            .ok_or_else(|| SessionError::GameNotFound(game_id.to_string()))?;

        let mut session =
            Self::with_state(recovered.state, recovered.sequence, config, log, snapshots);
        session.stats.ignored = recovered.ignored as u64;
        session.stats.applied = (recovered.replayed - recovered.ignored) as u64;
        info!(sequence = recovered.sequence, "Game restored");
        Ok(session)
    }

    /// Current state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Last committed log sequence.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Register a listener for committed events.
    pub fn on_event<F>(&mut self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Receive committed events over a broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Validate and commit a player action.
    #[instrument(skip(self, action), fields(game_id = %self.state.id, player = %action.player_id, kind = action.kind()))]
    pub fn submit(&mut self, action: &Action, now: DateTime<Utc>) -> Result<Vec<Event>, SessionError> {
        match processor::process(&self.state, action, now) {
            Ok(events) => {
                self.commit(&events)?;
                Ok(events)
            }
            Err(rejection) => {
                self.stats.rejected += 1;
                debug!(%rejection, "Action rejected");
                Err(rejection.into())
            }
        }
    }

    /// Advance the phase if its time is up.
    #[instrument(skip(self), fields(game_id = %self.state.id, phase = self.state.phase_type().as_str()))]
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<Event>, SessionError> {
        if !rules::is_phase_over(&self.state.phase, now) {
            return Ok(Vec::new());
        }
        let events = phase::advance(&self.state, now);
        self.commit(&events)?;
        Ok(events)
    }

    /// Append, apply, notify, then snapshot when due.
    pub fn commit(&mut self, events: &[Event]) -> Result<(), SessionError> {
        for event in events {
            let sequence = self.log.append(&self.state.id, event)?;
            self.sequence = sequence;

            match apply_mut(&mut self.state, event) {
                ApplyOutcome::Applied => self.stats.applied += 1,
                ApplyOutcome::Ignored => {
                    self.stats.ignored += 1;
                    if !event.payload.is_known() {
                        self.stats.unknown += 1;
                    }
                }
            }

            for callback in &self.callbacks {
                callback(event);
            }
            // No subscribers is fine
            let _ = self.event_tx.send(event.clone());
        }

        if self.sequence.saturating_sub(self.snapshot_sequence) >= self.config.snapshot_interval {
            self.snapshot()?;
        }
        Ok(())
    }

    /// Write a snapshot now. Returns `false` (and writes nothing) mid-night,
    /// while the unpersisted block/protect sets hold data.
    pub fn snapshot(&mut self) -> Result<bool, SessionError> {
        if !self.state.blocked_tonight.is_empty() || !self.state.protected_tonight.is_empty() {
            debug!(game_id = %self.state.id, "Snapshot deferred: night in progress");
            return Ok(false);
        }
        if self.sequence == self.snapshot_sequence {
            return Ok(false);
        }

        self.snapshots
            .save(&Snapshot::capture(&self.state, self.sequence))
            .map_err(|e| {
                warn!(game_id = %self.state.id, error = %e, "Snapshot failed");
                e
            })?;
        self.snapshot_sequence = self.sequence;
        self.stats.snapshots += 1;
        Ok(true)
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("game_id", &self.state.id)
            .field("phase", &self.state.phase_type())
            .field("sequence", &self.sequence)
            .field("stats", &self.stats)
            .finish()
    }
}
