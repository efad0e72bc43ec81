//! Game actors.
//!
//! Each game runs in its own tokio task that owns the [`GameSession`] and
//! drains an `mpsc` queue of [`GameCommand`]s, so commands for one game are
//! processed strictly in arrival order and games never share mutable state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::game::action::Action;
use crate::game::events::Event;
use crate::game::state::{GameId, GameSettings, GameState};
use crate::store::{EventLog, MemoryEventLog, MemorySnapshotStore, SnapshotStore};

use super::game::{GameSession, SessionConfig, SessionStats};
use super::SessionError;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Messages understood by a game actor.
#[derive(Debug)]
pub enum GameCommand {
    /// Run a player action.
    Submit {
        /// The action.
        action: Action,
        /// Processing time.
        now: DateTime<Utc>,
        /// Committed events or the rejection.
        reply: Reply<Vec<Event>>,
    },
    /// Advance the phase if it is over.
    Tick {
        /// Scheduler time.
        now: DateTime<Utc>,
        /// Committed events (empty if the phase is still running).
        reply: Reply<Vec<Event>>,
    },
    /// Copy of the current state.
    State {
        /// Reply channel.
        reply: oneshot::Sender<GameState>,
    },
    /// Session counters.
    Stats {
        /// Reply channel.
        reply: oneshot::Sender<SessionStats>,
    },
    /// New broadcast receiver.
    Subscribe {
        /// Reply channel.
        reply: oneshot::Sender<broadcast::Receiver<Event>>,
    },
    /// Stop the actor after the commands already queued.
    Shutdown,
}

/// Cloneable handle to a running game actor.
#[derive(Debug, Clone)]
pub struct GameHandle {
    game_id: GameId,
    tx: mpsc::Sender<GameCommand>,
}

impl GameHandle {
    /// Spawn an actor that owns `session`.
    pub fn spawn(session: GameSession, buffer: usize) -> (Self, JoinHandle<()>) {
        let game_id = session.state().id.clone();
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(run_actor(session, rx));
        (Self { game_id, tx }, task)
    }

    /// Game this handle talks to.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    async fn send(&self, command: GameCommand) -> Result<(), SessionError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::ActorStopped)
    }

    /// Submit an action.
    pub async fn submit(&self, action: Action, now: DateTime<Utc>) -> Result<Vec<Event>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameCommand::Submit { action, now, reply }).await?;
        rx.await.map_err(|_| SessionError::ActorStopped)?
    }

    /// Advance the phase if it is over.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Event>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameCommand::Tick { now, reply }).await?;
        rx.await.map_err(|_| SessionError::ActorStopped)?
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> Result<GameState, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameCommand::State { reply }).await?;
        rx.await.map_err(|_| SessionError::ActorStopped)
    }

    /// Session counters.
    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameCommand::Stats { reply }).await?;
        rx.await.map_err(|_| SessionError::ActorStopped)
    }

    /// Subscribe to committed events.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<Event>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(GameCommand::Subscribe { reply }).await?;
        rx.await.map_err(|_| SessionError::ActorStopped)
    }

    /// Ask the actor to stop.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(GameCommand::Shutdown).await
    }
}

async fn run_actor(mut session: GameSession, mut rx: mpsc::Receiver<GameCommand>) {
    let game_id = session.state().id.clone();
    debug!(game_id = %game_id, "Game actor started");

    while let Some(command) = rx.recv().await {
        match command {
            GameCommand::Submit { action, now, reply } => {
                let _ = reply.send(session.submit(&action, now));
            }
            GameCommand::Tick { now, reply } => {
                let result = session.tick(now);
                if let Err(e) = &result {
                    warn!(game_id = %game_id, error = %e, "Tick failed");
                }
                let _ = reply.send(result);
            }
            GameCommand::State { reply } => {
                let _ = reply.send(session.state().clone());
            }
            GameCommand::Stats { reply } => {
                let _ = reply.send(session.stats());
            }
            GameCommand::Subscribe { reply } => {
                let _ = reply.send(session.subscribe());
            }
            GameCommand::Shutdown => break,
        }
    }

    info!(game_id = %game_id, sequence = session.sequence(), "Game actor stopped");
}

/// A live actor and its task.
#[derive(Debug)]
struct RunningGame {
    handle: GameHandle,
    task: JoinHandle<()>,
}

impl RunningGame {
    /// Stop the actor and wait until it has drained its queue and exited.
    async fn stop(self) {
        let game_id = self.handle.game_id().to_string();
        if self.handle.shutdown().await.is_err() {
            debug!(game_id = %game_id, "Actor already stopped");
        }
        if let Err(e) = self.task.await {
            warn!(game_id = %game_id, error = %e, "Game actor task failed");
        }
    }
}

/// Creates, recovers, and tracks game actors.
pub struct GameManager {
    config: SessionConfig,
    log: Arc<dyn EventLog>,
    snapshots: Arc<dyn SnapshotStore>,
    games: RwLock<BTreeMap<GameId, RunningGame>>,
}

impl GameManager {
    /// Manager over the given stores.
    pub fn new(config: SessionConfig, log: Arc<dyn EventLog>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            config,
            log,
            snapshots,
            games: RwLock::new(BTreeMap::new()),
        }
    }

    /// Manager over fresh in-memory stores.
    pub fn in_memory(config: SessionConfig) -> Self {
        Self::new(
            config,
            Arc::new(MemoryEventLog::new()),
            Arc::new(MemorySnapshotStore::new()),
        )
    }

    /// The event log.
    pub fn log(&self) -> Arc<dyn EventLog> {
        self.log.clone()
    }

    /// The snapshot store.
    pub fn snapshots(&self) -> Arc<dyn SnapshotStore> {
        self.snapshots.clone()
    }

    /// Create a game with a random ID.
    pub async fn create_game(
        &self,
        settings: GameSettings,
        now: DateTime<Utc>,
    ) -> Result<GameHandle, SessionError> {
        self.create_game_with_id(Uuid::new_v4().to_string(), settings, now)
            .await
    }

    /// Create a game with a chosen ID.
    #[instrument(skip(self, settings))]
    pub async fn create_game_with_id(
        &self,
        game_id: GameId,
        settings: GameSettings,
        now: DateTime<Utc>,
    ) -> Result<GameHandle, SessionError> {
        let mut games = self.games.write().await;
        if games.contains_key(&game_id) {
            return Err(SessionError::GameExists(game_id));
        }

        let session = GameSession::create(
            game_id.clone(),
            settings,
            now,
            self.config.clone(),
            self.log.clone(),
            self.snapshots.clone(),
        )?;
        let (handle, task) = GameHandle::spawn(session, self.config.command_buffer);
        games.insert(
            game_id,
            RunningGame {
                handle: handle.clone(),
                task,
            },
        );
        Ok(handle)
    }

    /// Rebuild a game from the stores and start its actor.
    ///
    /// A running actor for the same game is stopped first, after the commands
    /// already queued to it have been committed, so the rebuilt session starts
    /// from the end of the log.
    #[instrument(skip(self))]
    pub async fn recover_game(&self, game_id: &str) -> Result<GameHandle, SessionError> {
        let previous = self.games.write().await.remove(game_id);
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let session = GameSession::restore(
            game_id,
            self.config.clone(),
            self.log.clone(),
            self.snapshots.clone(),
        )?;
        let (handle, task) = GameHandle::spawn(session, self.config.command_buffer);
        let running = RunningGame {
            handle: handle.clone(),
            task,
        };

        let mut games = self.games.write().await;
        if games.contains_key(game_id) {
            drop(games);
            running.stop().await;
            return Err(SessionError::GameExists(game_id.to_string()));
        }
        games.insert(game_id.to_string(), running);
        Ok(handle)
    }

    /// Look up a running game.
    pub async fn get(&self, game_id: &str) -> Option<GameHandle> {
        self.games
            .read()
            .await
            .get(game_id)
            .map(|running| running.handle.clone())
    }

    /// Stop and forget a game. Its log and snapshots stay.
    ///
    /// Returns once the actor has exited.
    pub async fn remove(&self, game_id: &str) -> bool {
        let removed = self.games.write().await.remove(game_id);
        match removed {
            Some(running) => {
                running.stop().await;
                info!(game_id, "Game removed");
                true
            }
            None => false,
        }
    }

    /// Number of running games.
    pub async fn game_count(&self) -> usize {
        self.games.read().await.len()
    }
}

impl std::fmt::Debug for GameManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
