//! Game Sessions
//!
//! Wraps the pure core in something a server can drive:
//!
//! - `game`: one [`GameSession`] owns a game's state, its stores, and its
//!   subscribers. Synchronous; the only writer of its state.
//! - `manager`: [`GameManager`] runs each session inside its own tokio task
//!   and hands out cloneable [`GameHandle`]s that talk to it over a channel.

pub mod game;
pub mod manager;

pub use game::{EventCallback, GameSession, SessionConfig, SessionStats};
pub use manager::{GameCommand, GameHandle, GameManager};

use crate::game::processor::ActionRejection;
use crate::store::StoreError;

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The processor refused the action.
    #[error("Action rejected: {0}")]
    Rejected(#[from] ActionRejection),

    /// Persistence failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No such game in memory or in the stores.
    #[error("Game not found: {0}")]
    GameNotFound(String),

    /// A game with this ID is already running.
    #[error("Game already exists: {0}")]
    GameExists(String),

    /// The game's actor task is gone.
    #[error("Game actor stopped")]
    ActorStopped,
}
