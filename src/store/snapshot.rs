//! State snapshots.
//!
//! A snapshot pins a [`GameState`] to the log sequence it reflects, plus the
//! state hash for integrity. The per-night scratch sets are not serialized and
//! come back empty on load, so sessions only snapshot between nights.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::hash::StateHash;
use crate::game::state::{GameId, GameState};

use super::StoreError;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A persisted state at a known log position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version.
    pub version: u32,
    /// Owning game.
    pub game_id: GameId,
    /// Last log sequence folded into `state`.
    pub sequence: u64,
    /// `state.compute_hash()` at capture time.
    pub state_hash: StateHash,
    /// The state.
    pub state: GameState,
}

impl Snapshot {
    /// Capture `state` as of log position `sequence`.
    pub fn capture(state: &GameState, sequence: u64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            game_id: state.id.clone(),
            sequence,
            state_hash: state.compute_hash(),
            state: state.clone(),
        }
    }

    /// Check version and hash.
    pub fn verify(&self) -> Result<(), StoreError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion(self.version));
        }
        let actual = self.state.compute_hash();
        if actual != self.state_hash {
            warn!(
                game_id = %self.game_id,
                sequence = self.sequence,
                expected = %hex::encode(self.state_hash),
                actual = %hex::encode(actual),
                "Snapshot hash mismatch"
            );
            return Err(StoreError::HashMismatch {
                game_id: self.game_id.clone(),
                sequence: self.sequence,
            });
        }
        Ok(())
    }
}

/// Latest-snapshot-per-game storage.
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot, replacing any older one for the game.
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Load and verify the latest snapshot.
    fn load(&self, game_id: &str) -> Result<Option<Snapshot>, StoreError>;
}

/// In-memory snapshot store (JSON strings behind a mutex).
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<BTreeMap<GameId, String>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let record = serde_json::to_string(snapshot).map_err(|source| StoreError::Encode {
            game_id: snapshot.game_id.clone(),
            source,
        })?;
        let mut snapshots = self.snapshots.lock().map_err(|_| StoreError::Poisoned)?;
        snapshots.insert(snapshot.game_id.clone(), record);
        debug!(game_id = %snapshot.game_id, sequence = snapshot.sequence, "Snapshot saved");
        Ok(())
    }

    fn load(&self, game_id: &str) -> Result<Option<Snapshot>, StoreError> {
        let snapshots = self.snapshots.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(record) = snapshots.get(game_id) else {
            return Ok(None);
        };
        let snapshot: Snapshot =
            serde_json::from_str(record).map_err(|source| StoreError::Decode {
                game_id: game_id.to_string(),
                sequence: 0,
                source,
            })?;
        snapshot.verify()?;
        Ok(Some(snapshot))
    }
}
