//! Persistence
//!
//! Two seams, each a trait with an in-memory implementation:
//!
//! - `wal`: append-only event log ([`EventLog`])
//! - `snapshot`: latest state per game ([`SnapshotStore`])
//!
//! [`recover`] rebuilds a game from both.

pub mod snapshot;
pub mod wal;

pub use snapshot::{MemorySnapshotStore, Snapshot, SnapshotStore, SNAPSHOT_VERSION};
pub use wal::{EventLog, LogEntry, MemoryEventLog};

use tracing::info;

use crate::game::reducer::{apply_with_outcome, ApplyOutcome};
use crate::game::state::{GameSettings, GameState};

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record could not be serialized.
    #[error("Failed to encode record for game {game_id}: {source}")]
    Encode {
        /// Game being written.
        game_id: String,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A stored record could not be parsed.
    #[error("Failed to decode record {sequence} of game {game_id}: {source}")]
    Decode {
        /// Game being read.
        game_id: String,
        /// Log position (0 for snapshots).
        sequence: u64,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Snapshot written by an incompatible version.
    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    /// Snapshot contents do not match its recorded hash.
    #[error("Snapshot hash mismatch for game {game_id} at sequence {sequence}")]
    HashMismatch {
        /// Game.
        game_id: String,
        /// Snapshot position.
        sequence: u64,
    },

    /// A lock holder panicked.
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result of [`recover`].
#[derive(Clone, Debug)]
pub struct Recovered {
    /// Rebuilt state.
    pub state: GameState,
    /// Last log sequence folded in.
    pub sequence: u64,
    /// Log entries replayed on top of the snapshot.
    pub replayed: usize,
    /// Replayed entries the reducer ignored.
    pub ignored: usize,
}

/// Rebuild a game: load its snapshot, if any, then fold the log tail.
///
/// Without a snapshot the fold starts from a fresh lobby with default
/// settings, dated at the first logged event. Returns `None` when the game
/// has neither.
pub fn recover(
    game_id: &str,
    log: &dyn EventLog,
    snapshots: &dyn SnapshotStore,
) -> Result<Option<Recovered>, StoreError> {
    let snapshot = snapshots.load(game_id)?;
    let after = snapshot.as_ref().map(|s| s.sequence).unwrap_or(0);
    let tail = log.read_since(game_id, after)?;

    let mut state = match snapshot {
        Some(snapshot) => snapshot.state,
        None => match tail.first() {
            Some(first) => GameState::new(game_id, GameSettings::default(), first.event.timestamp),
            None => return Ok(None),
        },
    };

    let mut sequence = after;
    let mut ignored = 0;
    for entry in &tail {
        let (next, outcome) = apply_with_outcome(state, &entry.event);
        state = next;
        if outcome == ApplyOutcome::Ignored {
            ignored += 1;
        }
        sequence = entry.sequence;
    }

    info!(
        game_id,
        from_snapshot = after,
        replayed = tail.len(),
        ignored,
        sequence,
        "Game recovered"
    );
    Ok(Some(Recovered {
        state,
        sequence,
        replayed: tail.len(),
        ignored,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::{Event, EventFactory, EventPayload};
    use crate::game::reducer::replay;
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn history() -> Vec<Event> {
        let mut f = EventFactory::new("g", t0(), "recover");
        for id in ["alice", "bob", "carol"] {
            f.player(
                &id.into(),
                EventPayload::PlayerJoined {
                    name: id.to_string(),
                    job_title: String::new(),
                },
            );
        }
        f.player(
            &"bob".into(),
            EventPayload::TokensAwarded {
                amount: 4,
                reason: "bonus".into(),
            },
        );
        f.system_message("hello");
        f.player(
            &"alice".into(),
            EventPayload::TokensLost {
                amount: 1,
                reason: "fine".into(),
            },
        );
        f.finish()
    }

    #[test]
    fn test_recover_nothing() {
        let log = MemoryEventLog::new();
        let snaps = MemorySnapshotStore::new();
        assert!(recover("g", &log, &snaps).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_plus_tail_equals_full_replay() {
        let events = history();
        let initial = GameState::new("g", GameSettings::default(), t0());
        let log = MemoryEventLog::new();
        let snaps = MemorySnapshotStore::new();

        snaps.save(&Snapshot::capture(&initial, 0)).unwrap();
        for (i, e) in events.iter().enumerate() {
            let seq = log.append("g", e).unwrap();
            if i == 3 {
                let mid = replay(&initial, &events[..=i]);
                snaps.save(&Snapshot::capture(&mid, seq)).unwrap();
            }
        }

        let recovered = recover("g", &log, &snaps).unwrap().unwrap();
        let full = replay(&initial, &events);
        assert_eq!(recovered.sequence, events.len() as u64);
        assert_eq!(recovered.replayed, events.len() - 4);
        assert_eq!(recovered.state.compute_hash(), full.compute_hash());
        assert_eq!(recovered.state, full);
    }

    #[test]
    fn test_recover_without_snapshot() {
        let events = history();
        let log = MemoryEventLog::new();
        for e in &events {
            log.append("g", e).unwrap();
        }

        let recovered = recover("g", &log, &MemorySnapshotStore::new()).unwrap().unwrap();
        assert_eq!(recovered.state.players.len(), 3);
        assert_eq!(recovered.ignored, 0);
    }

    #[test]
    fn test_unknown_events_counted_as_ignored() {
        let log = MemoryEventLog::new();
        log.append_raw(
            "g",
            r#"{"id":"x","type":"QUARTERLY_BONUS","game_id":"g","timestamp":"2025-01-01T09:00:00Z","payload":{}}"#,
        )
        .unwrap();

        let recovered = recover("g", &log, &MemorySnapshotStore::new()).unwrap().unwrap();
        assert_eq!(recovered.ignored, 1);
        assert_eq!(recovered.sequence, 1);
    }
}
