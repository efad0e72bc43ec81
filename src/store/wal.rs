//! Append-only event log.
//!
//! Records are stored JSON-encoded, one string per event, the same shape a
//! Redis stream entry would have. Decoding happens here, so callers only ever
//! see typed [`Event`]s; unknown event kinds survive as `EventPayload::Unknown`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::debug;

use crate::game::events::Event;
use crate::game::state::GameId;

use super::StoreError;

/// A decoded log record.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    /// 1-based position in the game's log.
    pub sequence: u64,
    /// The event.
    pub event: Event,
}

/// Durable, ordered per-game event storage.
pub trait EventLog: Send + Sync {
    /// Append an event and return its sequence number.
    fn append(&self, game_id: &str, event: &Event) -> Result<u64, StoreError>;

    /// All entries with `sequence > after`, in order.
    fn read_since(&self, game_id: &str, after: u64) -> Result<Vec<LogEntry>, StoreError>;

    /// Sequence of the last appended entry (0 if empty).
    fn last_sequence(&self, game_id: &str) -> Result<u64, StoreError>;
}

/// In-memory log. JSON strings behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    streams: Mutex<BTreeMap<GameId, Vec<String>>>,
}

impl MemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw record, bypassing encoding. Used to load foreign or legacy records.
    pub fn append_raw(&self, game_id: &str, record: impl Into<String>) -> Result<u64, StoreError> {
        let mut streams = self.streams.lock().map_err(|_| StoreError::Poisoned)?;
        let stream = streams.entry(game_id.to_string()).or_default();
        stream.push(record.into());
        Ok(stream.len() as u64)
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, game_id: &str, event: &Event) -> Result<u64, StoreError> {
        let record = serde_json::to_string(event).map_err(|source| StoreError::Encode {
            game_id: game_id.to_string(),
            source,
        })?;
        let sequence = self.append_raw(game_id, record)?;
        debug!(game_id, sequence, kind = event.kind(), "Event appended");
        Ok(sequence)
    }

    fn read_since(&self, game_id: &str, after: u64) -> Result<Vec<LogEntry>, StoreError> {
        let streams = self.streams.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(stream) = streams.get(game_id) else {
            return Ok(Vec::new());
        };

        stream
            .iter()
            .enumerate()
            .map(|(i, record)| (i as u64 + 1, record))
            .filter(|(sequence, _)| *sequence > after)
            .map(|(sequence, record)| {
                serde_json::from_str(record)
                    .map(|event| LogEntry { sequence, event })
                    .map_err(|source| StoreError::Decode {
                        game_id: game_id.to_string(),
                        sequence,
                        source,
                    })
            })
            .collect()
    }

    fn last_sequence(&self, game_id: &str) -> Result<u64, StoreError> {
        let streams = self.streams.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(streams.get(game_id).map(|s| s.len() as u64).unwrap_or(0))
    }
}
