//! Event Log Adapter
//!
//! The engine reads turns and events through [`GameLog`] and never mutates
//! stored events: it only creates turns, closes them and appends. Storage
//! itself belongs to the embedding application; [`MemoryLog`] is the
//! in-process implementation used by the binary, imports and tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::error::LogError;
use crate::game::events::{Event, EventData};
use crate::game::turn::{Turn, TurnKey};

/// Position of a persisted event inside its turn.
///
/// Ordered by timestamp, then sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Per-turn sequence.
    pub sequence: u64,
}

impl LogPosition {
    /// Position of a persisted event.
    pub fn of(event: &Event) -> Option<Self> {
        event.sequence.map(|sequence| Self { timestamp: event.timestamp, sequence })
    }
}

/// Append-only store of turns and events of one game.
pub trait GameLog: Send + Sync {
    /// Stored turn, if any.
    fn get_turn(&self, key: TurnKey) -> Result<Option<Turn>, LogError>;

    /// Store a new turn. Fails with [`LogError::TurnConflict`] if a turn
    /// with the same key exists.
    fn create_turn(&self, turn: &Turn) -> Result<(), LogError>;

    /// Change the end of a stored turn.
    fn set_turn_end(&self, key: TurnKey, end: Option<DateTime<Utc>>) -> Result<(), LogError>;

    /// Append an event, assigning the next sequence of its turn.
    fn append(&self, turn: TurnKey, timestamp: DateTime<Utc>, data: EventData) -> Result<Event, LogError>;

    /// Events of `turn` strictly after `after`, ordered by position.
    fn events_after(&self, turn: TurnKey, after: Option<LogPosition>) -> Result<Vec<Event>, LogError>;

    /// Number of automatic events stored for `turn`.
    fn count_automatic(&self, turn: TurnKey) -> Result<u64, LogError>;

    /// Delete every stored automatic event. Returns how many were removed.
    fn purge_automatic(&self) -> Result<usize, LogError>;

    /// Every stored turn, in order.
    fn turns(&self) -> Result<Vec<Turn>, LogError>;
}

#[derive(Debug)]
struct TurnRecord {
    turn: Turn,
    events: Vec<Event>,
    next_sequence: u64,
}

/// In-memory log. Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<BTreeMap<TurnKey, TurnRecord>>>,
}

impl MemoryLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<TurnKey, TurnRecord>>, LogError> {
        self.inner.lock().map_err(|_| LogError::Poisoned)
    }

    /// Total number of stored events.
    pub fn len(&self) -> Result<usize, LogError> {
        Ok(self.lock()?.values().map(|record| record.events.len()).sum())
    }

    /// Whether no event is stored.
    pub fn is_empty(&self) -> Result<bool, LogError> {
        Ok(self.len()? == 0)
    }
}

impl GameLog for MemoryLog {
    fn get_turn(&self, key: TurnKey) -> Result<Option<Turn>, LogError> {
        Ok(self.lock()?.get(&key).map(|record| record.turn.clone()))
    }

    fn create_turn(&self, turn: &Turn) -> Result<(), LogError> {
        let mut turns = self.lock()?;
        if turns.contains_key(&turn.key) {
            return Err(LogError::TurnConflict(turn.key));
        }
        turns.insert(turn.key, TurnRecord { turn: turn.clone(), events: Vec::new(), next_sequence: 0 });
        Ok(())
    }

    fn set_turn_end(&self, key: TurnKey, end: Option<DateTime<Utc>>) -> Result<(), LogError> {
        let mut turns = self.lock()?;
        let record = turns.get_mut(&key).ok_or(LogError::UnknownTurn(key))?;
        record.turn.end = end;
        Ok(())
    }

    fn append(&self, turn: TurnKey, timestamp: DateTime<Utc>, data: EventData) -> Result<Event, LogError> {
        let mut turns = self.lock()?;
        let record = turns.get_mut(&turn).ok_or(LogError::UnknownTurn(turn))?;
        let event = Event { turn, timestamp, sequence: Some(record.next_sequence), data };
        record.next_sequence += 1;
        record.events.push(event.clone());
        Ok(event)
    }

    fn events_after(&self, turn: TurnKey, after: Option<LogPosition>) -> Result<Vec<Event>, LogError> {
        let turns = self.lock()?;
        let Some(record) = turns.get(&turn) else {
            return Ok(Vec::new());
        };
        let mut events: Vec<Event> = record
            .events
            .iter()
            .filter(|event| match (after, LogPosition::of(event)) {
                (Some(after), Some(position)) => position > after,
                _ => true,
            })
            .cloned()
            .collect();
        events.sort_by_key(|event| LogPosition::of(event));
        Ok(events)
    }

    fn count_automatic(&self, turn: TurnKey) -> Result<u64, LogError> {
        let turns = self.lock()?;
        Ok(turns
            .get(&turn)
            .map_or(0, |record| record.events.iter().filter(|e| e.data.is_automatic()).count() as u64))
    }

    fn purge_automatic(&self) -> Result<usize, LogError> {
        let mut turns = self.lock()?;
        let mut removed = 0;
        for record in turns.values_mut() {
            let before = record.events.len();
            record.events.retain(|event| !event.data.is_automatic());
            removed += before - record.events.len();
        }
        Ok(removed)
    }

    fn turns(&self) -> Result<Vec<Turn>, LogError> {
        Ok(self.lock()?.values().map(|record| record.turn.clone()).collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
