//! Dump format, export and import.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ArchiveError;
use crate::config::EngineConfig;
use crate::core::clock::ManualClock;
use crate::error::EngineError;
use crate::game::dynamics::Dynamics;
use crate::game::events::{Command, EventData};
use crate::game::log::{GameLog, MemoryLog};
use crate::game::ruleset::Ruleset;
use crate::game::state::PlayerId;
use crate::game::turn::{Turn, TurnKey};
use crate::registry::GameId;

/// Current dump format version.
pub const DUMP_VERSION: u32 = 1;

/// Flat archive of one game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDump {
    /// Format version.
    pub version: u32,
    /// Game id.
    pub id: GameId,
    /// Ruleset, once chosen.
    pub ruleset: Option<Ruleset>,
    /// Players in canonical order.
    pub players: Vec<DumpPlayer>,
    /// Turns in order.
    pub turns: Vec<DumpTurn>,
}

/// Player entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpPlayer {
    /// Username.
    pub username: String,
}

/// Turn entry with its persisted events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpTurn {
    /// Turn key.
    pub key: TurnKey,
    /// Begin of the turn.
    pub begin: DateTime<Utc>,
    /// End of the turn, if known.
    pub end: Option<DateTime<Utc>>,
    /// Non-automatic events, in log order.
    pub events: Vec<DumpEvent>,
}

/// Event entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpEvent {
    /// Game time.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub data: EventData,
}

impl GameDump {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, ArchiveError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse JSON.
    pub fn from_json(data: &str) -> Result<Self, ArchiveError> {
        let dump: GameDump = serde_json::from_str(data)?;
        if dump.version != DUMP_VERSION {
            return Err(ArchiveError::UnsupportedVersion(dump.version));
        }
        Ok(dump)
    }

    /// Number of archived events.
    pub fn event_count(&self) -> usize {
        self.turns.iter().map(|turn| turn.events.len()).sum()
    }
}

/// Players named by a non-automatic event.
fn referenced_players(data: &EventData) -> Vec<PlayerId> {
    match data {
        EventData::Command(command) => {
            let mut players = vec![command.player()];
            match *command {
                Command::UsePower { target, target2, .. } => players.extend(target.into_iter().chain(target2)),
                Command::Vote { target, .. } | Command::Elect { target, .. } | Command::Appoint { target, .. } => {
                    players.extend(target)
                }
            }
            players
        }
        EventData::SoothsayerModel { soothsayer, target, .. } => vec![*soothsayer, *target],
        EventData::Disqualification { player, .. } => vec![*player],
        _ => Vec::new(),
    }
}

/// Archive the game replayed by `dynamics`.
pub fn export(dynamics: &Dynamics) -> Result<GameDump, ArchiveError> {
    let log = dynamics.log();
    let mut turns = Vec::new();
    for turn in log.turns().map_err(EngineError::from)? {
        let events = log
            .events_after(turn.key, None)
            .map_err(EngineError::from)?
            .into_iter()
            .filter(|event| !event.data.is_automatic())
            .map(|event| DumpEvent { timestamp: event.timestamp, data: event.data })
            .collect();
        turns.push(DumpTurn { key: turn.key, begin: turn.begin, end: turn.end, events });
    }

    Ok(GameDump {
        version: DUMP_VERSION,
        id: dynamics.game_id(),
        ruleset: dynamics.state().ruleset,
        players: dynamics
            .players()
            .iter()
            .map(|p| DumpPlayer { username: p.username.clone() })
            .collect(),
        turns,
    })
}

/// Rebuild an engine from a dump.
///
/// The log is pre-populated with the archived turns and events and the
/// clock stopped at the begin of the last turn, so replay reproduces the
/// archived game without opening new turns.
pub fn import(dump: &GameDump, config: EngineConfig) -> Result<Dynamics, ArchiveError> {
    let players = dump.players.len();
    let log = MemoryLog::new();
    let mut last_begin = None;

    let mut previous: Option<&DumpTurn> = None;
    for entry in &dump.turns {
        let follows = match previous {
            None => entry.key == TurnKey::first(),
            Some(prev) => entry.key == prev.key.next() && prev.end == Some(entry.begin),
        };
        if !follows {
            return Err(ArchiveError::TurnSequence(entry.key));
        }
        previous = Some(entry);
    }

    for entry in &dump.turns {
        let turn = Turn { key: entry.key, begin: entry.begin, end: entry.end };
        log.create_turn(&turn).map_err(EngineError::from)?;
        for event in &entry.events {
            if let Some(unknown) = referenced_players(&event.data).into_iter().find(|p| p.index() >= players) {
                return Err(ArchiveError::UnknownPlayer(unknown));
            }
            log.append(entry.key, event.timestamp, event.data.clone()).map_err(EngineError::from)?;
        }
        last_begin = Some(entry.begin);
    }

    let clock = ManualClock::new(last_begin.unwrap_or_else(Utc::now));
    let mut dynamics = Dynamics::new(
        dump.id,
        dump.players.iter().map(|p| p.username.clone()),
        Arc::new(log),
        Arc::new(clock),
        config,
    );
    dynamics.update()?;
    info!(
        "Imported game {} ({} players, {} turns, {} events)",
        dump.id,
        players,
        dump.turns.len(),
        dump.event_count()
    );
    Ok(dynamics)
}
