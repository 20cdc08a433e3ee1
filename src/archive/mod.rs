//! Game archives.
//!
//! A dump holds the players, the turn windows and the persisted
//! non-automatic events of a game: enough to rebuild the engine by replay.

pub mod dump;
pub mod verify;

use thiserror::Error;

use crate::error::EngineError;
use crate::game::state::PlayerId;
use crate::game::turn::TurnKey;

pub use dump::{export, import, DumpEvent, DumpPlayer, DumpTurn, GameDump, DUMP_VERSION};
pub use verify::{verify_dump, VerificationReport};

/// Errors while reading, writing or replaying a dump.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Malformed JSON.
    #[error("Invalid dump: {0}")]
    Json(#[from] serde_json::Error),

    /// Dump written by an incompatible version.
    #[error("Unsupported dump version {0}")]
    UnsupportedVersion(u32),

    /// An event names a player missing from the dump.
    #[error("Event refers to unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// A turn does not follow the previous one, or leaves a gap after it.
    #[error("Turn {0} breaks the turn sequence")]
    TurnSequence(TurnKey),

    /// Replay failed.
    #[error("Replay failed: {0}")]
    Engine(#[from] EngineError),

    /// Two replays of the same dump disagree.
    #[error("Replays disagree: {first} != {second}")]
    HashMismatch {
        /// Hash of the first replay, hex.
        first: String,
        /// Hash of the second replay, hex.
        second: String,
    },
}
