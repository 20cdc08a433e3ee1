//! Replay verification of dumps.

use tracing::{info, warn};

use super::{import, ArchiveError, GameDump};
use crate::config::EngineConfig;
use crate::core::hash::{short_hex, StateHash};

/// Outcome of a successful verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationReport {
    /// Projection hash both replays agree on.
    pub state_hash: StateHash,
    /// History hash both replays agree on.
    pub history_hash: StateHash,
    /// Events applied by a replay, generated ones included.
    pub applied_events: usize,
    /// The archived game has ended.
    pub over: bool,
}

/// Replay `dump` twice from scratch and require identical projections.
pub fn verify_dump(dump: &GameDump, config: &EngineConfig) -> Result<VerificationReport, ArchiveError> {
    let first = import(dump, config.clone())?;
    let second = import(dump, config.clone())?;

    let first_hash = first.state_hash()?;
    let second_hash = second.state_hash()?;
    if first_hash != second_hash || first.history_hash()? != second.history_hash()? {
        warn!("Game {}: replays disagree", dump.id);
        return Err(ArchiveError::HashMismatch {
            first: hex::encode(first_hash),
            second: hex::encode(second_hash),
        });
    }

    info!("Game {} verified: {}", dump.id, short_hex(&first_hash));
    Ok(VerificationReport {
        state_hash: first_hash,
        history_hash: first.history_hash()?,
        applied_events: first.history().len(),
        over: first.is_over(),
    })
}
