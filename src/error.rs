//! Engine errors.
//!
//! Two classes matter to callers. [`RuleViolation`] rejects player input
//! before anything is appended to the log; the engine is untouched.
//! [`EngineError::Invariant`] means replay found something impossible: the
//! engine marks itself failed and refuses every later call.

use thiserror::Error;

use crate::game::roles::RoleKind;
use crate::game::state::PlayerId;
use crate::game::turn::{Phase, TurnKey};

/// Errors surfaced by the dynamics engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Replay hit an impossible state. Fatal.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Player input rejected before append.
    #[error("rule violation: {0}")]
    Rule(#[from] RuleViolation),

    /// The engine failed earlier and refuses access.
    #[error("engine for game {0} has failed")]
    Failed(String),

    /// A turn that must exist is missing.
    #[error("turn not found: {0}")]
    TurnNotFound(TurnKey),

    /// Event log adapter error.
    #[error("event log: {0}")]
    Log(#[from] LogError),
}

impl EngineError {
    /// Whether this error marks the engine as failed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Rule(_))
    }
}

/// Reasons a non-automatic event is rejected at injection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    /// Event kind not accepted in the current phase.
    #[error("event not accepted during {0}")]
    WrongPhase(Phase),

    /// Engine-generated events cannot be injected.
    #[error("automatic events cannot be injected")]
    AutomaticEvent,

    /// Timestamp before the turn began or before the last applied event.
    #[error("timestamp outside the current turn")]
    TimestampOutOfTurn,

    /// The game already has winners.
    #[error("game is over")]
    GameOver,

    /// Player id not part of this game.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// Player was exiled or disqualified.
    #[error("player {0} is not active")]
    PlayerInactive(PlayerId),

    /// Player must be alive for this command.
    #[error("player {0} is dead")]
    PlayerDead(PlayerId),

    /// Player has no role yet.
    #[error("player {0} has no role")]
    NoRole(PlayerId),

    /// Role cannot use its power tonight.
    #[error("player {0} cannot use a power now")]
    PowerNotUsable(PlayerId),

    /// First target not allowed.
    #[error("invalid target {0}")]
    InvalidTarget(PlayerId),

    /// Second target not allowed or missing.
    #[error("invalid second target")]
    InvalidSecondTarget,

    /// Role class parameter not allowed.
    #[error("invalid role class {0}")]
    InvalidRoleClass(RoleKind),

    /// Power requires a role class parameter.
    #[error("missing role class")]
    MissingRoleClass,

    /// Appointment by someone other than the mayor.
    #[error("player {0} is not the mayor")]
    NotMayor(PlayerId),

    /// The mayor appointed themselves.
    #[error("the mayor cannot appoint themselves")]
    SelfAppointment,

    /// Rules already chosen, or not chosen yet.
    #[error("ruleset {0}")]
    Ruleset(&'static str),

    /// Role not part of the ruleset's starting roles.
    #[error("role {0} not available in this ruleset")]
    RoleNotAvailable(RoleKind),

    /// Every player already has a role.
    #[error("all roles already assigned")]
    TooManyRoles,

    /// The deck already holds as many critical blockers as dawn resolution
    /// supports.
    #[error("too many critical blockers in the deck")]
    TooManyBlockers,
}

/// Errors of the event log adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// Turn already stored by a concurrent writer.
    #[error("turn {0} already exists")]
    TurnConflict(TurnKey),

    /// Write to a turn that was never created.
    #[error("unknown turn {0}")]
    UnknownTurn(TurnKey),

    /// Storage lock poisoned by a panicking writer.
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Return [`EngineError::Invariant`] unless the condition holds.
#[macro_export]
macro_rules! ensure_invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::EngineError::Invariant(format!($($arg)+)));
        }
    };
}
