//! Game Logic Module
//!
//! All rules code. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `turn`: Phases, turn keys and the wall-clock schedule
//! - `roles`: Role catalog and per-player role state
//! - `ruleset`: Team sets, quorum and variant rules
//! - `state`: Players and the engine projection
//! - `events`: Commands and the event catalog
//! - `commands`: Validation of injected events
//! - `powers`: Blocking, pre-conditions and effects of night powers
//! - `log`: Event log adapter
//! - `dynamics`: Replay loop and phase resolution

pub mod turn;
pub mod roles;
pub mod ruleset;
pub mod state;
pub mod events;
pub mod commands;
pub mod powers;
pub mod log;
pub mod dynamics;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use turn::{Phase, Turn, TurnKey, TurnSchedule};
pub use roles::RoleKind;
pub use ruleset::Ruleset;
pub use state::{EngineState, Player, PlayerId, Team, Aura};
pub use events::{Command, Event, EventData};
pub use log::{GameLog, MemoryLog};
pub use dynamics::Dynamics;
