//! # Lupus Dynamics Engine
//!
//! Deterministic rules engine for Lupus in Tabula, the Mafia/Werewolf
//! hidden-role game played over days of wall-clock time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    LUPUS ENGINE                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Seeded Wichmann-Hill PRNG                 │
//! │  ├── hash.rs     - Projection hashing for verification       │
//! │  └── clock.rs    - System and manual clocks                  │
//! │                                                              │
//! │  game/           - Game rules (deterministic)                │
//! │  ├── turn.rs     - Phases, turn keys, schedule               │
//! │  ├── roles.rs    - Role catalog                              │
//! │  ├── ruleset.rs  - Rulesets                                  │
//! │  ├── state.rs    - Player and game projection                │
//! │  ├── events.rs   - Event catalog                             │
//! │  ├── commands.rs - Player command validation                 │
//! │  ├── powers.rs   - Night power hooks                         │
//! │  ├── log.rs      - Event log adapter                         │
//! │  └── dynamics/   - Replay loop, dawn, sunset, bookkeeping    │
//! │                                                              │
//! │  archive/        - Dump export, import and verification      │
//! │  registry.rs     - One engine per game behind a lock         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The projection is a pure function of the persisted events, the turn
//! windows and the game seed:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - Time only enters through turn boundaries and event timestamps
//! - All randomness from one seeded stream per game
//!
//! Replaying the same log yields the same state hash on any platform.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod archive;
pub mod config;
pub mod core;
pub mod error;
pub mod game;
pub mod registry;

// Re-export commonly used types
pub use config::EngineConfig;
pub use core::rng::DeterministicRng;
pub use error::{EngineError, RuleViolation};
pub use game::dynamics::Dynamics;
pub use game::events::{Command, Event, EventData};
pub use game::state::{PlayerId, Team};
pub use registry::{EngineRegistry, GameId};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
