//! Core deterministic primitives.
//!
//! Everything the engine draws at random goes through the single
//! [`DeterministicRng`] stream, and every comparison between replays goes
//! through [`StateHasher`].

pub mod rng;
pub mod hash;
pub mod clock;

// Re-export core types
pub use rng::DeterministicRng;
pub use hash::{StateHash, StateHasher};
pub use clock::{Clock, ManualClock, SystemClock};
