//! Speculative pre-computation of the next Dawn or Sunset.

use tracing::info;

use super::Dynamics;
use crate::error::EngineError;
use crate::game::turn::Phase;

impl Dynamics {
    /// Run the next half phase on a scratch copy of the projection and keep
    /// only the generated events.
    ///
    /// Does nothing unless the current turn is a Day or Night whose end is
    /// known. Runs at most once per real turn.
    pub(super) fn simulate_next(&mut self) -> Result<(), EngineError> {
        let Some(current) = self.state.current_turn.clone() else {
            return Ok(());
        };
        let Some(end) = current.end else {
            return Ok(());
        };
        if self.state.over
            || !matches!(current.key.phase, Phase::Day | Phase::Night)
            || self.simulated_for == Some(current.key)
        {
            return Ok(());
        }

        let snapshot = self.state.clone();
        self.simulated_events.clear();

        let next = self.config.schedule.set_begin_end(current.key.next(), end, false);
        self.state.simulating = true;
        self.state.prev_turn = Some(current.clone());
        self.state.current_turn = Some(next.clone());
        self.state.position = None;
        self.state.stamp = Some(next.begin);

        let result = match next.key.phase {
            Phase::Dawn => self.compute_dawn(),
            Phase::Sunset => self.compute_sunset(),
            _ => Ok(()),
        };
        self.state = snapshot;
        result?;

        self.simulated_for = Some(current.key);
        info!(
            "Game {}: simulated {} ({} events)",
            self.game_id,
            next.key,
            self.simulated_events.len()
        );
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
