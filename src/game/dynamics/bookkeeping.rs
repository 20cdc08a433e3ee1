//! End-of-phase bookkeeping after Dawn and Sunset.

use tracing::info;

use super::Dynamics;
use crate::ensure_invariant;
use crate::error::EngineError;
use crate::game::events::{EventData, ExileCause, MayorCause, VictoryCause};
use crate::game::powers;
use crate::game::state::{PlayerId, Team};

impl Dynamics {
    pub(super) fn bookkeeping(&mut self) -> Result<(), EngineError> {
        self.apply_deaths()?;
        self.apply_disqualifications()?;
        self.apply_team_defeats()?;
        if !self.state.over {
            self.check_victory()?;
        }
        self.check_succession()
    }

    fn apply_deaths(&mut self) -> Result<(), EngineError> {
        let phase = self.state.phase()?;
        let mut deaths = std::mem::take(&mut self.state.upcoming_deaths);
        self.state.rng.shuffle(&mut deaths);

        for (id, cause) in deaths {
            ensure_invariant!(cause.phase() == phase, "{cause:?} death during {phase}");
            let player = self.state.player_mut(id)?;
            ensure_invariant!(player.alive && player.just_dead, "player {id} cannot die");
            player.alive = false;
            player.just_dead = false;
            info!("Game {}: player {} died ({:?})", self.game_id, id, cause);
            powers::post_death(&mut self.state, id)?;
            self.drain()?;
        }
        Ok(())
    }

    fn apply_disqualifications(&mut self) -> Result<(), EngineError> {
        let pending = std::mem::take(&mut self.state.pending_disqualifications);
        for id in pending {
            if !self.state.player(id)?.active {
                continue;
            }
            self.state.generate(EventData::Exile { player: id, cause: ExileCause::Disqualification });
            self.drain()?;
        }
        Ok(())
    }

    /// Exile every member of a team that lost its last leader. Exiling a
    /// living member may doom another team, so this runs to a fixpoint.
    fn apply_team_defeats(&mut self) -> Result<(), EngineError> {
        loop {
            let Some(team) = self
                .state
                .dying_teams
                .iter()
                .find(|team| !self.state.defeated_teams.contains(*team))
                .copied()
            else {
                return Ok(());
            };

            self.state.defeated_teams.insert(team);
            info!("Game {}: team {:?} defeated", self.game_id, team);
            let members: Vec<PlayerId> = self.state.active_players().filter(|p| p.team == team).map(|p| p.id).collect();
            for member in members {
                if self.state.player(member)?.active {
                    self.state.generate(EventData::Exile { player: member, cause: ExileCause::TeamDefeat });
                    self.drain()?;
                }
            }
        }
    }

    fn check_victory(&mut self) -> Result<(), EngineError> {
        let ruleset = self.state.ruleset.unwrap_or_default();
        let living: Vec<Team> = ruleset
            .teams()
            .iter()
            .copied()
            .filter(|team| !self.state.dying_teams.contains(team))
            .filter(|team| self.state.alive_players().any(|p| p.team == *team))
            .collect();

        let winners = match living.len() {
            0 => self.state.last_living_teams.clone(),
            1 => living,
            _ => {
                self.state.last_living_teams = living;
                return Ok(());
            }
        };
        info!("Game {}: victory of {:?}", self.game_id, winners);
        self.state.generate(EventData::Victory { winners, cause: VictoryCause::Natural });
        self.drain()
    }

    fn check_succession(&mut self) -> Result<(), EngineError> {
        let Some(mayor) = self.state.mayor else {
            return Ok(());
        };
        if self.state.player(mayor)?.is_alive_and_active() {
            return Ok(());
        }

        let deputy = self
            .state
            .deputy
            .filter(|d| self.state.get(*d).map_or(false, |p| p.is_alive_and_active()));
        let event = match deputy {
            Some(deputy) => EventData::SetMayor { player: Some(deputy), cause: MayorCause::SuccessionChosen },
            None => {
                let living: Vec<PlayerId> = self.state.alive_players().map(|p| p.id).collect();
                let successor = self.state.rng.choose(&living).copied();
                EventData::SetMayor { player: successor, cause: MayorCause::SuccessionRandom }
            }
        };
        self.state.generate(event);
        self.drain()?;

        if let Some(mayor) = self.state.mayor {
            ensure_invariant!(
                self.state.simulating || self.state.player(mayor)?.is_alive_and_active(),
                "mayor {mayor} dead after succession"
            );
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
