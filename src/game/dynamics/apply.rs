//! Event application.
//!
//! Applying an event is the only way the projection changes. Persisted
//! events went through [`commands::validate`] at injection; here the same
//! facts are asserted again and any mismatch is an invariant violation.

use crate::core::rng::DeterministicRng;
use crate::ensure_invariant;
use crate::error::EngineError;
use crate::game::commands;
use crate::game::events::{
    Command, EventData, ExileCause, KnowledgeCause, MayorCause, TransformationCause, VictoryCause,
};
use crate::game::powers;
use crate::game::roles::{RecordedAction, Role, RoleKind};
use crate::game::state::{Aura, EngineState, PlayerId, SoothsayerProposition, Team};
use crate::game::turn::Phase;

impl EngineState {
    /// Phase of the current turn.
    pub fn phase(&self) -> Result<Phase, EngineError> {
        Ok(self.current_key()?.phase)
    }

    /// Apply one event to the projection.
    pub fn apply_event(&mut self, data: &EventData) -> Result<(), EngineError> {
        let phase = self.phase()?;
        ensure_invariant!(
            data.relevant_phases().contains(&phase),
            "{} applied during {phase}",
            data.name()
        );

        match data {
            EventData::Command(command) => {
                commands::validate_command(self, command)
                    .map_err(|err| EngineError::Invariant(format!("stored {} rejected: {err}", data.name())))?;
                self.record_command(command)
            }
            EventData::Seed { seed } => {
                self.rng = DeterministicRng::new(*seed);
                Ok(())
            }
            EventData::SetRules { ruleset } => {
                ensure_invariant!(self.ruleset.is_none(), "ruleset already set");
                self.ruleset = Some(*ruleset);
                self.last_living_teams = ruleset.teams().to_vec();
                Ok(())
            }
            EventData::AvailableRole { role } => self.add_available_role(*role),
            EventData::SpectralSequence { sequence } => {
                ensure_invariant!(self.spectral_sequence.is_none(), "spectral sequence drawn twice");
                self.spectral_sequence = Some(sequence.iter().copied().collect());
                Ok(())
            }
            EventData::SoothsayerModel { soothsayer, target, advertised_role } => {
                self.player(*soothsayer)?;
                self.player(*target)?;
                self.soothsayer_propositions.push(SoothsayerProposition {
                    soothsayer: *soothsayer,
                    target: *target,
                    advertised_role: *advertised_role,
                });
                self.generate(EventData::RoleKnowledge {
                    player: *soothsayer,
                    target: *target,
                    role: *advertised_role,
                    cause: KnowledgeCause::Soothsayer,
                });
                Ok(())
            }
            EventData::Disqualification { player, .. } => {
                ensure_invariant!(self.player(*player)?.active, "disqualifying inactive player {player}");
                self.pending_disqualifications.push(*player);
                Ok(())
            }
            EventData::ForceVictory { winners } => {
                self.generate(EventData::Victory { winners: winners.clone(), cause: VictoryCause::Forced });
                Ok(())
            }
            EventData::FreeText { .. } => Ok(()),

            EventData::SetRole { player, role } => self.set_role(*player, *role),
            EventData::SetMayor { player, cause } => self.set_mayor(*player, *cause),
            EventData::VoteAnnounced { .. }
            | EventData::TallyAnnounced { .. }
            | EventData::StakeFailed { .. }
            | EventData::RoleKnowledge { .. }
            | EventData::NegativeRoleKnowledge { .. }
            | EventData::MultipleRoleKnowledge { .. }
            | EventData::AuraKnowledge { .. }
            | EventData::MysticityKnowledge { .. }
            | EventData::MovementKnowledge { .. }
            | EventData::NoMovementKnowledge { .. }
            | EventData::QuantitativeMovementKnowledge { .. } => Ok(()),

            EventData::PlayerResurrects { player } => {
                let resurrected = self.player_mut(*player)?;
                ensure_invariant!(!resurrected.alive, "resurrecting living player {player}");
                let ghost = resurrected.is_ghost();
                if let Some(role) = resurrected.role.as_mut().filter(|_| ghost) {
                    ensure_invariant!(role.has_power, "ghost {player} resurrected twice");
                    role.has_power = false;
                }
                resurrected.alive = true;
                Ok(())
            }
            EventData::Transformation { player, target, role, cause } => {
                self.transform(*player, *target, *role, *cause)
            }
            EventData::Corruption { player } => {
                let corrupted = self.player_mut(*player)?;
                ensure_invariant!(corrupted.alive, "corrupting dead player {player}");
                ensure_invariant!(
                    corrupted.is_mystic && corrupted.aura == Aura::White,
                    "corrupting non mystic or black player {player}"
                );
                corrupted.role = Some(Role::new(RoleKind::Necromancer));
                corrupted.team = Team::Necromancers;
                Ok(())
            }
            EventData::PlayerDies { player, cause } => {
                self.player_mut(*player)?.just_dead = true;
                self.upcoming_deaths.push((*player, *cause));
                Ok(())
            }
            EventData::Hypnotization { player, hypnotist } => {
                ensure_invariant!(
                    self.player(*hypnotist)?.role_kind() == Some(RoleKind::Hypnotist),
                    "hypnotization by non hypnotist {hypnotist}"
                );
                self.player_mut(*player)?.hypnotist = Some(*hypnotist);
                Ok(())
            }
            EventData::Ghostification { player, ghost, .. } => self.ghostify(*player, *ghost),
            EventData::GhostSwitch { player, ghost, .. } => self.switch_ghost(*player, *ghost),
            EventData::GhostificationFailed { player } => {
                let phantom = self.player(*player)?;
                ensure_invariant!(
                    !phantom.alive && phantom.role_kind() == Some(RoleKind::Phantom),
                    "failed ghostification of {player}"
                );
                Ok(())
            }
            EventData::PowerOutcome { player, target, .. } => {
                let night = self.prev_turn.as_ref().map(|turn| turn.key);
                let role = self.role_mut(*player)?;
                role.last_usage = night;
                role.last_target = Some(*target);
                Ok(())
            }
            EventData::Exile { player, cause } => self.exile(*player, *cause),
            EventData::Victory { winners, .. } => {
                let mut winners = winners.clone();
                winners.sort();
                winners.dedup();
                self.winners = Some(winners);
                self.over = true;
                Ok(())
            }
        }
    }

    fn record_command(&mut self, command: &Command) -> Result<(), EngineError> {
        match *command {
            Command::UsePower { player, target, target2, role_class, ref role_set } => {
                self.role_mut(player)?.recorded = target.map(|target| RecordedAction {
                    target,
                    target2,
                    role_class,
                    role_set: role_set.clone(),
                });
            }
            Command::Vote { player, target } => self.player_mut(player)?.recorded_vote = target,
            Command::Elect { player, target } => self.player_mut(player)?.recorded_elect = target,
            Command::Appoint { target, .. } => self.deputy = target,
        }
        Ok(())
    }

    fn add_available_role(&mut self, role: RoleKind) -> Result<(), EngineError> {
        ensure_invariant!(self.ruleset.is_some(), "role {role} announced before the ruleset");
        ensure_invariant!(self.available_roles.len() < self.players.len(), "more roles than players");
        self.available_roles.push(role);
        if self.available_roles.len() == self.players.len() {
            self.deal_roles()?;
        }
        Ok(())
    }

    /// Draw the mayor, shuffle the roles and announce knowledge classes.
    fn deal_roles(&mut self) -> Result<(), EngineError> {
        let mut ids: Vec<PlayerId> = self.players.iter().map(|p| p.id).collect();
        let mayor = *self
            .rng
            .choose(&ids)
            .ok_or_else(|| EngineError::Invariant("dealing roles without players".into()))?;
        self.rng.shuffle(&mut ids);

        let mut dealt: Vec<(PlayerId, RoleKind)> =
            ids.into_iter().zip(self.available_roles.iter().copied()).collect();
        for &(player, role) in &dealt {
            self.generate(EventData::SetRole { player, role });
        }
        self.generate(EventData::SetMayor { player: Some(mayor), cause: MayorCause::Beginning });

        dealt.sort_by_key(|(player, _)| *player);
        for &(player, role) in &dealt {
            let Some(class) = role.traits().knowledge_class else {
                continue;
            };
            for &(target, other) in &dealt {
                if target != player && other.traits().knowledge_class == Some(class) {
                    self.generate(EventData::RoleKnowledge {
                        player,
                        target,
                        role: other,
                        cause: KnowledgeCause::KnowledgeClass,
                    });
                }
            }
        }
        Ok(())
    }

    fn set_role(&mut self, player: PlayerId, kind: RoleKind) -> Result<(), EngineError> {
        let count = self.assignments_per_role.entry(kind).or_insert(0);
        *count += 1;
        let count = *count;
        let duplicated = self.available_roles.iter().filter(|r| **r == kind).count() > 1;

        let traits = kind.traits();
        let aura = traits
            .aura
            .ok_or_else(|| EngineError::Invariant(format!("dealt role {kind} has no aura")))?;
        let mut role = Role::new(kind);
        if duplicated {
            role.label = char::from_u32('A' as u32 + count - 1);
        }

        let target = self.player_mut(player)?;
        ensure_invariant!(target.role.is_none(), "player {player} dealt twice");
        target.role = Some(role);
        target.team = traits.team;
        target.aura = aura;
        target.is_mystic = traits.is_mystic.unwrap_or(false);
        target.snapshot_apparent();
        Ok(())
    }

    fn set_mayor(&mut self, player: Option<PlayerId>, cause: MayorCause) -> Result<(), EngineError> {
        match player {
            Some(id) => {
                ensure_invariant!(self.player(id)?.alive, "dead mayor {id}");
                if cause == MayorCause::Beginning {
                    ensure_invariant!(
                        self.mayor.is_none() && self.deputy.is_none(),
                        "initial mayor drawn twice"
                    );
                }
                if self.mayor == Some(id) {
                    ensure_invariant!(cause == MayorCause::Elect, "mayor {id} reinstated by {cause:?}");
                } else {
                    self.mayor = Some(id);
                    self.deputy = None;
                }
            }
            None => {
                ensure_invariant!(cause == MayorCause::SuccessionRandom, "vacant mayor by {cause:?}");
                ensure_invariant!(self.alive_players().next().is_none(), "vacant mayor with living players");
                self.mayor = None;
                self.deputy = None;
            }
        }
        Ok(())
    }

    fn transform(
        &mut self,
        player: PlayerId,
        target: PlayerId,
        kind: RoleKind,
        cause: TransformationCause,
    ) -> Result<(), EngineError> {
        let source = self.player(target)?;
        ensure_invariant!(!source.alive, "copying living player {target}");
        let copied = if source.is_ghost() { source.role_before_ghost } else { source.role_kind() };
        ensure_invariant!(copied == Some(kind), "transformation into {kind} from {target}");
        let (aura, is_mystic) = (source.aura, source.is_mystic);

        let expected = match cause {
            TransformationCause::Transformist => RoleKind::Transformist,
            TransformationCause::Necrophiliac => RoleKind::Necrophiliac,
        };
        let transformed = self.player_mut(player)?;
        ensure_invariant!(transformed.alive, "transforming dead player {player}");
        ensure_invariant!(transformed.role_kind() == Some(expected), "transformation by {player}");
        ensure_invariant!(kind.traits().team == transformed.team, "transformation across teams");

        transformed.role = Some(Role::new(kind));
        transformed.aura = aura;
        transformed.is_mystic = is_mystic;
        transformed.just_transformed = true;
        Ok(())
    }

    fn ghostify(&mut self, player: PlayerId, ghost: RoleKind) -> Result<(), EngineError> {
        ensure_invariant!(ghost.is_ghost(), "{ghost} is not a ghost power");
        ensure_invariant!(!self.player(player)?.alive, "ghostifying living player {player}");
        if !ghost.allows_duplicates() {
            ensure_invariant!(!self.used_ghost_powers.contains(&ghost), "{ghost} handed out twice");
            self.used_ghost_powers.insert(ghost);
        }

        powers::pre_disappearance(self, player);

        let target = self.player_mut(player)?;
        ensure_invariant!(target.role_before_ghost.is_none(), "player {player} ghostified twice");
        target.role_before_ghost = target.role_kind();
        target.role = Some(Role::new(ghost));
        target.team = Team::Necromancers;
        Ok(())
    }

    /// Give a ghost another power; the old one becomes available again.
    fn switch_ghost(&mut self, player: PlayerId, ghost: RoleKind) -> Result<(), EngineError> {
        ensure_invariant!(ghost.is_ghost(), "{ghost} is not a ghost power");
        let old = self
            .player(player)?
            .role_kind()
            .filter(|kind| kind.is_ghost())
            .ok_or_else(|| EngineError::Invariant(format!("switching power of non ghost {player}")))?;
        if !old.allows_duplicates() {
            self.used_ghost_powers.remove(&old);
        }
        if !ghost.allows_duplicates() {
            ensure_invariant!(!self.used_ghost_powers.contains(&ghost), "{ghost} handed out twice");
            self.used_ghost_powers.insert(ghost);
        }
        self.player_mut(player)?.role = Some(Role::new(ghost));
        Ok(())
    }

    fn exile(&mut self, player: PlayerId, cause: ExileCause) -> Result<(), EngineError> {
        let was_alive = {
            let exiled = self.player(player)?;
            ensure_invariant!(exiled.active, "exiling inactive player {player}");
            exiled.alive
        };
        powers::pre_disappearance(self, player);

        let exiled = self.player_mut(player)?;
        exiled.active = false;
        if cause == ExileCause::Disqualification {
            exiled.disqualified = true;
        }
        if was_alive {
            powers::post_death(self, player)?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, VecDeque};

    use super::*;
    use crate::game::ruleset::Ruleset;
    use crate::game::turn::{Turn, TurnKey};
    use chrono::Utc;

    fn in_phase(players: usize, phase: Phase) -> EngineState {
        let mut state = EngineState::new((0..players).map(|i| format!("p{i}")));
        state.current_turn = Some(Turn { key: TurnKey::new(1, phase), begin: Utc::now(), end: None });
        state
    }

    fn drain(state: &mut EngineState) {
        while let Some(data) = state.queue.pop_front() {
            state.apply_event(&data).unwrap();
        }
    }

    fn dealt(roles: &[RoleKind], seed: u64) -> EngineState {
        let mut state = in_phase(roles.len(), Phase::Creation);
        state.apply_event(&EventData::Seed { seed }).unwrap();
        state.apply_event(&EventData::SetRules { ruleset: Ruleset::Negromanti }).unwrap();
        for role in roles {
            state.apply_event(&EventData::AvailableRole { role: *role }).unwrap();
        }
        drain(&mut state);
        state
    }

    #[test]
    fn test_wrong_phase_is_invariant() {
        let mut state = in_phase(2, Phase::Day);
        let err = state.apply_event(&EventData::Seed { seed: 1 }).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn test_rules_seed_living_teams() {
        let mut state = in_phase(3, Phase::Creation);
        assert!(state.last_living_teams.is_empty());
        state.apply_event(&EventData::SetRules { ruleset: Ruleset::Negromanti }).unwrap();
        assert_eq!(state.last_living_teams, vec![Team::Villagers, Team::Wolves, Team::Necromancers]);
    }

    #[test]
    fn test_dealing_roles() {
        use RoleKind::*;
        let state = dealt(&[Wolf, Wolf, Villager, Necromancer], 7);

        let mut kinds: Vec<RoleKind> = state.players.iter().filter_map(|p| p.role_kind()).collect();
        kinds.sort();
        assert_eq!(kinds, vec![Villager, Wolf, Wolf, Necromancer]);
        assert!(state.mayor.is_some());

        let mut labels: Vec<char> = state
            .players
            .iter()
            .filter(|p| p.role_kind() == Some(Wolf))
            .filter_map(|p| p.role.as_ref().and_then(|r| r.label))
            .collect();
        labels.sort();
        assert_eq!(labels, vec!['A', 'B']);
        assert!(state
            .players
            .iter()
            .filter(|p| p.role_kind() != Some(Wolf))
            .all(|p| p.role.as_ref().unwrap().label.is_none()));
    }

    #[test]
    fn test_dealing_is_deterministic() {
        use RoleKind::*;
        let roles = [Villager, Villager, Wolf, Seer, Necromancer, Phantom];
        let a = dealt(&roles, 99);
        let b = dealt(&roles, 99);
        assert_eq!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
    }

    #[test]
    fn test_ghostification_keeps_aura() {
        use RoleKind::*;
        let mut state = dealt(&[Seer, Wolf, Necromancer], 3);
        let seer = state.players.iter().find(|p| p.role_kind() == Some(Seer)).unwrap().id;
        state.players[seer.index()].alive = false;
        state.current_turn = Some(Turn { key: TurnKey::new(1, Phase::Dawn), begin: Utc::now(), end: None });

        state
            .apply_event(&EventData::Ghostification {
                player: seer,
                ghost: Vision,
                cause: crate::game::events::GhostificationCause::Necromancer,
            })
            .unwrap();
        let ghost = &state.players[seer.index()];
        assert_eq!(ghost.role_kind(), Some(Vision));
        assert_eq!(ghost.role_before_ghost, Some(Seer));
        assert_eq!(ghost.team, Team::Necromancers);
        assert!(ghost.is_mystic);
        assert!(state.used_ghost_powers.contains(&Vision));
    }

    #[test]
    fn test_delusions_and_switches() {
        use crate::game::events::GhostificationCause;
        use RoleKind::*;
        let mut state = dealt(&[Villager, Villager, Wolf, Necromancer], 3);
        let villagers = state.alive_with_role(Villager);
        for villager in &villagers {
            state.players[villager.index()].alive = false;
        }
        state.current_turn = Some(Turn { key: TurnKey::new(1, Phase::Dawn), begin: Utc::now(), end: None });

        let cause = GhostificationCause::SpectralSequence;
        for villager in &villagers {
            state.apply_event(&EventData::Ghostification { player: *villager, ghost: Delusion, cause }).unwrap();
        }
        assert!(state.used_ghost_powers.is_empty());

        let cause = GhostificationCause::Necromancer;
        state.apply_event(&EventData::GhostSwitch { player: villagers[0], ghost: Vision, cause }).unwrap();
        state.apply_event(&EventData::GhostSwitch { player: villagers[0], ghost: Amnesia, cause }).unwrap();
        let ghost = &state.players[villagers[0].index()];
        assert_eq!(ghost.role_kind(), Some(Amnesia));
        assert_eq!(ghost.role_before_ghost, Some(Villager));
        assert_eq!(state.used_ghost_powers, BTreeSet::from([Amnesia]));

        let taken = state.apply_event(&EventData::GhostSwitch { player: villagers[1], ghost: Amnesia, cause });
        assert!(matches!(taken, Err(EngineError::Invariant(_))));
        let wolf = state.alive_with_role(Wolf)[0];
        let living = state.apply_event(&EventData::GhostSwitch { player: wolf, ghost: Vision, cause });
        assert!(matches!(living, Err(EngineError::Invariant(_))));
    }

    #[test]
    fn test_spectral_sequence_drawn_once() {
        let mut state = in_phase(2, Phase::Creation);
        let draws = EventData::SpectralSequence { sequence: vec![true, false] };
        state.apply_event(&draws).unwrap();
        assert_eq!(state.spectral_sequence, Some(VecDeque::from([true, false])));
        assert!(matches!(state.apply_event(&draws), Err(EngineError::Invariant(_))));
    }

    #[test]
    fn test_exile_of_living_last_wolf() {
        use RoleKind::*;
        let mut state = dealt(&[Villager, Wolf, Necromancer], 5);
        let wolf = state.alive_with_role(Wolf)[0];
        state.current_turn = Some(Turn { key: TurnKey::new(1, Phase::Sunset), begin: Utc::now(), end: None });
        state.apply_event(&EventData::Exile { player: wolf, cause: ExileCause::Disqualification }).unwrap();

        let exiled = &state.players[wolf.index()];
        assert!(!exiled.active && exiled.disqualified);
        assert!(state.dying_teams.contains(&Team::Wolves));
    }

    #[test]
    fn test_mayor_reelection_only_by_vote() {
        let mut state = in_phase(3, Phase::Sunset);
        state.mayor = Some(PlayerId(1));
        state
            .apply_event(&EventData::SetMayor { player: Some(PlayerId(1)), cause: MayorCause::Elect })
            .unwrap();
        let err = state
            .apply_event(&EventData::SetMayor { player: Some(PlayerId(1)), cause: MayorCause::SuccessionRandom })
            .unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn test_new_mayor_clears_deputy() {
        let mut state = in_phase(3, Phase::Sunset);
        state.mayor = Some(PlayerId(0));
        state.deputy = Some(PlayerId(2));
        state
            .apply_event(&EventData::SetMayor { player: Some(PlayerId(1)), cause: MayorCause::Elect })
            .unwrap();
        assert_eq!(state.mayor, Some(PlayerId(1)));
        assert_eq!(state.deputy, None);
    }

    #[test]
    fn test_forced_victory() {
        let mut state = in_phase(2, Phase::Dawn);
        state.apply_event(&EventData::ForceVictory { winners: vec![Team::Wolves] }).unwrap();
        drain(&mut state);
        assert!(state.over);
        assert_eq!(state.winners, Some(vec![Team::Wolves]));
    }
}
