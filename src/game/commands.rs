//! Input validation.
//!
//! Every injected event is checked here against the current projection
//! before it is appended. Replay runs the same checks again on persisted
//! commands; a failure at that point is an invariant violation instead.

use serde::{Serialize, Deserialize};

use crate::error::RuleViolation;
use crate::game::events::{Command, EventData};
use crate::game::roles::{RoleKind, RoleParameter, TargetScope, MAX_CRITICAL_BLOCKERS};
use crate::game::state::{EngineState, Player, PlayerId};
use crate::game::turn::Phase;

/// Check an injected event against the projection.
pub fn validate(state: &EngineState, phase: Phase, data: &EventData) -> Result<(), RuleViolation> {
    if data.is_automatic() {
        return Err(RuleViolation::AutomaticEvent);
    }
    if !data.relevant_phases().contains(&phase) {
        return Err(RuleViolation::WrongPhase(phase));
    }
    if state.over && !matches!(data, EventData::FreeText { .. }) {
        return Err(RuleViolation::GameOver);
    }

    match data {
        EventData::Command(command) => validate_command(state, command),
        EventData::SetRules { .. } => match state.ruleset {
            Some(_) => Err(RuleViolation::Ruleset("already chosen")),
            None => Ok(()),
        },
        EventData::AvailableRole { role } => {
            let ruleset = state.ruleset.ok_or(RuleViolation::Ruleset("not chosen"))?;
            if !ruleset.starting_roles().contains(role) {
                return Err(RuleViolation::RoleNotAvailable(*role));
            }
            if state.available_roles.len() >= state.players.len() {
                return Err(RuleViolation::TooManyRoles);
            }
            if role.may_block_critically() && critical_in_deck(state) + 1 > MAX_CRITICAL_BLOCKERS {
                return Err(RuleViolation::TooManyBlockers);
            }
            Ok(())
        }
        EventData::SpectralSequence { .. } => {
            let ruleset = state.ruleset.ok_or(RuleViolation::Ruleset("not chosen"))?;
            if ruleset.spectral_draw().is_none() {
                return Err(RuleViolation::Ruleset("no spectral sequence in these rules"));
            }
            if state.spectral_sequence.is_some() {
                return Err(RuleViolation::Ruleset("spectral sequence already drawn"));
            }
            Ok(())
        }
        EventData::SoothsayerModel { soothsayer, target, .. } => {
            let player = known(state, *soothsayer)?;
            known(state, *target)?;
            if player.role_kind() != Some(RoleKind::Soothsayer) {
                return Err(RuleViolation::InvalidTarget(*soothsayer));
            }
            Ok(())
        }
        EventData::Disqualification { player, .. } => active(state, *player).map(|_| ()),
        EventData::Seed { .. } | EventData::ForceVictory { .. } | EventData::FreeText { .. } => Ok(()),
        _ => Err(RuleViolation::AutomaticEvent),
    }
}

/// Critical blockers a finished deck could field at one dawn: the dealt
/// ones plus the ghost powers that block critically.
fn critical_in_deck(state: &EngineState) -> usize {
    let dealt = state.available_roles.iter().filter(|role| role.may_block_critically()).count();
    let ghosts = state
        .ruleset
        .map_or(0, |ruleset| ruleset.ghost_powers().into_iter().filter(|g| g.may_block_critically()).count());
    dealt + ghosts
}

/// Check a player command.
pub fn validate_command(state: &EngineState, command: &Command) -> Result<(), RuleViolation> {
    let player = active(state, command.player())?;

    match *command {
        Command::UsePower { player: actor, target, target2, role_class, ref role_set } => {
            let role = player.role.as_ref().ok_or(RuleViolation::NoRole(actor))?;
            let date = state.current_turn.as_ref().map_or(0, |turn| turn.key.date);
            let traits = state.traits(role.kind);
            if !role.can_use_power(&traits, player.alive, date) {
                return Err(RuleViolation::PowerNotUsable(actor));
            }

            let scope = traits.targets.ok_or(RuleViolation::PowerNotUsable(actor))?;
            if let Some(target) = target {
                if !in_scope(state, actor, target, scope) {
                    return Err(RuleViolation::InvalidTarget(target));
                }
            }

            match (traits.targets2, target, target2) {
                (None, _, None) => {}
                (None, _, Some(_)) => return Err(RuleViolation::InvalidSecondTarget),
                (Some(_), None, None) => {}
                (Some(_), None, Some(_)) | (Some(_), Some(_), None) => {
                    return Err(RuleViolation::InvalidSecondTarget)
                }
                (Some(scope2), Some(_), Some(second)) => {
                    if !in_scope(state, actor, second, scope2) {
                        return Err(RuleViolation::InvalidSecondTarget);
                    }
                }
            }

            let stray = match traits.parameter {
                Some(RoleParameter::RoleSet) => role_class,
                Some(_) => role_set.iter().next().copied(),
                None => role_class.or_else(|| role_set.iter().next().copied()),
            };
            if let Some(kind) = stray {
                return Err(RuleViolation::InvalidRoleClass(kind));
            }

            let Some(parameter) = traits.parameter else {
                return Ok(());
            };
            let choices = parameter_choices(state, parameter);
            let given: Vec<RoleKind> = match parameter {
                RoleParameter::RoleSet => role_set.iter().copied().collect(),
                RoleParameter::GhostPower | RoleParameter::Role => role_class.into_iter().collect(),
            };
            if target.is_some() && given.is_empty() {
                return Err(RuleViolation::MissingRoleClass);
            }
            match given.into_iter().find(|kind| !choices.contains(kind)) {
                Some(kind) => Err(RuleViolation::InvalidRoleClass(kind)),
                None => Ok(()),
            }
        }
        Command::Vote { player: voter, target } | Command::Elect { player: voter, target } => {
            if !player.alive {
                return Err(RuleViolation::PlayerDead(voter));
            }
            if let Some(target) = target {
                if !state.get(target).map_or(false, Player::is_alive_and_active) {
                    return Err(RuleViolation::InvalidTarget(target));
                }
            }
            Ok(())
        }
        Command::Appoint { player: mayor, target } => {
            if state.mayor != Some(mayor) {
                return Err(RuleViolation::NotMayor(mayor));
            }
            if let Some(target) = target {
                if target == mayor {
                    return Err(RuleViolation::SelfAppointment);
                }
                if !state.get(target).map_or(false, Player::is_alive_and_active) {
                    return Err(RuleViolation::InvalidTarget(target));
                }
            }
            Ok(())
        }
    }
}

/// Whether `target` is a legal choice for `actor` under `scope`.
pub fn in_scope(state: &EngineState, actor: PlayerId, target: PlayerId, scope: TargetScope) -> bool {
    if target == actor {
        return false;
    }
    let Some(player) = state.get(target) else {
        return false;
    };
    player.active
        && match scope {
            TargetScope::Alive => player.alive,
            TargetScope::Dead => !player.alive,
            TargetScope::Everybody => true,
        }
}

/// Ghost powers the necromancers may still hand out.
pub fn available_ghost_powers(state: &EngineState) -> Vec<RoleKind> {
    state
        .ruleset
        .map(|ruleset| ruleset.necromancer_powers())
        .unwrap_or_default()
        .into_iter()
        .filter(|power| !state.used_ghost_powers.contains(power))
        .collect()
}

/// Legal values of a power parameter.
pub fn parameter_choices(state: &EngineState, parameter: RoleParameter) -> Vec<RoleKind> {
    match parameter {
        RoleParameter::GhostPower => available_ghost_powers(state),
        RoleParameter::Role | RoleParameter::RoleSet => {
            state.ruleset.map(|ruleset| ruleset.starting_roles()).unwrap_or_default()
        }
    }
}

/// Problem with the propositions given to a Soothsayer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoothsayerProblem {
    /// A proposition is about the Soothsayer.
    KnowsAboutSelf,
    /// Not exactly four propositions.
    NumberMismatch,
    /// Wrong number of true propositions for the ruleset.
    TruthMismatch,
}

/// Check the propositions of `soothsayer`; `None` when they are valid.
pub fn soothsayer_problem(state: &EngineState, soothsayer: PlayerId) -> Option<SoothsayerProblem> {
    let propositions: Vec<_> = state
        .soothsayer_propositions
        .iter()
        .filter(|p| p.soothsayer == soothsayer)
        .collect();

    if propositions.iter().any(|p| p.target == soothsayer) {
        return Some(SoothsayerProblem::KnowsAboutSelf);
    }
    if propositions.len() != 4 {
        return Some(SoothsayerProblem::NumberMismatch);
    }
    let truths = propositions
        .iter()
        .filter(|p| state.get(p.target).and_then(Player::role_kind) == Some(p.advertised_role))
        .count();
    if !state.ruleset.unwrap_or_default().soothsayer_truths_valid(truths, propositions.len()) {
        return Some(SoothsayerProblem::TruthMismatch);
    }
    None
}

fn known(state: &EngineState, id: PlayerId) -> Result<&Player, RuleViolation> {
    state.get(id).ok_or(RuleViolation::UnknownPlayer(id))
}

fn active(state: &EngineState, id: PlayerId) -> Result<&Player, RuleViolation> {
    let player = known(state, id)?;
    if !player.active {
        return Err(RuleViolation::PlayerInactive(id));
    }
    Ok(player)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::game::roles::Role;
    use crate::game::ruleset::Ruleset;
    use crate::game::state::SoothsayerProposition;
    use crate::game::turn::{Turn, TurnKey};
    use chrono::Utc;

    fn night_state(date: i32) -> EngineState {
        let mut state = EngineState::new((0..6).map(|i| format!("p{i}")));
        state.ruleset = Some(Ruleset::Negromanti);
        state.current_turn = Some(Turn { key: TurnKey::new(date, Phase::Night), begin: Utc::now(), end: None });
        let roles = [
            RoleKind::Wolf,
            RoleKind::Necromancer,
            RoleKind::Confusion,
            RoleKind::Seer,
            RoleKind::Villager,
            RoleKind::Villager,
        ];
        for (player, kind) in state.players.iter_mut().zip(roles) {
            player.role = Some(Role::new(kind));
            player.team = kind.traits().team;
        }
        state.players[2].alive = false;
        state.players[5].alive = false;
        state
    }

    fn power(player: u32, target: Option<u32>) -> Command {
        Command::UsePower {
            player: PlayerId(player),
            target: target.map(PlayerId),
            target2: None,
            role_class: None,
            role_set: BTreeSet::new(),
        }
    }

    fn with_role(player: u32, target: u32, role_class: Option<RoleKind>, role_set: &[RoleKind]) -> Command {
        Command::UsePower {
            player: PlayerId(player),
            target: Some(PlayerId(target)),
            target2: None,
            role_class,
            role_set: role_set.iter().copied().collect(),
        }
    }

    #[test]
    fn test_phase_and_automatic() {
        let state = night_state(1);
        let vote = EventData::Command(Command::Vote { player: PlayerId(0), target: None });
        assert_eq!(validate(&state, Phase::Night, &vote), Err(RuleViolation::WrongPhase(Phase::Night)));

        let victory = EventData::Victory { winners: vec![], cause: crate::game::events::VictoryCause::Forced };
        assert_eq!(validate(&state, Phase::Dawn, &victory), Err(RuleViolation::AutomaticEvent));
    }

    #[test]
    fn test_wolf_first_night() {
        let state = night_state(0);
        assert_eq!(validate_command(&state, &power(0, Some(3))), Err(RuleViolation::PowerNotUsable(PlayerId(0))));
        let state = night_state(1);
        assert_eq!(validate_command(&state, &power(0, Some(3))), Ok(()));
    }

    #[test]
    fn test_target_scope() {
        let state = night_state(1);
        assert_eq!(validate_command(&state, &power(0, Some(0))), Err(RuleViolation::InvalidTarget(PlayerId(0))));
        assert_eq!(validate_command(&state, &power(0, Some(5))), Err(RuleViolation::InvalidTarget(PlayerId(5))));
        assert_eq!(validate_command(&state, &power(3, None)), Ok(()));
    }

    #[test]
    fn test_necromancer_role_class() {
        let state = night_state(1);
        assert_eq!(validate_command(&state, &power(1, Some(5))), Err(RuleViolation::MissingRoleClass));

        let raise = |power: RoleKind| with_role(1, 5, Some(power), &[]);
        assert_eq!(validate_command(&state, &raise(RoleKind::Vision)), Ok(()));
        assert_eq!(validate_command(&state, &raise(RoleKind::Wolf)), Err(RuleViolation::InvalidRoleClass(RoleKind::Wolf)));

        let mut used = night_state(1);
        used.used_ghost_powers.insert(RoleKind::Vision);
        assert_eq!(validate_command(&used, &raise(RoleKind::Vision)), Err(RuleViolation::InvalidRoleClass(RoleKind::Vision)));
        assert_eq!(
            validate_command(&state, &with_role(1, 5, Some(RoleKind::Vision), &[RoleKind::Wolf])),
            Err(RuleViolation::InvalidRoleClass(RoleKind::Wolf))
        );
    }

    #[test]
    fn test_role_parameters() {
        let mut state = night_state(1);
        state.ruleset = Some(Ruleset::V2);
        state.players[4].role = Some(Role::new(RoleKind::Soothsayer));
        state.players[5].role = Some(Role::new(RoleKind::Vision));

        // Soothsayer names one dealable role.
        assert_eq!(validate_command(&state, &with_role(4, 0, Some(RoleKind::Wolf), &[])), Ok(()));
        assert_eq!(validate_command(&state, &power(4, Some(0))), Err(RuleViolation::MissingRoleClass));
        assert_eq!(
            validate_command(&state, &with_role(4, 0, Some(RoleKind::Vision), &[])),
            Err(RuleViolation::InvalidRoleClass(RoleKind::Vision))
        );
        assert_eq!(
            validate_command(&state, &with_role(4, 0, Some(RoleKind::Medium), &[])),
            Err(RuleViolation::InvalidRoleClass(RoleKind::Medium))
        );

        // Vision asks about a set of roles.
        let set = [RoleKind::Wolf, RoleKind::Seer];
        assert_eq!(validate_command(&state, &with_role(5, 0, None, &set)), Ok(()));
        assert_eq!(validate_command(&state, &with_role(5, 0, None, &[])), Err(RuleViolation::MissingRoleClass));
        assert_eq!(
            validate_command(&state, &with_role(5, 0, Some(RoleKind::Wolf), &set)),
            Err(RuleViolation::InvalidRoleClass(RoleKind::Wolf))
        );

        // The same roles take no parameter under the older rules.
        state.ruleset = Some(Ruleset::Negromanti);
        assert_eq!(validate_command(&state, &power(5, Some(0))), Ok(()));
        assert_eq!(
            validate_command(&state, &with_role(5, 0, None, &set)),
            Err(RuleViolation::InvalidRoleClass(RoleKind::Seer))
        );
    }

    #[test]
    fn test_dead_necromancer_acts_once() {
        let mut state = night_state(1);
        state.players[1].alive = false;
        let raise = with_role(1, 5, Some(RoleKind::Vision), &[]);
        assert_eq!(validate_command(&state, &raise), Err(RuleViolation::PowerNotUsable(PlayerId(1))));

        state.ruleset = Some(Ruleset::V2);
        assert_eq!(validate_command(&state, &raise), Ok(()));
        state.role_mut(PlayerId(1)).unwrap().has_power = false;
        assert_eq!(validate_command(&state, &raise), Err(RuleViolation::PowerNotUsable(PlayerId(1))));
    }

    #[test]
    fn test_spectral_sequence_injection() {
        let mut state = night_state(1);
        let draws = EventData::SpectralSequence { sequence: vec![true, false] };
        assert_eq!(validate(&state, Phase::Night, &draws), Err(RuleViolation::WrongPhase(Phase::Night)));
        assert!(matches!(validate(&state, Phase::Creation, &draws), Err(RuleViolation::Ruleset(_))));

        state.ruleset = Some(Ruleset::NegromantiLupus8);
        assert_eq!(validate(&state, Phase::Creation, &draws), Ok(()));
        state.spectral_sequence = Some(Default::default());
        assert!(matches!(validate(&state, Phase::Creation, &draws), Err(RuleViolation::Ruleset(_))));
    }

    #[test]
    fn test_second_target_required() {
        let state = night_state(1);
        let confuse = |target2: Option<u32>| Command::UsePower {
            player: PlayerId(2),
            target: Some(PlayerId(3)),
            target2: target2.map(PlayerId),
            role_class: None,
            role_set: BTreeSet::new(),
        };
        assert_eq!(validate_command(&state, &confuse(None)), Err(RuleViolation::InvalidSecondTarget));
        assert_eq!(validate_command(&state, &confuse(Some(4))), Ok(()));
    }

    #[test]
    fn test_votes_and_appointments() {
        let mut state = night_state(1);
        let dead_vote = Command::Vote { player: PlayerId(5), target: Some(PlayerId(0)) };
        assert_eq!(validate_command(&state, &dead_vote), Err(RuleViolation::PlayerDead(PlayerId(5))));
        let vote_dead = Command::Vote { player: PlayerId(0), target: Some(PlayerId(5)) };
        assert_eq!(validate_command(&state, &vote_dead), Err(RuleViolation::InvalidTarget(PlayerId(5))));

        let appoint = Command::Appoint { player: PlayerId(3), target: Some(PlayerId(4)) };
        assert_eq!(validate_command(&state, &appoint), Err(RuleViolation::NotMayor(PlayerId(3))));
        state.mayor = Some(PlayerId(3));
        assert_eq!(validate_command(&state, &appoint), Ok(()));
        let own = Command::Appoint { player: PlayerId(3), target: Some(PlayerId(3)) };
        assert_eq!(validate_command(&state, &own), Err(RuleViolation::SelfAppointment));
    }

    #[test]
    fn test_inactive_player() {
        let mut state = night_state(1);
        state.players[3].active = false;
        assert_eq!(validate_command(&state, &power(3, Some(0))), Err(RuleViolation::PlayerInactive(PlayerId(3))));
    }

    #[test]
    fn test_deck_blocker_cap() {
        let mut state = EngineState::new((0..20).map(|i| format!("p{i}")));
        state.ruleset = Some(Ruleset::Negromanti);
        // One slot is kept for the Ghost of Occultation.
        state.available_roles = vec![RoleKind::Sequestrator; MAX_CRITICAL_BLOCKERS - 1];

        let add = |role| EventData::AvailableRole { role };
        assert_eq!(validate(&state, Phase::Creation, &add(RoleKind::Sorcerer)), Err(RuleViolation::TooManyBlockers));
        assert_eq!(validate(&state, Phase::Creation, &add(RoleKind::Necrophiliac)), Err(RuleViolation::TooManyBlockers));
        assert_eq!(validate(&state, Phase::Creation, &add(RoleKind::Villager)), Ok(()));

        state.available_roles.pop();
        assert_eq!(validate(&state, Phase::Creation, &add(RoleKind::Sorcerer)), Ok(()));
    }

    #[test]
    fn test_soothsayer_problem() {
        let mut state = night_state(1);
        state.players[4].role = Some(Role::new(RoleKind::Soothsayer));
        let soothsayer = PlayerId(4);
        let prop = |target: u32, role: RoleKind| SoothsayerProposition {
            soothsayer,
            target: PlayerId(target),
            advertised_role: role,
        };

        assert_eq!(soothsayer_problem(&state, soothsayer), Some(SoothsayerProblem::NumberMismatch));

        state.soothsayer_propositions = vec![
            prop(0, RoleKind::Wolf),
            prop(1, RoleKind::Necromancer),
            prop(2, RoleKind::Seer),
            prop(3, RoleKind::Mage),
        ];
        assert_eq!(soothsayer_problem(&state, soothsayer), None);

        state.soothsayer_propositions[2] = prop(2, RoleKind::Confusion);
        assert_eq!(soothsayer_problem(&state, soothsayer), Some(SoothsayerProblem::TruthMismatch));

        // One true proposition is enough under v2.
        state.ruleset = Some(Ruleset::V2);
        assert_eq!(soothsayer_problem(&state, soothsayer), None);
        state.ruleset = Some(Ruleset::Negromanti);

        state.soothsayer_propositions[3] = prop(4, RoleKind::Soothsayer);
        assert_eq!(soothsayer_problem(&state, soothsayer), Some(SoothsayerProblem::KnowsAboutSelf));
    }
}
