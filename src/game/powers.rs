//! Night powers.
//!
//! Behavior of every role, dispatched on [`RoleKind`]. Functions take the
//! whole projection because most powers read or change other players;
//! events are queued with [`EngineState::generate`] and drained by the
//! dawn loop after each role.

use std::collections::BTreeSet;

use crate::ensure_invariant;
use crate::error::EngineError;
use crate::game::events::{
    DeathCause, EventData, GhostificationCause, KnowledgeCause, TransformationCause,
};
use crate::game::roles::{Frequency, RecordedAction, RoleKind, RoleParameter};
use crate::game::ruleset::SpectralDraw;
use crate::game::state::{
    Aura, ElectoralFraud, EngineState, PlayerId, SentenceModification, Team, VoteInfluence,
};

fn recorded(state: &EngineState, id: PlayerId) -> Option<&RecordedAction> {
    state.get(id).and_then(|p| p.role.as_ref()).and_then(|r| r.recorded.as_ref())
}

fn recorded_action(state: &EngineState, actor: PlayerId) -> Result<(RoleKind, RecordedAction), EngineError> {
    let role = state.role(actor)?;
    let action = role
        .recorded
        .clone()
        .ok_or_else(|| EngineError::Invariant(format!("player {actor} acts without a target")))?;
    Ok((role.kind, action))
}

/// Players whose power is blocked by the power of `actor`.
///
/// `actors` are the players acting tonight.
pub fn get_blocked(state: &EngineState, actor: PlayerId, actors: &[PlayerId]) -> Vec<PlayerId> {
    let Some(kind) = state.get(actor).and_then(|p| p.role_kind()) else {
        return Vec::new();
    };
    let Some(target) = recorded(state, actor).map(|a| a.target) else {
        return Vec::new();
    };

    let same_target = |id: &&PlayerId| **id != actor && recorded(state, **id).map(|a| a.target) == Some(target);
    let is_ghost = |id: PlayerId| state.get(id).map_or(false, |p| p.is_ghost());

    match kind {
        RoleKind::Sequestrator => vec![target],
        RoleKind::Sorcerer => actors
            .iter()
            .filter(same_target)
            .filter(|id| !is_ghost(**id))
            .copied()
            .collect(),
        RoleKind::Exorcist => actors
            .iter()
            .filter(same_target)
            .filter(|id| is_ghost(**id))
            .copied()
            .collect(),
        RoleKind::Shaman if is_ghost(target) => vec![target],
        RoleKind::Occultation => actors
            .iter()
            .filter(same_target)
            .filter(|id| state.get(**id).and_then(|p| p.role_kind()) != Some(RoleKind::Exorcist))
            .copied()
            .collect(),
        _ => Vec::new(),
    }
}

fn wolves_agree(state: &mut EngineState) -> bool {
    if let Some(agree) = state.dawn.wolves_agree {
        return agree;
    }
    let agree = state.check_common_target(&state.alive_with_role(RoleKind::Wolf));
    state.dawn.wolves_agree = Some(agree);
    agree
}

fn necromancers_agree(state: &mut EngineState) -> bool {
    if let Some(agree) = state.dawn.necromancers_agree {
        return agree;
    }
    let agree = state.check_common_target(&state.alive_with_role(RoleKind::Necromancer));
    state.dawn.necromancers_agree = Some(agree);
    agree
}

/// Role a Transformist would copy from `target`.
fn copied_role(state: &EngineState, target: PlayerId) -> Result<RoleKind, EngineError> {
    let player = state.player(target)?;
    let kind = if player.is_ghost() { player.role_before_ghost } else { player.role_kind() };
    kind.ok_or_else(|| EngineError::Invariant(format!("player {target} has no role to copy")))
}

/// Whether making `target` copy the ballot of `hypnotist` closes a loop.
fn hypnosis_cycle(state: &EngineState, hypnotist: PlayerId, target: PlayerId) -> bool {
    let mut seen = BTreeSet::new();
    let mut current = Some(hypnotist);
    while let Some(id) = current {
        if id == target {
            return true;
        }
        if !seen.insert(id) {
            return false;
        }
        current = state.get(id).and_then(|p| p.hypnotist);
    }
    false
}

/// Pre-condition of the power of `actor`. `false` makes it fail.
pub fn pre_apply(state: &mut EngineState, actor: PlayerId) -> Result<bool, EngineError> {
    let (kind, action) = recorded_action(state, actor)?;
    let ruleset = state.ruleset.unwrap_or_default();

    let takes_role_set = state.traits(kind).parameter == Some(RoleParameter::RoleSet);

    let ok = match kind {
        RoleKind::Wolf => {
            if !wolves_agree(state) {
                return Ok(false);
            }
            let target = state.player(action.target)?;
            (target.team == Team::Villagers || ruleset.wolves_kill_anyone()) && !target.protected_by_guard
        }
        RoleKind::Necromancer if ruleset.necromancers_switch_ghosts() => {
            let power = action
                .role_class
                .ok_or_else(|| EngineError::Invariant(format!("necromancer {actor} chose no power")))?;
            // Another necromancer may have handed the power out earlier tonight.
            if state.used_ghost_powers.contains(&power) {
                return Ok(false);
            }
            !state.player(actor)?.alive || state.player(action.target)?.is_ghost()
        }
        RoleKind::Necromancer => {
            if !necromancers_agree(state) {
                return Ok(false);
            }
            let power = action
                .role_class
                .ok_or_else(|| EngineError::Invariant(format!("necromancer {actor} chose no power")))?;
            let target = state.player(action.target)?;
            !(target.team == Team::Wolves
                || (target.team == Team::Necromancers && !target.just_ghostified)
                || target.protected_by_keeper
                || target.just_resurrected
                || (ruleset.mystic_only(power) && !target.is_mystic))
        }
        RoleKind::Devil | RoleKind::Vision if takes_role_set => true,
        RoleKind::Devil => state.player(action.target)?.team != Team::Necromancers,
        RoleKind::Vision => state.player(action.target)?.team != Team::Wolves,
        RoleKind::Alcoholic => false,
        RoleKind::Messiah => !state.player(action.target)?.is_ghost(),
        RoleKind::Transformist => {
            let target = state.player(action.target)?;
            if target.team != Team::Villagers && !target.is_ghost() {
                return Ok(false);
            }
            let traits = state.traits(copied_role(state, action.target)?);
            traits.team == Team::Villagers
                && !matches!(traits.frequency, Frequency::Never | Frequency::OnceAGame)
        }
        RoleKind::Necrophiliac => state.player(action.target)?.team == Team::Wolves,
        RoleKind::Corruption => {
            let target = state.player(action.target)?;
            !(target.aura == Aura::Black
                || !target.is_mystic
                || target.team != Team::Villagers
                || target.just_dead
                || target.just_transformed)
        }
        RoleKind::Death => state.player(action.target)?.team == Team::Villagers,
        RoleKind::Hypnotist => !hypnosis_cycle(state, actor, action.target),
        _ => true,
    };
    Ok(ok)
}

fn kill(state: &mut EngineState, victim: PlayerId, cause: DeathCause) -> Result<(), EngineError> {
    let player = state.player(victim)?;
    if player.just_dead {
        return Ok(());
    }
    ensure_invariant!(player.alive, "killing dead player {victim}");
    state.generate(EventData::PlayerDies { player: victim, cause });
    Ok(())
}

/// Visitors of `target` seen by `watcher`.
///
/// The watcher and the target are left out, unless an illusion moved the
/// watcher onto the target.
fn visitors_seen(state: &EngineState, watcher: PlayerId, target: PlayerId) -> Result<Vec<PlayerId>, EngineError> {
    let faked = state.dawn.illusion == Some((watcher, target));
    Ok(state
        .player(target)?
        .visitors
        .iter()
        .copied()
        .filter(|v| *v != target && (*v != watcher || faked))
        .collect())
}

fn apparent_role(state: &EngineState, target: PlayerId) -> Result<RoleKind, EngineError> {
    state
        .player(target)?
        .apparent_role
        .ok_or_else(|| EngineError::Invariant(format!("player {target} has no apparent role")))
}

/// Make `target` look like a holder of `role` to query powers tonight.
fn disguise(state: &mut EngineState, target: PlayerId, role: RoleKind) -> Result<(), EngineError> {
    let traits = state.traits(role);
    let player = state.player_mut(target)?;
    player.apparent_aura = traits.aura.unwrap_or(player.apparent_aura);
    player.apparent_mystic = traits.is_mystic.unwrap_or(player.apparent_mystic);
    player.apparent_role = Some(role);
    player.apparent_team = traits.team;
    Ok(())
}

fn role_parameter(action: &RecordedAction, actor: PlayerId) -> Result<RoleKind, EngineError> {
    action
        .role_class
        .ok_or_else(|| EngineError::Invariant(format!("player {actor} named no role")))
}

/// Every player that was dealt or became a Necromancer, canonical order.
fn necromancers(state: &EngineState) -> Vec<PlayerId> {
    state
        .players
        .iter()
        .filter(|p| p.role_kind() == Some(RoleKind::Necromancer))
        .map(|p| p.id)
        .collect()
}

/// A new ghost and the necromancers learn about each other.
fn introduce_ghost(state: &mut EngineState, ghost: PlayerId, power: RoleKind, cause: KnowledgeCause) {
    for necromancer in necromancers(state) {
        state.generate(EventData::RoleKnowledge {
            player: ghost,
            target: necromancer,
            role: RoleKind::Necromancer,
            cause: KnowledgeCause::Ghost,
        });
        state.generate(EventData::RoleKnowledge { player: necromancer, target: ghost, role: power, cause });
    }
}

/// Apply the effect of the power of `actor`.
pub fn apply(state: &mut EngineState, actor: PlayerId) -> Result<(), EngineError> {
    let (kind, action) = recorded_action(state, actor)?;
    let ruleset = state.ruleset.unwrap_or_default();
    let takes_role_set = state.traits(kind).parameter == Some(RoleParameter::RoleSet);
    let takes_role = state.traits(kind).parameter == Some(RoleParameter::Role);
    let target = action.target;
    let second = || {
        action
            .target2
            .ok_or_else(|| EngineError::Invariant(format!("player {actor} has no second target")))
    };

    match kind {
        RoleKind::Hunter => kill(state, target, DeathCause::Hunter)?,
        RoleKind::Wolf => {
            ensure_invariant!(state.dawn.wolves_agree == Some(true), "wolves disagree");
            kill(state, target, DeathCause::Wolves)?
        }
        RoleKind::Death => kill(state, target, DeathCause::DeathGhost)?,

        RoleKind::Keeper | RoleKind::Guard => {
            let cause = if kind == RoleKind::Keeper {
                state.player_mut(target)?.protected_by_keeper = true;
                KnowledgeCause::Keeper
            } else {
                state.player_mut(target)?.protected_by_guard = true;
                KnowledgeCause::Guard
            };
            let visitors = visitors_seen(state, actor, target)?.len() as u32;
            state.generate(EventData::QuantitativeMovementKnowledge { player: actor, target, visitors, cause });
        }

        RoleKind::Expansive => state.generate(EventData::RoleKnowledge {
            player: target,
            target: actor,
            role: RoleKind::Expansive,
            cause: KnowledgeCause::Expansive,
        }),
        RoleKind::Detective | RoleKind::Seer => {
            let aura = state.player(target)?.apparent_aura;
            let cause = if kind == RoleKind::Seer { KnowledgeCause::Seer } else { KnowledgeCause::Detective };
            state.generate(EventData::AuraKnowledge { player: actor, target, aura, cause });
        }
        RoleKind::Mage => {
            let is_mystic = state.player(target)?.apparent_mystic;
            state.generate(EventData::MysticityKnowledge { player: actor, target, is_mystic, cause: KnowledgeCause::Mage });
        }
        RoleKind::Devil | RoleKind::Vision if takes_role_set => {
            let role = if ruleset.role_set_reads_true_role() {
                state
                    .player(target)?
                    .role_kind()
                    .ok_or_else(|| EngineError::Invariant(format!("player {target} has no role")))?
            } else {
                apparent_role(state, target)?
            };
            let cause = if kind == RoleKind::Devil { KnowledgeCause::Devil } else { KnowledgeCause::Vision };
            state.generate(EventData::MultipleRoleKnowledge {
                player: actor,
                target,
                response: action.role_set.contains(&role),
                roles: action.role_set.clone(),
                cause,
            });
        }
        RoleKind::Devil | RoleKind::Medium | RoleKind::Vision => {
            let role = apparent_role(state, target)?;
            let cause = match kind {
                RoleKind::Devil => KnowledgeCause::Devil,
                RoleKind::Medium => KnowledgeCause::Medium,
                _ => KnowledgeCause::Vision,
            };
            state.generate(EventData::RoleKnowledge { player: actor, target, role, cause });
        }

        RoleKind::Stalker => {
            let visiting: Vec<PlayerId> =
                state.player(target)?.visiting.iter().copied().filter(|v| *v != target).collect();
            ensure_invariant!(visiting.len() <= 1, "player {target} visited {} players", visiting.len());
            match visiting.first() {
                Some(&target2) => state.generate(EventData::MovementKnowledge {
                    player: actor,
                    target,
                    target2,
                    cause: KnowledgeCause::Stalker,
                }),
                None => state.generate(EventData::NoMovementKnowledge { player: actor, target, cause: KnowledgeCause::Stalker }),
            }
        }
        RoleKind::Voyeur => {
            let visitors = visitors_seen(state, actor, target)?;
            if visitors.is_empty() {
                state.generate(EventData::NoMovementKnowledge { player: actor, target, cause: KnowledgeCause::Voyeur });
            }
            for target2 in visitors {
                state.generate(EventData::MovementKnowledge { player: actor, target, target2, cause: KnowledgeCause::Voyeur });
            }
        }

        RoleKind::Messiah => {
            let player = state.player_mut(target)?;
            if !player.just_resurrected {
                player.just_resurrected = true;
                state.generate(EventData::PlayerResurrects { player: target });
            }
        }
        RoleKind::Transformist => {
            let role = copied_role(state, target)?;
            ensure_invariant!(role.traits().team == Team::Villagers, "transformist copying {role}");
            state.generate(EventData::Transformation { player: actor, target, role, cause: TransformationCause::Transformist });
            state.player_mut(actor)?.just_transformed = true;
        }
        RoleKind::Necrophiliac => {
            let role = state
                .player(target)?
                .role_kind()
                .ok_or_else(|| EngineError::Invariant(format!("player {target} has no role")))?;
            ensure_invariant!(role.traits().team == Team::Wolves, "necrophiliac copying {role}");
            state.generate(EventData::RoleKnowledge {
                player: target,
                target: actor,
                role: RoleKind::Necrophiliac,
                cause: KnowledgeCause::Necrophiliac,
            });
            state.generate(EventData::Transformation { player: actor, target, role, cause: TransformationCause::Necrophiliac });
        }

        RoleKind::Assassin => {
            let candidates: Vec<PlayerId> = state
                .player(target)?
                .visitors
                .iter()
                .copied()
                .filter(|v| *v != actor)
                .filter(|v| recorded(state, *v).map(|a| a.target) == Some(target))
                .filter(|v| state.get(*v).map_or(false, |p| !p.sequestrated))
                .collect();
            if let Some(&victim) = state.rng.choose(&candidates) {
                kill(state, victim, DeathCause::Assassin)?;
            }
        }
        RoleKind::Advocate => state.sentence_modifications.push(SentenceModification { advocate: actor, target }),
        RoleKind::Soothsayer => {
            let role = role_parameter(&action, actor)?;
            let cause = KnowledgeCause::Soothsayer;
            if apparent_role(state, target)? == role {
                state.generate(EventData::RoleKnowledge { player: actor, target, role, cause });
            } else {
                state.generate(EventData::NegativeRoleKnowledge { player: actor, target, role, cause });
            }
        }
        RoleKind::Witch if takes_role => disguise(state, target, role_parameter(&action, actor)?)?,
        RoleKind::Witch => {
            let player = state.player_mut(target)?;
            player.apparent_aura = player.apparent_aura.flipped();
        }
        RoleKind::Sequestrator => state.player_mut(target)?.sequestrated = true,

        RoleKind::Necromancer if ruleset.necromancers_switch_ghosts() => {
            let ghost = role_parameter(&action, actor)?;
            let actor_alive = state.player(actor)?.alive;
            if state.player(target)?.is_ghost() {
                state.generate(EventData::GhostSwitch { player: target, ghost, cause: GhostificationCause::Necromancer });
            } else {
                ensure_invariant!(!actor_alive, "living necromancer {actor} raising {target}");
                let player = state.player_mut(target)?;
                ensure_invariant!(!player.alive, "raising living player {target}");
                if !player.just_ghostified {
                    player.just_ghostified = true;
                    state.generate(EventData::Ghostification { player: target, ghost, cause: GhostificationCause::Necromancer });
                }
                state.generate(EventData::RoleKnowledge {
                    player: target,
                    target: actor,
                    role: RoleKind::Necromancer,
                    cause: KnowledgeCause::Ghost,
                });
            }
            if !actor_alive {
                state.role_mut(actor)?.has_power = false;
            }
        }
        RoleKind::Necromancer => {
            let ghost = action
                .role_class
                .ok_or_else(|| EngineError::Invariant(format!("necromancer {actor} chose no power")))?;
            let player = state.player_mut(target)?;
            ensure_invariant!(!player.alive, "raising living player {target}");
            if !player.just_ghostified {
                player.just_ghostified = true;
                state.generate(EventData::Ghostification { player: target, ghost, cause: GhostificationCause::Necromancer });
            }
            state.generate(EventData::RoleKnowledge {
                player: target,
                target: actor,
                role: RoleKind::Necromancer,
                cause: KnowledgeCause::Ghost,
            });
        }
        RoleKind::Hypnotist => state.generate(EventData::Hypnotization { player: target, hypnotist: actor }),
        RoleKind::Scrutineer => state.electoral_frauds.push(ElectoralFraud { scrutineer: actor, target }),

        RoleKind::Amnesia => {
            if state.ruleset.map_or(false, |r| r.permanent_amnesia()) {
                state.player_mut(target)?.has_permanent_amnesia = true;
            } else {
                state.player_mut(target)?.temp_dehypnotized = true;
                state.vote_influences.push(VoteInfluence::Nullify { target });
            }
        }
        RoleKind::Hypnosis => {
            let to = second()?;
            state.player_mut(target)?.temp_dehypnotized = true;
            state.vote_influences.push(VoteInfluence::Redirect { target, to });
        }
        RoleKind::Confusion if takes_role => {
            disguise(state, target, role_parameter(&action, actor)?)?;
            state.player_mut(target)?.has_confusion = true;
        }
        RoleKind::Confusion => {
            let source = state.player(second()?)?;
            let (aura, mystic, role, team) =
                (source.apparent_aura, source.apparent_mystic, source.apparent_role, source.apparent_team);
            let player = state.player_mut(target)?;
            player.has_confusion = true;
            player.apparent_aura = aura;
            player.apparent_mystic = mystic;
            player.apparent_role = role;
            player.apparent_team = team;
        }
        RoleKind::Corruption => {
            state.generate(EventData::Corruption { player: target });
            state.generate(EventData::RoleKnowledge {
                player: target,
                target: actor,
                role: RoleKind::Corruption,
                cause: KnowledgeCause::Corruption,
            });
        }
        RoleKind::Illusion => {
            let mover = second()?;
            ensure_invariant!(state.player(mover)?.alive, "illusion moving dead player {mover}");
            state.player_mut(mover)?.visiting = vec![target];
            let visitors = &mut state.player_mut(target)?.visitors;
            if !visitors.contains(&mover) {
                visitors.push(mover);
            }
            state.dawn.illusion = Some((mover, target));
        }

        RoleKind::Exorcist | RoleKind::Shaman | RoleKind::Sorcerer | RoleKind::Occultation => {}
        RoleKind::Alcoholic => {}

        RoleKind::Villager
        | RoleKind::Mason
        | RoleKind::Renegade
        | RoleKind::Phantom
        | RoleKind::Delusion => {
            return Err(EngineError::Invariant(format!("{kind} has no power to apply")));
        }
    }
    Ok(())
}

/// Hook run after `player` died, or left the game while alive.
pub fn post_death(state: &mut EngineState, player: PlayerId) -> Result<(), EngineError> {
    let dead = state.player(player)?;
    let Some(kind) = dead.role_kind() else {
        return Ok(());
    };

    let ruleset = state.ruleset.unwrap_or_default();
    let villager_died = !dead.alive && dead.team == Team::Villagers;

    match kind {
        RoleKind::Wolf | RoleKind::Necromancer => {
            if state.alive_with_role(kind).is_empty() {
                state.dying_teams.insert(kind.traits().team);
            }
        }
        // A Phantom exiled while alive leaves the game without a ghost.
        RoleKind::Phantom if !dead.alive => {
            let available: Vec<RoleKind> = ruleset
                .phantom_powers()
                .into_iter()
                .filter(|power| !state.used_ghost_powers.contains(power))
                .collect();
            match state.rng.choose(&available).copied() {
                Some(ghost) => {
                    state.generate(EventData::Ghostification { player, ghost, cause: GhostificationCause::Phantom });
                    introduce_ghost(state, player, ghost, KnowledgeCause::Phantom);
                }
                None => state.generate(EventData::GhostificationFailed { player }),
            }
        }
        _ => {}
    }

    if villager_died {
        let draw = ruleset.spectral_draw().and_then(|end| {
            let sequence = state.spectral_sequence.as_mut()?;
            match end {
                SpectralDraw::First => sequence.pop_front(),
                SpectralDraw::Last => sequence.pop_back(),
            }
        });
        if draw == Some(true) {
            let ghost = RoleKind::Delusion;
            state.generate(EventData::Ghostification { player, ghost, cause: GhostificationCause::SpectralSequence });
            introduce_ghost(state, player, ghost, KnowledgeCause::SpectralSequence);
        }
    }
    Ok(())
}

/// Hook run before the role of `player` goes away.
pub fn pre_disappearance(state: &mut EngineState, player: PlayerId) {
    if state.get(player).and_then(|p| p.role_kind()) == Some(RoleKind::Hypnotist) {
        for other in state.players.iter_mut() {
            if other.hypnotist == Some(player) {
                other.hypnotist = None;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
