//! Dawn resolution: blocking, movement and power application.

use std::collections::BTreeSet;

use tracing::debug;

use super::Dynamics;
use crate::ensure_invariant;
use crate::error::EngineError;
use crate::game::events::EventData;
use crate::game::powers;
use crate::game::roles::MAX_CRITICAL_BLOCKERS;
use crate::game::state::{DawnScratch, EngineState, PlayerId};

/// Players with a recorded power this night, canonical order.
fn acting_players(state: &EngineState) -> Vec<PlayerId> {
    state
        .active_players()
        .filter(|p| {
            let Some(role) = p.role.as_ref().filter(|r| r.recorded.is_some()) else {
                return false;
            };
            let traits = state.traits(role.kind);
            let present = p.alive || traits.ghost || traits.acts_when_dead;
            present && (role.has_power || (p.alive && !traits.ghost))
        })
        .map(|p| p.id)
        .collect()
}

/// Outcome of the blocking search.
struct Blocking {
    failed: BTreeSet<PlayerId>,
    sequestrated: BTreeSet<PlayerId>,
}

/// Choose which critical blockers succeed and derive who fails.
///
/// A subset is admissible when no successful critical blocker is blocked
/// by another successful one. Among admissible subsets the ones with the
/// fewest unjustified failures win; the seeded stream picks between them.
fn resolve_blocking(state: &mut EngineState, actors: &[PlayerId]) -> Result<Blocking, EngineError> {
    let blocks: Vec<Vec<PlayerId>> = actors.iter().map(|a| powers::get_blocked(state, *a, actors)).collect();
    let critical: Vec<usize> = actors
        .iter()
        .enumerate()
        .filter(|(_, id)| state.get(**id).and_then(|p| p.role_kind()).map_or(false, |k| state.traits(k).critical_blocker))
        .map(|(index, _)| index)
        .collect();
    ensure_invariant!(critical.len() <= MAX_CRITICAL_BLOCKERS, "{} critical blockers", critical.len());

    let blocked_by = |mask: u32| -> BTreeSet<PlayerId> {
        critical
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .flat_map(|(_, index)| blocks[*index].iter().copied())
            .collect()
    };

    let mut best_score = usize::MAX;
    let mut best: Vec<u32> = Vec::new();
    for mask in 0..(1u32 << critical.len()) {
        let blocked = blocked_by(mask);
        let mut admissible = true;
        let mut score = 0;
        for (bit, index) in critical.iter().enumerate() {
            let succeeds = mask & (1 << bit) != 0;
            let is_blocked = blocked.contains(&actors[*index]);
            if succeeds && is_blocked {
                admissible = false;
                break;
            }
            if !succeeds && !is_blocked {
                score += 1;
            }
        }
        if !admissible {
            continue;
        }
        if score < best_score {
            best_score = score;
            best.clear();
        }
        if score == best_score {
            best.push(mask);
        }
    }

    let mask = *state
        .rng
        .choose(&best)
        .ok_or_else(|| EngineError::Invariant("no admissible blocking assignment".into()))?;
    debug!("Blocking: {} candidates with score {}, chose {:#b}", best.len(), best_score, mask);

    let blocked = blocked_by(mask);
    let mut failed = BTreeSet::new();
    let mut sequestrated = BTreeSet::new();
    for (bit, index) in critical.iter().enumerate() {
        let actor = actors[*index];
        if mask & (1 << bit) == 0 {
            failed.insert(actor);
        } else if state.role_traits(actor)?.sequester {
            sequestrated.extend(blocks[*index].iter().copied());
        }
    }
    for actor in actors {
        if !critical.iter().any(|index| actors[*index] == *actor) && blocked.contains(actor) {
            failed.insert(*actor);
        }
    }
    Ok(Blocking { failed, sequestrated })
}

impl Dynamics {
    pub(super) fn compute_dawn(&mut self) -> Result<(), EngineError> {
        for player in &mut self.state.players {
            player.snapshot_apparent();
        }

        let actors = acting_players(&self.state);
        let Blocking { failed, sequestrated } = resolve_blocking(&mut self.state, &actors)?;
        for id in &sequestrated {
            self.state.player_mut(*id)?.sequestrated = true;
        }

        for actor in &actors {
            if self.state.player(*actor)?.sequestrated {
                continue;
            }
            let target = self
                .state
                .role(*actor)?
                .recorded_target()
                .ok_or_else(|| EngineError::Invariant(format!("actor {actor} lost its target")))?;
            self.state.player_mut(*actor)?.visiting.push(target);
            self.state.player_mut(target)?.visitors.push(*actor);
        }

        let mut order = actors.clone();
        self.state.rng.shuffle(&mut order);
        let mut keyed = Vec::with_capacity(order.len());
        for actor in order {
            keyed.push((self.state.role_traits(actor)?.priority, actor));
        }
        keyed.sort_by_key(|(priority, _)| *priority);

        for (_, actor) in keyed {
            // Transformation or corruption earlier tonight replaces the role.
            let Some(target) = self.state.role(actor)?.recorded_target() else {
                continue;
            };

            if failed.contains(&actor) {
                let sequestrated = self.state.player(actor)?.sequestrated;
                self.state.generate(EventData::PowerOutcome { player: actor, target, success: false, sequestrated });
                self.drain()?;
                continue;
            }

            let success = powers::pre_apply(&mut self.state, actor)?;
            self.state.generate(EventData::PowerOutcome { player: actor, target, success, sequestrated: false });
            self.drain()?;
            if success {
                powers::apply(&mut self.state, actor)?;
                self.drain()?;
            }
        }

        let simulating = self.state.simulating;
        for player in &mut self.state.players {
            player.clear_dawn_flags(simulating);
            if let Some(role) = player.role.as_mut() {
                role.recorded = None;
            }
        }
        self.state.dawn = DawnScratch::default();
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
