//! Sunset resolution: mayor election, then the stake.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::Dynamics;
use crate::error::EngineError;
use crate::game::events::{BallotKind, DeathCause, EventData, MayorCause, StakeFailedCause};
use crate::game::ruleset::Quorum;
use crate::game::state::{EngineState, PlayerId, VoteInfluence};

/// Effective ballot of every living voter.
type Ballots = BTreeMap<PlayerId, Option<PlayerId>>;

fn is_alive(state: &EngineState, id: PlayerId) -> bool {
    state.get(id).map_or(false, |p| p.is_alive_and_active())
}

/// Ballots cast for each player, canonical order.
fn tally(ballots: &Ballots) -> BTreeMap<PlayerId, u32> {
    let mut counts = BTreeMap::new();
    for voted in ballots.values().flatten() {
        *counts.entry(*voted).or_insert(0) += 1;
    }
    counts
}

/// Queue one announcement per cast ballot, then the tallies by decreasing
/// count.
fn announce(state: &mut EngineState, ballots: &Ballots, kind: BallotKind) -> BTreeMap<PlayerId, u32> {
    for (voter, voted) in ballots {
        if let Some(voted) = voted {
            state.generate(EventData::VoteAnnounced { voter: *voter, voted: *voted, kind });
        }
    }
    let counts = tally(ballots);
    let mut ordered: Vec<(PlayerId, u32)> = counts.iter().map(|(p, n)| (*p, *n)).collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (voted, votes) in ordered {
        state.generate(EventData::TallyAnnounced { voted, votes, kind });
    }
    counts
}

/// Player a hypnotized voter ends up following.
///
/// The chain stops at a released voter or at a dead or exiled hypnotist.
/// A loop leaves the voter with their own ballot.
fn hypnosis_source(state: &EngineState, voter: PlayerId) -> PlayerId {
    let mut seen = BTreeSet::from([voter]);
    let mut current = voter;
    loop {
        let Some(player) = state.get(current) else {
            return current;
        };
        if player.temp_dehypnotized {
            return current;
        }
        let Some(hypnotist) = player.hypnotist else {
            return current;
        };
        if !is_alive(state, hypnotist) {
            return current;
        }
        if !seen.insert(hypnotist) {
            return voter;
        }
        current = hypnotist;
    }
}

/// Ballots of the stake after every influence.
fn stake_ballots(state: &EngineState) -> Ballots {
    let mut ballots: Ballots = state
        .alive_players()
        .map(|p| (p.id, p.recorded_vote.filter(|target| is_alive(state, *target))))
        .collect();

    for influence in &state.vote_influences {
        match *influence {
            VoteInfluence::Nullify { target } => {
                if let Some(ballot) = ballots.get_mut(&target) {
                    *ballot = None;
                }
            }
            VoteInfluence::Redirect { target, to } => {
                if is_alive(state, to) {
                    if let Some(ballot) = ballots.get_mut(&target) {
                        *ballot = Some(to);
                    }
                }
            }
        }
    }

    for (voter, ballot) in ballots.iter_mut() {
        if state.get(*voter).map_or(false, |p| p.has_permanent_amnesia) {
            *ballot = None;
        }
    }

    let before = ballots.clone();
    for (voter, ballot) in ballots.iter_mut() {
        if state.get(*voter).map_or(false, |p| p.has_permanent_amnesia) {
            continue;
        }
        let source = hypnosis_source(state, *voter);
        if source != *voter {
            *ballot = before.get(&source).copied().flatten();
        }
    }

    for fraud in &state.electoral_frauds {
        if !is_alive(state, fraud.scrutineer) || !is_alive(state, fraud.target) {
            continue;
        }
        let choice = ballots.get(&fraud.scrutineer).copied().flatten();
        for ballot in ballots.values_mut() {
            if *ballot == Some(fraud.target) {
                *ballot = choice;
            }
        }
    }
    ballots
}

impl Dynamics {
    pub(super) fn compute_sunset(&mut self) -> Result<(), EngineError> {
        self.compute_election()?;
        self.compute_stake()?;

        for player in &mut self.state.players {
            player.recorded_vote = None;
            player.recorded_elect = None;
            player.temp_dehypnotized = false;
        }
        self.state.vote_influences.clear();
        self.state.electoral_frauds.clear();
        self.state.sentence_modifications.clear();
        Ok(())
    }

    fn compute_election(&mut self) -> Result<(), EngineError> {
        let state = &self.state;
        let ballots: Ballots = state
            .alive_players()
            .map(|p| (p.id, p.recorded_elect.filter(|target| is_alive(state, *target))))
            .collect();
        let living = ballots.len() as u32;

        let counts = announce(&mut self.state, &ballots, BallotKind::Elect);
        self.drain()?;

        let winner = counts.iter().max_by_key(|(_, n)| **n).map(|(p, n)| (*p, *n));
        if let Some((winner, votes)) = winner {
            if 2 * votes > living {
                self.state.generate(EventData::SetMayor { player: Some(winner), cause: MayorCause::Elect });
                self.drain()?;
            }
        }
        Ok(())
    }

    fn compute_stake(&mut self) -> Result<(), EngineError> {
        let ballots = stake_ballots(&self.state);
        let living = ballots.len() as u32;
        let counts = announce(&mut self.state, &ballots, BallotKind::Vote);
        self.drain()?;

        let cast: u32 = counts.values().sum();
        let max = counts.values().copied().max().unwrap_or(0);
        let quorum = self.state.ruleset.unwrap_or_default().quorum();
        let reached = cast > 0
            && match quorum {
                Quorum::Simple => 2 * cast >= living,
                Quorum::Strict => 2 * max > living,
            };
        if !reached {
            debug!("Stake: {} ballots of {} living, quorum {:?} missing", cast, living, quorum);
            self.state.generate(EventData::StakeFailed { cause: StakeFailedCause::MissingQuorum });
            return self.drain();
        }

        let tied: Vec<PlayerId> = counts.iter().filter(|(_, n)| **n == max).map(|(p, _)| *p).collect();
        let mayor_choice = self.state.mayor.and_then(|m| ballots.get(&m).copied().flatten());
        let winner = match mayor_choice.filter(|choice| tied.contains(choice)) {
            Some(choice) => choice,
            None => *self
                .state
                .rng
                .choose(&tied)
                .ok_or_else(|| EngineError::Invariant("stake without candidates".into()))?,
        };

        let vetoed = self.state.sentence_modifications.iter().any(|m| m.target == winner);
        if vetoed {
            self.state.generate(EventData::StakeFailed { cause: StakeFailedCause::Advocate });
        } else {
            self.state.generate(EventData::PlayerDies { player: winner, cause: DeathCause::Stake });
        }
        self.drain()
    }
}

// =============================================================================
// TESTS
// =============================================================================
