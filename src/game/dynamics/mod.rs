//! Dynamics Engine
//!
//! Replays the event log of one game into an [`EngineState`] projection.
//!
//! ## Replay Loop
//!
//! 1. Apply locally queued automatic events
//! 2. Apply the next unseen persisted event of the current turn
//! 3. If the current turn has ended, advance and run the phase entry
//!    computation (dawn or sunset resolution, then bookkeeping)
//! 4. Otherwise stop
//!
//! The projection is a pure function of the persisted events, the turn
//! windows and the seed: replaying the same log always yields the same
//! state hash.

mod apply;
mod bookkeeping;
mod dawn;
mod simulate;
mod sunset;

use std::sync::Arc;

use chrono::{DateTime, Utc};
#[cfg(feature = "debug-tracing")]
use tracing::debug;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::core::clock::Clock;
use crate::core::hash::{StateHash, StateHasher};
use crate::ensure_invariant;
use crate::error::{EngineError, LogError, RuleViolation};
use crate::game::commands::{self, SoothsayerProblem};
use crate::game::events::{Event, EventData};
use crate::game::log::{GameLog, LogPosition};
use crate::game::state::{EngineState, Player, PlayerId, Team};
use crate::game::turn::{Phase, Turn, TurnKey};
use crate::registry::GameId;

/// Engine of one game.
pub struct Dynamics {
    game_id: GameId,
    config: EngineConfig,
    log: Arc<dyn GameLog>,
    clock: Arc<dyn Clock>,
    state: EngineState,
    history: Vec<Event>,
    simulated_events: Vec<Event>,
    simulated_for: Option<TurnKey>,
    failed: bool,
}

impl Dynamics {
    /// Create an engine over `log`; nothing is replayed until the first
    /// update.
    pub fn new<S: Into<String>>(
        game_id: GameId,
        usernames: impl IntoIterator<Item = S>,
        log: Arc<dyn GameLog>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            game_id,
            config,
            log,
            clock,
            state: EngineState::new(usernames),
            history: Vec::new(),
            simulated_events: Vec::new(),
            simulated_for: None,
            failed: false,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Game id.
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// Whole projection.
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Event log this engine replays.
    pub fn log(&self) -> &Arc<dyn GameLog> {
        &self.log
    }

    /// All players, canonical order.
    pub fn players(&self) -> &[Player] {
        &self.state.players
    }

    /// Look up a player.
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.state.get(id)
    }

    /// Resolve a username.
    pub fn canonicalize(&self, username: &str) -> Option<PlayerId> {
        self.state.canonicalize(username)
    }

    /// Active players.
    pub fn active_players(&self) -> Vec<&Player> {
        self.state.active_players().collect()
    }

    /// Active living players.
    pub fn alive_players(&self) -> Vec<&Player> {
        self.state.alive_players().collect()
    }

    /// Active dead players.
    pub fn dead_players(&self) -> Vec<&Player> {
        self.state.dead_players().collect()
    }

    /// Current mayor.
    pub fn mayor(&self) -> Option<PlayerId> {
        self.state.mayor
    }

    /// Successor appointed by the mayor.
    pub fn deputy(&self) -> Option<PlayerId> {
        self.state.deputy
    }

    /// Winning teams once the game is over.
    pub fn winners(&self) -> Option<&[Team]> {
        self.state.winners.as_deref()
    }

    /// Whether the game has ended.
    pub fn is_over(&self) -> bool {
        self.state.over
    }

    /// Every applied event, persisted and generated, in order.
    pub fn history(&self) -> &[Event] {
        &self.history
    }

    /// Events produced by the last speculative simulation.
    pub fn simulated_events(&self) -> &[Event] {
        &self.simulated_events
    }

    /// Turn being replayed.
    pub fn current_turn(&self) -> Option<&Turn> {
        self.state.current_turn.as_ref()
    }

    /// Whether a fatal error disabled this engine.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Problem with the propositions of a Soothsayer, if any.
    pub fn soothsayer_problem(&self, soothsayer: PlayerId) -> Option<SoothsayerProblem> {
        commands::soothsayer_problem(&self.state, soothsayer)
    }

    /// Hash of the projection.
    pub fn state_hash(&self) -> Result<StateHash, EngineError> {
        self.state
            .compute_hash()
            .map_err(|err| EngineError::Invariant(format!("state encoding failed: {err}")))
    }

    /// Hash of the applied history.
    pub fn history_hash(&self) -> Result<StateHash, EngineError> {
        let mut hasher = StateHasher::for_history();
        hasher.update_u64(self.history.len() as u64);
        for event in &self.history {
            hasher
                .update_encoded(event)
                .map_err(|err| EngineError::Invariant(format!("event encoding failed: {err}")))?;
        }
        Ok(hasher.finalize())
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Replay until quiescent.
    pub fn update(&mut self) -> Result<(), EngineError> {
        self.check_failed()?;
        let result = self.run_update();
        self.guard(result)
    }

    /// Replay, then optionally pre-compute the next half phase.
    pub fn update_with(&mut self, simulate: bool) -> Result<(), EngineError> {
        self.check_failed()?;
        let mut result = self.run_update();
        if simulate && result.is_ok() {
            result = self.simulate_next();
        }
        self.guard(result)
    }

    /// Validate, persist and replay a non-automatic event.
    ///
    /// `timestamp` defaults to the clock.
    pub fn inject_event(
        &mut self,
        data: EventData,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Event, EngineError> {
        self.check_failed()?;
        let result = self.run_inject(data, timestamp);
        self.guard(result)
    }

    /// Close the current turn at `at` (default now) and replay.
    pub fn close_current_turn(&mut self, at: Option<DateTime<Utc>>) -> Result<(), EngineError> {
        self.check_failed()?;
        let result = self.run_close(at);
        self.guard(result)
    }

    fn check_failed(&self) -> Result<(), EngineError> {
        if self.failed {
            return Err(EngineError::Failed(self.game_id.to_string()));
        }
        Ok(())
    }

    fn guard<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.failed = true;
                error!("Game {} marked failed: {}", self.game_id, err);
            }
        }
        result
    }

    fn run_inject(&mut self, data: EventData, timestamp: Option<DateTime<Utc>>) -> Result<Event, EngineError> {
        self.run_update()?;
        if data.is_automatic() {
            return Err(RuleViolation::AutomaticEvent.into());
        }
        let turn = self
            .state
            .current_turn
            .clone()
            .ok_or(EngineError::TurnNotFound(TurnKey::first()))?;
        commands::validate(&self.state, turn.key.phase, &data)?;

        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let floor = self.state.position.map_or(turn.begin, |p| p.timestamp.max(turn.begin));
        if timestamp < floor || turn.has_ended(timestamp) {
            return Err(RuleViolation::TimestampOutOfTurn.into());
        }

        let event = self.log.append(turn.key, timestamp, data)?;
        info!("Game {}: {} injected in {}", self.game_id, event.data.name(), turn.key);
        self.run_update()?;
        Ok(event)
    }

    fn run_close(&mut self, at: Option<DateTime<Utc>>) -> Result<(), EngineError> {
        self.run_update()?;
        let turn = self
            .state
            .current_turn
            .clone()
            .ok_or(EngineError::TurnNotFound(TurnKey::first()))?;
        let end = at.unwrap_or_else(|| self.clock.now());
        let floor = self.state.position.map_or(turn.begin, |p| p.timestamp.max(turn.begin));
        if end < floor {
            return Err(RuleViolation::TimestampOutOfTurn.into());
        }

        self.log.set_turn_end(turn.key, Some(end))?;
        if let Some(current) = self.state.current_turn.as_mut() {
            current.end = Some(end);
        }
        info!("Game {}: {} closed at {}", self.game_id, turn.key, end);
        self.run_update()
    }

    // =========================================================================
    // Replay
    // =========================================================================

    fn run_update(&mut self) -> Result<(), EngineError> {
        while self.update_step()? {}
        Ok(())
    }

    fn update_step(&mut self) -> Result<bool, EngineError> {
        if let Some(data) = self.state.queue.pop_front() {
            self.receive_automatic(data)?;
            return Ok(true);
        }

        if let Some(turn) = self.state.current_turn.clone() {
            for event in self.log.events_after(turn.key, self.state.position)? {
                let position = LogPosition::of(&event)
                    .ok_or_else(|| EngineError::Invariant("stored event without sequence".into()))?;
                if let Some(last) = self.state.position {
                    ensure_invariant!(position > last, "event {:?} replayed out of order", position);
                }
                self.state.position = Some(position);
                if event.data.is_automatic() {
                    continue;
                }
                ensure_invariant!(
                    event.timestamp >= turn.begin,
                    "{} at {} predates {}",
                    event.data.name(),
                    event.timestamp,
                    turn.key
                );
                self.receive_persisted(event)?;
                return Ok(true);
            }

            if !turn.has_ended(self.clock.now()) {
                return Ok(false);
            }
        }

        self.advance_turn()?;
        Ok(true)
    }

    fn receive_persisted(&mut self, event: Event) -> Result<(), EngineError> {
        #[cfg(feature = "debug-tracing")]
        debug!("Game {}: replaying {} at {}", self.game_id, event.data.name(), event.timestamp);

        self.simulated_for = None;
        self.state.stamp = Some(event.timestamp);
        self.state.apply_event(&event.data)?;
        self.history.push(event);
        Ok(())
    }

    fn receive_automatic(&mut self, data: EventData) -> Result<(), EngineError> {
        let turn = self.state.current_key()?;
        let timestamp = self
            .state
            .stamp
            .ok_or_else(|| EngineError::Invariant("automatic event without timestamp".into()))?;
        let event = Event { turn, timestamp, sequence: None, data };

        if self.state.simulating {
            if event.data.can_be_simulated() {
                self.state.apply_event(&event.data)?;
            }
            self.simulated_events.push(event);
            return Ok(());
        }

        #[cfg(feature = "debug-tracing")]
        debug!("Game {}: generated {}", self.game_id, event.data.name());

        if self.config.store_automatic_events
            && self.state.automatic_in_turn >= self.log.count_automatic(turn)?
        {
            self.log.append(turn, timestamp, event.data.clone())?;
        }
        self.state.automatic_in_turn += 1;
        self.state.apply_event(&event.data)?;
        self.history.push(event);
        Ok(())
    }

    /// Apply every queued automatic event.
    fn drain(&mut self) -> Result<(), EngineError> {
        while let Some(data) = self.state.queue.pop_front() {
            self.receive_automatic(data)?;
        }
        Ok(())
    }

    fn advance_turn(&mut self) -> Result<(), EngineError> {
        let (key, begin) = match &self.state.current_turn {
            None => (TurnKey::first(), self.clock.now()),
            Some(turn) => {
                let end = turn
                    .end
                    .ok_or_else(|| EngineError::Invariant(format!("advancing from open turn {}", turn.key)))?;
                (turn.key.next(), end)
            }
        };

        let turn = match self.log.get_turn(key)? {
            Some(turn) => turn,
            None => {
                let turn = self.config.schedule.set_begin_end(key, begin, self.state.over);
                match self.log.create_turn(&turn) {
                    Ok(()) => turn,
                    Err(LogError::TurnConflict(_)) => {
                        warn!("Game {}: turn {} created concurrently, re-reading", self.game_id, key);
                        self.log.get_turn(key)?.ok_or(EngineError::TurnNotFound(key))?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        if let Some(prev) = &self.state.current_turn {
            ensure_invariant!(
                prev.end == Some(turn.begin),
                "{} begins at {} but {} ends at {:?}",
                turn.key,
                turn.begin,
                prev.key,
                prev.end
            );
        }
        if self.state.current_turn.as_ref().map(|t| t.key.phase) == Some(Phase::Creation) {
            self.check_creation()?;
        }

        self.state.prev_turn = self.state.current_turn.replace(turn.clone());
        self.state.position = None;
        self.state.automatic_in_turn = 0;
        self.state.stamp = Some(turn.begin);
        info!("Game {} entered {} (begin {})", self.game_id, turn.key, turn.begin);

        if self.state.over {
            return Ok(());
        }
        match turn.key.phase {
            Phase::Dawn => {
                self.compute_dawn()?;
                self.bookkeeping()?;
            }
            Phase::Sunset => {
                self.compute_sunset()?;
                self.bookkeeping()?;
            }
            Phase::Creation | Phase::Night | Phase::Day => {}
        }
        Ok(())
    }

    /// Leaving Creation requires a complete deal.
    fn check_creation(&self) -> Result<(), EngineError> {
        let ruleset = self
            .state
            .ruleset
            .ok_or_else(|| EngineError::Invariant("game started without a ruleset".into()))?;
        ensure_invariant!(
            self.state.players.iter().all(|p| p.role.is_some()),
            "game started before every role was dealt"
        );
        for team in ruleset.teams() {
            ensure_invariant!(
                self.state.players.iter().any(|p| p.team == *team),
                "team {:?} has no member",
                team
            );
        }
        for role in ruleset.required_roles() {
            ensure_invariant!(
                self.state.players.iter().any(|p| p.role_kind() == Some(*role)),
                "required role {} not dealt",
                role
            );
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::{Command, DeathCause, MayorCause, StakeFailedCause};
    use crate::game::roles::RoleKind::{self, *};
    use crate::game::ruleset::Ruleset;
    use crate::game::testing::TestGame;
    use proptest::prelude::*;

    const STANDARD: [RoleKind; 10] =
        [Villager, Villager, Villager, Villager, Wolf, Wolf, Necromancer, Witch, Hypnotist, Hypnotist];

    // Two leaders per team, so a single death never dooms a team.
    const TEN: [RoleKind; 10] =
        [Villager, Villager, Villager, Villager, Villager, Wolf, Wolf, Necromancer, Necromancer, Hypnotist];

    #[test]
    fn test_seeded_mayor() {
        let game = TestGame::started(Ruleset::Negromanti, &STANDARD, 2204);
        assert_eq!(game.dynamics.mayor(), Some(PlayerId(4)));

        let game = TestGame::started(Ruleset::Negromanti, &STANDARD, 1);
        assert_eq!(game.dynamics.mayor(), Some(PlayerId(0)));
    }

    #[test]
    fn test_first_turns() {
        let mut game = TestGame::started(Ruleset::Negromanti, &TEN, 2204);
        assert_eq!(game.phase(), Phase::Creation);
        game.close_creation();
        assert_eq!(game.phase(), Phase::Night);
        game.advance_to(Phase::Day);
        assert_eq!(game.dynamics.current_turn().unwrap().key, TurnKey::new(1, Phase::Day));
    }

    #[test]
    fn test_missing_team_is_fatal() {
        let mut game = TestGame::started(Ruleset::Negromanti, &[Villager, Villager, Wolf, Wolf], 3);
        let err = game.dynamics.close_current_turn(None).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
        assert!(game.dynamics.is_failed());
        assert!(matches!(game.dynamics.update(), Err(EngineError::Failed(_))));
    }

    #[test]
    fn test_rule_violation_is_not_fatal() {
        let mut game = TestGame::started(Ruleset::Negromanti, &TEN, 2204);
        game.close_creation();
        let vote = EventData::Command(Command::Vote { player: PlayerId(0), target: Some(PlayerId(1)) });
        let err = game.dynamics.inject_event(vote, None).unwrap_err();
        assert!(matches!(err, EngineError::Rule(RuleViolation::WrongPhase(Phase::Night))));
        assert!(!game.dynamics.is_failed());
    }

    #[test]
    fn test_automatic_events_rejected() {
        let mut game = TestGame::started(Ruleset::Negromanti, &TEN, 2204);
        let data = EventData::PlayerDies { player: PlayerId(0), cause: DeathCause::Wolves };
        let err = game.dynamics.inject_event(data, None).unwrap_err();
        assert!(matches!(err, EngineError::Rule(RuleViolation::AutomaticEvent)));
    }

    #[test]
    fn test_timestamp_before_last_event() {
        let mut game = TestGame::started(Ruleset::Negromanti, &TEN, 2204);
        game.close_creation();
        game.advance_to(Phase::Day);
        let begin = game.dynamics.current_turn().unwrap().begin;
        game.clock.advance(chrono::Duration::hours(1));
        game.vote(&[Some(1)]);

        let late = EventData::Command(Command::Vote { player: PlayerId(1), target: None });
        let err = game.dynamics.inject_event(late, Some(begin)).unwrap_err();
        assert!(matches!(err, EngineError::Rule(RuleViolation::TimestampOutOfTurn)));
    }

    #[test]
    fn test_stake_by_majority() {
        let mut game = TestGame::started(Ruleset::Negromanti, &STANDARD, 2204);
        game.close_creation();
        game.advance_to(Phase::Day);
        game.vote(&[Some(0), Some(0), Some(0), Some(0), Some(0), Some(0), Some(1), Some(1), Some(2), None]);
        game.advance_to(Phase::Sunset);

        assert!(!game.dynamics.player(PlayerId(0)).unwrap().alive);
        assert!(game.has_event(&EventData::PlayerDies { player: PlayerId(0), cause: DeathCause::Stake }));
    }

    #[test]
    fn test_ballot_order_does_not_matter() {
        use rand::seq::SliceRandom;
        use rand::{rngs::StdRng, SeedableRng};

        let ballots = [Some(0), Some(0), Some(0), Some(0), Some(0), Some(0), Some(1), Some(1), Some(2), None];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..3 {
            let mut order: Vec<u32> = (0..10).collect();
            order.shuffle(&mut rng);

            let mut game = TestGame::started(Ruleset::Negromanti, &STANDARD, 2204);
            game.close_creation();
            game.advance_to(Phase::Day);
            for voter in order {
                game.inject(EventData::Command(Command::Vote {
                    player: PlayerId(voter),
                    target: ballots[voter as usize].map(PlayerId),
                }));
            }
            game.advance_to(Phase::Sunset);
            assert!(game.has_event(&EventData::PlayerDies { player: PlayerId(0), cause: DeathCause::Stake }));
        }
    }

    #[test]
    fn test_replay_is_deterministic() {
        let mut game = TestGame::started(Ruleset::Negromanti, &TEN, 2204);
        game.close_creation();
        game.advance_to(Phase::Day);
        game.vote(&[Some(3), Some(3), Some(3), Some(3), Some(3), Some(3)]);
        game.advance_to(Phase::Night);

        let replayed = game.replay();
        assert_eq!(replayed.state_hash().unwrap(), game.dynamics.state_hash().unwrap());
        assert_eq!(replayed.history(), game.dynamics.history());
    }

    #[test]
    fn test_stored_automatic_events_are_not_duplicated() {
        let mut game = TestGame::started_with(Ruleset::Negromanti, &TEN, 2204, true);
        game.close_creation();
        game.advance_to(Phase::Day);
        game.vote(&[Some(2), Some(2), Some(2), Some(2), Some(2), Some(2)]);
        game.advance_to(Phase::Night);

        let stored = game.log.len().unwrap();
        let replayed = game.replay();
        assert_eq!(game.log.len().unwrap(), stored);
        assert_eq!(replayed.state_hash().unwrap(), game.dynamics.state_hash().unwrap());

        assert!(game.log.purge_automatic().unwrap() > 0);
        let purged = game.replay();
        assert_eq!(purged.state_hash().unwrap(), game.dynamics.state_hash().unwrap());
    }

    #[test]
    fn test_quorum_missing() {
        let mut game = TestGame::started(Ruleset::Negromanti, &TEN, 2204);
        game.close_creation();
        game.advance_to(Phase::Day);
        game.vote(&[Some(0), Some(0)]);
        game.advance_to(Phase::Sunset);
        assert!(game.has_event(&EventData::StakeFailed { cause: StakeFailedCause::MissingQuorum }));
        assert_eq!(game.dynamics.alive_players().len(), 10);
    }

    #[test]
    fn test_mayor_set_at_creation() {
        let game = TestGame::started(Ruleset::Negromanti, &TEN, 2204);
        let beginning = game
            .dynamics
            .history()
            .iter()
            .filter(|e| matches!(e.data, EventData::SetMayor { cause: MayorCause::Beginning, .. }))
            .count();
        assert_eq!(beginning, 1);
    }

    // Hypnotists are not dealt under v2.
    const TEN_V2: [RoleKind; 10] =
        [Villager, Villager, Villager, Villager, Villager, Wolf, Wolf, Necromancer, Necromancer, Villager];

    fn day_one(ruleset: Ruleset, seed: u64) -> TestGame {
        let deck = if ruleset == Ruleset::V2 { &TEN_V2 } else { &TEN };
        let mut game = TestGame::started(ruleset, deck, seed);
        game.close_creation();
        game.advance_to(Phase::Day);
        game
    }

    fn staked(game: &TestGame) -> Option<PlayerId> {
        game.dynamics.history().iter().find_map(|e| match e.data {
            EventData::PlayerDies { player, cause: DeathCause::Stake } => Some(player),
            _ => None,
        })
    }

    #[test]
    fn test_stake_at_half_quorum() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        game.vote(&[Some(1), Some(1), Some(1), Some(1), Some(1)]);
        game.advance_to(Phase::Night);
        assert_eq!(staked(&game), Some(PlayerId(1)));
    }

    #[test]
    fn test_mayor_breaks_tie() {
        let mut game = day_one(Ruleset::Negromanti, 1);
        assert_eq!(game.dynamics.mayor(), Some(PlayerId(0)));
        game.vote(&[Some(5), Some(5), Some(5), Some(1), Some(1), Some(1), Some(3), Some(4)]);
        game.advance_to(Phase::Night);
        assert_eq!(staked(&game), Some(PlayerId(5)));
    }

    #[test]
    fn test_strict_quorum() {
        let cases: [(&[Option<u32>], Option<u32>); 4] = [
            (&[Some(0), Some(0), Some(0), Some(0), Some(0), Some(0)], Some(0)),
            (&[Some(0), Some(0), Some(0), Some(0), Some(0)], None),
            (&[Some(0), Some(0), Some(0), Some(0), Some(0), Some(1), Some(1), Some(1), Some(1), Some(1)], None),
            (&[Some(0), Some(0), Some(0), Some(0), Some(0), Some(0), Some(1), Some(1), Some(1), Some(1)], Some(0)),
        ];
        for (votes, expected) in cases {
            let mut game = day_one(Ruleset::V2, 2204);
            game.vote(votes);
            game.advance_to(Phase::Night);
            assert_eq!(staked(&game), expected.map(PlayerId), "votes {votes:?}");
        }
    }

    #[test]
    fn test_election_majority() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        game.elect(&[Some(2), Some(2), Some(2), Some(2), Some(2), Some(2)]);
        game.advance_to(Phase::Night);
        assert_eq!(game.dynamics.mayor(), Some(PlayerId(2)));

        let mut game = day_one(Ruleset::Negromanti, 2204);
        game.elect(&[Some(2), Some(2), Some(2), Some(2), Some(2), Some(3), Some(3), Some(3), Some(3), Some(3)]);
        game.advance_to(Phase::Night);
        assert_eq!(game.dynamics.mayor(), Some(PlayerId(4)));
    }

    #[test]
    fn test_new_mayor_breaks_tie() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        game.elect(&[Some(7), Some(7), Some(7), Some(7), Some(7), Some(7)]);
        game.vote(&[Some(3), Some(3), Some(5), Some(5), Some(3), None, None, Some(5)]);
        game.advance_to(Phase::Night);
        assert_eq!(game.dynamics.mayor(), Some(PlayerId(7)));
        assert_eq!(staked(&game), Some(PlayerId(5)));
    }

    #[test]
    fn test_deputy_succeeds_staked_mayor() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        let deputy = game.players_with(Villager).into_iter().find(|p| *p != PlayerId(4)).unwrap();
        game.inject(EventData::Command(Command::Appoint { player: PlayerId(4), target: Some(deputy) }));
        assert_eq!(game.dynamics.deputy(), Some(deputy));
        game.vote(&[Some(4), Some(4), Some(4), Some(4), Some(4), Some(4)]);
        game.advance_to(Phase::Night);

        assert_eq!(game.dynamics.mayor(), Some(deputy));
        assert!(game.has_event(&EventData::SetMayor { player: Some(deputy), cause: MayorCause::SuccessionChosen }));
    }

    #[test]
    fn test_election_clears_deputy() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        game.inject(EventData::Command(Command::Appoint { player: PlayerId(4), target: Some(PlayerId(2)) }));
        game.elect(&[Some(7), Some(7), Some(7), Some(7), Some(7), Some(7)]);
        game.advance_to(Phase::Night);
        assert_eq!(game.dynamics.mayor(), Some(PlayerId(7)));
        assert_eq!(game.dynamics.deputy(), None);
    }

    #[test]
    fn test_wolves_must_agree() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        game.advance_to(Phase::Night);
        let wolves = game.players_with(Wolf);
        let villagers = game.players_with(Villager);
        game.power(wolves[0], villagers[0]);
        game.power(wolves[1], villagers[1]);
        game.advance_to(Phase::Day);

        assert_eq!(game.dynamics.alive_players().len(), 10);
        for wolf in wolves {
            assert!(game.dynamics.history().iter().any(|e| matches!(
                e.data,
                EventData::PowerOutcome { player, success: false, .. } if player == wolf
            )));
        }
    }

    #[test]
    fn test_wolves_kill_at_dawn() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        game.advance_to(Phase::Night);
        let wolves = game.players_with(Wolf);
        let victim = game.players_with(Villager)[0];
        game.power(wolves[0], victim);
        game.power(wolves[1], victim);
        game.advance_to(Phase::Day);

        assert!(!game.dynamics.player(victim).unwrap().alive);
        assert!(game.has_event(&EventData::PlayerDies { player: victim, cause: DeathCause::Wolves }));
        assert_eq!(game.dynamics.dead_players().len(), 1);
    }

    #[test]
    fn test_turn_gap_is_fatal() {
        let game = TestGame::started(Ruleset::Negromanti, &TEN, 2204);
        let creation_end = game.clock.now() + chrono::Duration::hours(1);
        game.log.set_turn_end(TurnKey::first(), Some(creation_end)).unwrap();
        let night = Turn {
            key: TurnKey::first().next(),
            begin: creation_end + chrono::Duration::hours(1),
            end: None,
        };
        game.log.create_turn(&night).unwrap();
        game.clock.set(creation_end);

        let mut dynamics = Dynamics::new(
            game.dynamics.game_id(),
            game.usernames.clone(),
            Arc::new(game.log.clone()),
            Arc::new(game.clock.clone()),
            game.config.clone(),
        );
        assert!(matches!(dynamics.update(), Err(EngineError::Invariant(_))));
        assert!(dynamics.is_failed());
    }

    #[test]
    fn test_stored_turns_are_contiguous() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        game.vote(&[Some(3), Some(3), Some(3), Some(3), Some(3), Some(3)]);
        game.advance_to(Phase::Night);
        game.advance_to(Phase::Day);

        let turns = game.log.turns().unwrap();
        assert_eq!(turns.len(), 8);
        assert_eq!(turns[0].key, TurnKey::first());
        for pair in turns.windows(2) {
            assert_eq!(pair[1].key, pair[0].key.next());
            assert_eq!(pair[0].end, Some(pair[1].begin), "gap after {}", pair[0].key);
        }
        assert_eq!(turns.last().map(|t| t.key), game.dynamics.current_turn().map(|t| t.key));
    }

    fn assert_mayor_alive(game: &TestGame) {
        match game.dynamics.mayor() {
            Some(mayor) => assert!(
                game.dynamics.player(mayor).unwrap().is_alive_and_active(),
                "mayor {mayor} not alive in {}",
                game.dynamics.current_turn().unwrap().key
            ),
            None => assert!(game.dynamics.alive_players().is_empty()),
        }
    }

    #[test]
    fn test_mayor_alive_after_every_bookkeeping() {
        let mut game = day_one(Ruleset::Negromanti, 2204);
        assert_mayor_alive(&game);

        'days: for _ in 0..6 {
            let mayor = game.dynamics.mayor().unwrap();
            let voters: Vec<PlayerId> = game.dynamics.alive_players().iter().map(|p| p.id).collect();
            for voter in voters {
                game.inject(EventData::Command(Command::Vote { player: voter, target: Some(mayor) }));
            }
            for phase in [Phase::Sunset, Phase::Night, Phase::Dawn, Phase::Day] {
                if game.dynamics.is_over() {
                    break 'days;
                }
                game.advance_to(phase);
                assert_mayor_alive(&game);
            }
        }

        let successions = game
            .dynamics
            .history()
            .iter()
            .filter(|e| matches!(e.data, EventData::SetMayor { cause: MayorCause::SuccessionRandom, .. }))
            .count();
        assert!(successions >= 2);
    }

    fn ghostified(game: &TestGame, ghost: PlayerId) -> Option<RoleKind> {
        game.dynamics.history().iter().find_map(|e| match e.data {
            EventData::Ghostification { player, ghost: power, .. } if player == ghost => Some(power),
            _ => None,
        })
    }

    #[test]
    fn test_v2_spectral_sequence_and_switch() {
        use crate::game::events::{GhostificationCause, KnowledgeCause};
        let deck = [Villager, Villager, Villager, Villager, Villager, Wolf, Devil, Necromancer, Necromancer];
        let mut game = TestGame::started(Ruleset::V2, &deck, 2204);
        game.inject(EventData::SpectralSequence { sequence: vec![true, false, true, true] });
        game.close_creation();

        let villagers = game.players_with(Villager);
        let wolf = game.players_with(Wolf)[0];
        let devil = game.players_with(Devil)[0];
        let necromancers = game.players_with(Necromancer);

        game.advance_to(Phase::Day);
        game.advance_to(Phase::Night);
        game.power(wolf, villagers[0]);
        game.power_with(devil, villagers[1], None, &[Villager, Seer]);
        game.advance_to(Phase::Day);

        assert_eq!(ghostified(&game, villagers[0]), Some(Delusion));
        let ghost = &game.dynamics.players()[villagers[0].index()];
        assert_eq!(ghost.team, Team::Necromancers);
        assert_eq!(ghost.role_before_ghost, Some(Villager));
        for necromancer in &necromancers {
            assert!(game.has_event(&EventData::RoleKnowledge {
                player: villagers[0],
                target: *necromancer,
                role: Necromancer,
                cause: KnowledgeCause::Ghost,
            }));
            assert!(game.has_event(&EventData::RoleKnowledge {
                player: *necromancer,
                target: villagers[0],
                role: Delusion,
                cause: KnowledgeCause::SpectralSequence,
            }));
        }
        assert!(game.has_event(&EventData::MultipleRoleKnowledge {
            player: devil,
            target: villagers[1],
            roles: [Villager, Seer].into_iter().collect(),
            response: true,
            cause: KnowledgeCause::Devil,
        }));

        // The second draw is false: the next villager stays dead.
        game.advance_to(Phase::Night);
        game.power(wolf, villagers[1]);
        game.power_with(necromancers[0], villagers[0], Some(Amnesia), &[]);
        game.advance_to(Phase::Day);

        assert_eq!(ghostified(&game, villagers[1]), None);
        assert_eq!(game.dynamics.players()[villagers[1].index()].team, Team::Villagers);
        assert!(game.has_event(&EventData::GhostSwitch {
            player: villagers[0],
            ghost: Amnesia,
            cause: GhostificationCause::Necromancer,
        }));
        assert_eq!(game.dynamics.players()[villagers[0].index()].role_kind(), Some(Amnesia));
        assert!(game.dynamics.state().used_ghost_powers.contains(&Amnesia));

        let replayed = game.replay();
        assert_eq!(replayed.state_hash().unwrap(), game.dynamics.state_hash().unwrap());
    }

    #[test]
    fn test_lupus_rules() {
        use crate::game::events::KnowledgeCause;
        let deck = [Villager, Villager, Villager, Villager, Wolf, Wolf, Devil, Necromancer, Necromancer];
        let mut game = TestGame::started(Ruleset::NegromantiLupus8, &deck, 7);
        game.inject(EventData::SpectralSequence { sequence: vec![false, true] });
        game.close_creation();

        let villagers = game.players_with(Villager);
        let wolf = game.players_with(Wolf)[0];
        let devil = game.players_with(Devil)[0];
        let necromancer = game.players_with(Necromancer)[0];

        // The devil reads the true role.
        game.power_with(devil, necromancer, None, &[Necromancer]);
        game.advance_to(Phase::Day);
        assert!(game.has_event(&EventData::MultipleRoleKnowledge {
            player: devil,
            target: necromancer,
            roles: [Necromancer].into_iter().collect(),
            response: true,
            cause: KnowledgeCause::Devil,
        }));

        // Deaths draw from the end of the sequence.
        game.advance_to(Phase::Night);
        game.power(wolf, villagers[0]);
        game.advance_to(Phase::Day);
        assert_eq!(ghostified(&game, villagers[0]), Some(Delusion));
        assert_eq!(game.dynamics.state().spectral_sequence.as_ref().map(|s| s.len()), Some(1));

        // Necromancers cannot raise plain dead players.
        game.advance_to(Phase::Night);
        game.power(wolf, villagers[1]);
        game.advance_to(Phase::Day);
        assert_eq!(ghostified(&game, villagers[1]), None);

        game.advance_to(Phase::Night);
        game.power_with(necromancer, villagers[1], Some(Vision), &[]);
        game.advance_to(Phase::Day);
        assert_eq!(ghostified(&game, villagers[1]), None);
        assert!(game.has_event(&EventData::PowerOutcome {
            player: necromancer,
            target: villagers[1],
            success: false,
            sequestrated: false,
        }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_same_seed_same_hash(seed in 0u64..10_000) {
            let a = TestGame::started(Ruleset::Negromanti, &TEN, seed);
            let b = TestGame::started(Ruleset::Negromanti, &TEN, seed);
            prop_assert_eq!(a.dynamics.state_hash().unwrap(), b.dynamics.state_hash().unwrap());
            prop_assert!(a.dynamics.mayor().is_some());
        }
    }
}
